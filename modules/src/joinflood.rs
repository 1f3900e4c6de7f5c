//! Join flood protection (`+j joins:seconds`)
//!
//! Counts joins per channel. Once `joins` arrive within `seconds` the channel is
//! closed to new members for [`LOCK_SECONDS`].

use modircd_core::utils::time::current_unix_timestamp;
use modircd_core::{
    Capability, CapabilitySet, Channel, CleanupTarget, HookResult, ModeAction, ModeHandler, ModeSource,
    ModeTarget, ModeType, Module, ModuleContext, Result, SlotKey, User, Version, VersionFlags,
};
use tracing::info;

/// How long a channel stays locked after a flood
pub const LOCK_SECONDS: i64 = 60;

/// Longest accepted counting window (one day)
pub const MAX_SECONDS: i64 = 86_400;

const ERR_INVALIDFLOODPARAM: u16 = 608;
const ERR_CHANNELLOCKED: u16 = 609;

/// Per-channel flood counter kept in the channel's slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinFloodSettings {
    pub joins: u32,
    pub seconds: i64,
    counter: u32,
    reset_at: i64,
    unlock_at: Option<i64>,
}

impl JoinFloodSettings {
    pub fn new(joins: u32, seconds: i64, now: i64) -> Self {
        Self {
            joins,
            seconds,
            counter: 0,
            reset_at: now.saturating_add(seconds),
            unlock_at: None,
        }
    }

    /// Parse `joins:seconds`; both must be at least 1 and `seconds` at most [`MAX_SECONDS`]
    pub fn parse(parameter: &str, now: i64) -> Option<Self> {
        let (joins, seconds) = parameter.split_once(':')?;
        let joins: u32 = joins.trim().parse().ok()?;
        let seconds: i64 = seconds.trim().parse().ok()?;
        if joins < 1 || !(1..=MAX_SECONDS).contains(&seconds) {
            return None;
        }
        Some(Self::new(joins, seconds, now))
    }

    pub fn parameter(&self) -> String {
        format!("{}:{}", self.joins, self.seconds)
    }

    /// Count a join, restarting the window when it has passed
    pub fn add_join(&mut self, now: i64) {
        if now > self.reset_at {
            self.counter = 0;
            self.reset_at = now.saturating_add(self.seconds);
        }
        self.counter = self.counter.saturating_add(1);
    }

    pub fn should_lock(&self) -> bool {
        self.counter >= self.joins
    }

    pub fn lock(&mut self, now: i64) {
        self.counter = 0;
        self.unlock_at = Some(now.saturating_add(LOCK_SECONDS));
    }

    pub fn is_locked(&self, now: i64) -> bool {
        self.unlock_at.is_some_and(|at| now <= at)
    }
}

struct JoinFloodMode {
    slot: SlotKey<JoinFloodSettings>,
}

impl ModeHandler for JoinFloodMode {
    fn mode_char(&self) -> char {
        'j'
    }

    fn mode_type(&self) -> ModeType {
        ModeType::Channel
    }

    fn parameters(&self, adding: bool) -> usize {
        usize::from(adding)
    }

    fn on_mode_change(
        &self,
        source: &ModeSource,
        target: ModeTarget<'_>,
        parameter: &mut String,
        adding: bool,
    ) -> ModeAction {
        let ModeTarget::Channel { channel, .. } = target else {
            return ModeAction::Deny;
        };

        if !adding {
            if channel.ext.take(&self.slot).is_none() {
                return ModeAction::Deny;
            }
            channel.unset_mode('j');
            return ModeAction::Allow;
        }

        let Some(settings) = JoinFloodSettings::parse(parameter, current_unix_timestamp()) else {
            source.reply_code(ERR_INVALIDFLOODPARAM, &[&channel.name, "Invalid flood parameter"]);
            return ModeAction::Deny;
        };
        let canonical = settings.parameter();
        if channel.param('j') == Some(canonical.as_str()) {
            return ModeAction::Deny;
        }
        channel.set_param('j', &canonical);
        channel.ext.set(&self.slot, settings);
        *parameter = canonical;
        ModeAction::Allow
    }
}

pub struct JoinFloodModule {
    slot: Option<SlotKey<JoinFloodSettings>>,
}

impl JoinFloodModule {
    pub fn new() -> Self {
        Self { slot: None }
    }

    /// PreJoin check against an explicit clock
    pub fn check_join(&self, user: &User, channel: Option<&Channel>, now: i64) -> HookResult {
        let (Some(slot), Some(channel)) = (self.slot.as_ref(), channel) else {
            return HookResult::Default;
        };
        match channel.ext.get(slot) {
            Some(settings) if settings.is_locked(now) => {
                user.write_numeric_code(
                    ERR_CHANNELLOCKED,
                    &[
                        &channel.name,
                        "This channel is temporarily unavailable (+j). Please try again later.",
                    ],
                );
                HookResult::Deny
            }
            _ => HookResult::Default,
        }
    }

    /// Count a completed join, locking the channel once the threshold is reached
    pub fn record_join(&self, user: &User, channel: &mut Channel, now: i64) {
        let Some(slot) = self.slot.as_ref() else {
            return;
        };
        let Some(settings) = channel.ext.get_mut(slot) else {
            return;
        };
        settings.add_join(now);
        if !settings.should_lock() {
            return;
        }
        settings.lock(now);
        let (joins, seconds) = (settings.joins, settings.seconds);
        info!("Join flood on {}, locking for {}s", channel.name, LOCK_SECONDS);
        channel.write_all(
            &format!(
                ":{} NOTICE {} :This channel has been closed to new users for {} seconds because there have been more than {} joins in {} seconds.",
                user.server, channel.name, LOCK_SECONDS, joins, seconds
            ),
            None,
        );
    }
}

impl Default for JoinFloodModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for JoinFloodModule {
    fn name(&self) -> &str {
        "joinflood"
    }

    fn version(&self) -> Version {
        Version::new(1, 1, 0, 0, VersionFlags::COMMON | VersionFlags::VENDOR)
    }

    fn description(&self) -> &str {
        "Provides channel mode +j (join flood protection)"
    }

    fn implements(&self) -> CapabilitySet {
        CapabilitySet::of(&[
            Capability::UserPreJoin,
            Capability::UserJoin,
            Capability::ChannelDelete,
            Capability::Cleanup,
        ])
    }

    fn init(&mut self, ctx: &mut ModuleContext<'_>) -> Result<()> {
        let slot = ctx.register_slot::<JoinFloodSettings>("joinflood");
        ctx.add_mode(Box::new(JoinFloodMode { slot }))?;
        self.slot = Some(slot);
        Ok(())
    }

    fn on_user_pre_join(&mut self, user: &User, channel: Option<&Channel>, _name: &str) -> HookResult {
        self.check_join(user, channel, current_unix_timestamp())
    }

    fn on_user_join(&mut self, user: &User, channel: &mut Channel) {
        self.record_join(user, channel, current_unix_timestamp());
    }

    fn on_channel_delete(&mut self, channel: &mut Channel) {
        if let Some(slot) = self.slot.as_ref() {
            channel.ext.take(slot);
        }
    }

    fn on_cleanup(&mut self, target: CleanupTarget<'_>) {
        if let (CleanupTarget::Channel(channel), Some(slot)) = (target, self.slot.as_ref()) {
            channel.ext.take(slot);
        }
    }
}
