//! Restricts which channels non-operators may create
//!
//! ```toml
//! [[deny_channel]]
//! name = "#warez*"
//! reason = "No warez"
//!
//! [[allow_channel]]
//! name = "#warez-help"
//! ```

use modircd_core::utils::string::wildcard_match;
use modircd_core::{
    Capability, CapabilitySet, Channel, Config, HookResult, Module, ModuleContext, NumericReply, Result, User,
    Version, VersionFlags,
};
use tracing::{debug, info};

const DEFAULT_REASON: &str = "Channel is disallowed";

#[derive(Debug, Clone, PartialEq, Eq)]
struct DenyRule {
    mask: String,
    reason: String,
}

#[derive(Debug, Default)]
pub struct AllowDenyChansModule {
    deny: Vec<DenyRule>,
    allow: Vec<String>,
}

impl AllowDenyChansModule {
    pub fn new() -> Self {
        Self::default()
    }

    fn load(&mut self, config: &Config) {
        let reader = config.reader();
        self.deny = (0..reader.enumerate("deny_channel"))
            .filter_map(|i| {
                let mask = reader.read_value("deny_channel", "name", i)?;
                let reason = reader
                    .read_value("deny_channel", "reason", i)
                    .unwrap_or_else(|| DEFAULT_REASON.to_string());
                Some(DenyRule { mask, reason })
            })
            .collect();
        self.allow = (0..reader.enumerate("allow_channel"))
            .filter_map(|i| reader.read_value("allow_channel", "name", i))
            .collect();
        info!(
            "allowdenychans: {} deny and {} allow rules",
            self.deny.len(),
            self.allow.len()
        );
    }

    /// Reason the channel may not be created, if it is denied and not excepted
    pub fn denial(&self, name: &str) -> Option<&str> {
        let rule = self.deny.iter().find(|r| wildcard_match(&r.mask, name))?;
        if self.allow.iter().any(|mask| wildcard_match(mask, name)) {
            debug!("{} is denied by {} but explicitly allowed", name, rule.mask);
            return None;
        }
        Some(rule.reason.as_str())
    }
}

impl Module for AllowDenyChansModule {
    fn name(&self) -> &str {
        "allowdenychans"
    }

    fn version(&self) -> Version {
        Version::new(1, 1, 0, 0, VersionFlags::VENDOR)
    }

    fn description(&self) -> &str {
        "Prevents non-operators from creating denied channels"
    }

    fn implements(&self) -> CapabilitySet {
        CapabilitySet::of(&[Capability::UserPreJoin, Capability::Rehash])
    }

    fn init(&mut self, ctx: &mut ModuleContext<'_>) -> Result<()> {
        self.load(ctx.config());
        Ok(())
    }

    fn on_user_pre_join(&mut self, user: &User, channel: Option<&Channel>, name: &str) -> HookResult {
        if channel.is_some() || user.is_operator() {
            return HookResult::Default;
        }
        let Some(reason) = self.denial(name) else {
            return HookResult::Default;
        };
        user.write_notice(&format!("*** Cannot create channel {} ({})", name, reason));
        user.write_numeric(
            NumericReply::ErrBannedFromChan,
            &[name, &format!("Cannot join channel ({})", reason)],
        );
        HookResult::Deny
    }

    fn on_rehash(&mut self, config: &Config) {
        self.load(config);
    }
}
