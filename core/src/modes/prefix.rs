//! Channel status modes: op, halfop, voice

use super::{AccessType, ModeAction, ModeHandler, ModeSource, ModeTarget, ModeType};
use crate::channel::{Channel, HALFOP_VALUE, OP_VALUE, VOICE_VALUE};
use crate::config::Config;
use std::sync::atomic::{AtomicBool, Ordering};

/// A rank granted to a channel member
pub struct PrefixMode {
    letter: char,
    glyph: char,
    rank: u32,
    required: u32,
    grant: AccessType,
    revoke: AccessType,
    denied: &'static str,
    /// Members may drop this status from themselves
    self_removal: bool,
    enabled: AtomicBool,
}

impl PrefixMode {
    pub fn op() -> Self {
        Self {
            letter: 'o',
            glyph: '@',
            rank: OP_VALUE,
            required: OP_VALUE,
            grant: AccessType::Op,
            revoke: AccessType::Deop,
            denied: "You're not a channel operator",
            self_removal: false,
            enabled: AtomicBool::new(true),
        }
    }

    pub fn halfop() -> Self {
        Self {
            letter: 'h',
            glyph: '%',
            rank: HALFOP_VALUE,
            required: OP_VALUE,
            grant: AccessType::Halfop,
            revoke: AccessType::Dehalfop,
            denied: "You're not a channel operator",
            self_removal: true,
            enabled: AtomicBool::new(true),
        }
    }

    pub fn voice() -> Self {
        Self {
            letter: 'v',
            glyph: '+',
            rank: VOICE_VALUE,
            required: HALFOP_VALUE,
            grant: AccessType::Voice,
            revoke: AccessType::Devoice,
            denied: "You're not a channel (half)operator",
            self_removal: false,
            enabled: AtomicBool::new(true),
        }
    }
}

impl ModeHandler for PrefixMode {
    fn mode_char(&self) -> char {
        self.letter
    }

    fn mode_type(&self) -> ModeType {
        ModeType::Channel
    }

    fn parameters(&self, _adding: bool) -> usize {
        1
    }

    fn prefix(&self) -> Option<char> {
        Some(self.glyph)
    }

    fn prefix_rank(&self) -> u32 {
        self.rank
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn required_rank(&self, _adding: bool) -> u32 {
        self.required
    }

    fn access_type(&self, adding: bool) -> AccessType {
        if adding {
            self.grant
        } else {
            self.revoke
        }
    }

    fn permits_self(&self, adding: bool) -> bool {
        !adding && self.self_removal
    }

    fn denied_message(&self, _adding: bool) -> &str {
        self.denied
    }

    fn on_mode_change(
        &self,
        _source: &ModeSource,
        target: ModeTarget<'_>,
        _parameter: &mut String,
        adding: bool,
    ) -> ModeAction {
        let ModeTarget::Channel {
            channel,
            member: Some(id),
        } = target
        else {
            return ModeAction::Deny;
        };
        let Some(member) = channel.member_mut(id) else {
            return ModeAction::Deny;
        };
        let changed = if adding {
            member.grant(self.letter, self.rank)
        } else {
            member.revoke(self.letter)
        };
        if changed {
            ModeAction::Allow
        } else {
            ModeAction::Deny
        }
    }

    fn channel_removals(&self, channel: &Channel) -> Vec<String> {
        channel
            .members
            .values()
            .filter(|m| m.has(self.letter))
            .map(|m| m.nick.clone())
            .collect()
    }

    fn on_rehash(&self, config: &Config) {
        if self.letter == 'h' {
            self.enabled
                .store(config.options.allow_halfop, Ordering::Relaxed);
        }
    }
}
