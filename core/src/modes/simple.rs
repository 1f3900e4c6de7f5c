//! Flag modes without parameters

use super::{ModeAction, ModeHandler, ModeSource, ModeTarget, ModeType};
use tracing::info;

/// Channel flag such as `+n` or `+t`
pub struct SimpleChannelMode {
    letter: char,
}

impl SimpleChannelMode {
    pub fn new(letter: char) -> Self {
        Self { letter }
    }
}

impl ModeHandler for SimpleChannelMode {
    fn mode_char(&self) -> char {
        self.letter
    }

    fn mode_type(&self) -> ModeType {
        ModeType::Channel
    }

    fn on_mode_change(
        &self,
        _source: &ModeSource,
        target: ModeTarget<'_>,
        _parameter: &mut String,
        adding: bool,
    ) -> ModeAction {
        let ModeTarget::Channel { channel, .. } = target else {
            return ModeAction::Deny;
        };
        let changed = if adding {
            channel.set_mode(self.letter)
        } else {
            channel.unset_mode(self.letter)
        };
        if changed {
            ModeAction::Allow
        } else {
            ModeAction::Deny
        }
    }
}

/// User flag a user sets on themselves, optionally limited to operators
pub struct SimpleUserMode {
    letter: char,
    oper_only: bool,
}

impl SimpleUserMode {
    pub fn new(letter: char) -> Self {
        Self {
            letter,
            oper_only: false,
        }
    }

    pub fn oper_only(letter: char) -> Self {
        Self {
            letter,
            oper_only: true,
        }
    }
}

impl ModeHandler for SimpleUserMode {
    fn mode_char(&self) -> char {
        self.letter
    }

    fn mode_type(&self) -> ModeType {
        ModeType::User
    }

    fn oper_only(&self) -> bool {
        self.oper_only
    }

    fn on_mode_change(
        &self,
        _source: &ModeSource,
        target: ModeTarget<'_>,
        _parameter: &mut String,
        adding: bool,
    ) -> ModeAction {
        let ModeTarget::User(user) = target else {
            return ModeAction::Deny;
        };
        let changed = if adding {
            user.add_mode(self.letter)
        } else {
            user.remove_mode(self.letter)
        };
        if changed {
            ModeAction::Allow
        } else {
            ModeAction::Deny
        }
    }
}

/// User mode `o`: granted by the server on oper-up, only ever removed through MODE
pub struct OperMode;

impl ModeHandler for OperMode {
    fn mode_char(&self) -> char {
        'o'
    }

    fn mode_type(&self) -> ModeType {
        ModeType::User
    }

    fn on_mode_change(
        &self,
        _source: &ModeSource,
        target: ModeTarget<'_>,
        _parameter: &mut String,
        adding: bool,
    ) -> ModeAction {
        let ModeTarget::User(user) = target else {
            return ModeAction::Deny;
        };
        if adding || !user.remove_mode('o') {
            return ModeAction::Deny;
        }
        if let Some(oper_type) = user.oper_type.take() {
            info!("{} is no longer an operator ({})", user.nick, oper_type);
        }
        ModeAction::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::user::User;

    #[test]
    fn test_unchanged_state_is_denied() {
        let mode = SimpleChannelMode::new('n');
        let mut channel = Channel::new("#test");
        let source = ModeSource::server("irc.test");
        let mut param = String::new();

        let apply = |channel: &mut Channel, adding: bool, param: &mut String| {
            mode.on_mode_change(
                &source,
                ModeTarget::Channel {
                    channel,
                    member: None,
                },
                param,
                adding,
            )
        };
        assert_eq!(apply(&mut channel, true, &mut param), ModeAction::Allow);
        assert_eq!(apply(&mut channel, true, &mut param), ModeAction::Deny);
        assert_eq!(apply(&mut channel, false, &mut param), ModeAction::Allow);
        assert_eq!(apply(&mut channel, false, &mut param), ModeAction::Deny);
    }

    #[test]
    fn test_oper_mode_only_removes() {
        let mut user = User::new("h".into(), "1.1.1.1".into(), "irc.test".into(), None);
        let source = ModeSource::server("irc.test");
        let mut param = String::new();

        assert_eq!(
            OperMode.on_mode_change(&source, ModeTarget::User(&mut user), &mut param, true),
            ModeAction::Deny
        );
        user.oper_type = Some("NetAdmin".into());
        user.add_mode('o');
        assert_eq!(
            OperMode.on_mode_change(&source, ModeTarget::User(&mut user), &mut param, false),
            ModeAction::Allow
        );
        assert!(!user.is_operator());
    }
}
