//! Parameter modes: key (`+k`) and limit (`+l`)

use super::{ModeAction, ModeHandler, ModeSource, ModeTarget, ModeType};

const MAX_KEY_LENGTH: usize = 32;

/// Channel key. Takes a parameter in both directions; removal must name the current key.
pub struct KeyMode;

impl ModeHandler for KeyMode {
    fn mode_char(&self) -> char {
        'k'
    }

    fn mode_type(&self) -> ModeType {
        ModeType::Channel
    }

    fn parameters(&self, _adding: bool) -> usize {
        1
    }

    fn on_mode_change(
        &self,
        _source: &ModeSource,
        target: ModeTarget<'_>,
        parameter: &mut String,
        adding: bool,
    ) -> ModeAction {
        let ModeTarget::Channel { channel, .. } = target else {
            return ModeAction::Deny;
        };

        if adding {
            if channel.param('k').is_some() {
                return ModeAction::Deny;
            }
            let key: String = parameter
                .split([' ', ','])
                .next()
                .unwrap_or_default()
                .chars()
                .take(MAX_KEY_LENGTH)
                .collect();
            if key.is_empty() {
                return ModeAction::Deny;
            }
            channel.set_param('k', &key);
            *parameter = key;
            ModeAction::Allow
        } else {
            if channel.param('k') != Some(parameter.as_str()) {
                return ModeAction::Deny;
            }
            channel.unset_mode('k');
            ModeAction::Allow
        }
    }
}

/// Member limit. Takes a parameter only when set.
pub struct LimitMode;

impl ModeHandler for LimitMode {
    fn mode_char(&self) -> char {
        'l'
    }

    fn mode_type(&self) -> ModeType {
        ModeType::Channel
    }

    fn parameters(&self, adding: bool) -> usize {
        usize::from(adding)
    }

    fn on_mode_change(
        &self,
        _source: &ModeSource,
        target: ModeTarget<'_>,
        parameter: &mut String,
        adding: bool,
    ) -> ModeAction {
        let ModeTarget::Channel { channel, .. } = target else {
            return ModeAction::Deny;
        };

        if !adding {
            return if channel.unset_mode('l') {
                ModeAction::Allow
            } else {
                ModeAction::Deny
            };
        }

        let limit = match parameter.trim().parse::<u32>() {
            Ok(n) if n > 0 => n.to_string(),
            _ => return ModeAction::Deny,
        };
        if !channel.set_param('l', &limit) {
            return ModeAction::Deny;
        }
        *parameter = limit;
        ModeAction::Allow
    }
}
