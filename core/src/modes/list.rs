//! Channel ban list (`+b`)

use super::{ModeAction, ModeHandler, ModeSource, ModeTarget, ModeType};
use crate::channel::{Channel, ListEntry};
use crate::config::Config;
use crate::numeric::NumericReply;
use crate::utils::string::normalize_ban_mask;
use crate::utils::time::current_unix_timestamp;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct BanMode {
    max_bans: AtomicUsize,
}

impl BanMode {
    pub fn new() -> Self {
        Self {
            max_bans: AtomicUsize::new(64),
        }
    }

    pub fn max_bans(&self) -> usize {
        self.max_bans.load(Ordering::Relaxed)
    }
}

impl Default for BanMode {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeHandler for BanMode {
    fn mode_char(&self) -> char {
        'b'
    }

    fn mode_type(&self) -> ModeType {
        ModeType::Channel
    }

    fn parameters(&self, _adding: bool) -> usize {
        1
    }

    fn is_list(&self) -> bool {
        true
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
        let Some(mask) = normalize_ban_mask(parameter) else {
            return ModeAction::Deny;
        };

        if adding {
            if channel.list('b').len() >= self.max_bans() {
                source.reply(
                    NumericReply::ErrBanListFull,
                    &[&channel.name, &mask, "Channel ban list is full"],
                );
                return ModeAction::Deny;
            }
            let entry = ListEntry {
                mask: mask.clone(),
                set_by: source.name.clone(),
                set_at: current_unix_timestamp(),
            };
            if !channel.add_list_entry('b', entry) {
                return ModeAction::Deny;
            }
            *parameter = mask;
            ModeAction::Allow
        } else {
            // Exact entry first, so odd masks that normalise differently stay removable
            let removed = channel
                .remove_list_entry('b', parameter)
                .or_else(|| channel.remove_list_entry('b', &mask));
            match removed {
                Some(entry) => {
                    *parameter = entry.mask;
                    ModeAction::Allow
                }
                None => ModeAction::Deny,
            }
        }
    }

    fn display_list(&self, source: &ModeSource, channel: &Channel) {
        for ban in channel.list('b') {
            source.reply(
                NumericReply::RplBanList,
                &[&channel.name, &ban.mask, &ban.set_by, &ban.set_at.to_string()],
            );
        }
        source.reply(NumericReply::RplEndOfBanList, &[&channel.name, "End of channel ban list"]);
    }

    fn channel_removals(&self, channel: &Channel) -> Vec<String> {
        channel.list('b').iter().map(|e| e.mask.clone()).collect()
    }

    fn on_rehash(&self, config: &Config) {
        self.max_bans
            .store(config.options.max_bans, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;

    fn set(mode: &BanMode, source: &ModeSource, channel: &mut Channel, mask: &str, adding: bool) -> (ModeAction, String) {
        let mut param = mask.to_string();
        let target = ModeTarget::Channel {
            channel,
            member: None,
        };
        let action = mode.on_mode_change(source, target, &mut param, adding);
        (action, param)
    }

    #[test]
    fn test_masks_are_normalised() {
        let mode = BanMode::new();
        let source = ModeSource::server("irc.test");
        let mut channel = Channel::new("#test");

        assert_eq!(
            set(&mode, &source, &mut channel, "baduser", true),
            (ModeAction::Allow, "baduser!*@*".to_string())
        );
        assert_eq!(set(&mode, &source, &mut channel, "BadUser!*@*", true).0, ModeAction::Deny);
        assert_eq!(
            set(&mode, &source, &mut channel, "baduser", false),
            (ModeAction::Allow, "baduser!*@*".to_string())
        );
        assert!(channel.list('b').is_empty());
    }

    #[test]
    fn test_full_list_is_refused() {
        let mode = BanMode::new();
        let mut config = Config::default();
        config.options.max_bans = 1;
        mode.on_rehash(&config);

        let (client, mut rx) = Client::channel("127.0.0.1:1");
        let mut source = ModeSource::server("irc.test");
        source.name = "alice".into();
        source.client = Some(client);

        let mut channel = Channel::new("#test");
        assert_eq!(set(&mode, &source, &mut channel, "*!*@a", true).0, ModeAction::Allow);
        assert_eq!(set(&mode, &source, &mut channel, "*!*@b", true).0, ModeAction::Deny);
        assert_eq!(
            rx.try_recv().unwrap(),
            ":irc.test 478 alice #test *!*@b :Channel ban list is full"
        );
    }
}
