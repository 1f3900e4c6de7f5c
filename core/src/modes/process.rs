//! Mode change processing
//!
//! One MODE request is walked letter by letter. Each letter is resolved, its parameter
//! consumed and sanity checked, authority verified for local sources, and finally handed to
//! the handler. Letters that fail any step are dropped; the rest form the relayed line.

use super::{ModeAction, ModeHandler, ModeRegistry, ModeSource, ModeTarget, ModeType};
use crate::capability::Capability;
use crate::channel::Channel;
use crate::module::HookResult;
use crate::module_manager::ModuleManager;
use crate::numeric::NumericReply;
use crate::state::ServerState;
use crate::user::{User, UserId};
use crate::utils::string::irc_to_lower;
use crate::module_manager::panic_message;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error};

/// Mutable server parts a mode change touches
pub struct ModeContext<'a> {
    pub state: &'a mut ServerState,
    pub modules: &'a mut ModuleManager,
}

/// One applied letter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMode {
    pub mode: char,
    pub adding: bool,
    /// Empty for letters without a parameter
    pub parameter: String,
}

impl AppliedMode {
    pub fn new(mode: char, adding: bool, parameter: impl Into<String>) -> Self {
        Self {
            mode,
            adding,
            parameter: parameter.into(),
        }
    }
}

/// Result of one MODE request
#[derive(Debug, Clone, Default)]
pub struct ModeOutcome {
    /// Canonical target name (channel name or nick)
    pub target: String,
    pub is_channel: bool,
    pub applied: Vec<AppliedMode>,
}

impl ModeOutcome {
    /// The relayed change, or `None` when nothing was applied
    pub fn line(&self) -> Option<String> {
        format_changes(&self.applied)
    }
}

/// Render applied letters as `+o-v alice bob`
pub fn format_changes(applied: &[AppliedMode]) -> Option<String> {
    if applied.is_empty() {
        return None;
    }
    let mut letters = String::new();
    let mut params = Vec::new();
    let mut current = None;
    for change in applied {
        if current != Some(change.adding) {
            letters.push(if change.adding { '+' } else { '-' });
            current = Some(change.adding);
        }
        letters.push(change.mode);
        if !change.parameter.is_empty() {
            params.push(change.parameter.as_str());
        }
    }
    if params.is_empty() {
        Some(letters)
    } else {
        Some(format!("{} {}", letters, params.join(" ")))
    }
}

impl ModeRegistry {
    /// Process a MODE request from `source` against `target`.
    ///
    /// Errors go to the source as numerics; the outcome holds only the applied letters.
    pub fn process(
        &self,
        ctx: &mut ModeContext<'_>,
        source: &ModeSource,
        target: &str,
        modes: &str,
        params: &[String],
    ) -> ModeOutcome {
        if target.starts_with('#') || target.starts_with('&') {
            self.process_channel(ctx, source, target, modes, params)
        } else {
            self.process_user(ctx, source, target, modes, params)
        }
    }

    fn process_channel(
        &self,
        ctx: &mut ModeContext<'_>,
        source: &ModeSource,
        target: &str,
        modes: &str,
        params: &[String],
    ) -> ModeOutcome {
        let state = &mut *ctx.state;
        let modules = &mut *ctx.modules;

        let Some(channel) = state.channels.get_mut(&irc_to_lower(target)) else {
            source.reply(NumericReply::ErrNoSuchChannel, &[target, "No such channel"]);
            return ModeOutcome::default();
        };
        let mut outcome = ModeOutcome {
            target: channel.name.clone(),
            is_channel: true,
            applied: Vec::new(),
        };

        if modes.is_empty() {
            let show_key = source.user.map(|id| channel.is_member(id)).unwrap_or(true);
            let (letters, values) = channel.modes_string(show_key);
            let mut reply: Vec<&str> = vec![channel.name.as_str(), letters.as_str()];
            reply.extend(values.iter().map(String::as_str));
            source.reply(NumericReply::RplChannelModeIs, &reply);
            return outcome;
        }

        let mut params = params.iter();
        let mut adding = true;
        for mode in modes.chars() {
            match mode {
                '+' => {
                    adding = true;
                    continue;
                }
                '-' => {
                    adding = false;
                    continue;
                }
                _ => {}
            }

            let Some(handler) = self.find(mode, ModeType::Channel) else {
                source.reply(
                    NumericReply::ErrUnknownMode,
                    &[&mode.to_string(), "is unknown mode char to me"],
                );
                continue;
            };

            let mut parameter = String::new();
            if handler.parameters(adding) > 0 {
                match params.next() {
                    Some(p) if !p.is_empty() => parameter = p.clone(),
                    _ => {
                        if handler.is_list() {
                            handler.display_list(source, channel);
                        }
                        continue;
                    }
                }
            }

            if !handler.enabled() {
                continue;
            }

            let hook = modules.dispatch_result(Capability::RawMode, |m| {
                m.on_raw_mode(source, &channel.name, mode, &parameter, adding)
            });
            if hook == HookResult::Deny {
                debug!("Mode {}{} on {} denied by module", sign(adding), mode, channel.name);
                continue;
            }

            let mut member = None;
            if handler.prefix().is_some() {
                let Some(id) = state.nicks.get(&irc_to_lower(&parameter)).copied() else {
                    source.reply(NumericReply::ErrNoSuchNick, &[&parameter, "No such nick/channel"]);
                    continue;
                };
                let Some(entry) = channel.member(id) else {
                    source.reply(
                        NumericReply::ErrUserNotInChannel,
                        &[&parameter, &channel.name, "They aren't on that channel"],
                    );
                    continue;
                };
                parameter = entry.nick.clone();
                member = Some(id);
            }

            if source.local
                && hook != HookResult::Allow
                && !check_channel_access(modules, &state.users, source, channel, handler, member, adding)
            {
                continue;
            }

            let target = ModeTarget::Channel {
                channel: &mut *channel,
                member,
            };
            if apply_change(handler, source, target, &mut parameter, adding) == ModeAction::Allow {
                outcome.applied.push(AppliedMode::new(mode, adding, parameter));
            }
        }
        outcome
    }

    fn process_user(
        &self,
        ctx: &mut ModeContext<'_>,
        source: &ModeSource,
        target: &str,
        modes: &str,
        params: &[String],
    ) -> ModeOutcome {
        let state = &mut *ctx.state;
        let modules = &mut *ctx.modules;

        let Some(id) = state.nicks.get(&irc_to_lower(target)).copied() else {
            source.reply(NumericReply::ErrNoSuchNick, &[target, "No such nick/channel"]);
            return ModeOutcome::default();
        };
        let Some(user) = state.users.get_mut(&id) else {
            source.reply(NumericReply::ErrNoSuchNick, &[target, "No such nick/channel"]);
            return ModeOutcome::default();
        };
        let mut outcome = ModeOutcome {
            target: user.nick.clone(),
            is_channel: false,
            applied: Vec::new(),
        };

        let is_self = source.user == Some(id);
        if modes.is_empty() {
            if is_self || source.oper || source.is_trusted() {
                source.reply(NumericReply::RplUmodeIs, &[&user.modes_string()]);
            } else {
                source.reply(NumericReply::ErrUsersDontMatch, &["Can't view modes for other users"]);
            }
            return outcome;
        }
        if !is_self && !source.is_trusted() {
            source.reply(NumericReply::ErrUsersDontMatch, &["Can't change mode for other users"]);
            return outcome;
        }

        let mut params = params.iter();
        let mut adding = true;
        for mode in modes.chars() {
            match mode {
                '+' => {
                    adding = true;
                    continue;
                }
                '-' => {
                    adding = false;
                    continue;
                }
                _ => {}
            }

            let Some(handler) = self.find(mode, ModeType::User) else {
                source.reply(NumericReply::ErrUmodeUnknownFlag, &["Unknown MODE flag"]);
                continue;
            };

            let mut parameter = String::new();
            if handler.parameters(adding) > 0 {
                match params.next() {
                    Some(p) if !p.is_empty() => parameter = p.clone(),
                    _ => continue,
                }
            }

            if !handler.enabled() {
                continue;
            }

            if source.local && handler.oper_only() && !source.oper {
                source.reply(
                    NumericReply::ErrNoPrivileges,
                    &[&format!("Permission Denied - Only operators may set user mode {}", mode)],
                );
                continue;
            }

            let hook = modules.dispatch_result(Capability::RawMode, |m| {
                m.on_raw_mode(source, &user.nick, mode, &parameter, adding)
            });
            if hook == HookResult::Deny {
                continue;
            }

            let target = ModeTarget::User(&mut *user);
            if apply_change(handler, source, target, &mut parameter, adding) == ModeAction::Allow {
                outcome.applied.push(AppliedMode::new(mode, adding, parameter));
            }
        }
        outcome
    }

    /// Strip modes from a channel with handler calls only; no hooks and no access checks.
    ///
    /// `removals` are `(letter, parameter)` pairs as produced by
    /// [`ModeHandler::channel_removals`].
    pub fn strip_channel(
        &self,
        source: &ModeSource,
        channel: &mut Channel,
        removals: &[(char, String)],
    ) -> Vec<AppliedMode> {
        let mut applied = Vec::new();
        for (mode, param) in removals {
            let Some(handler) = self.find(*mode, ModeType::Channel) else {
                continue;
            };
            let member = if handler.prefix().is_some() {
                match channel.member_by_nick(param) {
                    Some(m) => Some(m.user_id),
                    None => continue,
                }
            } else {
                None
            };
            let mut parameter = param.clone();
            let target = ModeTarget::Channel {
                channel: &mut *channel,
                member,
            };
            if apply_change(handler, source, target, &mut parameter, false) == ModeAction::Allow {
                if handler.parameters(false) == 0 {
                    parameter.clear();
                }
                applied.push(AppliedMode::new(*mode, false, parameter));
            }
        }
        applied
    }

    /// Strip modes from a user, see [`ModeRegistry::strip_channel`]
    pub fn strip_user(
        &self,
        source: &ModeSource,
        user: &mut User,
        removals: &[(char, String)],
    ) -> Vec<AppliedMode> {
        let mut applied = Vec::new();
        for (mode, param) in removals {
            let Some(handler) = self.find(*mode, ModeType::User) else {
                continue;
            };
            let mut parameter = param.clone();
            if apply_change(handler, source, ModeTarget::User(&mut *user), &mut parameter, false)
                == ModeAction::Allow
            {
                applied.push(AppliedMode::new(*mode, false, parameter));
            }
        }
        applied
    }

    /// Every `-` change needed to clear `channel` of the given letters (all when `None`)
    pub fn channel_removals(&self, channel: &Channel, only: Option<&[char]>) -> Vec<(char, String)> {
        self.handlers(ModeType::Channel)
            .filter(|h| only.map_or(true, |letters| letters.contains(&h.mode_char())))
            .flat_map(|h| {
                h.channel_removals(channel)
                    .into_iter()
                    .map(move |p| (h.mode_char(), p))
            })
            .collect()
    }

    /// Every `-` change needed to clear `user` of the given letters (all when `None`)
    pub fn user_removals(&self, user: &User, only: Option<&[char]>) -> Vec<(char, String)> {
        self.handlers(ModeType::User)
            .filter(|h| only.map_or(true, |letters| letters.contains(&h.mode_char())))
            .flat_map(|h| {
                h.user_removals(user)
                    .into_iter()
                    .map(move |p| (h.mode_char(), p))
            })
            .collect()
    }
}

/// Run one handler, denying the letter if it panics
fn apply_change(
    handler: &dyn ModeHandler,
    source: &ModeSource,
    target: ModeTarget<'_>,
    parameter: &mut String,
    adding: bool,
) -> ModeAction {
    let mode = handler.mode_char();
    match panic::catch_unwind(AssertUnwindSafe(|| handler.on_mode_change(source, target, parameter, adding))) {
        Ok(action) => action,
        Err(payload) => {
            error!(
                "Handler for mode {}{} panicked: {}",
                sign(adding),
                mode,
                panic_message(payload.as_ref())
            );
            parameter.clear();
            ModeAction::Deny
        }
    }
}

/// Hook first, then the handler's rank rule
fn check_channel_access(
    modules: &mut ModuleManager,
    users: &HashMap<UserId, User>,
    source: &ModeSource,
    channel: &Channel,
    handler: &dyn ModeHandler,
    member: Option<UserId>,
    adding: bool,
) -> bool {
    let Some(source_user) = source.user.and_then(|id| users.get(&id)) else {
        return true;
    };
    let dest = member.and_then(|id| users.get(&id));
    let access = handler.access_type(adding);
    match modules.dispatch_result(Capability::AccessCheck, |m| {
        m.on_access_check(source_user, dest, channel, access)
    }) {
        HookResult::Allow => return true,
        HookResult::Deny => return false,
        HookResult::Default => {}
    }

    if member.is_some() && member == source.user && handler.permits_self(adding) {
        return true;
    }
    if channel.rank_of(source_user.id) >= handler.required_rank(adding) {
        return true;
    }
    source.reply(
        NumericReply::ErrChanOpPrivsNeeded,
        &[&channel.name, handler.denied_message(adding)],
    );
    false
}

fn sign(adding: bool) -> char {
    if adding {
        '+'
    } else {
        '-'
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_changes() {
        let applied = vec![
            AppliedMode::new('o', true, "alice"),
            AppliedMode::new('t', true, ""),
            AppliedMode::new('v', false, "bob"),
        ];
        assert_eq!(format_changes(&applied).as_deref(), Some("+ot-v alice bob"));
        assert_eq!(format_changes(&[]), None);
        assert_eq!(
            format_changes(&[AppliedMode::new('n', false, "")]).as_deref(),
            Some("-n")
        );
    }
}
