//! Command dispatch for the commands the core itself answers
//!
//! The wire parser hands over `(command, params)` for a registered connection. Every command
//! runs between the `PreCommand` and `PostCommand` hooks and reports a tri-state result that
//! tells the relay layer whether to propagate it.

use crate::capability::Capability;
use crate::module::HookResult;
use crate::numeric::NumericReply;
use crate::server::Server;
use crate::user::UserId;
use crate::utils::string::matches_everyone;
use crate::utils::time::{current_unix_timestamp, format_timestamp, parse_duration};
use crate::xline::{expiry_after, XLineClass, XLineKey};
use tracing::{debug, warn};

/// Outcome of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdResult {
    Success,
    Failure,
    /// Succeeded, but must not be relayed to other servers
    LocalOnly,
}

impl Server {
    /// Run one command from a registered user
    pub fn handle_command(&mut self, id: UserId, command: &str, params: &[String]) -> CmdResult {
        let result = self.run_command(id, command, params);
        self.flush_xline_orders();
        result
    }

    fn run_command(&mut self, id: UserId, command: &str, params: &[String]) -> CmdResult {
        let command = command.to_ascii_uppercase();
        let Some(user) = self.state.users.get(&id) else {
            return CmdResult::Failure;
        };
        if !user.registered {
            user.write_numeric(NumericReply::ErrNotRegistered, &["You have not registered"]);
            return CmdResult::Failure;
        }
        if self
            .modules
            .dispatch_result(Capability::PreCommand, |m| m.on_pre_command(user, &self.state, &command, params))
            == HookResult::Deny
        {
            debug!("{} from {} blocked by a module", command, user.nick);
            return CmdResult::Failure;
        }

        let result = match command.as_str() {
            "MODE" => self.cmd_mode(id, params),
            "JOIN" => self.cmd_join(id, params),
            "PART" => self.cmd_part(id, params),
            "NICK" => self.cmd_nick(id, params),
            "WHOIS" => self.cmd_whois(id, params),
            "STATS" => self.cmd_stats(id, params),
            "LOADMODULE" => self.cmd_loadmodule(id, params),
            "UNLOADMODULE" => self.cmd_unloadmodule(id, params),
            "MODULES" => self.cmd_modules(id),
            "GLINE" => self.cmd_xline(id, XLineClass::GLine, &command, params),
            "KLINE" => self.cmd_xline(id, XLineClass::KLine, &command, params),
            "ZLINE" => self.cmd_xline(id, XLineClass::ZLine, &command, params),
            "QLINE" => self.cmd_xline(id, XLineClass::QLine, &command, params),
            "ELINE" => self.cmd_xline(id, XLineClass::ELine, &command, params),
            _ => {
                if let Some(user) = self.state.users.get(&id) {
                    user.write_numeric(NumericReply::ErrUnknownCommand, &[&command, "Unknown command"]);
                }
                return CmdResult::Failure;
            }
        };

        if let Some(user) = self.state.users.get(&id) {
            self.modules.dispatch(Capability::PostCommand, |m| {
                m.on_post_command(user, &command, params, result)
            });
        }
        result
    }

    /// Send 461 unless at least `count` parameters were given
    fn need_params(&self, id: UserId, command: &str, params: &[String], count: usize) -> bool {
        if params.len() >= count {
            return true;
        }
        if let Some(user) = self.state.users.get(&id) {
            user.write_numeric(NumericReply::ErrNeedMoreParams, &[command, "Not enough parameters"]);
        }
        false
    }

    /// Send 481 unless the user is an operator
    fn need_oper(&self, id: UserId) -> bool {
        let Some(user) = self.state.users.get(&id) else {
            return false;
        };
        if user.is_operator() {
            return true;
        }
        user.write_numeric(
            NumericReply::ErrNoPrivileges,
            &["Permission Denied - You do not have the required operator privileges"],
        );
        false
    }

    fn notice(&self, id: UserId, text: &str) {
        if let Some(user) = self.state.users.get(&id) {
            user.write_notice(text);
        }
    }

    fn cmd_mode(&mut self, id: UserId, params: &[String]) -> CmdResult {
        if !self.need_params(id, "MODE", params, 1) {
            return CmdResult::Failure;
        }
        let modes = params.get(1).map(String::as_str).unwrap_or_default();
        let rest = params.get(2..).unwrap_or_default();
        self.process_mode(Some(id), &params[0], modes, rest);
        CmdResult::Success
    }

    fn cmd_join(&mut self, id: UserId, params: &[String]) -> CmdResult {
        if !self.need_params(id, "JOIN", params, 1) {
            return CmdResult::Failure;
        }
        let keys: Vec<&str> = params
            .get(1)
            .map(|k| k.split(',').collect())
            .unwrap_or_default();
        for (i, name) in params[0].split(',').filter(|n| !n.is_empty()).enumerate() {
            self.join_channel(id, name, keys.get(i).copied());
        }
        CmdResult::Success
    }

    fn cmd_part(&mut self, id: UserId, params: &[String]) -> CmdResult {
        if !self.need_params(id, "PART", params, 1) {
            return CmdResult::Failure;
        }
        let reason = match params.get(1) {
            Some(reason) => reason.clone(),
            None => self
                .state
                .users
                .get(&id)
                .map(|u| u.nick.clone())
                .unwrap_or_default(),
        };
        for name in params[0].split(',').filter(|n| !n.is_empty()) {
            self.part_channel(id, name, &reason);
        }
        CmdResult::Success
    }

    fn cmd_nick(&mut self, id: UserId, params: &[String]) -> CmdResult {
        if params.is_empty() {
            if let Some(user) = self.state.users.get(&id) {
                user.write_numeric(NumericReply::ErrNoNicknameGiven, &["No nickname given"]);
            }
            return CmdResult::Failure;
        }
        if self.change_nick(id, &params[0]) {
            CmdResult::Success
        } else {
            CmdResult::Failure
        }
    }

    fn cmd_whois(&mut self, id: UserId, params: &[String]) -> CmdResult {
        if !self.need_params(id, "WHOIS", params, 1) {
            return CmdResult::Failure;
        }
        // WHOIS [server] nick
        let nick = params.last().map(String::as_str).unwrap_or_default();
        self.whois(id, nick);
        CmdResult::LocalOnly
    }

    fn cmd_stats(&mut self, id: UserId, params: &[String]) -> CmdResult {
        if !self.need_params(id, "STATS", params, 1) {
            return CmdResult::Failure;
        }
        let Some(letter) = params[0].chars().next() else {
            return CmdResult::Failure;
        };
        self.stats(id, letter);
        CmdResult::LocalOnly
    }

    fn cmd_loadmodule(&mut self, id: UserId, params: &[String]) -> CmdResult {
        if !self.need_oper(id) || !self.need_params(id, "LOADMODULE", params, 1) {
            return CmdResult::Failure;
        }
        let name = params[0].as_str();
        let result = self.load_module(name);
        let Some(user) = self.state.users.get(&id) else {
            return CmdResult::Failure;
        };
        match result {
            Ok(_) => {
                user.write_numeric(NumericReply::RplLoadedModule, &[name, "Module successfully loaded."]);
                CmdResult::LocalOnly
            }
            Err(e) => {
                warn!("{} failed to load module '{}': {}", user.nick, name, e);
                user.write_numeric(
                    NumericReply::ErrCantLoadModule,
                    &[name, &format!("Failed to load module: {}", e)],
                );
                CmdResult::Failure
            }
        }
    }

    fn cmd_unloadmodule(&mut self, id: UserId, params: &[String]) -> CmdResult {
        if !self.need_oper(id) || !self.need_params(id, "UNLOADMODULE", params, 1) {
            return CmdResult::Failure;
        }
        let name = params[0].as_str();
        let result = self.unload_module(name);
        let Some(user) = self.state.users.get(&id) else {
            return CmdResult::Failure;
        };
        match result {
            Ok(()) => {
                user.write_numeric(
                    NumericReply::RplUnloadedModule,
                    &[name, "Module successfully unloaded."],
                );
                CmdResult::LocalOnly
            }
            Err(e) => {
                warn!("{} failed to unload module '{}': {}", user.nick, name, e);
                user.write_numeric(
                    NumericReply::ErrCantUnloadModule,
                    &[name, &format!("Failed to unload module: {}", e)],
                );
                CmdResult::Failure
            }
        }
    }

    fn cmd_modules(&mut self, id: UserId) -> CmdResult {
        let Some(user) = self.state.users.get(&id) else {
            return CmdResult::Failure;
        };
        let oper = user.is_operator();
        for info in self.modules.modules() {
            let text = if oper {
                let hooks: Vec<String> = info.capabilities.iter().map(|c| c.to_string()).collect();
                format!(
                    "{} {} {} :{} [{}]",
                    info.name,
                    info.version,
                    info.version.flags.letters(),
                    info.description,
                    hooks.join(" ")
                )
            } else {
                format!("{} :{}", info.name, info.description)
            };
            user.write_numeric_raw(NumericReply::RplModList.numeric_code(), &text);
        }
        user.write_numeric(NumericReply::RplEndOfModList, &["End of MODULES list"]);
        CmdResult::LocalOnly
    }

    /// `<mask>` removes a line; `<mask> <duration> :<reason>` adds one
    fn cmd_xline(&mut self, id: UserId, class: XLineClass, command: &str, params: &[String]) -> CmdResult {
        if !self.need_oper(id) || !self.need_params(id, command, params, 1) {
            return CmdResult::Failure;
        }
        let Some(source) = self.state.users.get(&id).map(|u| u.nick.clone()) else {
            return CmdResult::Failure;
        };
        let mask = params[0].as_str();

        if params.len() == 1 {
            if self.del_xline(class, mask, &source) {
                self.notice(id, &format!("*** Removed {} on {}", class, mask));
            } else {
                self.notice(
                    id,
                    &format!(
                        "*** {} {} not found in list, try /stats {}.",
                        class,
                        mask,
                        class.letter().to_ascii_lowercase()
                    ),
                );
            }
            return CmdResult::Success;
        }
        if !self.need_params(id, command, params, 3) {
            return CmdResult::Failure;
        }

        let key = XLineKey::parse(class, mask).to_string();
        if matches_everyone(&key) {
            self.notice(
                id,
                &format!("*** {} mask {} would match everyone, refused", class, key),
            );
            return CmdResult::Failure;
        }
        let duration = match parse_duration(&params[1]) {
            Ok(duration) => duration,
            Err(e) => {
                self.notice(id, &format!("*** {}", e));
                return CmdResult::Failure;
            }
        };
        let reason = params[2].as_str();

        let added = self.add_xline(class, duration, &source, reason, mask);
        let verb = if added { "added" } else { "updated" };
        let text = if duration == 0 {
            format!("*** {} {} permanent {} for {}: {}", source, verb, class, key, reason)
        } else {
            let expires = expiry_after(current_unix_timestamp(), duration);
            format!(
                "*** {} {} timed {} for {}, expires on {}: {}",
                source,
                verb,
                class,
                key,
                format_timestamp(expires),
                reason
            )
        };
        self.notice(id, &text);
        CmdResult::Success
    }
}
