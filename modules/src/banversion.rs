//! Z-lines clients by their CTCP VERSION reply
//!
//! Every new connection is sent a CTCP VERSION. The first reply is matched against
//! the configured masks and a match earns the client's address a one hour Z-line.
//!
//! ```toml
//! [[ban_version]]
//! mask = "*spambot*"
//! reason = "Bots are not welcome"
//! ```

use modircd_core::utils::string::wildcard_match;
use modircd_core::{
    Capability, CapabilitySet, Config, HookResult, Module, ModuleContext, Result, ServerState, User, UserId,
    Version, VersionFlags, XLineClass, XLineSink,
};
use std::collections::HashSet;
use tracing::{debug, info};

const DEFAULT_REASON: &str = "Your version is disallowed";
/// Lifetime of the Z-line set on a match
pub const BAN_SECONDS: u64 = 3600;
const CTCP_VERSION: &str = "\x01VERSION ";

#[derive(Debug, Clone, PartialEq, Eq)]
struct VersionRule {
    mask: String,
    reason: String,
}

#[derive(Debug, Default)]
pub struct BanVersionModule {
    rules: Vec<VersionRule>,
    /// Connections whose reply is still awaited
    pending: HashSet<UserId>,
    sink: Option<XLineSink>,
}

impl BanVersionModule {
    pub fn new() -> Self {
        Self::default()
    }

    fn load(&mut self, config: &Config) {
        let reader = config.reader();
        self.rules = (0..reader.enumerate("ban_version"))
            .filter_map(|i| {
                let mask = reader.read_value("ban_version", "mask", i)?;
                let reason = reader
                    .read_value("ban_version", "reason", i)
                    .unwrap_or_else(|| DEFAULT_REASON.to_string());
                Some(VersionRule { mask, reason })
            })
            .collect();
        info!("banversion: {} version masks", self.rules.len());
    }

    /// Reason for refusing a client that reports `version`
    pub fn denial(&self, version: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|r| wildcard_match(&r.mask, version))
            .map(|r| r.reason.as_str())
    }
}

impl Module for BanVersionModule {
    fn name(&self) -> &str {
        "banversion"
    }

    fn version(&self) -> Version {
        Version::new(1, 1, 0, 0, VersionFlags::VENDOR)
    }

    fn description(&self) -> &str {
        "Z-lines clients whose CTCP VERSION reply matches a banned mask"
    }

    fn implements(&self) -> CapabilitySet {
        CapabilitySet::of(&[
            Capability::UserRegister,
            Capability::PreCommand,
            Capability::UserDisconnect,
            Capability::Rehash,
        ])
    }

    fn init(&mut self, ctx: &mut ModuleContext<'_>) -> Result<()> {
        self.load(ctx.config());
        self.sink = Some(ctx.xline_sink());
        Ok(())
    }

    fn on_user_register(&mut self, user: &User) -> HookResult {
        user.write_line(format!(":{} PRIVMSG {} :\x01VERSION\x01", user.server, user.nick));
        self.pending.insert(user.id);
        HookResult::Default
    }

    fn on_pre_command(&mut self, user: &User, _state: &ServerState, command: &str, params: &[String]) -> HookResult {
        if command != "NOTICE" || params.len() < 2 || !self.pending.remove(&user.id) {
            return HookResult::Default;
        }
        if let Some(reply) = params[1].strip_prefix(CTCP_VERSION) {
            let version = reply.trim_end_matches('\x01');
            debug!("{} runs {}", user.nick, version);
            if let (Some(reason), Some(sink)) = (self.denial(version), &self.sink) {
                sink.add(XLineClass::ZLine, BAN_SECONDS, &user.server, reason, &user.ip);
            }
        }
        // the reply is addressed to the server, so nothing else should see it
        HookResult::Deny
    }

    fn on_user_disconnect(&mut self, user: &User) {
        self.pending.remove(&user.id);
    }

    fn on_rehash(&mut self, config: &Config) {
        self.load(config);
    }
}
