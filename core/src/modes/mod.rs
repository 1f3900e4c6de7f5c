//! Mode subsystem
//!
//! Every user and channel mode letter is served by a [`ModeHandler`] registered in the
//! [`ModeRegistry`] under `(letter, ModeType)`. The core registers its own handlers at
//! startup; modules add more through their [`ModuleContext`](crate::ModuleContext) and lose
//! them again on unload.

mod list;
mod param;
mod prefix;
mod process;
mod simple;

pub use list::BanMode;
pub use param::{KeyMode, LimitMode};
pub use prefix::PrefixMode;
pub use process::{format_changes, AppliedMode, ModeContext, ModeOutcome};
pub use simple::{OperMode, SimpleChannelMode, SimpleUserMode};

use crate::channel::{Channel, HALFOP_VALUE};
use crate::client::Client;
use crate::config::Config;
use crate::module::ModuleId;
use crate::numeric::NumericReply;
use crate::user::{User, UserId};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// What a mode applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModeType {
    User,
    Channel,
}

impl ModeType {
    pub fn label(&self) -> &'static str {
        match self {
            ModeType::User => "user",
            ModeType::Channel => "channel",
        }
    }
}

impl fmt::Display for ModeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of applying one mode letter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeAction {
    /// Applied; echo and relay
    Allow,
    /// Refused or a no-op; nothing to relay
    Deny,
}

/// Kind of privilege a channel mode change exercises, passed to access-check hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    GeneralMode,
    Op,
    Deop,
    Halfop,
    Dehalfop,
    Voice,
    Devoice,
}

/// Who is changing a mode
#[derive(Debug, Clone)]
pub struct ModeSource {
    /// Set for user sources
    pub user: Option<UserId>,
    /// Nick or server name
    pub name: String,
    /// Prefix used when relaying, `nick!ident@host` or a server name
    pub mask: String,
    /// Server that replies originate from
    pub server_name: String,
    /// Where error replies go
    pub client: Option<Client>,
    /// Local users are subject to access checks; servers and remote users are trusted
    pub local: bool,
    pub oper: bool,
}

impl ModeSource {
    pub fn for_user(user: &User) -> Self {
        Self {
            user: Some(user.id),
            name: user.nick.clone(),
            mask: user.mask(),
            server_name: user.server.clone(),
            client: user.client.clone(),
            local: user.is_local(),
            oper: user.is_operator(),
        }
    }

    /// A server acting on its own authority
    pub fn server(name: &str) -> Self {
        Self {
            user: None,
            name: name.to_string(),
            mask: name.to_string(),
            server_name: name.to_string(),
            client: None,
            local: false,
            oper: true,
        }
    }

    pub fn is_trusted(&self) -> bool {
        !self.local
    }

    pub fn reply(&self, numeric: NumericReply, params: &[&str]) {
        self.send(numeric.format(&self.server_name, &self.name, params));
    }

    pub fn reply_code(&self, code: u16, params: &[&str]) {
        self.send(crate::numeric::format_numeric(&self.server_name, code, &self.name, params));
    }

    pub fn notice(&self, text: &str) {
        self.send(format!(":{} NOTICE {} :{}", self.server_name, self.name, text));
    }

    fn send(&self, line: String) {
        if let Some(client) = &self.client {
            if let Err(e) = client.send_line(line) {
                debug!("Mode reply to {} dropped: {}", self.name, e);
            }
        }
    }
}

/// Entity a handler is applied to
pub enum ModeTarget<'a> {
    Channel {
        channel: &'a mut Channel,
        /// Resolved member for prefix modes
        member: Option<UserId>,
    },
    User(&'a mut User),
}

/// Behaviour of one mode letter
pub trait ModeHandler: Send + Sync {
    fn mode_char(&self) -> char;

    fn mode_type(&self) -> ModeType;

    /// Parameters consumed when setting (`adding`) or unsetting
    fn parameters(&self, _adding: bool) -> usize {
        0
    }

    /// Status glyph shown before member nicks
    fn prefix(&self) -> Option<char> {
        None
    }

    fn prefix_rank(&self) -> u32 {
        0
    }

    fn is_list(&self) -> bool {
        false
    }

    /// A disabled handler refuses every change
    fn enabled(&self) -> bool {
        true
    }

    /// User modes only: local users need to be operators to change it
    fn oper_only(&self) -> bool {
        false
    }

    /// Minimum channel rank for a local user to change this mode
    fn required_rank(&self, _adding: bool) -> u32 {
        HALFOP_VALUE
    }

    fn access_type(&self, _adding: bool) -> AccessType {
        AccessType::GeneralMode
    }

    /// Whether a member may apply this change to themselves regardless of rank
    fn permits_self(&self, _adding: bool) -> bool {
        false
    }

    /// Text of the 482 sent when the rank check fails
    fn denied_message(&self, _adding: bool) -> &str {
        "You're not a channel operator"
    }

    /// Apply the change. `parameter` may be rewritten to its canonical form.
    fn on_mode_change(
        &self,
        source: &ModeSource,
        target: ModeTarget<'_>,
        parameter: &mut String,
        adding: bool,
    ) -> ModeAction;

    /// List modes: send the list when the mode is given without a parameter
    fn display_list(&self, _source: &ModeSource, _channel: &Channel) {}

    /// Parameters of the `-` changes that would strip this mode from `channel`.
    /// Flag modes yield an empty parameter.
    fn channel_removals(&self, channel: &Channel) -> Vec<String> {
        let mode = self.mode_char();
        if !channel.has_mode(mode) {
            return Vec::new();
        }
        let param = if self.parameters(false) > 0 {
            channel.param(mode).unwrap_or_default().to_string()
        } else {
            String::new()
        };
        vec![param]
    }

    fn user_removals(&self, user: &User) -> Vec<String> {
        if user.has_mode(self.mode_char()) {
            vec![String::new()]
        } else {
            Vec::new()
        }
    }

    fn on_rehash(&self, _config: &Config) {}
}

struct RegisteredMode {
    handler: Box<dyn ModeHandler>,
    owner: Option<ModuleId>,
}

/// Handlers by `(type, letter)`
#[derive(Default)]
pub struct ModeRegistry {
    handlers: BTreeMap<(ModeType, char), RegisteredMode>,
}

impl ModeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every core handler, configured from `config`
    pub fn with_core_modes(config: &Config) -> Self {
        let mut registry = Self::new();
        let core: Vec<Box<dyn ModeHandler>> = vec![
            Box::new(PrefixMode::op()),
            Box::new(PrefixMode::halfop()),
            Box::new(PrefixMode::voice()),
            Box::new(BanMode::new()),
            Box::new(KeyMode),
            Box::new(LimitMode),
            Box::new(SimpleChannelMode::new('m')),
            Box::new(SimpleChannelMode::new('n')),
            Box::new(SimpleChannelMode::new('t')),
            Box::new(SimpleChannelMode::new('i')),
            Box::new(SimpleChannelMode::new('s')),
            Box::new(SimpleChannelMode::new('p')),
            Box::new(SimpleUserMode::new('i')),
            Box::new(SimpleUserMode::new('w')),
            Box::new(SimpleUserMode::new('s')),
            Box::new(OperMode),
        ];
        for handler in core {
            registry.add(handler, None);
        }
        registry.rehash(config);
        registry
    }

    /// Register a handler. Fails on a taken `(letter, type)`, a non-letter or a taken glyph.
    pub fn add(&mut self, handler: Box<dyn ModeHandler>, owner: Option<ModuleId>) -> bool {
        let mode = handler.mode_char();
        let kind = handler.mode_type();
        if !mode.is_ascii_alphabetic() {
            warn!("Refusing {} mode '{}': not a letter", kind, mode);
            return false;
        }
        if self.handlers.contains_key(&(kind, mode)) {
            warn!("Refusing {} mode '{}': already registered", kind, mode);
            return false;
        }
        if let Some(glyph) = handler.prefix() {
            if self.handlers.values().any(|r| r.handler.prefix() == Some(glyph)) {
                warn!("Refusing {} mode '{}': prefix '{}' taken", kind, mode, glyph);
                return false;
            }
        }
        debug!("Registered {} mode '{}' (owner {:?})", kind, mode, owner);
        self.handlers.insert((kind, mode), RegisteredMode { handler, owner });
        true
    }

    pub fn remove(&mut self, mode: char, kind: ModeType) -> bool {
        self.handlers.remove(&(kind, mode)).is_some()
    }

    pub fn find(&self, mode: char, kind: ModeType) -> Option<&dyn ModeHandler> {
        self.handlers.get(&(kind, mode)).map(|r| r.handler.as_ref())
    }

    pub fn owner_of(&self, mode: char, kind: ModeType) -> Option<ModuleId> {
        self.handlers.get(&(kind, mode)).and_then(|r| r.owner)
    }

    /// Letters registered by `owner`
    pub fn owned_by(&self, owner: ModuleId) -> Vec<(char, ModeType)> {
        self.handlers
            .iter()
            .filter(|(_, r)| r.owner == Some(owner))
            .map(|((kind, mode), _)| (*mode, *kind))
            .collect()
    }

    /// Drop every handler registered by `owner`
    pub fn remove_owned(&mut self, owner: ModuleId) -> usize {
        let before = self.handlers.len();
        self.handlers.retain(|_, r| r.owner != Some(owner));
        before - self.handlers.len()
    }

    pub fn handlers(&self, kind: ModeType) -> impl Iterator<Item = &dyn ModeHandler> {
        self.handlers
            .iter()
            .filter(move |((k, _), _)| *k == kind)
            .map(|(_, r)| r.handler.as_ref())
    }

    /// Enabled prefix handlers, highest rank first
    fn prefix_handlers(&self) -> Vec<&dyn ModeHandler> {
        let mut prefixes: Vec<&dyn ModeHandler> = self
            .handlers(ModeType::Channel)
            .filter(|h| h.prefix().is_some() && h.enabled())
            .collect();
        prefixes.sort_by(|a, b| b.prefix_rank().cmp(&a.prefix_rank()));
        prefixes
    }

    /// ISUPPORT `PREFIX` value, e.g. `(ohv)@%+`
    pub fn prefix_string(&self) -> String {
        let prefixes = self.prefix_handlers();
        let letters: String = prefixes.iter().map(|h| h.mode_char()).collect();
        let glyphs: String = prefixes.iter().filter_map(|h| h.prefix()).collect();
        format!("({}){}", letters, glyphs)
    }

    /// ISUPPORT `CHANMODES` value: list, always-parameter, set-parameter, flag
    pub fn chanmodes_token(&self) -> String {
        let mut groups = [String::new(), String::new(), String::new(), String::new()];
        for handler in self.handlers(ModeType::Channel) {
            if handler.prefix().is_some() {
                continue;
            }
            let group = if handler.is_list() {
                0
            } else if handler.parameters(false) > 0 {
                1
            } else if handler.parameters(true) > 0 {
                2
            } else {
                3
            };
            groups[group].push(handler.mode_char());
        }
        groups.join(",")
    }

    /// User mode letters, e.g. for the 004 reply
    pub fn user_modes(&self) -> String {
        self.handlers(ModeType::User).map(|h| h.mode_char()).collect()
    }

    /// Glyph of the highest prefix mode `member` holds
    pub fn prefix_glyph(&self, member: &crate::channel::ChannelMember) -> Option<char> {
        member
            .prefix_modes()
            .find_map(|mode| self.find(mode, ModeType::Channel).and_then(|h| h.prefix()))
    }

    /// Push a new configuration to every handler
    pub fn rehash(&self, config: &Config) {
        for registered in self.handlers.values() {
            registered.handler.on_rehash(config);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy(char, ModeType, Option<char>);

    impl ModeHandler for Dummy {
        fn mode_char(&self) -> char {
            self.0
        }

        fn mode_type(&self) -> ModeType {
            self.1
        }

        fn prefix(&self) -> Option<char> {
            self.2
        }

        fn on_mode_change(
            &self,
            _source: &ModeSource,
            _target: ModeTarget<'_>,
            _parameter: &mut String,
            _adding: bool,
        ) -> ModeAction {
            ModeAction::Allow
        }
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = ModeRegistry::new();
        assert!(registry.add(Box::new(Dummy('B', ModeType::User, None)), None));
        assert!(!registry.add(Box::new(Dummy('B', ModeType::User, None)), None));
        // Same letter, other kind
        assert!(registry.add(Box::new(Dummy('B', ModeType::Channel, None)), None));
        assert!(registry.remove('B', ModeType::User));
        assert!(registry.add(Box::new(Dummy('B', ModeType::User, None)), None));
        assert!(!registry.add(Box::new(Dummy('1', ModeType::User, None)), None));
    }

    #[test]
    fn test_prefix_glyph_must_be_unique() {
        let mut registry = ModeRegistry::with_core_modes(&Config::default());
        assert!(!registry.add(Box::new(Dummy('q', ModeType::Channel, Some('@'))), None));
        assert!(registry.add(Box::new(Dummy('q', ModeType::Channel, Some('~'))), None));
    }

    #[test]
    fn test_owned_handlers() {
        let mut registry = ModeRegistry::new();
        let owner = ModuleId::new(7);
        registry.add(Box::new(Dummy('x', ModeType::User, None)), Some(owner));
        registry.add(Box::new(Dummy('j', ModeType::Channel, None)), Some(owner));
        registry.add(Box::new(Dummy('w', ModeType::User, None)), None);
        assert_eq!(registry.owned_by(owner).len(), 2);
        assert_eq!(registry.remove_owned(owner), 2);
        assert!(registry.find('x', ModeType::User).is_none());
        assert!(registry.find('w', ModeType::User).is_some());
    }

    #[test]
    fn test_isupport_tokens() {
        let registry = ModeRegistry::with_core_modes(&Config::default());
        assert_eq!(registry.prefix_string(), "(ohv)@%+");
        assert_eq!(registry.chanmodes_token(), "b,k,l,imnpst");
        assert_eq!(registry.user_modes(), "iosw");

        let mut config = Config::default();
        config.options.allow_halfop = false;
        registry.rehash(&config);
        assert_eq!(registry.prefix_string(), "(ov)@+");
    }
}
