//! Module system for the extensible IRC daemon
//!
//! A module is a statically linked extension instance. It declares which hooks it
//! wants through [`Module::implements`], and the [`ModuleManager`](crate::ModuleManager)
//! only ever calls the hooks a module subscribed to. Every hook has a no-op default,
//! so a module implements just what it needs.

use crate::capability::{Capability, CapabilitySet};
use crate::channel::Channel;
use crate::commands::CmdResult;
use crate::config::Config;
use crate::directory::InterfaceEntry;
use crate::error::{ModuleError, Result};
use crate::event::{Event, Request};
use crate::extension_registry::{SlotKey, SlotRegistry};
use crate::modes::{AccessType, ModeHandler, ModeRegistry, ModeSource};
use crate::module_manager::ModuleManager;
use crate::state::ServerState;
use crate::user::User;
use crate::xline::{XLine, XLineClass, XLineSink};
use std::any::Any;
use std::fmt;

/// Identity of a loaded module, stable for the lifetime of the load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u32);

impl ModuleId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Answer of a result hook
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HookResult {
    /// Refuse; stops dispatch
    Deny,
    /// Permit, skipping the core's own checks; stops dispatch
    Allow,
    /// Abstain and let the next module (or the core) decide
    #[default]
    Default,
}

impl HookResult {
    pub fn is_decisive(&self) -> bool {
        !matches!(self, HookResult::Default)
    }
}

/// Version flags reported by a module
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct VersionFlags(u8);

impl VersionFlags {
    pub const NONE: VersionFlags = VersionFlags(0);
    /// The module cannot be unloaded once loaded
    pub const STATIC: VersionFlags = VersionFlags(1);
    /// Shipped with the server
    pub const VENDOR: VersionFlags = VersionFlags(1 << 1);
    /// Must be loaded on every server of the network
    pub const COMMON: VersionFlags = VersionFlags(1 << 2);
    /// Provides services to other modules
    pub const SERVICE_PROVIDER: VersionFlags = VersionFlags(1 << 3);

    pub fn contains(&self, other: VersionFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Flag letters for listings, e.g. `SV`
    pub fn letters(&self) -> String {
        [
            (Self::STATIC, 'S'),
            (Self::VENDOR, 'V'),
            (Self::COMMON, 'C'),
            (Self::SERVICE_PROVIDER, 'P'),
        ]
        .iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, letter)| *letter)
        .collect()
    }
}

impl std::ops::BitOr for VersionFlags {
    type Output = VersionFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        VersionFlags(self.0 | rhs.0)
    }
}

/// Module version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub revision: u32,
    pub build: u32,
    pub flags: VersionFlags,
}

impl Version {
    pub const fn new(major: u32, minor: u32, revision: u32, build: u32, flags: VersionFlags) -> Self {
        Self {
            major,
            minor,
            revision,
            build,
            flags,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.revision, self.build)
    }
}

/// Placement of a module's hook relative to other subscribers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Priority {
    #[default]
    DontCare,
    First,
    Last,
    /// Run before the named module
    Before(String),
    /// Run after the named module
    After(String),
}

impl Priority {
    pub const RELATION_DONTCARE: u32 = 0;
    pub const RELATION_FIRST: u32 = 1;
    pub const RELATION_LAST: u32 = 2;
    pub const RELATION_BEFORE: u32 = 3;
    pub const RELATION_AFTER: u32 = 4;

    /// Numeric tag `(index << 8) | relation`, where `index` is the load position
    /// of the module named by a before/after relation
    pub fn tag(&self, index_of: impl Fn(&str) -> Option<usize>) -> u32 {
        match self {
            Priority::DontCare => Self::RELATION_DONTCARE,
            Priority::First => Self::RELATION_FIRST,
            Priority::Last => Self::RELATION_LAST,
            Priority::Before(name) => {
                ((index_of(name).unwrap_or(0) as u32) << 8) | Self::RELATION_BEFORE
            }
            Priority::After(name) => ((index_of(name).unwrap_or(0) as u32) << 8) | Self::RELATION_AFTER,
        }
    }
}

/// Entity whose module data must be released
pub enum CleanupTarget<'a> {
    User(&'a mut User),
    Channel(&'a mut Channel),
}

/// A numeric line contributed by a module (WHOIS, STATS)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumericLine {
    pub numeric: u16,
    /// Everything after the requesting nick, e.g. `"bob :is a Bot on Net"`
    pub text: String,
}

impl NumericLine {
    pub fn new(numeric: u16, text: impl Into<String>) -> Self {
        Self {
            numeric,
            text: text.into(),
        }
    }
}

/// Module trait that all modules must implement
pub trait Module: Send {
    /// Module name
    fn name(&self) -> &str;

    /// Module version
    fn version(&self) -> Version;

    /// Module description
    fn description(&self) -> &str {
        ""
    }

    /// Hooks this module wants to receive
    fn implements(&self) -> CapabilitySet;

    /// Ordering request for one hook
    fn prioritize(&self, _capability: Capability) -> Priority {
        Priority::DontCare
    }

    /// Register modes, slots, features and interfaces. An error aborts the load
    /// and rolls back everything registered so far.
    fn init(&mut self, _ctx: &mut ModuleContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Called before teardown on unload
    fn on_unload(&mut self, _ctx: &mut ModuleContext<'_>) {}

    fn on_user_connect(&mut self, _user: &User) {}

    fn on_user_register(&mut self, _user: &User) -> HookResult {
        HookResult::Default
    }

    fn on_post_connect(&mut self, _user: &User) {}

    fn on_user_quit(&mut self, _user: &User, _reason: &str, _oper_reason: &str) {}

    fn on_user_disconnect(&mut self, _user: &User) {}

    /// `state` is a read-only view of the network, e.g. to inspect the user's channels
    fn on_user_pre_nick(&mut self, _user: &User, _state: &ServerState, _new_nick: &str) -> HookResult {
        HookResult::Default
    }

    fn on_user_post_nick(&mut self, _user: &User, _old_nick: &str) {}

    /// `channel` is `None` when the join would create the channel
    fn on_user_pre_join(&mut self, _user: &User, _channel: Option<&Channel>, _name: &str) -> HookResult {
        HookResult::Default
    }

    fn on_user_join(&mut self, _user: &User, _channel: &mut Channel) {}

    fn on_user_part(&mut self, _user: &User, _channel: &Channel, _reason: &str) {}

    fn on_channel_delete(&mut self, _channel: &mut Channel) {}

    /// Allow bypasses the ban list, Deny bans regardless of it
    fn on_check_ban(&mut self, _user: &User, _channel: &Channel) -> HookResult {
        HookResult::Default
    }

    /// Seen for every resolved mode letter before access checks
    fn on_raw_mode(
        &mut self,
        _source: &ModeSource,
        _target: &str,
        _mode: char,
        _parameter: &str,
        _adding: bool,
    ) -> HookResult {
        HookResult::Default
    }

    /// Override the rank check of a channel mode change
    fn on_access_check(
        &mut self,
        _source: &User,
        _dest: Option<&User>,
        _channel: &Channel,
        _access: AccessType,
    ) -> HookResult {
        HookResult::Default
    }

    /// A mode change was applied; `change` is the relayed mode string
    fn on_mode(&mut self, _source: &ModeSource, _target: &str, _change: &str) {}

    fn on_whois(&mut self, _source: &User, _dest: &User) -> Vec<NumericLine> {
        Vec::new()
    }

    /// Deny suppresses the line
    fn on_whois_line(&mut self, _source: &User, _dest: &User, _numeric: u16, _text: &str) -> HookResult {
        HookResult::Default
    }

    fn on_isupport(&mut self, _tokens: &mut Vec<String>) {}

    /// Deny hides the report from the requester
    fn on_stats(&mut self, _letter: char, _source: &User, _results: &mut Vec<NumericLine>) -> HookResult {
        HookResult::Default
    }

    fn on_rehash(&mut self, _config: &Config) {}

    fn on_background_timer(&mut self, _now: i64) {}

    fn on_load_module(&mut self, _name: &str) {}

    fn on_unload_module(&mut self, _name: &str) {}

    fn on_event(&mut self, _event: &Event<'_>) {}

    /// Requests are addressed, so no capability is needed to receive them
    fn on_request(&mut self, _request: &Request<'_>) -> Option<Box<dyn Any + Send>> {
        None
    }

    fn on_add_xline(&mut self, _line: &XLine) {}

    fn on_del_xline(&mut self, _class: XLineClass, _mask: &str, _source: &str) {}

    fn on_expire_xline(&mut self, _line: &XLine) {}

    /// Release any slot data this module attached to `target`
    fn on_cleanup(&mut self, _target: CleanupTarget<'_>) {}

    /// Deny blocks the command. Commands the core does not answer itself pass through
    /// here before they are refused as unknown.
    fn on_pre_command(
        &mut self,
        _user: &User,
        _state: &ServerState,
        _command: &str,
        _params: &[String],
    ) -> HookResult {
        HookResult::Default
    }

    fn on_post_command(&mut self, _user: &User, _command: &str, _params: &[String], _result: CmdResult) {}
}

/// Registration surface handed to a module while it loads or unloads
pub struct ModuleContext<'a> {
    id: ModuleId,
    name: &'a str,
    config: &'a Config,
    modules: &'a mut ModuleManager,
    modes: &'a mut ModeRegistry,
    slots: &'a mut SlotRegistry,
}

impl<'a> ModuleContext<'a> {
    pub(crate) fn new(
        id: ModuleId,
        name: &'a str,
        config: &'a Config,
        modules: &'a mut ModuleManager,
        modes: &'a mut ModeRegistry,
        slots: &'a mut SlotRegistry,
    ) -> Self {
        Self {
            id,
            name,
            config,
            modules,
            modes,
            slots,
        }
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn config(&self) -> &Config {
        self.config
    }

    /// This module's `[modules.settings.<name>]` table
    pub fn settings<T>(&self) -> Result<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        self.config.module_settings(self.name)
    }

    /// Register a mode handler owned by this module
    pub fn add_mode(&mut self, handler: Box<dyn ModeHandler>) -> Result<()> {
        let mode = handler.mode_char();
        let kind = handler.mode_type();
        if self.modes.add(handler, Some(self.id)) {
            Ok(())
        } else {
            Err(ModuleError::ModeConflict {
                mode,
                kind: kind.label(),
            }
            .into())
        }
    }

    pub fn publish_feature(&mut self, name: &str) -> bool {
        self.modules.directory_mut().publish_feature(name, self.id)
    }

    pub fn unpublish_feature(&mut self, name: &str) -> bool {
        self.modules.directory_mut().unpublish_feature(name, self.id)
    }

    pub fn find_feature(&self, name: &str) -> Option<ModuleId> {
        self.modules.directory().find_feature(name)
    }

    pub fn publish_interface(&mut self, name: &str) -> bool {
        self.modules.directory_mut().publish_interface(name, self.id)
    }

    pub fn unpublish_interface(&mut self, name: &str) -> bool {
        self.modules.directory_mut().unpublish_interface(name, self.id)
    }

    pub fn find_interface(&self, name: &str) -> Option<&InterfaceEntry> {
        self.modules.directory().find_interface(name)
    }

    pub fn use_interface(&mut self, name: &str) -> bool {
        self.modules.directory_mut().use_interface(name, self.id)
    }

    pub fn done_with_interface(&mut self, name: &str) -> bool {
        self.modules.directory_mut().done_with_interface(name, self.id)
    }

    /// Register a typed per-entity slot owned by this module
    pub fn register_slot<T: Any + Send>(&mut self, name: &str) -> SlotKey<T> {
        self.slots.register(self.id, name)
    }

    /// Handle for adding X-lines from hooks; keep a clone for the module's lifetime
    pub fn xline_sink(&self) -> XLineSink {
        self.modules.xline_sink().clone()
    }

    /// Send a request to another loaded module
    pub fn send_request(&mut self, request: &Request<'_>) -> Option<Box<dyn Any + Send>> {
        self.modules.send_request(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_flags() {
        let flags = VersionFlags::VENDOR | VersionFlags::STATIC;
        assert!(flags.contains(VersionFlags::STATIC));
        assert!(!flags.contains(VersionFlags::COMMON));
        assert_eq!(flags.letters(), "SV");
        assert_eq!(Version::new(1, 1, 0, 2, flags).to_string(), "1.1.0.2");
    }

    #[test]
    fn test_priority_tag_encoding() {
        let index_of = |name: &str| if name == "botmode" { Some(3) } else { None };
        assert_eq!(Priority::Before("botmode".into()).tag(index_of), (3 << 8) | 3);
        assert_eq!(Priority::After("botmode".into()).tag(index_of), (3 << 8) | 4);
        assert_eq!(Priority::First.tag(index_of), 1);
    }

    #[test]
    fn test_hook_result_default() {
        assert_eq!(HookResult::default(), HookResult::Default);
        assert!(HookResult::Deny.is_decisive());
        assert!(!HookResult::Default.is_decisive());
    }
}
