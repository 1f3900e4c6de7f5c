//! Main IRC server implementation
//!
//! The server owns the module registry, the mode registry, the X-line stores and the
//! network state. All mutation happens through `&mut self` on one logical thread; the
//! binary wraps the server in a mutex and feeds it from the runtime.

use crate::capability::Capability;
use crate::channel::{Channel, OP_VALUE};
use crate::client::Client;
use crate::config::Config;
use crate::error::{Error, ModuleError, Result};
use crate::event::{Event, Request};
use crate::module::{CleanupTarget, HookResult, Module, ModuleContext, ModuleId, NumericLine, VersionFlags};
use crate::module_manager::{ModuleCatalog, ModuleManager};
use crate::modes::{format_changes, ModeContext, ModeOutcome, ModeRegistry, ModeSource, ModeType};
use crate::numeric::NumericReply;
use crate::state::ServerState;
use crate::user::{User, UserId};
use crate::utils::string::{irc_to_lower, is_valid_channel_name, is_valid_nickname, is_valid_username};
use crate::utils::time::current_unix_timestamp;
use crate::xline::{ApplyMask, XLineClass, XLineManager, XLineSubject};
use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, info, warn};

/// Source recorded for lines read from the configuration
pub const CONFIG_SOURCE: &str = "<Config>";

/// How a registration attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    /// The nick was refused; the connection stays open for another attempt
    NickRejected,
    /// The connection was closed with this reason
    Disconnected(String),
}

/// Main IRC server
pub struct Server {
    pub(crate) config: Config,
    pub(crate) catalog: ModuleCatalog,
    pub(crate) modules: ModuleManager,
    pub(crate) modes: ModeRegistry,
    pub(crate) xlines: XLineManager,
    pub(crate) state: ServerState,
    started_at: DateTime<Utc>,
}

impl Server {
    /// Create a new server instance. Config lines are stored but not yet applied.
    pub fn new(config: Config, catalog: ModuleCatalog) -> Self {
        let modes = ModeRegistry::with_core_modes(&config);
        let state = ServerState::new(&config.server.name);
        let mut server = Self {
            config,
            catalog,
            modules: ModuleManager::new(),
            modes,
            xlines: XLineManager::new(),
            state,
            started_at: Utc::now(),
        };
        server.load_config_lines();
        server
    }

    /// Load configured modules and enforce permanent lines
    pub fn init(&mut self) -> Result<()> {
        self.config.validate()?;

        for pattern in self.config.modules.load.clone() {
            let names = if pattern.contains(['*', '?']) {
                self.catalog.matching(&pattern)
            } else {
                vec![pattern.clone()]
            };
            if names.is_empty() {
                warn!("No module matches '{}'", pattern);
            }
            for name in names {
                if self.modules.is_loaded(&name) {
                    continue;
                }
                if let Err(e) = self.load_module(&name) {
                    error!("Failed to load module '{}': {}", name, e);
                }
            }
        }

        let banned = self.apply_xlines(ApplyMask::ALL, true);
        info!(
            "Server {} initialized with {} modules ({} connections banned)",
            self.config.server.name,
            self.modules.len(),
            banned
        );
        Ok(())
    }

    fn load_config_lines(&mut self) {
        let now = current_unix_timestamp();
        let blocks = [
            (XLineClass::ZLine, &self.config.zline),
            (XLineClass::QLine, &self.config.qline),
            (XLineClass::KLine, &self.config.kline),
            (XLineClass::ELine, &self.config.eline),
        ];
        for (class, entries) in blocks {
            for entry in entries {
                self.xlines
                    .add(class, 0, CONFIG_SOURCE, &entry.reason, &entry.mask, now);
            }
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.server.name
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }

    pub fn modules(&self) -> &ModuleManager {
        &self.modules
    }

    pub fn modes(&self) -> &ModeRegistry {
        &self.modes
    }

    pub fn xlines(&self) -> &XLineManager {
        &self.xlines
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn user(&self, id: UserId) -> Option<&User> {
        self.state.user(id)
    }

    pub fn user_by_nick(&self, nick: &str) -> Option<&User> {
        self.state.user_by_nick(nick)
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.state.channel(name)
    }

    // ----- modules -----

    /// Load a module from the catalog. A failing `init` leaves nothing behind.
    pub fn load_module(&mut self, name: &str) -> Result<ModuleId> {
        if self.modules.is_loaded(name) {
            return Err(ModuleError::AlreadyLoaded(name.to_string()).into());
        }
        let factory = self
            .catalog
            .get(name)
            .ok_or_else(|| ModuleError::NotFound(name.to_string()))?;

        let mut module = factory();
        let id = self.modules.allocate_id();
        let outcome = {
            let mut ctx = ModuleContext::new(
                id,
                name,
                &self.config,
                &mut self.modules,
                &mut self.modes,
                &mut self.state.slots,
            );
            panic::catch_unwind(AssertUnwindSafe(|| module.init(&mut ctx)))
        };
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("panicked during initialisation".to_string()),
        };
        if let Some(reason) = failure {
            self.release_registrations(id);
            warn!("Module '{}' failed to load: {}", name, reason);
            return Err(ModuleError::Init {
                name: name.to_string(),
                reason,
            }
            .into());
        }

        let version = module.version();
        self.modules.insert(id, name, module);
        info!("Loaded module '{}' {} ({})", name, version, id);
        self.modules
            .dispatch(Capability::LoadModule, |m| m.on_load_module(name));
        Ok(id)
    }

    /// Unload a module, refusing static modules and providers of interfaces in use
    pub fn unload_module(&mut self, name: &str) -> Result<()> {
        let id = self
            .modules
            .find(name)
            .ok_or_else(|| ModuleError::NotLoaded(name.to_string()))?;
        let static_module = self
            .modules
            .version_of(id)
            .map(|v| v.flags.contains(VersionFlags::STATIC))
            .unwrap_or(false);
        if static_module {
            return Err(ModuleError::Static(name.to_string()).into());
        }
        if let Some((interface, users)) = self.modules.directory().busy_interface(id) {
            return Err(ModuleError::InterfaceInUse {
                interface: interface.to_string(),
                users,
            }
            .into());
        }

        self.teardown_module(id, name);
        Ok(())
    }

    /// Remove a loaded module and everything it registered
    fn teardown_module(&mut self, id: ModuleId, name: &str) {
        self.modules
            .dispatch(Capability::UnloadModule, |m| m.on_unload_module(name));

        let Some(mut module) = self.modules.remove(id) else {
            return;
        };
        {
            let mut ctx = ModuleContext::new(
                id,
                name,
                &self.config,
                &mut self.modules,
                &mut self.modes,
                &mut self.state.slots,
            );
            if panic::catch_unwind(AssertUnwindSafe(|| module.on_unload(&mut ctx))).is_err() {
                error!("Module '{}' panicked while unloading", name);
            }
        }

        self.strip_owned_modes(id);
        self.cleanup_module_data(module.as_mut(), name);
        self.release_registrations(id);
        info!("Unloaded module '{}' ({})", name, id);
    }

    /// Strip every mode letter `owner` registered from all channels and users, relaying the change
    fn strip_owned_modes(&mut self, owner: ModuleId) {
        let owned = self.modes.owned_by(owner);
        let channel_letters: Vec<char> = owned
            .iter()
            .filter(|(_, kind)| *kind == ModeType::Channel)
            .map(|(c, _)| *c)
            .collect();
        let user_letters: Vec<char> = owned
            .iter()
            .filter(|(_, kind)| *kind == ModeType::User)
            .map(|(c, _)| *c)
            .collect();
        let source = ModeSource::server(&self.config.server.name);

        if !channel_letters.is_empty() {
            for channel in self.state.channels.values_mut() {
                let removals = self.modes.channel_removals(channel, Some(channel_letters.as_slice()));
                if removals.is_empty() {
                    continue;
                }
                let applied = self.modes.strip_channel(&source, channel, &removals);
                if let Some(change) = format_changes(&applied) {
                    channel.write_all(&format!(":{} MODE {} {}", source.mask, channel.name, change), None);
                }
            }
        }

        if !user_letters.is_empty() {
            for user in self.state.users.values_mut() {
                let removals = self.modes.user_removals(user, Some(user_letters.as_slice()));
                if removals.is_empty() {
                    continue;
                }
                let applied = self.modes.strip_user(&source, user, &removals);
                if let Some(change) = format_changes(&applied) {
                    user.write_line(format!(":{} MODE {} :{}", source.mask, user.nick, change));
                }
            }
        }
    }

    /// Give an outgoing module its cleanup call for every entity
    fn cleanup_module_data(&mut self, module: &mut dyn Module, name: &str) {
        for user in self.state.users.values_mut() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                module.on_cleanup(CleanupTarget::User(&mut *user))
            }));
            if outcome.is_err() {
                error!("Module '{}' panicked cleaning up {}", name, user.nick);
            }
        }
        for channel in self.state.channels.values_mut() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                module.on_cleanup(CleanupTarget::Channel(&mut *channel))
            }));
            if outcome.is_err() {
                error!("Module '{}' panicked cleaning up {}", name, channel.name);
            }
        }
    }

    /// Drop modes, directory entries and slot values owned by `id`
    fn release_registrations(&mut self, id: ModuleId) {
        let modes = self.modes.remove_owned(id);
        self.modules.directory_mut().remove_owner(id);
        let slots = self.state.slots.unregister_owner(id);
        for slot in &slots {
            for user in self.state.users.values_mut() {
                user.ext.remove_slot(*slot);
            }
            for channel in self.state.channels.values_mut() {
                channel.ext.remove_slot(*slot);
            }
        }
        debug!(
            "Released registrations of {}: {} modes, {} slots",
            id,
            modes,
            slots.len()
        );
    }

    pub fn send_event(&mut self, event: &Event<'_>) {
        self.modules.send_event(event);
    }

    pub fn send_request(&mut self, request: &Request<'_>) -> Option<Box<dyn Any + Send>> {
        self.modules.send_request(request)
    }

    // ----- connections -----

    /// Accept a connection, subject to Z-lines
    pub fn add_client(&mut self, client: Client, ip: &str, host: &str) -> Result<UserId> {
        let user = User::new(
            host.to_string(),
            ip.to_string(),
            self.config.server.name.clone(),
            Some(client),
        );
        if let Some(line) = self
            .xlines
            .check(&user.xline_subject(), ApplyMask::ZLINES, false)
        {
            let reason = line.quit_reason();
            info!("Refusing connection from {}: {}", ip, reason);
            user.write_line(format!("ERROR :Closing link: ({}) [{}]", ip, reason));
            return Err(Error::Banned(reason));
        }

        let id = user.id;
        debug!("Accepted connection {} from {}", id, ip);
        self.state.users.insert(id, user);
        Ok(id)
    }

    /// Complete registration with NICK and USER details
    pub fn register_user(&mut self, id: UserId, nick: &str, ident: &str, realname: &str) -> RegisterOutcome {
        let Some(user) = self.state.users.get_mut(&id) else {
            return RegisterOutcome::Disconnected("No such connection".to_string());
        };
        if user.registered {
            user.write_numeric(NumericReply::ErrAlreadyRegistered, &["You may not reregister"]);
            return RegisterOutcome::Registered;
        }
        if !is_valid_nickname(nick) {
            user.write_numeric(NumericReply::ErrErroneusNickname, &[nick, "Erroneous Nickname"]);
            return RegisterOutcome::NickRejected;
        }
        if self.state.nicks.contains_key(&irc_to_lower(nick)) {
            user.write_numeric(NumericReply::ErrNicknameInUse, &[nick, "Nickname is already in use"]);
            return RegisterOutcome::NickRejected;
        }
        if !is_valid_username(ident) {
            let reason = "Invalid username".to_string();
            self.quit_user(id, &reason);
            return RegisterOutcome::Disconnected(reason);
        }

        user.nick = nick.to_string();
        user.username = ident.to_string();
        user.realname = realname.to_string();
        let old = "*".to_string();
        self.state.rename(id, &old, nick);

        let banned = self
            .state
            .users
            .get(&id)
            .and_then(|u| {
                self.xlines.check(
                    &u.xline_subject(),
                    ApplyMask::GLINES | ApplyMask::KLINES | ApplyMask::QLINES,
                    false,
                )
            })
            .map(|line| (line.class, line.reason.clone()));
        if let Some((class, reason)) = banned {
            return RegisterOutcome::Disconnected(self.ban_user(id, class, &reason));
        }

        let Some(user) = self.state.users.get(&id) else {
            return RegisterOutcome::Disconnected("No such connection".to_string());
        };
        if self
            .modules
            .dispatch_result(Capability::UserRegister, |m| m.on_user_register(user))
            == HookResult::Deny
        {
            let reason = "Connection refused".to_string();
            self.quit_user(id, &reason);
            self.flush_xline_orders();
            return RegisterOutcome::Disconnected(reason);
        }
        self.flush_xline_orders();
        if !self.state.users.contains_key(&id) {
            return RegisterOutcome::Disconnected("Connection refused".to_string());
        }

        let tokens = self.isupport();
        let Some(user) = self.state.users.get_mut(&id) else {
            return RegisterOutcome::Disconnected("No such connection".to_string());
        };
        user.registered = true;
        user.write_numeric(
            NumericReply::RplWelcome,
            &[&format!(
                "Welcome to the {} IRC Network {}",
                self.config.server.network,
                user.mask()
            )],
        );
        for chunk in tokens.chunks(13) {
            user.write_numeric_raw(
                NumericReply::RplISupport.numeric_code(),
                &format!("{} :are supported by this server", chunk.join(" ")),
            );
        }
        info!("Client connected: {} ({}) [{}]", user.mask(), user.ip, user.realname);

        let user = &*user;
        self.modules
            .dispatch(Capability::UserConnect, |m| m.on_user_connect(user));
        self.modules
            .dispatch(Capability::PostConnect, |m| m.on_post_connect(user));
        RegisterOutcome::Registered
    }

    /// ISUPPORT tokens, including those added by modules
    pub fn isupport(&mut self) -> Vec<String> {
        let mut tokens = vec![
            format!("NETWORK={}", self.config.server.network),
            "CASEMAPPING=rfc1459".to_string(),
            "CHANTYPES=#&".to_string(),
            format!("PREFIX={}", self.modes.prefix_string()),
            format!("CHANMODES={}", self.modes.chanmodes_token()),
            format!("MAXBANS={}", self.config.options.max_bans),
            format!("NICKLEN={}", crate::utils::string::MAX_NICK_LENGTH),
            "MODES=20".to_string(),
        ];
        self.modules
            .dispatch(Capability::ISupport, |m| m.on_isupport(&mut tokens));
        tokens
    }

    /// Disconnect a user
    pub fn quit_user(&mut self, id: UserId, reason: &str) -> bool {
        self.quit_user_with(id, reason, reason)
    }

    /// Disconnect a user; `oper_reason` is what operators and modules see
    pub fn quit_user_with(&mut self, id: UserId, reason: &str, oper_reason: &str) -> bool {
        let Some(mut user) = self.state.users.remove(&id) else {
            return false;
        };
        user.write_line(format!(
            "ERROR :Closing link: ({}@{}) [{}]",
            user.username, user.host, reason
        ));

        if user.registered {
            self.modules
                .dispatch(Capability::UserQuit, |m| m.on_user_quit(&user, reason, oper_reason));
        }

        let quit = format!(":{} QUIT :{}", user.mask(), reason);
        let mut peers = HashSet::new();
        let mut emptied = Vec::new();
        for key in &user.channels {
            if let Some(channel) = self.state.channels.get_mut(key) {
                channel.remove_member(id);
                peers.extend(channel.members.keys().copied());
                if channel.is_empty() {
                    emptied.push(key.clone());
                }
            }
        }
        for peer in peers {
            if let Some(peer) = self.state.users.get(&peer) {
                peer.write_line(quit.as_str());
            }
        }

        self.modules
            .dispatch(Capability::UserDisconnect, |m| m.on_user_disconnect(&user));

        let source = ModeSource::server(&self.config.server.name);
        let removals = self.modes.user_removals(&user, None);
        self.modes.strip_user(&source, &mut user, &removals);
        self.modules
            .dispatch(Capability::Cleanup, |m| m.on_cleanup(CleanupTarget::User(&mut user)));

        let key = irc_to_lower(&user.nick);
        if self.state.nicks.get(&key) == Some(&id) {
            self.state.nicks.remove(&key);
        }
        for key in emptied {
            self.delete_channel(&key);
        }

        if user.registered {
            info!("Client exiting: {} [{}]", user.mask(), oper_reason);
        }
        true
    }

    // ----- channels -----

    /// Join a channel, creating it if needed
    pub fn join_channel(&mut self, id: UserId, name: &str, key: Option<&str>) -> bool {
        let Some(user) = self.state.users.get(&id) else {
            return false;
        };
        if !is_valid_channel_name(name) {
            user.write_numeric(NumericReply::ErrNoSuchChannel, &[name, "Invalid channel name"]);
            return false;
        }
        let ckey = irc_to_lower(name);
        if user.is_in_channel(&ckey) {
            return false;
        }

        let existing = self.state.channels.get(&ckey);
        let verdict = self
            .modules
            .dispatch_result(Capability::UserPreJoin, |m| m.on_user_pre_join(user, existing, name));
        if verdict == HookResult::Deny {
            return false;
        }
        if let (Some(channel), HookResult::Default) = (existing, verdict) {
            if let Some(required) = channel.param('k') {
                if key != Some(required) {
                    user.write_numeric(
                        NumericReply::ErrBadChannelKey,
                        &[&channel.name, "Cannot join channel (+k)"],
                    );
                    return false;
                }
            }
            let limit = channel.param('l').and_then(|l| l.parse::<usize>().ok());
            if limit.is_some_and(|limit| channel.len() >= limit) {
                user.write_numeric(
                    NumericReply::ErrChannelIsFull,
                    &[&channel.name, "Cannot join channel (+l)"],
                );
                return false;
            }
            let banned = match self
                .modules
                .dispatch_result(Capability::CheckBan, |m| m.on_check_ban(user, channel))
            {
                HookResult::Allow => false,
                HookResult::Deny => true,
                HookResult::Default => channel.is_banned(user),
            };
            if banned {
                user.write_numeric(
                    NumericReply::ErrBannedFromChan,
                    &[&channel.name, "Cannot join channel (+b)"],
                );
                return false;
            }
        }

        let created = existing.is_none();
        let channel = self
            .state
            .channels
            .entry(ckey.clone())
            .or_insert_with(|| Channel::new(name));
        let member = channel.add_member(user);
        if created {
            member.grant('o', OP_VALUE);
        }
        channel.write_all(&format!(":{} JOIN :{}", user.mask(), channel.name), None);
        self.modules
            .dispatch(Capability::UserJoin, |m| m.on_user_join(user, channel));

        let names: Vec<String> = channel
            .members
            .values()
            .map(|m| match self.modes.prefix_glyph(m) {
                Some(glyph) => format!("{}{}", glyph, m.nick),
                None => m.nick.clone(),
            })
            .collect();
        let kind = if channel.has_mode('s') {
            "@"
        } else if channel.has_mode('p') {
            "*"
        } else {
            "="
        };
        user.write_numeric(NumericReply::RplNameReply, &[kind, &channel.name, &names.join(" ")]);
        user.write_numeric(NumericReply::RplEndOfNames, &[&channel.name, "End of /NAMES list."]);

        if let Some(user) = self.state.users.get_mut(&id) {
            user.channels.insert(ckey);
        }
        true
    }

    /// Leave a channel, deleting it when it empties
    pub fn part_channel(&mut self, id: UserId, name: &str, reason: &str) -> bool {
        let ckey = irc_to_lower(name);
        let Some(user) = self.state.users.get(&id) else {
            return false;
        };
        let Some(channel) = self.state.channels.get_mut(&ckey).filter(|c| c.is_member(id)) else {
            user.write_numeric(NumericReply::ErrNotOnChannel, &[name, "You're not on that channel"]);
            return false;
        };

        channel.write_all(
            &format!(":{} PART {} :{}", user.mask(), channel.name, reason),
            None,
        );
        self.modules
            .dispatch(Capability::UserPart, |m| m.on_user_part(user, channel, reason));
        channel.remove_member(id);
        let empty = channel.is_empty();

        if let Some(user) = self.state.users.get_mut(&id) {
            user.channels.remove(&ckey);
        }
        if empty {
            self.delete_channel(&ckey);
        }
        true
    }

    /// Destroy a channel: strip its modes, then let modules release their data
    pub fn delete_channel(&mut self, key: &str) -> bool {
        let Some(mut channel) = self.state.channels.remove(key) else {
            return false;
        };
        let source = ModeSource::server(&self.config.server.name);
        let removals = self.modes.channel_removals(&channel, None);
        self.modes.strip_channel(&source, &mut channel, &removals);
        self.modules
            .dispatch(Capability::ChannelDelete, |m| m.on_channel_delete(&mut channel));
        self.modules
            .dispatch(Capability::Cleanup, |m| m.on_cleanup(CleanupTarget::Channel(&mut channel)));
        for member in channel.members.keys() {
            if let Some(user) = self.state.users.get_mut(member) {
                user.channels.remove(key);
            }
        }
        debug!("Deleted channel {}", channel.name);
        true
    }

    // ----- modes -----

    /// MODE from a user, or from this server when `source` is `None`
    pub fn process_mode(
        &mut self,
        source: Option<UserId>,
        target: &str,
        modes: &str,
        params: &[String],
    ) -> ModeOutcome {
        let source = match source {
            Some(id) => match self.state.users.get(&id) {
                Some(user) => ModeSource::for_user(user),
                None => return ModeOutcome::default(),
            },
            None => ModeSource::server(&self.config.server.name),
        };
        self.apply_mode(&source, target, modes, params)
    }

    /// Run a mode change for an explicit source and relay what was applied
    pub fn apply_mode(&mut self, source: &ModeSource, target: &str, modes: &str, params: &[String]) -> ModeOutcome {
        let outcome = {
            let mut ctx = ModeContext {
                state: &mut self.state,
                modules: &mut self.modules,
            };
            self.modes.process(&mut ctx, source, target, modes, params)
        };

        if let Some(change) = outcome.line() {
            if outcome.is_channel {
                if let Some(channel) = self.state.channel(&outcome.target) {
                    channel.write_all(&format!(":{} MODE {} {}", source.mask, channel.name, change), None);
                }
            } else if let Some(user) = self.state.user_by_nick(&outcome.target) {
                user.write_line(format!(":{} MODE {} :{}", source.mask, user.nick, change));
            }
            debug!("{} set {} on {}", source.name, change, outcome.target);
            self.modules
                .dispatch(Capability::Mode, |m| m.on_mode(source, &outcome.target, &change));
        }
        outcome
    }

    /// Give a user operator status
    pub fn set_oper(&mut self, id: UserId, oper_type: &str) -> bool {
        let Some(user) = self.state.users.get_mut(&id) else {
            return false;
        };
        user.oper_type = Some(oper_type.to_string());
        if user.add_mode('o') {
            user.write_line(format!(":{} MODE {} :+o", user.nick, user.nick));
        }
        info!("{} is now an IRC operator of type {}", user.mask(), oper_type);
        true
    }

    // ----- nicks -----

    pub fn change_nick(&mut self, id: UserId, new_nick: &str) -> bool {
        let Some(user) = self.state.users.get(&id) else {
            return false;
        };
        if user.nick == new_nick {
            return false;
        }
        if !is_valid_nickname(new_nick) {
            user.write_numeric(NumericReply::ErrErroneusNickname, &[new_nick, "Erroneous Nickname"]);
            return false;
        }
        if self
            .state
            .nicks
            .get(&irc_to_lower(new_nick))
            .is_some_and(|owner| *owner != id)
        {
            user.write_numeric(NumericReply::ErrNicknameInUse, &[new_nick, "Nickname is already in use"]);
            return false;
        }
        if !user.is_operator() {
            let subject = XLineSubject {
                nick: new_nick,
                ident: &user.username,
                host: &user.host,
                ip: &user.ip,
            };
            if let Some(line) = self.xlines.check(&subject, ApplyMask::QLINES, false) {
                user.write_numeric(
                    NumericReply::ErrErroneusNickname,
                    &[new_nick, &format!("Invalid nickname: {}", line.reason)],
                );
                return false;
            }
        }
        if self
            .modules
            .dispatch_result(Capability::UserPreNick, |m| m.on_user_pre_nick(user, &self.state, new_nick))
            == HookResult::Deny
        {
            return false;
        }

        let line = format!(":{} NICK :{}", user.mask(), new_nick);
        let mut peers: HashSet<UserId> = HashSet::new();
        for key in &user.channels {
            if let Some(channel) = self.state.channels.get_mut(key) {
                if let Some(member) = channel.member_mut(id) {
                    member.nick = new_nick.to_string();
                }
                peers.extend(channel.members.keys().copied());
            }
        }
        peers.insert(id);
        for peer in peers {
            if let Some(peer) = self.state.users.get(&peer) {
                peer.write_line(line.as_str());
            }
        }

        let Some(user) = self.state.users.get_mut(&id) else {
            return false;
        };
        let old_nick = std::mem::replace(&mut user.nick, new_nick.to_string());
        self.state.rename(id, &old_nick, new_nick);
        if let Some(user) = self.state.users.get(&id) {
            self.modules
                .dispatch(Capability::UserPostNick, |m| m.on_user_post_nick(user, &old_nick));
        }
        true
    }

    // ----- X-lines -----

    /// Add or replace a line and enforce it. False when an existing line was replaced.
    pub fn add_xline(&mut self, class: XLineClass, duration: u64, source: &str, reason: &str, mask: &str) -> bool {
        let now = current_unix_timestamp();
        let added = self.xlines.add(class, duration, source, reason, mask, now);
        if let Some(line) = self.xlines.store(class).get(mask).cloned() {
            self.modules
                .dispatch(Capability::AddXLine, |m| m.on_add_xline(&line));
        }
        if class != XLineClass::ELine {
            self.apply_xlines(ApplyMask::for_class(class), false);
        }
        added
    }

    pub fn del_xline(&mut self, class: XLineClass, mask: &str, source: &str) -> bool {
        if !self.xlines.del(class, mask) {
            return false;
        }
        info!("{} {} removed by {}", class, mask, source);
        self.modules
            .dispatch(Capability::DelXLine, |m| m.on_del_xline(class, mask, source));
        true
    }

    /// Sweep local connections once against `mask`; returns how many were disconnected
    pub fn apply_xlines(&mut self, mask: ApplyMask, permanent_only: bool) -> usize {
        let sentences = self
            .xlines
            .sweep(mask, permanent_only, self.state.local_subjects());
        let count = sentences.len();
        for sentence in sentences {
            self.ban_user(sentence.user, sentence.class, &sentence.reason);
        }
        count
    }

    /// Disconnect a user caught by a line; returns the public quit reason
    fn ban_user(&mut self, id: UserId, class: XLineClass, reason: &str) -> String {
        let full = format!("{}-Lined: {}", class.letter(), reason);
        let public = if self.config.options.hide_bans {
            format!("{}-Lined", class.letter())
        } else {
            full.clone()
        };
        if let Some(user) = self.state.users.get(&id) {
            if let Some(banner) = &self.config.options.ban_banner {
                user.write_notice(banner);
            }
            info!("{} matched {}: {}", user.mask(), class, reason);
        }
        self.quit_user_with(id, &public, &full);
        public
    }

    /// Periodic work: expire timed lines, then the background timer hook
    pub fn tick(&mut self, now: i64) {
        let expired = self.xlines.expire(now);
        for line in &expired {
            self.modules
                .dispatch(Capability::ExpireXLine, |m| m.on_expire_xline(line));
        }
        self.modules
            .dispatch(Capability::BackgroundTimer, |m| m.on_background_timer(now));
        self.flush_xline_orders();
    }

    /// Add the lines modules queued from their hooks
    pub(crate) fn flush_xline_orders(&mut self) {
        if self.modules.xline_sink().is_empty() {
            return;
        }
        for order in self.modules.xline_sink().take() {
            info!(
                "{} on {} added by {}: {}",
                order.class, order.mask, order.source, order.reason
            );
            self.add_xline(order.class, order.duration, &order.source, &order.reason, &order.mask);
        }
    }

    /// Replace the configuration and push it to handlers and modules
    pub fn rehash(&mut self, config: Config) -> Result<()> {
        config.validate()?;
        self.config = config;
        self.load_config_lines();
        self.modes.rehash(&self.config);
        let config = &self.config;
        self.modules
            .dispatch(Capability::Rehash, |m| m.on_rehash(config));
        self.apply_xlines(ApplyMask::ALL, true);
        info!("Rehashed configuration");
        Ok(())
    }

    // ----- queries -----

    /// Send WHOIS for `nick` to `source`
    pub fn whois(&mut self, source: UserId, nick: &str) {
        let Some(viewer) = self.state.users.get(&source) else {
            return;
        };
        let Some(dest) = self.state.user_by_nick(nick) else {
            viewer.write_numeric(NumericReply::ErrNoSuchNick, &[nick, "No such nick/channel"]);
            viewer.write_numeric(NumericReply::RplEndOfWhois, &[nick, "End of /WHOIS list."]);
            return;
        };

        let mut lines = vec![NumericLine::new(
            NumericReply::RplWhoisUser.numeric_code(),
            format!("{} {} {} * :{}", dest.nick, dest.username, dest.host, dest.realname),
        )];

        let mut channels: Vec<String> = dest
            .channels
            .iter()
            .filter_map(|key| self.state.channels.get(key))
            .filter(|c| {
                viewer.id == dest.id || !(c.has_mode('s') || c.has_mode('p')) || c.is_member(viewer.id)
            })
            .map(|c| {
                let glyph = c.member(dest.id).and_then(|m| self.modes.prefix_glyph(m));
                match glyph {
                    Some(glyph) => format!("{}{}", glyph, c.name),
                    None => c.name.clone(),
                }
            })
            .collect();
        channels.sort();
        if !channels.is_empty() {
            lines.push(NumericLine::new(
                NumericReply::RplWhoisChannels.numeric_code(),
                format!("{} :{}", dest.nick, channels.join(" ")),
            ));
        }
        lines.push(NumericLine::new(
            NumericReply::RplWhoisServer.numeric_code(),
            format!("{} {} :{}", dest.nick, dest.server, self.config.server.description),
        ));
        if dest.is_operator() {
            lines.push(NumericLine::new(
                NumericReply::RplWhoisOperator.numeric_code(),
                format!("{} :is an IRC operator", dest.nick),
            ));
        }
        self.modules.dispatch(Capability::Whois, |m| {
            lines.extend(m.on_whois(viewer, dest));
        });

        for line in lines {
            let verdict = self.modules.dispatch_result(Capability::WhoisLine, |m| {
                m.on_whois_line(viewer, dest, line.numeric, &line.text)
            });
            if verdict != HookResult::Deny {
                viewer.write_numeric_raw(line.numeric, &line.text);
            }
        }
        viewer.write_numeric(NumericReply::RplEndOfWhois, &[&dest.nick, "End of /WHOIS list."]);
    }

    /// Send a STATS report to `source`
    pub fn stats(&mut self, source: UserId, letter: char) {
        let Some(viewer) = self.state.users.get(&source) else {
            return;
        };
        let mut results: Vec<NumericLine> = match XLineClass::from_letter(letter) {
            Some(class) if viewer.is_operator() => self
                .xlines
                .store(class)
                .iter()
                .map(|line| NumericLine::new(class.stats_numeric().numeric_code(), line.stats_text()))
                .collect(),
            _ => Vec::new(),
        };

        let verdict = self
            .modules
            .dispatch_result(Capability::Stats, |m| m.on_stats(letter, viewer, &mut results));
        if verdict != HookResult::Deny {
            for line in &results {
                viewer.write_numeric_raw(line.numeric, &line.text);
            }
        }
        viewer.write_numeric(
            NumericReply::RplEndOfStats,
            &[&letter.to_string(), "End of /STATS report"],
        );
    }

    /// Quit everyone and unload modules in reverse load order
    pub fn shutdown(&mut self, reason: &str) {
        let users: Vec<UserId> = self.state.users.keys().copied().collect();
        for id in users {
            self.quit_user(id, reason);
        }
        for id in self.modules.ids().into_iter().rev() {
            if let Some(name) = self.modules.name_of(id).map(str::to_string) {
                self.teardown_module(id, &name);
            }
        }
        info!("Server {} shut down: {}", self.config.server.name, reason);
    }
}
