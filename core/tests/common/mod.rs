//! Shared fixtures: a server factory and small modules that record what they see

#![allow(dead_code)]

use modircd_core::*;
use std::any::Any;
use std::cell::RefCell;
use tokio::sync::mpsc::UnboundedReceiver;

thread_local! {
    static TRACE: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Record a hook call for the current test thread
pub fn trace(entry: impl Into<String>) {
    TRACE.with(|t| t.borrow_mut().push(entry.into()));
}

/// Take everything traced so far
pub fn take_trace() -> Vec<String> {
    TRACE.with(|t| std::mem::take(&mut *t.borrow_mut()))
}

/// Logs joins under its own name, with a fixed priority
pub struct Tracer {
    name: &'static str,
    priority: Priority,
}

impl Module for Tracer {
    fn name(&self) -> &str {
        self.name
    }

    fn version(&self) -> Version {
        Version::new(1, 0, 0, 0, VersionFlags::NONE)
    }

    fn implements(&self) -> CapabilitySet {
        CapabilitySet::of(&[Capability::UserJoin, Capability::BackgroundTimer, Capability::ExpireXLine])
    }

    fn prioritize(&self, capability: Capability) -> Priority {
        if capability == Capability::UserJoin {
            self.priority.clone()
        } else {
            Priority::DontCare
        }
    }

    fn on_user_join(&mut self, user: &User, channel: &mut Channel) {
        trace(format!("{}:{}:{}", self.name, user.nick, channel.name));
    }

    fn on_background_timer(&mut self, now: i64) {
        trace(format!("{}:timer:{}", self.name, now));
    }

    fn on_expire_xline(&mut self, line: &XLine) {
        trace(format!("{}:expired:{}", self.name, line.mask()));
    }
}

/// Panics in a notification hook and a result hook
pub struct Panicky;

impl Module for Panicky {
    fn name(&self) -> &str {
        "panicky"
    }

    fn version(&self) -> Version {
        Version::new(1, 0, 0, 0, VersionFlags::NONE)
    }

    fn implements(&self) -> CapabilitySet {
        CapabilitySet::of(&[Capability::UserJoin, Capability::RawMode])
    }

    fn prioritize(&self, _capability: Capability) -> Priority {
        Priority::First
    }

    fn on_user_join(&mut self, _user: &User, _channel: &mut Channel) {
        panic!("join handler exploded");
    }

    fn on_raw_mode(&mut self, _source: &ModeSource, _target: &str, mode: char, _param: &str, _adding: bool) -> HookResult {
        if mode == 'm' {
            panic!("raw mode handler exploded");
        }
        HookResult::Default
    }
}

/// Lets a user named `trusted` change channel modes without channel rank
pub struct Gatekeeper;

impl Module for Gatekeeper {
    fn name(&self) -> &str {
        "gatekeeper"
    }

    fn version(&self) -> Version {
        Version::new(1, 0, 0, 0, VersionFlags::NONE)
    }

    fn implements(&self) -> CapabilitySet {
        CapabilitySet::of(&[Capability::AccessCheck, Capability::PreCommand, Capability::ISupport])
    }

    fn on_access_check(&mut self, source: &User, _dest: Option<&User>, _channel: &Channel, _access: AccessType) -> HookResult {
        if source.nick == "trusted" {
            HookResult::Allow
        } else {
            HookResult::Default
        }
    }

    fn on_pre_command(
        &mut self,
        _user: &User,
        _state: &ServerState,
        command: &str,
        _params: &[String],
    ) -> HookResult {
        if command == "STATS" {
            HookResult::Deny
        } else {
            HookResult::Default
        }
    }

    fn on_isupport(&mut self, tokens: &mut Vec<String>) {
        tokens.push("GATEKEEPER".to_string());
    }
}

/// Provides the `Echo` interface and the `echo` feature
pub struct Provider;

impl Module for Provider {
    fn name(&self) -> &str {
        "provider"
    }

    fn version(&self) -> Version {
        Version::new(1, 2, 0, 0, VersionFlags::SERVICE_PROVIDER)
    }

    fn implements(&self) -> CapabilitySet {
        CapabilitySet::empty()
    }

    fn init(&mut self, ctx: &mut ModuleContext<'_>) -> Result<()> {
        if !ctx.publish_feature("echo") {
            return Err("feature 'echo' already provided".into());
        }
        ctx.publish_interface("Echo");
        Ok(())
    }

    fn on_request(&mut self, request: &Request<'_>) -> Option<Box<dyn Any + Send>> {
        if request.id() != "SHOUT" {
            return None;
        }
        let text = request.data::<String>()?;
        Some(Box::new(text.to_uppercase()))
    }
}

/// Second provider of the `echo` feature; cannot load next to [`Provider`]
pub struct Impostor;

impl Module for Impostor {
    fn name(&self) -> &str {
        "impostor"
    }

    fn version(&self) -> Version {
        Version::new(1, 0, 0, 0, VersionFlags::NONE)
    }

    fn implements(&self) -> CapabilitySet {
        CapabilitySet::empty()
    }

    fn init(&mut self, ctx: &mut ModuleContext<'_>) -> Result<()> {
        ctx.add_mode(Box::new(SimpleChannelMode::new('Y')))?;
        if !ctx.publish_feature("echo") {
            return Err("feature 'echo' already provided".into());
        }
        Ok(())
    }
}

/// Uses the `Echo` interface for as long as it is loaded
pub struct Consumer;

impl Module for Consumer {
    fn name(&self) -> &str {
        "consumer"
    }

    fn version(&self) -> Version {
        Version::new(1, 0, 0, 0, VersionFlags::NONE)
    }

    fn implements(&self) -> CapabilitySet {
        CapabilitySet::empty()
    }

    fn init(&mut self, ctx: &mut ModuleContext<'_>) -> Result<()> {
        let provider = ctx
            .find_interface("Echo")
            .and_then(|entry| entry.providers().first().copied())
            .ok_or("no Echo provider")?;
        let text = "hello".to_string();
        let reply: Option<String> = reply_as(ctx.send_request(&Request::new("SHOUT", ctx.id(), provider, &text)));
        trace(format!("consumer:{}", reply.unwrap_or_default()));
        ctx.use_interface("Echo");
        Ok(())
    }

    fn on_unload(&mut self, ctx: &mut ModuleContext<'_>) {
        ctx.done_with_interface("Echo");
    }
}

/// Registers things, then fails to initialise
pub struct Failing;

impl Module for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    fn version(&self) -> Version {
        Version::new(1, 0, 0, 0, VersionFlags::NONE)
    }

    fn implements(&self) -> CapabilitySet {
        CapabilitySet::of(&[Capability::UserJoin])
    }

    fn init(&mut self, ctx: &mut ModuleContext<'_>) -> Result<()> {
        ctx.add_mode(Box::new(SimpleUserMode::new('z')))?;
        let _slot = ctx.register_slot::<u32>("failing.counter");
        ctx.publish_feature("failing");
        Err("missing configuration".into())
    }
}

pub struct Pinned;

impl Module for Pinned {
    fn name(&self) -> &str {
        "pinned"
    }

    fn version(&self) -> Version {
        Version::new(1, 0, 0, 0, VersionFlags::STATIC | VersionFlags::VENDOR)
    }

    fn implements(&self) -> CapabilitySet {
        CapabilitySet::empty()
    }
}

/// Owns channel mode `+Z` and a per-channel counter slot
pub struct ModeOwner {
    slot: Option<SlotKey<u32>>,
}

impl Module for ModeOwner {
    fn name(&self) -> &str {
        "modeowner"
    }

    fn version(&self) -> Version {
        Version::new(1, 0, 0, 0, VersionFlags::NONE)
    }

    fn implements(&self) -> CapabilitySet {
        CapabilitySet::of(&[Capability::UserJoin, Capability::Cleanup])
    }

    fn init(&mut self, ctx: &mut ModuleContext<'_>) -> Result<()> {
        ctx.add_mode(Box::new(SimpleChannelMode::new('Z')))?;
        self.slot = Some(ctx.register_slot("modeowner.joins"));
        Ok(())
    }

    fn on_user_join(&mut self, _user: &User, channel: &mut Channel) {
        if let Some(slot) = &self.slot {
            let joins = channel.ext.get(slot).copied().unwrap_or(0);
            channel.ext.set(slot, joins + 1);
        }
    }

    fn on_cleanup(&mut self, target: CleanupTarget<'_>) {
        if let (CleanupTarget::Channel(channel), Some(slot)) = (target, &self.slot) {
            if let Some(joins) = channel.ext.take(slot) {
                trace(format!("modeowner:cleanup:{}:{}", channel.name, joins));
            }
        }
    }
}

/// Channel mode `+X <text>` whose handler panics on "boom"
struct ExplodingMode;

impl ModeHandler for ExplodingMode {
    fn mode_char(&self) -> char {
        'X'
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
        if parameter == "boom" {
            panic!("exploding mode handler");
        }
        if adding {
            channel.set_param('X', parameter);
        } else {
            channel.unset_mode('X');
        }
        ModeAction::Allow
    }
}

pub struct BrokenMode;

impl Module for BrokenMode {
    fn name(&self) -> &str {
        "brokenmode"
    }

    fn version(&self) -> Version {
        Version::new(1, 0, 0, 0, VersionFlags::NONE)
    }

    fn implements(&self) -> CapabilitySet {
        CapabilitySet::empty()
    }

    fn init(&mut self, ctx: &mut ModuleContext<'_>) -> Result<()> {
        ctx.add_mode(Box::new(ExplodingMode))
    }
}

pub fn test_catalog() -> ModuleCatalog {
    let mut catalog = ModuleCatalog::new();
    catalog
        .register("tracer", || {
            Box::new(Tracer { name: "tracer", priority: Priority::DontCare }) as Box<dyn Module>
        })
        .register("early", || Box::new(Tracer { name: "early", priority: Priority::First }) as Box<dyn Module>)
        .register("late", || Box::new(Tracer { name: "late", priority: Priority::Last }) as Box<dyn Module>)
        .register("before_tracer", || {
            Box::new(Tracer {
                name: "before_tracer",
                priority: Priority::Before("tracer".to_string()),
            }) as Box<dyn Module>
        })
        .register("panicky", || Box::new(Panicky) as Box<dyn Module>)
        .register("gatekeeper", || Box::new(Gatekeeper) as Box<dyn Module>)
        .register("provider", || Box::new(Provider) as Box<dyn Module>)
        .register("impostor", || Box::new(Impostor) as Box<dyn Module>)
        .register("consumer", || Box::new(Consumer) as Box<dyn Module>)
        .register("failing", || Box::new(Failing) as Box<dyn Module>)
        .register("pinned", || Box::new(Pinned) as Box<dyn Module>)
        .register("modeowner", || Box::new(ModeOwner { slot: None }) as Box<dyn Module>)
        .register("brokenmode", || Box::new(BrokenMode) as Box<dyn Module>);
    catalog
}

/// A started server named `irc.test`; `extra` is appended to the config
pub fn server(extra: &str) -> Server {
    let config: Config = format!(
        "[server]\nname = \"irc.test\"\nnetwork = \"TestNet\"\ndescription = \"Test server\"\n{}",
        extra
    )
    .parse()
    .expect("test config parses");
    let mut server = Server::new(config, test_catalog());
    server.init().expect("server starts");
    take_trace();
    server
}

pub fn connect_from(server: &mut Server, nick: &str, ip: &str, host: &str) -> (UserId, UnboundedReceiver<String>) {
    let (client, rx) = Client::channel(format!("{}:40000", ip));
    let id = server.add_client(client, ip, host).expect("connection accepted");
    assert_eq!(server.register_user(id, nick, nick, "Test User"), RegisterOutcome::Registered);
    (id, rx)
}

pub fn connect(server: &mut Server, nick: &str) -> (UserId, UnboundedReceiver<String>) {
    connect_from(server, nick, "10.0.0.1", "host.example.com")
}

pub fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(line) = rx.try_recv() {
        lines.push(line);
    }
    lines
}

pub fn params(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
