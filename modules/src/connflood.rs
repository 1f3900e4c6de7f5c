//! Global connection throttle
//!
//! Counts registrations in a sliding window of `seconds`. Reaching `max_conns` inside one
//! window refuses every registration until `seconds + timeout` have passed since the
//! window opened.
//!
//! ```toml
//! [modules.settings.connflood]
//! seconds = 30
//! max_conns = 10
//! timeout = 60
//! quit_msg = "Throttled"
//! boot_wait = 20
//! ```

use modircd_core::utils::time::current_unix_timestamp;
use modircd_core::{
    Capability, CapabilitySet, Config, HookResult, Module, ModuleContext, Result, User, Version, VersionFlags,
};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnFloodSettings {
    /// Window length
    pub seconds: i64,
    /// Registrations per window that trigger the throttle
    pub max_conns: u32,
    /// Extra seconds the throttle stays on after the window
    pub timeout: i64,
    pub quit_msg: String,
    /// Grace period after startup during which nothing is counted
    pub boot_wait: i64,
}

impl Default for ConnFloodSettings {
    fn default() -> Self {
        Self {
            seconds: 30,
            max_conns: 10,
            timeout: 60,
            quit_msg: "Throttled".to_string(),
            boot_wait: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Refuse,
    /// The registration that switched the throttle on; refused
    Activated,
    /// The throttle just expired; accepted
    Lifted,
}

impl Verdict {
    pub fn refused(&self) -> bool {
        matches!(self, Verdict::Refuse | Verdict::Activated)
    }
}

#[derive(Debug, Clone)]
pub struct Throttle {
    started: i64,
    first: i64,
    conns: u32,
    throttled: bool,
}

impl Throttle {
    pub fn new(now: i64) -> Self {
        Self {
            started: now,
            first: now,
            conns: 0,
            throttled: false,
        }
    }

    /// Restart the window, keeping any active throttle
    pub fn restart(&mut self, now: i64) {
        self.first = now;
    }

    pub fn is_throttled(&self) -> bool {
        self.throttled
    }

    pub fn check(&mut self, settings: &ConnFloodSettings, now: i64) -> Verdict {
        if self.started + settings.boot_wait > now {
            return Verdict::Accept;
        }
        let elapsed = now - self.first;
        self.conns += 1;

        if self.throttled {
            if elapsed > settings.seconds + settings.timeout {
                self.throttled = false;
                return Verdict::Lifted;
            }
            return Verdict::Refuse;
        }

        if elapsed <= settings.seconds {
            if self.conns >= settings.max_conns {
                self.throttled = true;
                return Verdict::Activated;
            }
        } else {
            self.conns = 1;
            self.first = now;
        }
        Verdict::Accept
    }
}

pub struct ConnFloodModule {
    settings: ConnFloodSettings,
    throttle: Throttle,
}

impl ConnFloodModule {
    pub fn new() -> Self {
        Self {
            settings: ConnFloodSettings::default(),
            throttle: Throttle::new(current_unix_timestamp()),
        }
    }
}

impl Default for ConnFloodModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for ConnFloodModule {
    fn name(&self) -> &str {
        "connflood"
    }

    fn version(&self) -> Version {
        Version::new(1, 1, 0, 0, VersionFlags::VENDOR)
    }

    fn description(&self) -> &str {
        "Connection throttle"
    }

    fn implements(&self) -> CapabilitySet {
        CapabilitySet::of(&[Capability::UserRegister, Capability::Rehash])
    }

    fn init(&mut self, ctx: &mut ModuleContext<'_>) -> Result<()> {
        self.settings = ctx.settings()?;
        self.throttle = Throttle::new(current_unix_timestamp());
        Ok(())
    }

    fn on_user_register(&mut self, user: &User) -> HookResult {
        let verdict = self.throttle.check(&self.settings, current_unix_timestamp());
        match verdict {
            Verdict::Activated => warn!("*** Connection throttle activated"),
            Verdict::Lifted => info!("*** Connection throttle deactivated"),
            _ => {}
        }
        if !verdict.refused() {
            return HookResult::Default;
        }
        user.write_notice(&format!("*** {}", self.settings.quit_msg));
        HookResult::Deny
    }

    fn on_rehash(&mut self, config: &Config) {
        match config.module_settings::<ConnFloodSettings>("connflood") {
            Ok(settings) => {
                self.settings = settings;
                self.throttle.restart(current_unix_timestamp());
            }
            Err(e) => warn!("connflood: keeping previous settings: {}", e),
        }
    }
}
