//! Host cloaking (`+x` user mode)
//!
//! Replaces a local user's displayed host with a keyed, non-reversible mask. The hash
//! comes from whichever module provides the `HashRequest` interface, so a provider such
//! as `sha256` has to be loaded first and cannot be unloaded while cloaking is.
//!
//! ```toml
//! [modules.settings.cloaking]
//! key1 = "..."
//! key2 = "..."
//! key3 = "..."
//! prefix = "MyNet"   # defaults to the network name
//! ```

use crate::hash::{Hasher, HASH_INTERFACE, REQ_HASHER};
use modircd_core::{
    reply_as, Capability, CapabilitySet, CleanupTarget, Config, Error, ModeAction, ModeHandler, ModeSource,
    ModeTarget, ModeType, Module, ModuleContext, Request, Result, SlotKey, Version, VersionFlags,
};
use parking_lot::RwLock;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MAX_HOST_LENGTH: usize = 63;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CloakSettings {
    pub key1: String,
    pub key2: String,
    pub key3: String,
    pub prefix: String,
}

/// Validated keys and prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloakKeys {
    key1: String,
    key2: String,
    key3: String,
    prefix: String,
}

impl CloakKeys {
    pub fn from_settings(settings: CloakSettings, network: &str) -> Result<Self> {
        for (name, value) in [("key1", &settings.key1), ("key2", &settings.key2), ("key3", &settings.key3)] {
            if value.is_empty() {
                return Err(Error::Config(format!(
                    "cloaking: {} is not set; refusing to cloak hosts with an empty key",
                    name
                )));
            }
        }
        let prefix = if settings.prefix.is_empty() {
            network.to_string()
        } else {
            settings.prefix
        };
        Ok(Self {
            key1: settings.key1,
            key2: settings.key2,
            key3: settings.key3,
            prefix,
        })
    }
}

/// Fold a digest down to 32 bits
fn downsample(digest: &[u8]) -> u32 {
    let mut folded = [0u8; 4];
    for (i, byte) in digest.iter().enumerate() {
        folded[i % 4] ^= byte;
    }
    u32::from_be_bytes(folded)
}

pub struct Cloaker {
    keys: CloakKeys,
    hasher: Hasher,
}

impl Cloaker {
    pub fn new(keys: CloakKeys, hasher: Hasher) -> Self {
        Self { keys, hasher }
    }

    pub fn set_keys(&mut self, keys: CloakKeys) {
        self.keys = keys;
    }

    /// `downsample(hash(hash(inner) + outer))`
    fn mix(&self, inner: &str, outer: &str) -> u32 {
        let mut buf = (self.hasher)(inner.as_bytes());
        buf.extend_from_slice(outer.as_bytes());
        downsample(&(self.hasher)(&buf))
    }

    /// `ALPHA.BETA.GAMMA.IP`, unique per address, per /24 and per /16
    pub fn cloak_ipv4(&self, addr: Ipv4Addr) -> String {
        let [a, b, c, _] = addr.octets();
        let k = &self.keys;
        let alpha = self.mix(&format!("{}:{}:{}", k.key2, addr, k.key3), &k.key1);
        let beta = self.mix(&format!("{}:{}.{}.{}:{}", k.key3, a, b, c, k.key1), &k.key2);
        let gamma = self.mix(&format!("{}:{}.{}:{}", k.key1, a, b, k.key2), &k.key3);
        format!("{:X}.{:X}.{:X}.IP", alpha, beta, gamma)
    }

    /// `ALPHA:BETA:GAMMA:IP`, unique per address, per /112 and per /64
    pub fn cloak_ipv6(&self, addr: Ipv6Addr) -> String {
        let s = addr.segments();
        let k = &self.keys;
        let hex = |parts: &[u16]| parts.iter().map(|p| format!("{:x}", p)).collect::<Vec<_>>().join(":");
        let alpha = self.mix(&format!("{}:{}:{}", k.key2, addr, k.key3), &k.key1);
        let beta = self.mix(&format!("{}:{}:{}", k.key3, hex(&s[..7]), k.key1), &k.key2);
        let gamma = self.mix(&format!("{}:{}:{}", k.key1, hex(&s[..4]), k.key2), &k.key3);
        format!("{:X}:{:X}:{:X}:IP", alpha, beta, gamma)
    }

    /// `prefix-ALPHA.domain`, keeping the domain from the first label starting with a letter
    pub fn cloak_host(&self, host: &str) -> String {
        let k = &self.keys;
        let alpha = self.mix(&format!("{}:{}:{}", k.key1, host, k.key2), &k.key3);
        let head = format!("{}-{:X}", k.prefix, alpha);

        let domain = host
            .char_indices()
            .find(|(i, c)| {
                *c == '.'
                    && host[i + 1..]
                        .chars()
                        .next()
                        .is_some_and(|next| next.is_ascii_alphabetic())
            })
            .map(|(i, _)| &host[i + 1..]);
        let Some(domain) = domain else {
            return head;
        };

        let len = head.len() + 1 + domain.len();
        let domain = if len <= MAX_HOST_LENGTH {
            domain
        } else {
            domain.get(len - MAX_HOST_LENGTH..).unwrap_or(domain)
        };
        format!("{}.{}", head, domain)
    }

    /// The cloak for `host`, or `None` for single-label hosts such as `localhost`
    pub fn cloak(&self, host: &str) -> Option<String> {
        if !host.contains(['.', ':']) {
            return None;
        }
        Some(match host.parse::<IpAddr>() {
            Ok(IpAddr::V4(addr)) => self.cloak_ipv4(addr),
            Ok(IpAddr::V6(addr)) => self.cloak_ipv6(addr),
            Err(_) => self.cloak_host(host),
        })
    }
}

struct CloakMode {
    cloaker: Arc<RwLock<Cloaker>>,
    real_host: SlotKey<String>,
}

impl ModeHandler for CloakMode {
    fn mode_char(&self) -> char {
        'x'
    }

    fn mode_type(&self) -> ModeType {
        ModeType::User
    }

    fn on_mode_change(
        &self,
        source: &ModeSource,
        target: ModeTarget<'_>,
        _parameter: &mut String,
        adding: bool,
    ) -> ModeAction {
        let ModeTarget::User(user) = target else {
            return ModeAction::Deny;
        };
        if source.user.is_some_and(|id| id != user.id) {
            return ModeAction::Deny;
        }

        if adding {
            if user.has_mode('x') {
                return ModeAction::Deny;
            }
            // remote users are cloaked by their own server
            if user.is_local() {
                if let Some(cloak) = self.cloaker.read().cloak(&user.host) {
                    debug!("Cloaking {} as {}", user.nick, cloak);
                    let real = std::mem::replace(&mut user.host, cloak);
                    user.ext.set(&self.real_host, real);
                }
            }
            user.add_mode('x');
            ModeAction::Allow
        } else {
            if !user.remove_mode('x') {
                return ModeAction::Deny;
            }
            if let Some(real) = user.ext.take(&self.real_host) {
                user.host = real;
            }
            ModeAction::Allow
        }
    }
}

pub struct CloakingModule {
    cloaker: Option<Arc<RwLock<Cloaker>>>,
    real_host: Option<SlotKey<String>>,
}

impl CloakingModule {
    pub fn new() -> Self {
        Self {
            cloaker: None,
            real_host: None,
        }
    }
}

impl Default for CloakingModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for CloakingModule {
    fn name(&self) -> &str {
        "cloaking"
    }

    fn version(&self) -> Version {
        Version::new(4, 0, 0, 0, VersionFlags::COMMON | VersionFlags::VENDOR)
    }

    fn description(&self) -> &str {
        "Provides user mode +x (host cloaking)"
    }

    fn implements(&self) -> CapabilitySet {
        CapabilitySet::of(&[Capability::Rehash, Capability::Cleanup])
    }

    fn init(&mut self, ctx: &mut ModuleContext<'_>) -> Result<()> {
        let keys = CloakKeys::from_settings(ctx.settings()?, &ctx.config().server.network)?;

        let provider = ctx
            .find_interface(HASH_INTERFACE)
            .and_then(|entry| entry.providers().first().copied())
            .ok_or_else(|| {
                Error::Generic(format!("no {} provider is loaded (load sha256 first)", HASH_INTERFACE))
            })?;
        let request = Request::new(REQ_HASHER, ctx.id(), provider, &());
        let hasher: Hasher = reply_as(ctx.send_request(&request))
            .ok_or_else(|| Error::Generic(format!("{} provider gave no hasher", HASH_INTERFACE)))?;
        ctx.use_interface(HASH_INTERFACE);

        let real_host = ctx.register_slot::<String>("cloaking.real_host");
        let cloaker = Arc::new(RwLock::new(Cloaker::new(keys, hasher)));
        ctx.add_mode(Box::new(CloakMode {
            cloaker: Arc::clone(&cloaker),
            real_host,
        }))?;

        self.cloaker = Some(cloaker);
        self.real_host = Some(real_host);
        Ok(())
    }

    fn on_unload(&mut self, ctx: &mut ModuleContext<'_>) {
        ctx.done_with_interface(HASH_INTERFACE);
    }

    fn on_rehash(&mut self, config: &Config) {
        let Some(cloaker) = &self.cloaker else {
            return;
        };
        let keys = config
            .module_settings::<CloakSettings>("cloaking")
            .and_then(|settings| CloakKeys::from_settings(settings, &config.server.network));
        match keys {
            Ok(keys) => {
                cloaker.write().set_keys(keys);
                info!("cloaking: keys reloaded");
            }
            Err(e) => warn!("cloaking: keeping previous keys: {}", e),
        }
    }

    fn on_cleanup(&mut self, target: CleanupTarget<'_>) {
        if let (CleanupTarget::User(user), Some(slot)) = (target, self.real_host.as_ref()) {
            user.ext.take(slot);
        }
    }
}
