//! Bot mode (`+B`)
//!
//! Users flag themselves as bots; WHOIS then tells everyone so.

use modircd_core::{
    Capability, CapabilitySet, Config, Module, ModuleContext, NumericLine, Result, SimpleUserMode, User,
    Version, VersionFlags,
};
use tracing::debug;

const RPL_WHOISBOT: u16 = 335;

pub struct BotModeModule {
    network: String,
}

impl BotModeModule {
    pub fn new() -> Self {
        Self {
            network: String::new(),
        }
    }
}

impl Default for BotModeModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for BotModeModule {
    fn name(&self) -> &str {
        "botmode"
    }

    fn version(&self) -> Version {
        Version::new(1, 1, 0, 0, VersionFlags::COMMON | VersionFlags::VENDOR)
    }

    fn description(&self) -> &str {
        "Provides user mode +B to mark bots"
    }

    fn implements(&self) -> CapabilitySet {
        CapabilitySet::of(&[Capability::Whois, Capability::Rehash])
    }

    fn init(&mut self, ctx: &mut ModuleContext<'_>) -> Result<()> {
        self.network = ctx.config().server.network.clone();
        ctx.add_mode(Box::new(SimpleUserMode::new('B')))
    }

    fn on_whois(&mut self, _source: &User, dest: &User) -> Vec<NumericLine> {
        if !dest.has_mode('B') {
            return Vec::new();
        }
        vec![NumericLine::new(
            RPL_WHOISBOT,
            format!("{} :is a Bot on {}", dest.nick, self.network),
        )]
    }

    fn on_rehash(&mut self, config: &Config) {
        debug!("botmode: network is now {}", config.server.network);
        self.network = config.server.network.clone();
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{connect, drain, params, server};

    #[test]
    fn test_whois_shows_bot_line() {
        let mut server = server("[modules]\nload = [\"botmode\"]\n");
        let (bot, mut bot_rx) = connect(&mut server, "robot");
        let (viewer, mut viewer_rx) = connect(&mut server, "alice");

        server.handle_command(bot, "MODE", &params(&["robot", "+B"]));
        assert!(drain(&mut bot_rx).iter().any(|l| l == ":robot!robot@host.example.com MODE robot :+B"));

        drain(&mut viewer_rx);
        server.handle_command(viewer, "WHOIS", &params(&["robot"]));
        let lines = drain(&mut viewer_rx);
        assert!(lines.contains(&":irc.test 335 alice robot :is a Bot on TestNet".to_string()));
    }

    #[test]
    fn test_unload_strips_mode() {
        let mut server = server("[modules]\nload = [\"botmode\"]\n");
        let (bot, mut bot_rx) = connect(&mut server, "robot");
        server.handle_command(bot, "MODE", &params(&["robot", "+B"]));
        drain(&mut bot_rx);

        server.unload_module("botmode").unwrap();
        assert!(!server.user(bot).unwrap().has_mode('B'));
        assert!(drain(&mut bot_rx).contains(&":irc.test MODE robot :-B".to_string()));
        assert!(server.modes().find('B', modircd_core::ModeType::User).is_none());
    }
}
