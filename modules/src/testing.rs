//! Helpers for driving a server from module tests

use crate::builtin_catalog;
use modircd_core::{Client, Config, RegisterOutcome, Server, UserId};
use tokio::sync::mpsc::UnboundedReceiver;

/// A started server named `irc.test` on `TestNet`; `extra` is appended to the config
pub fn server(extra: &str) -> Server {
    let config: Config = format!(
        "[server]\nname = \"irc.test\"\nnetwork = \"TestNet\"\ndescription = \"Test server\"\n{}",
        extra
    )
    .parse()
    .expect("test config parses");
    let mut server = Server::new(config, builtin_catalog());
    server.init().expect("server starts");
    server
}

/// Connect and register a local user from `ip`
pub fn connect_from(server: &mut Server, nick: &str, ip: &str, host: &str) -> (UserId, UnboundedReceiver<String>) {
    let (client, rx) = Client::channel(format!("{}:40000", ip));
    let id = server.add_client(client, ip, host).expect("connection accepted");
    assert_eq!(server.register_user(id, nick, nick, "Test User"), RegisterOutcome::Registered);
    (id, rx)
}

pub fn connect(server: &mut Server, nick: &str) -> (UserId, UnboundedReceiver<String>) {
    connect_from(server, nick, "10.0.0.1", "host.example.com")
}

/// Everything queued for a connection so far
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
