//! Configuration management

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

/// Server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server information
    pub server: ServerConfig,
    /// Behaviour switches for modes and bans
    pub options: OptionsConfig,
    /// Module settings
    pub modules: ModuleConfig,
    /// Permanent IP bans
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub zline: Vec<XLineEntry>,
    /// Permanent nick bans
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub qline: Vec<XLineEntry>,
    /// Permanent local host bans
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub kline: Vec<XLineEntry>,
    /// Ban exceptions
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub eline: Vec<XLineEntry>,
    /// The raw document, kept for block lookups by modules
    #[serde(skip)]
    raw: toml::Table,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server name
    pub name: String,
    /// Network name
    pub network: String,
    /// Server description
    pub description: String,
    /// Servers trusted to change modes without access checks
    pub uline_servers: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "irc.example.net".to_string(),
            network: "ExampleNet".to_string(),
            description: "modircd server".to_string(),
            uline_servers: Vec::new(),
        }
    }
}

/// Mode and ban behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionsConfig {
    /// Whether the halfop prefix mode is usable
    pub allow_halfop: bool,
    /// Hide X-line reasons from the public quit message
    pub hide_bans: bool,
    /// Notice sent to a user right before an X-line disconnects them
    pub ban_banner: Option<String>,
    /// Maximum entries in a channel ban list
    pub max_bans: usize,
    /// Seconds between background timer ticks
    pub timer_interval: u64,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            allow_halfop: true,
            hide_bans: false,
            ban_banner: None,
            max_bans: 64,
            timer_interval: 5,
        }
    }
}

/// Module configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    /// Modules to load at startup (glob patterns allowed)
    pub load: Vec<String>,
    /// Per-module settings, deserialized by each module
    pub settings: HashMap<String, serde_json::Value>,
}

/// A line from the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XLineEntry {
    pub mask: String,
    #[serde(default = "default_xline_reason")]
    pub reason: String,
}

fn default_xline_reason() -> String {
    "No reason".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        content.parse()
    }

    /// Save configuration to file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;

        std::fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.name.is_empty() || !self.server.name.contains('.') {
            return Err(Error::Config(format!(
                "Server name '{}' must be a dotted name",
                self.server.name
            )));
        }

        if self.server.network.is_empty() || self.server.network.contains(' ') {
            return Err(Error::Config("Network name must be a single word".to_string()));
        }

        if self.options.max_bans == 0 {
            return Err(Error::Config("max_bans must be at least 1".to_string()));
        }

        if self.options.timer_interval == 0 {
            return Err(Error::Config("timer_interval must be at least 1 second".to_string()));
        }

        for (tag, entries) in self.config_lines() {
            if let Some(entry) = entries.iter().find(|e| e.mask.trim().is_empty()) {
                return Err(Error::Config(format!(
                    "{} entry with reason '{}' has an empty mask",
                    tag, entry.reason
                )));
            }
        }

        Ok(())
    }

    /// The X-line blocks, tagged with their section names
    pub fn config_lines(&self) -> [(&'static str, &[XLineEntry]); 4] {
        [
            ("zline", &self.zline),
            ("qline", &self.qline),
            ("kline", &self.kline),
            ("eline", &self.eline),
        ]
    }

    /// Block-level view of the raw document
    pub fn reader(&self) -> ConfigReader<'_> {
        ConfigReader { raw: &self.raw }
    }

    /// Settings for one module, falling back to defaults when absent
    pub fn module_settings<T>(&self, module: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        match self.modules.settings.get(module) {
            Some(value) => Ok(serde_json::from_value(value.clone())?),
            None => Ok(T::default()),
        }
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(content: &str) -> Result<Self> {
        let raw: toml::Table = toml::from_str(content)?;
        let mut config: Config = toml::from_str(content)?;
        config.raw = raw;
        Ok(config)
    }
}

/// Enumerate/read access to named configuration blocks.
///
/// A block is either a single table (`[deny_channel]`) or an array of
/// tables (`[[deny_channel]]`); `index` selects the instance.
#[derive(Debug, Clone, Copy)]
pub struct ConfigReader<'a> {
    raw: &'a toml::Table,
}

impl<'a> ConfigReader<'a> {
    /// Number of instances of block `tag`
    pub fn enumerate(&self, tag: &str) -> usize {
        match self.raw.get(tag) {
            Some(toml::Value::Array(items)) => items.iter().filter(|v| v.is_table()).count(),
            Some(toml::Value::Table(_)) => 1,
            _ => 0,
        }
    }

    fn block(&self, tag: &str, index: usize) -> Option<&'a toml::Table> {
        match self.raw.get(tag)? {
            toml::Value::Array(items) => items.iter().filter_map(|v| v.as_table()).nth(index),
            toml::Value::Table(table) if index == 0 => Some(table),
            _ => None,
        }
    }

    /// Read a scalar value as text
    pub fn read_value(&self, tag: &str, key: &str, index: usize) -> Option<String> {
        match self.block(tag, index)?.get(key)? {
            toml::Value::String(s) => Some(s.clone()),
            toml::Value::Integer(i) => Some(i.to_string()),
            toml::Value::Float(f) => Some(f.to_string()),
            toml::Value::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Read a yes/no value; missing keys read as false
    pub fn read_flag(&self, tag: &str, key: &str, index: usize) -> bool {
        match self.block(tag, index).and_then(|b| b.get(key)) {
            Some(toml::Value::Boolean(b)) => *b,
            Some(toml::Value::String(s)) => {
                matches!(s.to_ascii_lowercase().as_str(), "yes" | "true" | "on" | "1")
            }
            Some(toml::Value::Integer(i)) => *i != 0,
            _ => false,
        }
    }

    pub fn read_integer(&self, tag: &str, key: &str, index: usize) -> Option<i64> {
        match self.block(tag, index)?.get(key)? {
            toml::Value::Integer(i) => Some(*i),
            toml::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Every scalar key/value pair of one block instance
    pub fn entries(&self, tag: &str, index: usize) -> Vec<(String, String)> {
        let Some(block) = self.block(tag, index) else {
            return Vec::new();
        };

        block
            .keys()
            .filter_map(|key| {
                self.read_value(tag, key, index)
                    .map(|value| (key.clone(), value))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"
[server]
name = "irc.test.net"
network = "TestNet"

[options]
allow_halfop = false
hide_bans = true

[modules]
load = ["botmode"]

[modules.settings.connflood]
seconds = 10

[[kline]]
mask = "*@bad.host"
reason = "go away"

[[deny_channel]]
name = "#warez*"
reason = "no"

[[deny_channel]]
name = "#spam"
redirect = "yes"

[allow_channel]
name = "#warez-help"
"##;

    #[test]
    fn test_parse_sections() {
        let config: Config = SAMPLE.parse().unwrap();
        assert_eq!(config.server.name, "irc.test.net");
        assert!(!config.options.allow_halfop);
        assert!(config.options.hide_bans);
        assert_eq!(config.options.max_bans, 64);
        assert_eq!(config.kline.len(), 1);
        assert_eq!(config.kline[0].reason, "go away");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reader_enumerate_and_read() {
        let config: Config = SAMPLE.parse().unwrap();
        let reader = config.reader();

        assert_eq!(reader.enumerate("deny_channel"), 2);
        assert_eq!(reader.enumerate("allow_channel"), 1);
        assert_eq!(reader.enumerate("missing"), 0);

        assert_eq!(reader.read_value("deny_channel", "name", 1).as_deref(), Some("#spam"));
        assert!(reader.read_flag("deny_channel", "redirect", 1));
        assert!(!reader.read_flag("deny_channel", "redirect", 0));
        assert_eq!(reader.read_value("allow_channel", "name", 0).as_deref(), Some("#warez-help"));
        assert_eq!(reader.read_value("allow_channel", "name", 1), None);
        assert_eq!(reader.entries("deny_channel", 0).len(), 2);
    }

    #[test]
    fn test_module_settings() {
        #[derive(Debug, Default, serde::Deserialize)]
        #[serde(default)]
        struct Flood {
            seconds: u64,
            max_conns: u64,
        }

        let config: Config = SAMPLE.parse().unwrap();
        let flood: Flood = config.module_settings("connflood").unwrap();
        assert_eq!(flood.seconds, 10);
        assert_eq!(flood.max_conns, 0);

        let missing: Flood = config.module_settings("nothing").unwrap();
        assert_eq!(missing.seconds, 0);
    }

    #[test]
    fn test_validate_rejects_empty_mask() {
        let mut config = Config::default();
        config.zline.push(XLineEntry {
            mask: " ".to_string(),
            reason: "bad".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_round_trip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modircd.toml");
        Config::default().to_file(&path).unwrap();
        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.server.name, "irc.example.net");
        assert!(loaded.options.allow_halfop);
    }
}
