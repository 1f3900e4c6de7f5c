//! Error types for the IRC daemon core

use thiserror::Error;

/// Main error type for the IRC daemon
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Module error: {0}")]
    Module(#[from] ModuleError),

    #[error("Mode error: {0}")]
    Mode(String),

    #[error("X-line error: {0}")]
    XLine(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("User error: {0}")]
    User(String),

    #[error("Banned: {0}")]
    Banned(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Generic error: {0}")]
    Generic(String),
}

/// Reasons a module could not be loaded or unloaded.
///
/// The `Display` text is what operators see after "Failed to load module:".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    #[error("No such module '{0}'")]
    NotFound(String),

    #[error("Module '{0}' is already loaded")]
    AlreadyLoaded(String),

    #[error("Module '{0}' is not loaded")]
    NotLoaded(String),

    #[error("Module '{0}' is static and cannot be unloaded")]
    Static(String),

    #[error("Interface '{interface}' is in use by {users} module(s)")]
    InterfaceInUse { interface: String, users: usize },

    #[error("Mode '{mode}' ({kind}) is already registered")]
    ModeConflict { mode: char, kind: &'static str },

    #[error("Module '{name}' failed to initialise: {reason}")]
    Init { name: String, reason: String },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Generic(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Generic(s)
    }
}
