//! Modular IRC Daemon Core
//!
//! This crate provides the core of a modular IRC daemon: the module registry with its
//! prioritised hook dispatch, the mode subsystem, and the X-line ban manager, together
//! with the users, channels and configuration they operate on.

pub mod capability;
pub mod channel;
pub mod client;
pub mod commands;
pub mod config;
pub mod directory;
pub mod error;
pub mod event;
pub mod extension_registry;
pub mod modes;
pub mod module;
pub mod module_manager;
pub mod numeric;
pub mod server;
pub mod state;
pub mod user;
pub mod utils;
pub mod xline;

pub use capability::{Capability, CapabilitySet};
pub use channel::{Channel, ChannelMember, ListEntry, HALFOP_VALUE, OP_VALUE, VOICE_VALUE};
pub use client::Client;
pub use commands::CmdResult;
pub use config::{Config, ConfigReader};
pub use directory::{Directory, InterfaceEntry};
pub use error::{Error, ModuleError, Result};
pub use event::{reply_as, Event, Request};
pub use extension_registry::{Extensible, SlotKey, SlotRegistry};
pub use modes::{
    AccessType, ModeAction, ModeHandler, ModeOutcome, ModeRegistry, ModeSource, ModeTarget, ModeType,
    SimpleChannelMode, SimpleUserMode,
};
pub use module::{
    CleanupTarget, HookResult, Module, ModuleContext, ModuleId, NumericLine, Priority, Version,
    VersionFlags,
};
pub use module_manager::{ModuleCatalog, ModuleFactory, ModuleInfo, ModuleManager};
pub use numeric::NumericReply;
pub use server::{RegisterOutcome, Server};
pub use state::ServerState;
pub use user::{User, UserId};
pub use xline::{ApplyMask, XLine, XLineClass, XLineManager, XLineOrder, XLineSink, XLineStore, XLineSubject};

/// Re-exports for convenience
pub use serde::{Deserialize, Serialize};
pub use tracing::{debug, error, info, warn};
