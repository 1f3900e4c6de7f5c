//! Hook points modules can subscribe to

use std::fmt;

/// Every extension point the core dispatches.
///
/// Hooks marked "result" return a [`HookResult`](crate::module::HookResult) and stop at the
/// first module giving a decisive answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Capability {
    UserConnect,
    /// result
    UserRegister,
    PostConnect,
    UserQuit,
    UserDisconnect,
    /// result
    UserPreNick,
    UserPostNick,
    /// result
    UserPreJoin,
    UserJoin,
    UserPart,
    ChannelDelete,
    /// result
    CheckBan,
    /// result
    RawMode,
    /// result
    AccessCheck,
    Mode,
    Whois,
    /// result
    WhoisLine,
    ISupport,
    /// result
    Stats,
    Rehash,
    BackgroundTimer,
    LoadModule,
    UnloadModule,
    Event,
    AddXLine,
    DelXLine,
    ExpireXLine,
    Cleanup,
    /// result
    PreCommand,
    PostCommand,
}

impl Capability {
    /// Number of capabilities
    pub const COUNT: usize = 30;

    /// Every capability in declaration order
    pub const ALL: [Capability; Capability::COUNT] = [
        Capability::UserConnect,
        Capability::UserRegister,
        Capability::PostConnect,
        Capability::UserQuit,
        Capability::UserDisconnect,
        Capability::UserPreNick,
        Capability::UserPostNick,
        Capability::UserPreJoin,
        Capability::UserJoin,
        Capability::UserPart,
        Capability::ChannelDelete,
        Capability::CheckBan,
        Capability::RawMode,
        Capability::AccessCheck,
        Capability::Mode,
        Capability::Whois,
        Capability::WhoisLine,
        Capability::ISupport,
        Capability::Stats,
        Capability::Rehash,
        Capability::BackgroundTimer,
        Capability::LoadModule,
        Capability::UnloadModule,
        Capability::Event,
        Capability::AddXLine,
        Capability::DelXLine,
        Capability::ExpireXLine,
        Capability::Cleanup,
        Capability::PreCommand,
        Capability::PostCommand,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    fn bit(self) -> u64 {
        1u64 << (self as u8)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "On{:?}", self)
    }
}

/// Set of capabilities a module subscribes to, one bit per hook
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CapabilitySet(u64);

impl CapabilitySet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn of(caps: &[Capability]) -> Self {
        caps.iter().fold(Self::empty(), |set, cap| set.with(*cap))
    }

    #[must_use]
    pub fn with(self, cap: Capability) -> Self {
        Self(self.0 | cap.bit())
    }

    pub fn insert(&mut self, cap: Capability) {
        self.0 |= cap.bit();
    }

    pub fn remove(&mut self, cap: Capability) {
        self.0 &= !cap.bit();
    }

    #[inline]
    pub fn contains(&self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(move |cap| self.contains(*cap))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), |set, cap| set.with(cap))
    }
}
