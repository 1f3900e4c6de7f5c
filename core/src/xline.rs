//! X-line ban and exception storage
//!
//! Five classes of lines are kept, each in its own [`XLineStore`]:
//! G (network host ban), K (local host ban), Z (IP ban), Q (nick ban) and
//! E (exception from host bans). Permanent lines live in an unordered list.
//! Timed lines live in a deque sorted by expiry so that expiring is a prefix pop.

use crate::numeric::NumericReply;
use crate::user::UserId;
use crate::utils::string::{irc_eq, wildcard_match};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Line class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum XLineClass {
    GLine,
    KLine,
    ZLine,
    QLine,
    ELine,
}

impl XLineClass {
    pub const ALL: [XLineClass; 5] = [
        XLineClass::GLine,
        XLineClass::KLine,
        XLineClass::ZLine,
        XLineClass::QLine,
        XLineClass::ELine,
    ];

    pub fn letter(&self) -> char {
        match self {
            XLineClass::GLine => 'G',
            XLineClass::KLine => 'K',
            XLineClass::ZLine => 'Z',
            XLineClass::QLine => 'Q',
            XLineClass::ELine => 'E',
        }
    }

    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'G' => Some(XLineClass::GLine),
            'K' => Some(XLineClass::KLine),
            'Z' => Some(XLineClass::ZLine),
            'Q' => Some(XLineClass::QLine),
            'E' => Some(XLineClass::ELine),
            _ => None,
        }
    }

    /// Numeric used for STATS listings of this class
    pub fn stats_numeric(&self) -> NumericReply {
        match self {
            XLineClass::KLine => NumericReply::RplStatsKLine,
            XLineClass::QLine => NumericReply::RplStatsQLine,
            _ => NumericReply::RplStatsGLine,
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for XLineClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-Line", self.letter())
    }
}

/// Set of classes to enforce in a sweep. Exceptions are always honoured and never enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplyMask(u8);

impl ApplyMask {
    pub const NONE: ApplyMask = ApplyMask(0);
    pub const GLINES: ApplyMask = ApplyMask(1);
    pub const KLINES: ApplyMask = ApplyMask(1 << 1);
    pub const ZLINES: ApplyMask = ApplyMask(1 << 2);
    pub const QLINES: ApplyMask = ApplyMask(1 << 3);
    pub const ALL: ApplyMask = ApplyMask(0b1111);

    pub fn for_class(class: XLineClass) -> ApplyMask {
        match class {
            XLineClass::GLine => Self::GLINES,
            XLineClass::KLine => Self::KLINES,
            XLineClass::ZLine => Self::ZLINES,
            XLineClass::QLine => Self::QLINES,
            XLineClass::ELine => Self::NONE,
        }
    }

    pub fn contains(&self, class: XLineClass) -> bool {
        let bit = Self::for_class(class).0;
        bit != 0 && self.0 & bit == bit
    }
}

impl std::ops::BitOr for ApplyMask {
    type Output = ApplyMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        ApplyMask(self.0 | rhs.0)
    }
}

/// What a connection looks like to the matcher
#[derive(Debug, Clone, Copy)]
pub struct XLineSubject<'a> {
    pub nick: &'a str,
    pub ident: &'a str,
    pub host: &'a str,
    pub ip: &'a str,
}

/// Class-specific match key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XLineKey {
    /// G, K and E lines: `ident@host`
    Host { ident: String, host: String },
    /// Q lines
    Nick(String),
    /// Z lines
    Ip(String),
}

impl XLineKey {
    /// Parse a mask for `class`.
    ///
    /// Host masks without an `@` are treated as a bare host; an empty ident or
    /// host becomes `*`. IP masks drop any `user@` part.
    pub fn parse(class: XLineClass, mask: &str) -> Self {
        let mask = mask.trim();
        match class {
            XLineClass::QLine => XLineKey::Nick(mask.to_string()),
            XLineClass::ZLine => {
                let ip = mask.rsplit_once('@').map(|(_, ip)| ip).unwrap_or(mask);
                XLineKey::Ip(ip.to_string())
            }
            _ => {
                let (ident, host) = mask.split_once('@').unwrap_or(("*", mask));
                let star = |s: &str| if s.is_empty() { "*".to_string() } else { s.to_string() };
                XLineKey::Host {
                    ident: star(ident),
                    host: star(host),
                }
            }
        }
    }

    /// Case-insensitive key equality
    pub fn same_as(&self, other: &XLineKey) -> bool {
        match (self, other) {
            (
                XLineKey::Host { ident, host },
                XLineKey::Host {
                    ident: other_ident,
                    host: other_host,
                },
            ) => irc_eq(ident, other_ident) && irc_eq(host, other_host),
            (XLineKey::Nick(a), XLineKey::Nick(b)) => irc_eq(a, b),
            (XLineKey::Ip(a), XLineKey::Ip(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        }
    }

    pub fn matches(&self, subject: &XLineSubject<'_>) -> bool {
        match self {
            XLineKey::Host { ident, host } => {
                wildcard_match(ident, subject.ident)
                    && (wildcard_match(host, subject.host) || wildcard_match(host, subject.ip))
            }
            XLineKey::Nick(nick) => wildcard_match(nick, subject.nick),
            XLineKey::Ip(ip) => wildcard_match(ip, subject.ip),
        }
    }
}

impl fmt::Display for XLineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XLineKey::Host { ident, host } => write!(f, "{}@{}", ident, host),
            XLineKey::Nick(nick) => f.write_str(nick),
            XLineKey::Ip(ip) => f.write_str(ip),
        }
    }
}

/// A ban or exception line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XLine {
    pub class: XLineClass,
    pub key: XLineKey,
    /// Creation time (Unix seconds)
    pub set_time: i64,
    /// Seconds until expiry, 0 for permanent
    pub duration: u64,
    /// `set_time + duration`; meaningless for permanent lines
    pub expiry: i64,
    pub source: String,
    pub reason: String,
}

/// A line queued by a module from inside a hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XLineOrder {
    pub class: XLineClass,
    pub duration: u64,
    pub source: String,
    pub reason: String,
    pub mask: String,
}

/// Queue modules use to add lines while a hook runs.
///
/// Hooks cannot reach the line manager, so orders are held here and the server
/// adds and enforces them as soon as the hook dispatch returns.
#[derive(Debug, Clone, Default)]
pub struct XLineSink {
    orders: Arc<Mutex<Vec<XLineOrder>>>,
}

impl XLineSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, class: XLineClass, duration: u64, source: &str, reason: &str, mask: &str) {
        self.orders.lock().push(XLineOrder {
            class,
            duration,
            source: source.to_string(),
            reason: reason.to_string(),
            mask: mask.to_string(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.orders.lock().is_empty()
    }

    pub(crate) fn take(&self) -> Vec<XLineOrder> {
        std::mem::take(&mut *self.orders.lock())
    }
}

/// `set_time + duration`, clamped so huge durations never wrap into the past
pub fn expiry_after(set_time: i64, duration: u64) -> i64 {
    set_time.saturating_add(i64::try_from(duration).unwrap_or(i64::MAX))
}

impl XLine {
    pub fn new(
        class: XLineClass,
        mask: &str,
        set_time: i64,
        duration: u64,
        source: &str,
        reason: &str,
    ) -> Self {
        Self {
            class,
            key: XLineKey::parse(class, mask),
            set_time,
            duration,
            expiry: expiry_after(set_time, duration),
            source: source.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.duration == 0
    }

    pub fn expires_at(&self) -> Option<i64> {
        (!self.is_permanent()).then_some(self.expiry)
    }

    pub fn mask(&self) -> String {
        self.key.to_string()
    }

    pub fn matches(&self, subject: &XLineSubject<'_>) -> bool {
        self.key.matches(subject)
    }

    /// Quit message for a user caught by this line
    pub fn quit_reason(&self) -> String {
        format!("{}-Lined: {}", self.class.letter(), self.reason)
    }

    /// `mask set_time duration source :reason`
    pub fn stats_text(&self) -> String {
        format!(
            "{} {} {} {} :{}",
            self.key, self.set_time, self.duration, self.source, self.reason
        )
    }
}

/// Lines of one class
#[derive(Debug, Clone)]
pub struct XLineStore {
    class: XLineClass,
    permanent: Vec<XLine>,
    /// Ascending by expiry
    temporary: VecDeque<XLine>,
}

impl XLineStore {
    pub fn new(class: XLineClass) -> Self {
        Self {
            class,
            permanent: Vec::new(),
            temporary: VecDeque::new(),
        }
    }

    pub fn class(&self) -> XLineClass {
        self.class
    }

    /// Insert `line`, replacing any line with the same key.
    ///
    /// Returns false when a line was replaced, true when the key was new.
    pub fn add(&mut self, line: XLine) -> bool {
        let replaced = self.delete_key(&line.key).is_some();
        self.insert(line);
        !replaced
    }

    fn insert(&mut self, line: XLine) {
        if line.is_permanent() {
            self.permanent.push(line);
        } else {
            let pos = self.temporary.partition_point(|l| l.expiry <= line.expiry);
            self.temporary.insert(pos, line);
        }
    }

    /// Remove the line with this mask, searching timed lines first
    pub fn delete(&mut self, mask: &str) -> Option<XLine> {
        let key = XLineKey::parse(self.class, mask);
        self.delete_key(&key)
    }

    fn delete_key(&mut self, key: &XLineKey) -> Option<XLine> {
        if let Some(pos) = self.temporary.iter().position(|l| l.key.same_as(key)) {
            return self.temporary.remove(pos);
        }
        let pos = self.permanent.iter().position(|l| l.key.same_as(key))?;
        Some(self.permanent.remove(pos))
    }

    /// First line matching `subject`
    pub fn find(&self, subject: &XLineSubject<'_>, permanent_only: bool) -> Option<&XLine> {
        if !permanent_only {
            if let Some(line) = self.temporary.iter().find(|l| l.matches(subject)) {
                return Some(line);
            }
        }
        self.permanent.iter().find(|l| l.matches(subject))
    }

    /// Line with exactly this mask
    pub fn get(&self, mask: &str) -> Option<&XLine> {
        let key = XLineKey::parse(self.class, mask);
        self.iter().find(|l| l.key.same_as(&key))
    }

    /// Pop every timed line whose expiry is before `now`
    pub fn expire(&mut self, now: i64) -> Vec<XLine> {
        let mut expired = Vec::new();
        while self.temporary.front().is_some_and(|l| l.expiry < now) {
            if let Some(line) = self.temporary.pop_front() {
                info!(
                    "Expiring timed {} {} (set by {} {} seconds ago)",
                    line.class,
                    line.key,
                    line.source,
                    line.duration
                );
                expired.push(line);
            }
        }
        expired
    }

    /// Backdate or postdate a line, e.g. to agree with a linking server
    pub fn set_creation_time(&mut self, mask: &str, set_time: i64) -> bool {
        let key = XLineKey::parse(self.class, mask);
        if let Some(line) = self.permanent.iter_mut().find(|l| l.key.same_as(&key)) {
            line.set_time = set_time;
            line.expiry = set_time;
            return true;
        }

        let Some(pos) = self.temporary.iter().position(|l| l.key.same_as(&key)) else {
            return false;
        };
        let Some(mut line) = self.temporary.remove(pos) else {
            return false;
        };
        line.set_time = set_time;
        line.expiry = expiry_after(set_time, line.duration);
        self.insert(line);
        true
    }

    /// Timed lines in expiry order, then permanent lines
    pub fn iter(&self) -> impl Iterator<Item = &XLine> {
        self.temporary.iter().chain(self.permanent.iter())
    }

    pub fn len(&self) -> usize {
        self.permanent.len() + self.temporary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn permanent_len(&self) -> usize {
        self.permanent.len()
    }

    pub fn temporary_len(&self) -> usize {
        self.temporary.len()
    }

    /// STATS text for every line
    pub fn stats_lines(&self) -> Vec<String> {
        self.iter().map(XLine::stats_text).collect()
    }
}

/// Outcome of a sweep for one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub user: UserId,
    pub class: XLineClass,
    pub reason: String,
}

impl Sentence {
    pub fn quit_reason(&self) -> String {
        format!("{}-Lined: {}", self.class.letter(), self.reason)
    }
}

/// All five stores
#[derive(Debug, Clone)]
pub struct XLineManager {
    stores: [XLineStore; 5],
}

impl XLineManager {
    /// Order in which enforcing classes are tested against a connection
    const ENFORCE_ORDER: [XLineClass; 4] = [
        XLineClass::GLine,
        XLineClass::KLine,
        XLineClass::QLine,
        XLineClass::ZLine,
    ];

    pub fn new() -> Self {
        Self {
            stores: XLineClass::ALL.map(XLineStore::new),
        }
    }

    pub fn store(&self, class: XLineClass) -> &XLineStore {
        &self.stores[class.index()]
    }

    pub fn store_mut(&mut self, class: XLineClass) -> &mut XLineStore {
        &mut self.stores[class.index()]
    }

    /// Add or replace a line; false when an existing line was replaced
    pub fn add(
        &mut self,
        class: XLineClass,
        duration: u64,
        source: &str,
        reason: &str,
        mask: &str,
        now: i64,
    ) -> bool {
        let line = XLine::new(class, mask, now, duration, source, reason);
        info!(
            "{} {} added by {} ({}): {}",
            class,
            line.key,
            source,
            if duration == 0 { "permanent".to_string() } else { format!("{}s", duration) },
            reason
        );
        self.store_mut(class).add(line)
    }

    pub fn del(&mut self, class: XLineClass, mask: &str) -> bool {
        self.store_mut(class).delete(mask).is_some()
    }

    pub fn matches(
        &self,
        class: XLineClass,
        subject: &XLineSubject<'_>,
        permanent_only: bool,
    ) -> Option<&XLine> {
        self.store(class).find(subject, permanent_only)
    }

    /// Expire every class
    pub fn expire(&mut self, now: i64) -> Vec<XLine> {
        self.stores
            .iter_mut()
            .flat_map(|store| store.expire(now))
            .collect()
    }

    pub fn set_creation_time(&mut self, class: XLineClass, mask: &str, set_time: i64) -> bool {
        self.store_mut(class).set_creation_time(mask, set_time)
    }

    /// The first enforcing line in `mask` that catches `subject`, unless an exception covers it
    pub fn check(
        &self,
        subject: &XLineSubject<'_>,
        mask: ApplyMask,
        permanent_only: bool,
    ) -> Option<&XLine> {
        if self.store(XLineClass::ELine).find(subject, false).is_some() {
            return None;
        }
        Self::ENFORCE_ORDER
            .iter()
            .filter(|class| mask.contains(**class))
            .find_map(|class| self.store(*class).find(subject, permanent_only))
    }

    /// Whether a sweep with these arguments could catch anyone
    pub fn has_lines(&self, mask: ApplyMask, permanent_only: bool) -> bool {
        Self::ENFORCE_ORDER.iter().any(|class| {
            let store = self.store(*class);
            mask.contains(*class)
                && if permanent_only {
                    store.permanent_len() > 0
                } else {
                    !store.is_empty()
                }
        })
    }

    /// Evaluate every connection once against the classes in `mask`.
    ///
    /// Each connection yields at most one sentence. Nothing is disconnected here;
    /// the caller quits the returned users.
    pub fn sweep<'a, I>(&self, mask: ApplyMask, permanent_only: bool, subjects: I) -> Vec<Sentence>
    where
        I: IntoIterator<Item = (UserId, XLineSubject<'a>)>,
    {
        if !self.has_lines(mask, permanent_only) {
            return Vec::new();
        }

        subjects
            .into_iter()
            .filter_map(|(user, subject)| {
                self.check(&subject, mask, permanent_only).map(|line| Sentence {
                    user,
                    class: line.class,
                    reason: line.reason.clone(),
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.stores.iter().map(XLineStore::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for XLineManager {
    fn default() -> Self {
        Self::new()
    }
}
