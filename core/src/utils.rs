//! Utility functions and helpers

/// String utilities
pub mod string {
    use lazy_static::lazy_static;
    use regex::Regex;

    lazy_static! {
        static ref NICKNAME: Regex = Regex::new(r"^[A-Za-z\[\]\\`_^{|}][A-Za-z0-9\-\[\]\\`_^{|}]*$")
            .expect("nickname pattern");
        static ref FULL_MASK: Regex = Regex::new(r"^[^!@\s]+![^!@\s]+@[^!@\s]+$").expect("mask pattern");
    }

    /// Maximum nickname length accepted by the core
    pub const MAX_NICK_LENGTH: usize = 30;

    /// RFC 1459 lowercase of a single byte: `[]\~` fold onto `{}|^`
    #[inline]
    pub const fn irc_lower_byte(b: u8) -> u8 {
        match b {
            b'[' => b'{',
            b']' => b'}',
            b'\\' => b'|',
            b'~' => b'^',
            b'A'..=b'Z' => b + 32,
            _ => b,
        }
    }

    /// RFC 1459 lowercase of a whole string
    pub fn irc_to_lower(s: &str) -> String {
        s.chars()
            .map(|c| if c.is_ascii() { irc_lower_byte(c as u8) as char } else { c })
            .collect()
    }

    /// Case-insensitive comparison using RFC 1459 casemapping
    pub fn irc_eq(a: &str, b: &str) -> bool {
        a.len() == b.len()
            && a.bytes().zip(b.bytes()).all(|(x, y)| irc_lower_byte(x) == irc_lower_byte(y))
    }

    /// Match `text` against a glob `pattern` (`*` and `?`), case-insensitively.
    ///
    /// Iterative with single-star backtracking, so worst case is O(n*m) without recursion.
    pub fn wildcard_match(pattern: &str, text: &str) -> bool {
        let pattern = pattern.as_bytes();
        let text = text.as_bytes();

        let mut p = 0;
        let mut t = 0;
        let mut star_p = None;
        let mut star_t = 0;

        while t < text.len() {
            if p < pattern.len()
                && (pattern[p] == b'?' || irc_lower_byte(pattern[p]) == irc_lower_byte(text[t]))
            {
                p += 1;
                t += 1;
            } else if p < pattern.len() && pattern[p] == b'*' {
                star_p = Some(p);
                star_t = t;
                p += 1;
            } else if let Some(sp) = star_p {
                p = sp + 1;
                star_t += 1;
                t = star_t;
            } else {
                return false;
            }
        }

        while p < pattern.len() && pattern[p] == b'*' {
            p += 1;
        }

        p == pattern.len()
    }

    /// True when a pattern consists only of wildcards and separators
    pub fn matches_everyone(mask: &str) -> bool {
        !mask.is_empty() && mask.chars().all(|c| matches!(c, '*' | '?' | '@' | '!' | '.'))
    }

    /// Check if a string is a valid IRC channel name
    pub fn is_valid_channel_name(name: &str) -> bool {
        if name.len() < 2 || name.len() > 64 {
            return false;
        }

        if !name.starts_with(['#', '&']) {
            return false;
        }

        name.chars().all(|c| !c.is_control() && c != ' ' && c != ',' && c != ':')
    }

    /// Check if a string is a valid IRC nickname
    pub fn is_valid_nickname(nick: &str) -> bool {
        nick.len() <= MAX_NICK_LENGTH && NICKNAME.is_match(nick)
    }

    /// Check if a string is a valid IRC username
    pub fn is_valid_username(username: &str) -> bool {
        if username.is_empty() || username.len() > 10 {
            return false;
        }

        username.chars().all(|c| c.is_ascii() && !c.is_control() && c != ' ' && c != '@')
    }

    /// Complete a partial ban mask to `nick!user@host` form.
    ///
    /// `nick` becomes `nick!*@*`, `user@host` becomes `*!user@host` and `host.name`
    /// becomes `*!*@host.name`.
    pub fn normalize_ban_mask(mask: &str) -> Option<String> {
        let mask = mask.trim();
        if mask.is_empty() {
            return None;
        }

        let full = if FULL_MASK.is_match(mask) {
            mask.to_string()
        } else if let Some((nick, rest)) = mask.split_once('!') {
            let nick = if nick.is_empty() { "*" } else { nick };
            let (user, host) = rest.split_once('@').unwrap_or((rest, "*"));
            format!("{}!{}@{}", nick, or_star(user), or_star(host))
        } else if let Some((user, host)) = mask.split_once('@') {
            format!("*!{}@{}", or_star(user), or_star(host))
        } else if mask.contains('.') || mask.contains(':') {
            format!("*!*@{}", mask)
        } else {
            format!("{}!*@*", mask)
        };

        FULL_MASK.is_match(&full).then_some(full)
    }

    fn or_star(part: &str) -> &str {
        if part.is_empty() {
            "*"
        } else {
            part
        }
    }
}

/// Time utilities
pub mod time {
    use crate::{Error, Result};
    use chrono::{DateTime, Utc};

    /// Get current timestamp as Unix timestamp
    pub fn current_unix_timestamp() -> i64 {
        Utc::now().timestamp()
    }

    /// Render a Unix timestamp for notices
    pub fn format_timestamp(timestamp: i64) -> String {
        DateTime::<Utc>::from_timestamp(timestamp, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| timestamp.to_string())
    }

    /// Format duration as human readable string
    pub fn format_duration(seconds: u64) -> String {
        let days = seconds / 86400;
        let hours = (seconds % 86400) / 3600;
        let minutes = (seconds % 3600) / 60;
        let secs = seconds % 60;

        if days > 0 {
            format!("{}d {}h {}m {}s", days, hours, minutes, secs)
        } else if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, secs)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, secs)
        } else {
            format!("{}s", secs)
        }
    }

    /// Parse a ban duration such as `3600`, `30m` or `1w2d12h`.
    ///
    /// A bare number is seconds. `0` (or an empty string) means permanent.
    pub fn parse_duration(duration: &str) -> Result<u64> {
        let duration = duration.trim().to_ascii_lowercase();
        if duration.is_empty() {
            return Ok(0);
        }

        let mut total: u64 = 0;
        let mut number = String::new();

        for c in duration.chars() {
            if c.is_ascii_digit() {
                number.push(c);
                continue;
            }

            let multiplier = match c {
                'y' => 31_536_000,
                'w' => 604_800,
                'd' => 86_400,
                'h' => 3_600,
                'm' => 60,
                's' => 1,
                _ => return Err(Error::Config(format!("Invalid duration unit '{}'", c))),
            };

            let value: u64 = number
                .parse()
                .map_err(|_| Error::Config(format!("Invalid duration '{}'", duration)))?;
            total = value
                .checked_mul(multiplier)
                .and_then(|seconds| total.checked_add(seconds))
                .ok_or_else(|| too_long(&duration))?;
            number.clear();
        }

        if !number.is_empty() {
            let value: u64 = number
                .parse()
                .map_err(|_| Error::Config(format!("Invalid duration '{}'", duration)))?;
            total = total.checked_add(value).ok_or_else(|| too_long(&duration))?;
        }

        if i64::try_from(total).is_err() {
            return Err(too_long(&duration));
        }
        Ok(total)
    }

    fn too_long(duration: &str) -> Error {
        Error::Config(format!("Duration '{}' is too long", duration))
    }
}
