//! IRC numeric replies used by the core and its modules

/// IRC numeric reply codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum NumericReply {
    // Connection registration
    RplWelcome = 1,
    RplISupport = 5,

    // Server queries
    RplStatsKLine = 216,
    RplStatsQLine = 217,
    RplEndOfStats = 219,
    RplUmodeIs = 221,
    RplStatsGLine = 223,
    RplWhoisUser = 311,
    RplWhoisServer = 312,
    RplWhoisOperator = 313,
    RplEndOfWhois = 318,
    RplWhoisChannels = 319,
    RplWhoisSpecial = 320,
    RplChannelModeIs = 324,
    RplWhoisBot = 335,
    RplNameReply = 353,
    RplEndOfNames = 366,
    RplBanList = 367,
    RplEndOfBanList = 368,
    RplWhoisModes = 379,
    RplModList = 702,
    RplEndOfModList = 703,

    // Errors
    ErrNoSuchNick = 401,
    ErrNoSuchChannel = 403,
    ErrUnknownCommand = 421,
    ErrNoNicknameGiven = 431,
    ErrErroneusNickname = 432,
    ErrNicknameInUse = 433,
    ErrUserNotInChannel = 441,
    ErrNotOnChannel = 442,
    ErrUserOnChannel = 443,
    ErrNotRegistered = 451,
    ErrNeedMoreParams = 461,
    ErrAlreadyRegistered = 462,
    ErrChannelIsFull = 471,
    ErrUnknownMode = 472,
    ErrBannedFromChan = 474,
    ErrBadChannelKey = 475,
    ErrBanListFull = 478,
    ErrNoPrivileges = 481,
    ErrChanOpPrivsNeeded = 482,
    ErrUmodeUnknownFlag = 501,
    ErrUsersDontMatch = 502,

    // Module loading
    ErrCantUnloadModule = 972,
    RplUnloadedModule = 973,
    ErrCantLoadModule = 974,
    RplLoadedModule = 975,
}

impl NumericReply {
    /// Get the numeric code as a u16
    pub fn numeric_code(&self) -> u16 {
        *self as u16
    }

    /// Format this numeric for `nick`. The last parameter becomes the trailing argument.
    pub fn format(&self, server: &str, nick: &str, params: &[&str]) -> String {
        format_numeric(server, self.numeric_code(), nick, params)
    }
}

/// Format an arbitrary numeric, including ones only modules know about
pub fn format_numeric(server: &str, code: u16, nick: &str, params: &[&str]) -> String {
    let mut line = format!(":{} {:03} {}", server, code, nick);
    if let Some((last, rest)) = params.split_last() {
        for param in rest {
            line.push(' ');
            line.push_str(param);
        }
        line.push_str(" :");
        line.push_str(last);
    }
    line
}

/// Format a numeric whose text is already laid out (`"<nick> :text"`)
pub fn format_raw(server: &str, code: u16, nick: &str, text: &str) -> String {
    format!(":{} {:03} {} {}", server, code, nick, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_format() {
        let line = NumericReply::ErrChanOpPrivsNeeded.format(
            "irc.test",
            "alice",
            &["#rust", "You're not a channel operator"],
        );
        assert_eq!(line, ":irc.test 482 alice #rust :You're not a channel operator");
    }

    #[test]
    fn test_numeric_padding() {
        assert_eq!(NumericReply::RplWelcome.numeric_code(), 1);
        assert_eq!(format_raw("s", 5, "n", "A=1 :ok"), ":s 005 n A=1 :ok");
    }
}
