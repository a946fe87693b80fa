//! Minimal IRC line parsing for the chat protocol.
//!
//! Only what the feed needs: `PING`, `PRIVMSG`, `RECONNECT` and the login
//! replies. IRCv3 tags (`@key=value;...`) are skipped.
//!
//! ```text
//! @badge-info=;color=#1E90FF :vaeben!vaeben@vaeben.tmi.twitch.tv PRIVMSG #buddha :PogChamp
//! ^ tags (ignored)           ^ prefix (author = nick)             ^ cmd   ^ target ^ trailing
//! ```

/// Maximum length of an outgoing chat line body.
pub const MAX_REPLY_CHARS: usize = 499;

/// One parsed server line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrcLine<'a> {
    /// Keep-alive; must be answered with `PONG :<token>`.
    Ping(&'a str),
    Privmsg { channel: &'a str, author: &'a str, text: &'a str },
    /// Server is about to drop the connection.
    Reconnect,
    /// `001` welcome after a successful login.
    Welcome,
    Notice { text: &'a str },
    /// Anything else, by command word.
    Other(&'a str),
}

/// Parse one line (without the trailing `\r\n`).
pub fn parse_line(line: &str) -> Option<IrcLine<'_>> {
    let mut rest = line.trim_end_matches(['\r', '\n']);
    if rest.is_empty() {
        return None;
    }

    if rest.starts_with('@') {
        rest = rest.split_once(' ')?.1;
    }

    let mut prefix = None;
    if let Some(stripped) = rest.strip_prefix(':') {
        let (p, tail) = stripped.split_once(' ')?;
        prefix = Some(p);
        rest = tail;
    }

    let (command, params) = rest.split_once(' ').unwrap_or((rest, ""));
    let (middle, trailing) = match params.split_once(':') {
        Some((m, t)) if m.is_empty() || m.ends_with(' ') => (m.trim_end(), Some(t)),
        _ => (params, None),
    };

    let parsed = match command {
        "PING" => IrcLine::Ping(trailing.unwrap_or(middle)),
        "PRIVMSG" => {
            let author = prefix.map(|p| p.split_once('!').map_or(p, |(nick, _)| nick))?;
            let channel = middle.split(' ').next()?.trim_start_matches('#');
            IrcLine::Privmsg { channel, author, text: strip_action(trailing.unwrap_or("")) }
        }
        "RECONNECT" => IrcLine::Reconnect,
        "001" => IrcLine::Welcome,
        "NOTICE" => IrcLine::Notice { text: trailing.unwrap_or("") },
        other => IrcLine::Other(other),
    };
    Some(parsed)
}

/// `/me` messages arrive wrapped as `\x01ACTION ...\x01`.
fn strip_action(text: &str) -> &str {
    text.strip_prefix("\u{1}ACTION ").map_or(text, |t| t.trim_end_matches('\u{1}'))
}

/// Clamp a reply to the chat line limit, marking the cut with `...`.
pub fn truncate_reply(text: &str) -> String {
    if text.chars().count() <= MAX_REPLY_CHARS {
        return text.to_string();
    }
    let mut out: String = text.chars().take(MAX_REPLY_CHARS - 3).collect();
    out.push_str("...");
    out
}

/// Render a `PRIVMSG` for `channel`, truncating the body.
pub fn privmsg(channel: &str, text: &str) -> String {
    let body = truncate_reply(text).replace(['\r', '\n'], " ");
    format!("PRIVMSG #{} :{body}", channel.trim_start_matches('#'))
}

/// Login sequence sent right after the socket opens.
pub fn login_lines(nick: &str, token: Option<&str>, channels: &[String]) -> Vec<String> {
    let mut lines = Vec::with_capacity(3);
    if let Some(token) = token {
        let token = if token.starts_with("oauth:") { token.to_string() } else { format!("oauth:{token}") };
        lines.push(format!("PASS {token}"));
    }
    lines.push(format!("NICK {nick}"));
    if !channels.is_empty() {
        let joined: Vec<String> = channels.iter().map(|c| format!("#{c}")).collect();
        lines.push(format!("JOIN {}", joined.join(",")));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_privmsg() {
        let line = "@badge-info=;badges=;color=#1E90FF;display-name=Vaeben :vaeben!vaeben@vaeben.tmi.twitch.tv PRIVMSG #buddha :clearactivity buddha\r\n";
        assert_eq!(
            parse_line(line),
            Some(IrcLine::Privmsg { channel: "buddha", author: "vaeben", text: "clearactivity buddha" })
        );
    }

    #[test]
    fn trailing_keeps_colons() {
        let line = ":a!a@a.tmi.twitch.tv PRIVMSG #x :time is 12:30 :)";
        assert_eq!(parse_line(line), Some(IrcLine::Privmsg { channel: "x", author: "a", text: "time is 12:30 :)" }));
    }

    #[test]
    fn action_is_unwrapped() {
        let line = ":a!a@a PRIVMSG #x :\u{1}ACTION waves\u{1}";
        assert_eq!(parse_line(line), Some(IrcLine::Privmsg { channel: "x", author: "a", text: "waves" }));
    }

    #[test]
    fn control_lines() {
        assert_eq!(parse_line("PING :tmi.twitch.tv"), Some(IrcLine::Ping("tmi.twitch.tv")));
        assert_eq!(parse_line(":tmi.twitch.tv RECONNECT"), Some(IrcLine::Reconnect));
        assert_eq!(parse_line(":tmi.twitch.tv 001 justinfan4242 :Welcome, GLHF!"), Some(IrcLine::Welcome));
        assert_eq!(
            parse_line(":tmi.twitch.tv NOTICE * :Login authentication failed"),
            Some(IrcLine::Notice { text: "Login authentication failed" })
        );
        assert_eq!(parse_line(":justinfan4242!justinfan4242@x JOIN #buddha"), Some(IrcLine::Other("JOIN")));
        assert_eq!(parse_line(""), None);
    }

    #[test]
    fn replies_are_truncated() {
        let long = "a".repeat(600);
        let out = truncate_reply(&long);
        assert_eq!(out.chars().count(), MAX_REPLY_CHARS);
        assert!(out.ends_with("..."));
        assert_eq!(truncate_reply("LUL"), "LUL");
        assert_eq!(privmsg("#buddha", "a\nb"), "PRIVMSG #buddha :a b");
    }

    #[test]
    fn login_sequence() {
        let chans = vec!["buddha".to_string(), "vaeben".to_string()];
        assert_eq!(login_lines("justinfan1", None, &chans), vec!["NICK justinfan1", "JOIN #buddha,#vaeben"]);
        assert_eq!(login_lines("bot", Some("abc"), &[])[0], "PASS oauth:abc");
    }
}
