//! Outbound message formatting.
//!
//! Handles placeholder substitution in message format strings and the
//! textual reply quote used by platforms without native reply linkage.
//! Supports placeholders: %nick, %message, %client, %time

use chrono::Local;

use super::SayOptions;

/// Default format for bridged messages.
pub const DEFAULT_FORMAT: &str = "[%nick] %message";

/// Maximum length (in characters) of a quoted reply excerpt.
const REPLY_EXCERPT_CHARS: usize = 40;

/// Message formatter that substitutes placeholders in format strings.
#[derive(Debug, Clone)]
pub struct MessageFormatter {
    format: String,
}

impl Default for MessageFormatter {
    fn default() -> Self {
        Self::new(DEFAULT_FORMAT)
    }
}

impl MessageFormatter {
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
        }
    }

    /// Formatter for a configured format, falling back to [`DEFAULT_FORMAT`].
    pub fn from_config(format: Option<&str>) -> Self {
        match format {
            Some(f) if !f.is_empty() => Self::new(f),
            _ => Self::default(),
        }
    }

    /// Substitute `%time`, `%nick`, `%client` and `%message`.
    ///
    /// `%message` is replaced last so message text containing placeholders
    /// is left untouched.
    pub fn format(&self, ctx: &FormatContext) -> String {
        let head = self
            .format
            .replace("%time", &get_time())
            .replace("%nick", &ctx.nick)
            .replace("%client", &ctx.client);
        head.replace("%message", &ctx.message)
    }

    /// Render outbound text for `say`.
    ///
    /// Prepends a textual quote of the replied-to message unless the
    /// platform links the reply natively (`native_reply` and a known copy
    /// id), then applies the nick prefix when `with_nick` is set and
    /// `no_prefix` is not.
    pub fn render(&self, text: &str, options: &SayOptions, native_reply: bool) -> String {
        let body = match options.reply_to {
            Some(ref reply) if !(native_reply && reply.message_id.is_some()) => {
                format!("Re {} \"{}\": {}", reply.nick, excerpt(&reply.text), text)
            }
            _ => text.to_string(),
        };

        match options.with_nick {
            Some(ref nick) if !options.no_prefix => self.format(
                &FormatContext::new(nick.clone(), body)
                    .with_client(options.origin.clone().unwrap_or_default()),
            ),
            _ => body,
        }
    }
}

/// Context for message formatting.
#[derive(Debug, Clone, Default)]
pub struct FormatContext {
    /// Sender display name.
    pub nick: String,
    pub message: String,
    /// Origin client name.
    pub client: String,
}

impl FormatContext {
    pub fn new(nick: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            message: message.into(),
            client: String::new(),
        }
    }

    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = client.into();
        self
    }
}

/// Get the current time as HH:MM:SS string.
fn get_time() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

/// First line of `text`, shortened to [`REPLY_EXCERPT_CHARS`].
fn excerpt(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() <= REPLY_EXCERPT_CHARS {
        return line.to_string();
    }
    let cut: String = line.chars().take(REPLY_EXCERPT_CHARS).collect();
    format!("{}...", cut.trim_end())
}

/// Find the last UTF-8 char boundary at or before `byte_index` in `s`.
fn floor_char_boundary(s: &str, byte_index: usize) -> usize {
    if byte_index >= s.len() {
        return s.len();
    }
    let mut i = byte_index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Split a message into chunks that fit within the max length (in bytes).
///
/// Tries to split on word boundaries when possible. Never splits in the
/// middle of a multi-byte UTF-8 character.
pub fn split_message(message: &str, max_len: usize) -> Vec<String> {
    if message.len() <= max_len {
        return vec![message.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = message;

    while !remaining.is_empty() {
        remaining = remaining.trim_start();
        if remaining.is_empty() {
            break;
        }

        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let split_at = floor_char_boundary(remaining, max_len);

        // Always make progress, even if max_len is smaller than one character
        if split_at == 0 {
            let first_char_end = remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len());
            chunks.push(remaining[..first_char_end].to_string());
            remaining = &remaining[first_char_end..];
            continue;
        }

        let chunk = &remaining[..split_at];
        match chunk.rfind(' ') {
            Some(space_idx) if space_idx > 0 => {
                chunks.push(remaining[..space_idx].to_string());
                remaining = &remaining[space_idx + 1..];
            }
            _ => {
                chunks.push(chunk.to_string());
                remaining = &remaining[split_at..];
            }
        }
    }

    chunks
}

/// Split text into protocol lines: first on newlines, then on `max_len` bytes.
/// Blank lines are dropped.
pub fn split_lines(text: &str, max_len: usize) -> Vec<String> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .flat_map(|line| split_message(line, max_len))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ReplyTarget;

    fn nick_options(nick: &str) -> SayOptions {
        SayOptions {
            with_nick: Some(nick.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_basic_format() {
        let formatter = MessageFormatter::default();
        let ctx = FormatContext::new("alice", "Hello world!");
        assert_eq!(formatter.format(&ctx), "[alice] Hello world!");
    }

    #[test]
    fn test_format_with_client() {
        let formatter = MessageFormatter::new("<%nick@%client> %message");
        let ctx = FormatContext::new("bob", "hi").with_client("telegram");
        assert_eq!(formatter.format(&ctx), "<bob@telegram> hi");
    }

    #[test]
    fn test_message_placeholders_not_expanded() {
        let formatter = MessageFormatter::default();
        let ctx = FormatContext::new("alice", "100%nick sure");
        assert_eq!(formatter.format(&ctx), "[alice] 100%nick sure");
    }

    #[test]
    fn test_format_with_time() {
        let formatter = MessageFormatter::new("[%time] %nick: %message");
        let result = formatter.format(&FormatContext::new("alice", "Test"));
        assert!(result.ends_with("alice: Test"));
        assert_eq!(result.find(']'), Some(9));
    }

    #[test]
    fn test_from_config_falls_back_to_default() {
        let ctx = FormatContext::new("alice", "hi");
        assert_eq!(MessageFormatter::from_config(None).format(&ctx), "[alice] hi");
        assert_eq!(MessageFormatter::from_config(Some("")).format(&ctx), "[alice] hi");
        assert_eq!(
            MessageFormatter::from_config(Some("%nick: %message")).format(&ctx),
            "alice: hi"
        );
    }

    #[test]
    fn test_render_prefix_rules() {
        let formatter = MessageFormatter::default();

        assert_eq!(formatter.render("hi", &nick_options("alice"), false), "[alice] hi");
        assert_eq!(formatter.render("hi", &SayOptions::default(), false), "hi");

        let options = SayOptions {
            no_prefix: true,
            ..nick_options("alice")
        };
        assert_eq!(formatter.render("hi", &options, false), "hi");
    }

    #[test]
    fn test_render_reply_quote() {
        let formatter = MessageFormatter::default();
        let mut options = nick_options("bob");
        options.reply_to = Some(ReplyTarget {
            message_id: None,
            nick: "alice".to_string(),
            text: "what time is it?\nsecond line".to_string(),
        });

        assert_eq!(
            formatter.render("noon", &options, true),
            "[bob] Re alice \"what time is it?\": noon"
        );

        // Native linkage with a known copy: no textual quote
        options.reply_to.as_mut().unwrap().message_id = Some("55".to_string());
        assert_eq!(formatter.render("noon", &options, true), "[bob] noon");
        assert_eq!(
            formatter.render("noon", &options, false),
            "[bob] Re alice \"what time is it?\": noon"
        );
    }

    #[test]
    fn test_excerpt_is_shortened() {
        let long = "a".repeat(60);
        let short = excerpt(&long);
        assert_eq!(short, format!("{}...", "a".repeat(40)));
    }

    #[test]
    fn test_split_message_short() {
        assert_eq!(split_message("Hello world", 50), vec!["Hello world"]);
    }

    #[test]
    fn test_split_message_on_space() {
        let chunks = split_message("Hello beautiful world", 15);
        assert_eq!(chunks, vec!["Hello", "beautiful world"]);
    }

    #[test]
    fn test_split_message_no_space() {
        let chunks = split_message("HelloBeautifulWorld", 10);
        assert_eq!(chunks, vec!["HelloBeaut", "ifulWorld"]);
    }

    #[test]
    fn test_split_message_multibyte_utf8() {
        // "café" is 5 bytes; max_len=4 lands inside 'é'
        let chunks = split_message("café rest", 4);
        assert_eq!(chunks, vec!["caf", "é", "rest"]);
    }

    #[test]
    fn test_split_message_all_multibyte() {
        let chunks = split_message("ééé", 3);
        assert_eq!(chunks, vec!["é", "é", "é"]);
    }

    #[test]
    fn test_split_lines() {
        let lines = split_lines("first\n\nsecond line here\r\nthird", 8);
        assert_eq!(lines, vec!["first", "second", "line", "here", "third"]);
    }
}
