use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Err = anyhow::Error;
pub type Res<T> = Result<T, Err>;
pub type Void = Res<()>;

/// Marker appended to the username of every message the bot posts.
///
/// It is stripped again whenever a name is read back out of the channel.
pub const BOT_NAME_MARKER: &str = "[oblique]";

/// The author of a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Author {
    /// Platform identity (e.g., a Slack user ID).
    pub id: String,
    /// Human-readable name shown in the channel.
    pub display_name: String,
}

impl Author {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// An immutable snapshot of one historical chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub author: Author,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(author: Author, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            author,
            content: content.into(),
            timestamp,
        }
    }
}

/// The username the bot posts under for a character.
pub fn bot_username(character_name: &str) -> String {
    format!("{character_name}{BOT_NAME_MARKER}")
}

/// Remove the bot marker from a display name.
pub fn strip_bot_marker(name: &str) -> String {
    name.replace(BOT_NAME_MARKER, "").trim().to_string()
}

/// Parse a Slack-style `seconds.micros` timestamp.
///
/// Unparseable input maps to the Unix epoch, which still orders before any real message.
pub fn parse_ts(ts: &str) -> DateTime<Utc> {
    let (secs, micros) = ts.split_once('.').unwrap_or((ts, "0"));
    let secs = secs.parse::<i64>().unwrap_or_default();
    let micros = micros.parse::<u32>().unwrap_or_default();

    DateTime::from_timestamp(secs, micros.saturating_mul(1000)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_bot_marker() {
        assert_eq!(strip_bot_marker("alice[oblique]"), "alice");
        assert_eq!(strip_bot_marker("bob"), "bob");
    }

    #[test]
    fn test_bot_username_round_trips() {
        assert_eq!(bot_username("alice"), "alice[oblique]");
        assert_eq!(strip_bot_marker(&bot_username("alice")), "alice");
    }

    #[test]
    fn test_parse_ts_orders_messages() {
        let earlier = parse_ts("1700000000.000100");
        let later = parse_ts("1700000000.000200");

        assert!(earlier < later);
        assert_eq!(parse_ts("garbage").timestamp(), 0);
    }
}
