//! Narrow raw channel history down to the window a prompt is built from.

use tracing::debug;

use crate::base::types::ChatMessage;

/// Messages starting with this prefix are hidden from the bot.
pub const HIDDEN_PREFIX: &str = "..";

/// Decode the three entities Slack escapes in message text.
pub fn unescape_entities(text: &str) -> String {
    text.replace("&lt;", "<").replace("&gt;", ">").replace("&amp;", "&")
}

/// Apply the clear marker and hidden-message rules to oldest-first history.
///
/// Only messages after the most recent clear marker are kept.
pub fn prepare_window(messages: Vec<ChatMessage>, clear_marker: &str) -> Vec<ChatMessage> {
    let start = messages.iter().rposition(|m| m.content == clear_marker).map(|i| i + 1).unwrap_or(0);

    if start > 0 {
        debug!("Clear marker found; dropping {} older message(s).", start);
    }

    messages.into_iter().skip(start).filter(|m| !m.content.starts_with(HIDDEN_PREFIX)).collect()
}
