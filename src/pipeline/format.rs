//! Convert chat history into speaker-tagged prompt lines.
//!
//! Base models see an IRC-like log (`<alice> hi`); instruct models see a
//! script (`alice: hi`). Either way the final line is an open cue for the
//! continuation speaker, and the response filter reads model output back with
//! the same delimiter convention.

use std::collections::{HashMap, HashSet};

use crate::base::types::{Author, ChatMessage, strip_bot_marker};

use super::registry::ModelKind;

/// Tag reserved for the speaker the model continues as.
pub const CONTINUATION_TAG: &str = "assistant";

/// Tag for authors whose names normalize to nothing.
const FALLBACK_TAG: &str = "user";

/// Normalize a display name into a whitespace-free, delimiter-free token.
pub fn normalize_name(name: &str) -> String {
    let tag = strip_bot_marker(name)
        .split_whitespace()
        .map(|word| word.chars().filter(|c| !matches!(c, '<' | '>' | ':')).collect::<String>())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    if tag.is_empty() { FALLBACK_TAG.to_string() } else { tag }
}

/// Ordered author-to-tag assignment for one formatting pass.
///
/// Authors are keyed by identity, so two people sharing a display name still get
/// distinct tags: the first keeps the plain name, later ones get `2`, `3`, ...
#[derive(Debug, Clone)]
pub struct SpeakerTags {
    by_author: HashMap<String, String>,
    taken: HashSet<String>,
}

impl Default for SpeakerTags {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeakerTags {
    pub fn new() -> Self {
        Self {
            by_author: HashMap::new(),
            taken: HashSet::from([CONTINUATION_TAG.to_string()]),
        }
    }

    /// The tag for `author`, assigning a fresh one on first appearance.
    pub fn tag_for(&mut self, author: &Author) -> String {
        if let Some(tag) = self.by_author.get(&author.id) {
            return tag.clone();
        }

        let base = normalize_name(&author.display_name);
        let mut tag = base.clone();
        let mut suffix = 2;

        while self.taken.contains(&tag) {
            tag = format!("{base}{suffix}");
            suffix += 1;
        }

        self.taken.insert(tag.clone());
        self.by_author.insert(author.id.clone(), tag.clone());

        tag
    }
}

/// Render one line in the model's delimiter convention.
pub fn render_line(kind: ModelKind, tag: &str, content: &str) -> String {
    match kind {
        ModelKind::Base => format!("<{tag}> {content}"),
        ModelKind::Instruct => format!("{tag}: {content}"),
    }
}

/// The open line that cues the model to continue.
pub fn cue(kind: ModelKind) -> String {
    match kind {
        ModelKind::Base => format!("<{CONTINUATION_TAG}>"),
        ModelKind::Instruct => format!("{CONTINUATION_TAG}:"),
    }
}

/// Split a line into `(tag, content)` if it starts with a speaker tag.
pub fn parse_line(kind: ModelKind, line: &str) -> Option<(&str, &str)> {
    let (tag, rest) = match kind {
        ModelKind::Base => line.strip_prefix('<')?.split_once('>')?,
        ModelKind::Instruct => line.split_once(':')?,
    };

    if tag.is_empty() || tag.chars().any(|c| c.is_whitespace() || matches!(c, '<' | '>' | ':')) {
        return None;
    }

    Some((tag, rest.strip_prefix(' ').unwrap_or(rest)))
}

/// Keep multi-line messages on one prompt line.
pub fn escape_content(content: &str) -> String {
    content.replace("\r\n", "\n").replace('\n', "\\n")
}

/// Inverse of [`escape_content`], applied to model output.
pub fn unescape_content(content: &str) -> String {
    content.replace("\\n", "\n")
}

/// Format history (oldest first) into one line per message plus the cue line.
pub fn format_history(messages: &[ChatMessage], kind: ModelKind) -> Vec<String> {
    let mut tags = SpeakerTags::new();

    messages
        .iter()
        .map(|message| {
            let tag = tags.tag_for(&message.author);
            render_line(kind, &tag, &escape_content(&message.content))
        })
        .chain(std::iter::once(cue(kind)))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::DateTime;

    use super::*;

    pub(crate) fn message(id: &str, name: &str, content: &str) -> ChatMessage {
        ChatMessage::new(Author::new(id, name), content, DateTime::default())
    }

    #[test]
    fn test_instruct_format() {
        let history = [message("U1", "alice", "hi"), message("U2", "bob", "yo")];

        assert_eq!(format_history(&history, ModelKind::Instruct), vec!["alice: hi", "bob: yo", "assistant:"]);
    }

    #[test]
    fn test_base_format() {
        let history = [message("U1", "alice", "hi"), message("U2", "bob", "yo")];

        assert_eq!(format_history(&history, ModelKind::Base), vec!["<alice> hi", "<bob> yo", "<assistant>"]);
    }

    #[test]
    fn test_one_line_per_message() {
        let history = (0..80).map(|i| message(&format!("U{}", i % 7), &format!("user {}", i % 7), "multi\nline")).collect::<Vec<_>>();
        let lines = format_history(&history, ModelKind::Base);

        assert_eq!(lines.len(), 81);
        assert!(lines.iter().all(|line| !line.contains('\n')));
    }

    #[test]
    fn test_colliding_names_are_disambiguated() {
        let history = [
            message("U1", "Bob Smith", "a"),
            message("U2", "Bob  Smith", "b"),
            message("U1", "Bob Smith", "c"),
            message("U3", "Bob_Smith", "d"),
        ];

        let lines = format_history(&history, ModelKind::Instruct);

        assert_eq!(lines, vec!["Bob_Smith: a", "Bob_Smith2: b", "Bob_Smith: c", "Bob_Smith3: d", "assistant:"]);
    }

    #[test]
    fn test_assistant_tag_is_reserved() {
        let history = [message("U1", "assistant", "I am human")];

        assert_eq!(format_history(&history, ModelKind::Instruct)[0], "assistant2: I am human");
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Jane   Doe "), "Jane_Doe");
        assert_eq!(normalize_name("<evil>: name"), "evil_name");
        assert_eq!(normalize_name("dave[oblique]"), "dave");
        assert_eq!(normalize_name(" :: "), "user");
    }

    #[test]
    fn test_formatting_is_deterministic() {
        let history = [message("U1", "x", "1"), message("U2", "x", "2"), message("U3", "y", "3")];

        assert_eq!(format_history(&history, ModelKind::Base), format_history(&history, ModelKind::Base));
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line(ModelKind::Base, "<bob> yo"), Some(("bob", "yo")));
        assert_eq!(parse_line(ModelKind::Instruct, "bob: yo"), Some(("bob", "yo")));
        assert_eq!(parse_line(ModelKind::Instruct, "just words: here"), None);
        assert_eq!(parse_line(ModelKind::Base, "no tag"), None);
    }

    #[test]
    fn test_tag_is_stable_per_author() {
        let mut tags = SpeakerTags::new();
        let zed = tags.tag_for(&Author::new("U2", "zed"));
        let other_zed = tags.tag_for(&Author::new("U1", "zed"));

        assert_eq!(tags.tag_for(&Author::new("U2", "zed renamed")), zed);
        assert_eq!(other_zed, "zed2");
    }
}
