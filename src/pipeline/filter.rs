//! Reduce raw model output to the text that gets posted.
//!
//! Models rarely stop where we want them to: they keep writing the log as
//! other people. The filter reads the output back with the formatter's
//! delimiter convention and keeps only the turns the request asked for.

use std::collections::HashSet;

use crate::base::error::PipelineError;

use super::{
    format::{CONTINUATION_TAG, cue, parse_line, unescape_content},
    options::{GenerationRequest, ResponseMode},
    registry::ModelKind,
};

/// Verbatim provider output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawCompletion {
    pub text: String,
    /// The provider stopped on the token limit, so the last line may be cut off.
    pub truncated: bool,
}

impl RawCompletion {
    pub fn new(text: impl Into<String>, truncated: bool) -> Self {
        Self { text: text.into(), truncated }
    }
}

impl From<&str> for RawCompletion {
    fn from(text: &str) -> Self {
        Self::new(text, false)
    }
}

/// When `full` mode stops collecting turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullModePolicy {
    /// Maximum turns returned.
    pub max_lines: usize,
    /// Stop at the first speaker who already finished a turn.
    pub stop_on_repeated_speaker: bool,
}

impl Default for FullModePolicy {
    fn default() -> Self {
        Self {
            max_lines: 8,
            stop_on_repeated_speaker: true,
        }
    }
}

/// What one generation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub raw_text: String,
    pub filtered_text: String,
}

#[derive(Debug)]
struct Turn<'a> {
    tag: &'a str,
    content: String,
}

/// Split output into speaker turns, starting with the continuation speaker.
fn split_turns<'a>(raw: &'a RawCompletion, seed_text: Option<&str>, kind: ModelKind) -> Vec<Turn<'a>> {
    let cue = cue(kind);

    // Some providers echo the cue back; either way the body continues the assistant's line.
    let (body, echoed) = match raw.text.trim_start().strip_prefix(cue.as_str()) {
        Some(rest) => (rest, true),
        None => (raw.text.as_str(), false),
    };

    let mut lines = body.split('\n').map(|line| line.trim_end_matches('\r')).collect::<Vec<_>>();

    if raw.truncated && lines.len() > 1 && lines.last().is_some_and(|line| parse_line(kind, line).is_some()) {
        lines.pop();
    }

    let mut lines = lines.into_iter();
    let first = lines.next().unwrap_or_default();

    // The first line always continues the prefilled line, whatever it looks like.
    let content = match seed_text {
        Some(seed) if echoed && first.trim_start().starts_with(seed) => first.to_string(),
        Some(seed) => format!("{seed}{first}"),
        None => first.to_string(),
    };

    let mut turns = vec![Turn { tag: CONTINUATION_TAG, content }];

    for line in lines {
        if line.trim().is_empty() {
            continue;
        }

        match parse_line(kind, line) {
            Some((tag, content)) => turns.push(Turn { tag, content: content.to_string() }),
            None => {
                if let Some(turn) = turns.last_mut() {
                    turn.content.push_str("\\n");
                    turn.content.push_str(line);
                }
            }
        }
    }

    turns
}

/// Turns for `self` mode: the continuation speaker's contiguous run.
fn select_single<'t, 'a>(turns: &'t [Turn<'a>]) -> &'t [Turn<'a>] {
    let end = turns.iter().position(|turn| turn.tag != CONTINUATION_TAG).unwrap_or(turns.len());
    &turns[..end]
}

/// Turns for `full` mode: stop at a repeated, already-closed speaker or the line cap.
fn select_full<'t, 'a>(turns: &'t [Turn<'a>], policy: &FullModePolicy) -> &'t [Turn<'a>] {
    let mut closed = HashSet::new();
    let mut current: Option<&str> = None;
    let mut end = 0;

    for turn in turns {
        if end >= policy.max_lines {
            break;
        }

        if current != Some(turn.tag) {
            if policy.stop_on_repeated_speaker && closed.contains(turn.tag) {
                break;
            }
            if let Some(previous) = current {
                closed.insert(previous);
            }
            current = Some(turn.tag);
        }

        end += 1;
    }

    &turns[..end]
}

/// Cut text back to its last complete sentence, if it has one.
pub fn trim_to_sentence(text: &str) -> &str {
    match text.rfind(['.', '!', '?']) {
        Some(index) => &text[..=index],
        None => text,
    }
}

/// Filter raw output into the text to post.
pub fn filter_response(raw: &RawCompletion, request: &GenerationRequest, kind: ModelKind, policy: &FullModePolicy) -> Result<String, PipelineError> {
    let turns = split_turns(raw, request.seed_text.as_deref(), kind);

    let kept = match request.mode {
        ResponseMode::Single => select_single(&turns),
        ResponseMode::Full => select_full(&turns, policy),
    };

    let text = kept
        .iter()
        .filter_map(|turn| {
            let content = unescape_content(&turn.content);
            let content = content.trim();

            match (content.is_empty(), turn.tag == CONTINUATION_TAG) {
                (true, _) => None,
                (false, true) => Some(content.to_string()),
                (false, false) => Some(format!("{}: {}", turn.tag, content)),
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    // Only the final turn of a truncated completion can end mid-sentence.
    let text = if raw.truncated && kept.len() == turns.len() { trim_to_sentence(&text) } else { text.as_str() };
    let text = text.trim();

    if text.is_empty() {
        return Err(PipelineError::EmptyGeneration);
    }

    if request.suppress_trailing_name {
        Ok(text.to_string())
    } else {
        Ok(format!("{text}\n- {}", request.character_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(mode: ResponseMode, suppress: bool) -> GenerationRequest {
        let mut request = GenerationRequest::new("alice", 0.8);
        request.mode = mode;
        request.suppress_trailing_name = suppress;
        request
    }

    fn filter(raw: &str, request: &GenerationRequest, kind: ModelKind) -> Result<String, PipelineError> {
        filter_response(&RawCompletion::from(raw), request, kind, &FullModePolicy::default())
    }

    #[test]
    fn test_self_mode_stops_at_other_speaker() {
        let result = filter("assistant: sup\nalice: what's new", &request(ResponseMode::Single, true), ModelKind::Instruct);

        assert_eq!(result.unwrap(), "sup");
    }

    #[test]
    fn test_attribution_is_appended_once() {
        let result = filter("assistant: sup\nalice: what's new", &request(ResponseMode::Single, false), ModelKind::Instruct).unwrap();

        assert_eq!(result, "sup\n- alice");
        assert!(result.ends_with("alice"));
        assert_eq!(result.matches("- alice").count(), 1);
    }

    #[test]
    fn test_bare_continuation_base() {
        let result = filter(" hello there\n<bob> hi\n<carol> hey", &request(ResponseMode::Single, true), ModelKind::Base);

        assert_eq!(result.unwrap(), "hello there");
    }

    #[test]
    fn test_self_mode_keeps_consecutive_own_lines() {
        let result = filter(" one\nassistant: two\nbob: three", &request(ResponseMode::Single, true), ModelKind::Instruct);

        assert_eq!(result.unwrap(), "one\ntwo");
    }

    #[test]
    fn test_immediate_speaker_switch_is_empty() {
        let result = filter("\nbob: I'll take it from here", &request(ResponseMode::Single, true), ModelKind::Instruct);

        assert_eq!(result, Err(PipelineError::EmptyGeneration));
    }

    #[test]
    fn test_first_line_that_looks_tagged_is_kept() {
        let result = filter("Update: it shipped\nbob: nice", &request(ResponseMode::Single, true), ModelKind::Instruct);

        assert_eq!(result.unwrap(), "Update: it shipped");
    }

    #[test]
    fn test_seed_prefix_of_continuation_is_not_dropped() {
        let mut request = request(ResponseMode::Single, true);
        request.seed_text = Some("no".to_string());

        let result = filter(" not really", &request, ModelKind::Instruct);

        assert_eq!(result.unwrap(), "no not really");
    }

    #[test]
    fn test_empty_output() {
        assert_eq!(filter("   \n", &request(ResponseMode::Single, false), ModelKind::Base), Err(PipelineError::EmptyGeneration));
    }

    #[test]
    fn test_seed_round_trip() {
        let mut request = request(ResponseMode::Single, true);
        request.seed_text = Some("I think".to_string());

        let result = filter(" we should go", &request, ModelKind::Instruct);

        assert_eq!(result.unwrap(), "I think we should go");
    }

    #[test]
    fn test_echoed_seed_is_not_doubled() {
        let mut request = request(ResponseMode::Single, true);
        request.seed_text = Some("I think".to_string());

        let result = filter("<assistant> I think so\n<bob> ok", &request, ModelKind::Base);

        assert_eq!(result.unwrap(), "I think so");
    }

    #[test]
    fn test_escaped_newlines_are_restored() {
        let result = filter(" first\\nsecond\nbob: x", &request(ResponseMode::Single, true), ModelKind::Instruct);

        assert_eq!(result.unwrap(), "first\nsecond");
    }

    #[test]
    fn test_full_mode_stops_at_repeated_speaker() {
        let raw = " sup\nbob: not much\ncarol: same\nbob: again\ndave: late";
        let result = filter(raw, &request(ResponseMode::Full, true), ModelKind::Instruct);

        assert_eq!(result.unwrap(), "sup\nbob: not much\ncarol: same");
    }

    #[test]
    fn test_full_mode_stops_when_assistant_returns() {
        let raw = "<assistant> sup\n<bob> yo\n<assistant> again";
        let result = filter(raw, &request(ResponseMode::Full, true), ModelKind::Base);

        assert_eq!(result.unwrap(), "sup\nbob: yo");
    }

    #[test]
    fn test_full_mode_line_cap() {
        let raw = " a\nb: 1\nc: 2\nd: 3\ne: 4";
        let policy = FullModePolicy {
            max_lines: 3,
            stop_on_repeated_speaker: true,
        };

        let result = filter_response(&RawCompletion::from(raw), &request(ResponseMode::Full, true), ModelKind::Instruct, &policy);

        assert_eq!(result.unwrap(), "a\nb: 1\nc: 2");
    }

    #[test]
    fn test_full_mode_without_repeat_stop() {
        let raw = " a\nb: 1\nassistant: 2";
        let policy = FullModePolicy {
            max_lines: 8,
            stop_on_repeated_speaker: false,
        };

        let result = filter_response(&RawCompletion::from(raw), &request(ResponseMode::Full, true), ModelKind::Instruct, &policy);

        assert_eq!(result.unwrap(), "a\nb: 1\n2");
    }

    #[test]
    fn test_truncated_partial_line_is_dropped() {
        let raw = RawCompletion::new(" done here.\nassistant: and then I was going to", true);
        let result = filter_response(&raw, &request(ResponseMode::Single, true), ModelKind::Instruct, &FullModePolicy::default());

        assert_eq!(result.unwrap(), "done here.");
    }

    #[test]
    fn test_truncated_single_line_is_trimmed_to_sentence() {
        let raw = RawCompletion::new(" It works. Mostly, except when", true);
        let result = filter_response(&raw, &request(ResponseMode::Single, true), ModelKind::Instruct, &FullModePolicy::default());

        assert_eq!(result.unwrap(), "It works.");
    }

    #[test]
    fn test_self_mode_never_leaks_other_speakers() {
        let raw = " hi\nbob: secret\n<carol> also\nassistant: mine";
        let result = filter(raw, &request(ResponseMode::Single, true), ModelKind::Instruct).unwrap();

        assert!(!result.contains("bob:"));
        assert!(!result.contains("secret"));
    }

    #[test]
    fn test_trim_to_sentence() {
        assert_eq!(trim_to_sentence("One. Two! Three"), "One. Two!");
        assert_eq!(trim_to_sentence("no terminator"), "no terminator");
    }
}
