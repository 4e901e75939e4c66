//! Parse trigger text into a [`GenerationRequest`].
//!
//! The trigger is free-form chat, not a strict command line: unknown flags become
//! seed text, and only malformed values for known flags are errors.

use std::{fmt, str::FromStr};

use crate::base::{error::PipelineError, types::strip_bot_marker};

/// Lowest accepted sampling temperature.
pub const MIN_TEMPERATURE: f32 = 0.1;
/// Highest accepted sampling temperature.
pub const MAX_TEMPERATURE: f32 = 1.0;

/// Whether the bot continues as one speaker or lets the conversation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    /// `self`: a single continuation of the invoking user's turn.
    #[default]
    Single,
    /// `full`: a short multi-speaker continuation.
    Full,
}

impl FromStr for ResponseMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "self" => Ok(ResponseMode::Single),
            "full" => Ok(ResponseMode::Full),
            _ => Err(PipelineError::InvalidMode(s.to_string())),
        }
    }
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseMode::Single => write!(f, "self"),
            ResponseMode::Full => write!(f, "full"),
        }
    }
}

/// Everything one invocation asks for.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub mode: ResponseMode,
    pub character_name: String,
    pub temperature: f32,
    pub suppress_trailing_name: bool,
    pub seed_text: Option<String>,
    /// Model to use; `None` means the registry default.
    pub model_id: Option<String>,
}

impl GenerationRequest {
    /// A request with every option at its default.
    pub fn new(character_name: impl Into<String>, temperature: f32) -> Self {
        Self {
            mode: ResponseMode::default(),
            character_name: character_name.into(),
            temperature,
            suppress_trailing_name: false,
            seed_text: None,
            model_id: None,
        }
    }
}

/// Parse the text that follows the trigger keyword.
///
/// `display_name` is the invoking user's name and becomes the character name unless `-n` overrides it.
pub fn parse_options(args: &str, display_name: &str, default_temperature: f32) -> Result<GenerationRequest, PipelineError> {
    let mut request = GenerationRequest::new(strip_bot_marker(display_name), default_temperature);
    let mut seed = Vec::new();
    let mut tokens = args.split_whitespace();

    while let Some(token) = tokens.next() {
        match token {
            "-s" => request.suppress_trailing_name = true,
            "-m" => request.mode = tokens.next().unwrap_or_default().parse()?,
            "-n" => request.character_name = validate_name(tokens.next().unwrap_or_default())?,
            "-p" => request.temperature = parse_temperature(tokens.next().unwrap_or_default())?,
            "-M" => {
                let id = tokens.next().unwrap_or_default();
                if id.is_empty() {
                    return Err(PipelineError::UnknownModel(String::new()));
                }
                request.model_id = Some(id.to_string());
            }
            word => seed.push(word),
        }
    }

    if !seed.is_empty() {
        request.seed_text = Some(seed.join(" "));
    }

    Ok(request)
}

/// Check a character name supplied by the user.
pub fn validate_name(name: &str) -> Result<String, PipelineError> {
    let name = strip_bot_marker(name);

    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(PipelineError::InvalidName(name));
    }

    Ok(name)
}

/// Parse and range-check a temperature. Out-of-range values are rejected, never clamped.
pub fn parse_temperature(value: &str) -> Result<f32, PipelineError> {
    let invalid = || PipelineError::InvalidTemperature(value.to_string());
    let temperature = value.parse::<f32>().map_err(|_| invalid())?;

    if !temperature.is_finite() || !(MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&temperature) {
        return Err(invalid());
    }

    Ok(temperature)
}

/// Whether a chat message should trigger a generation.
///
/// The keyword matches case-insensitively; quoting it in backticks opts out.
pub fn is_trigger(text: &str, keyword: &str) -> bool {
    let text = text.to_lowercase();
    let keyword = keyword.to_lowercase();

    text.contains(&keyword) && !text.contains(&format!("`{keyword}`"))
}

/// The invocation arguments: everything after the first keyword occurrence.
pub fn trigger_args<'a>(text: &'a str, keyword: &str) -> &'a str {
    let lowered = text.to_lowercase();
    let keyword = keyword.to_lowercase();

    // Lowercasing can change byte lengths outside ASCII, so only slice when the offsets agree.
    match lowered.find(&keyword) {
        Some(start) if lowered.len() == text.len() && text.is_char_boundary(start + keyword.len()) => &text[start + keyword.len()..],
        _ => text.split_once(char::is_whitespace).map(|(_, rest)| rest).unwrap_or_default(),
    }
}
