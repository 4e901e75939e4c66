//! User-visible text the bot posts around a generation.

/// Placeholder posted while the model is working.
pub const GENERATING_NOTICE: &str = "Oblique: Generating...";

/// Prefix for notices that echo a user mistake back.
pub const NOTICE_PREFIX: &str = "Oblique:";

/// Posted when the model output filters down to nothing.
pub const EMPTY_GENERATION_NOTICE: &str = "Oblique: no response generated.";

/// Posted when the channel history is too large to send.
pub const PROMPT_TOO_LONG_NOTICE: &str = "Oblique: the conversation is too long to continue. Post the clear marker to start fresh.";

/// Posted for provider and configuration failures.
pub const GENERIC_FAILURE_NOTICE: &str = "Oblique: generation failed, please try again later.";

/// Acknowledgement for the slash command.
pub const COMMAND_ACK: &str = "Generation started!";

/// Usage shown when the slash command is given `help`.
pub const USAGE: &str = "Usage: `/oblique [-s] [-m self|full] [-n name] [-p temperature] [-M model] [seed text]`";

/// Username for notices not tied to a character.
pub const NOTICE_USERNAME: &str = "Oblique";
