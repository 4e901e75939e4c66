//! External service integrations for oblique-bot.
//!
//! - `chat`: the chat platform (Slack)
//! - `llm`: the OpenAI-compatible model transport

pub mod chat;
pub mod llm;
