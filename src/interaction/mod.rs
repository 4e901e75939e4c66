//! Event handling and user interactions for oblique-bot.
//!
//! This module provides functionality for handling invocations:
//! - Narrowing channel history to the prompt window
//! - Running a generation and posting the placeholder and result

pub mod history;
pub mod trigger;
