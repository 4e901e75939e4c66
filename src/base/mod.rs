//! Core components, types, and utilities for the oblique-bot.
//!
//! This module contains fundamental building blocks used throughout the application:
//! - Configuration handling and environment variables.
//! - User-visible notices.
//! - The pipeline error taxonomy.
//! - Common types and result handling.

pub mod config;
pub mod error;
pub mod prompts;
pub mod types;
