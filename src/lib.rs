//! Library root for `oblique-bot`.
//!
//! Oblique-bot is a Slack bot that impersonates channel members. When a message
//! contains the trigger keyword, the bot:
//! - Reads the recent channel history as a chat log
//! - Asks a base or instruct model to continue the log as the invoking user
//! - Posts the continuation under that user's name
//!
//! The architecture is built around extensible traits that allow for different
//! implementations of the chat platform and the model transport.

pub mod base;
pub mod interaction;
pub mod pipeline;
pub mod runtime;
pub mod service;

use base::{config::Config, types::Void};
use rustls::crypto;
use tracing::info;

/// Public async entry for the binary crate.
///
/// Sets up necessary services and starts the oblique-bot runtime:
/// - Initializes the crypto provider
/// - Creates the runtime context with the pipeline, LLM, and chat clients
/// - Starts the main event loop for processing messages
pub async fn start(config: Config) -> Void {
    info!("Starting oblique-bot ...");

    // Start the crypto provider.
    crypto::ring::default_provider().install_default().map_err(|_| anyhow::anyhow!("Failed to install the rustls crypto provider"))?;

    // Initialize the runtime.
    let runtime = runtime::Runtime::new(config).await?;

    // Start the runtime.
    runtime.start().await?;

    Ok(())
}
