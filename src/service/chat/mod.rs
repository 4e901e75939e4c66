pub mod slack;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;

use crate::base::types::{ChatMessage, Res, Void};

// Traits.

/// Generic "chat" trait that clients must implement.
///
/// This trait defines the core functionality for interacting with chat platforms
/// like Slack. Implementing this trait allows different chat services to be used
/// with the oblique-bot.
#[async_trait]
pub trait GenericChatClient: Send + Sync + 'static {
    /// Start the chat client listener.
    ///
    /// This sets up event listeners for the chat platform and begins processing
    /// incoming messages and commands.
    async fn start(&self) -> Void;

    /// Resolve the name a user is shown under in the channel.
    async fn display_name(&self, user_id: &str) -> Res<String>;

    /// Read up to `limit` messages posted strictly before `before_ts` (or the
    /// latest messages when `None`), oldest first.
    async fn fetch_recent_messages(&self, channel_id: &str, before_ts: Option<&str>, limit: u16) -> Res<Vec<ChatMessage>>;

    /// Post a message under `username`, returning its timestamp.
    async fn post_message(&self, channel_id: &str, username: &str, text: &str) -> Res<String>;

    /// Replace the text of a message the bot posted.
    async fn update_message(&self, channel_id: &str, ts: &str, text: &str) -> Void;
}

// Structs.

/// Chat client for the application.
///
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<dyn GenericChatClient>,
}

impl Deref for ChatClient {
    type Target = dyn GenericChatClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl ChatClient {
    pub fn new(inner: Arc<dyn GenericChatClient>) -> Self {
        Self { inner }
    }
}
