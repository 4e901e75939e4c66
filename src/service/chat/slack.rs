//! Slack integration for oblique-bot.
//!
//! This module provides the Slack side of the bot:
//! - Listening for channel messages and the `/oblique` command over socket mode
//! - Reading channel history and resolving display names
//! - Posting under a per-character username and editing the placeholder
//!
//! Posting with a custom username requires the `chat:write.customize` scope.

use std::{collections::HashSet, ops::Deref, sync::Arc};

use async_trait::async_trait;
use futures::future::join_all;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use slack_morphism::prelude::*;
use tracing::{info, instrument, warn};

use crate::{
    base::{
        config::Config,
        prompts::{COMMAND_ACK, USAGE},
        types::{Author, ChatMessage, Res, Void, parse_ts, strip_bot_marker},
    },
    interaction::{
        self,
        history::unescape_entities,
        trigger::Trigger,
    },
    pipeline::{
        Pipeline,
        options::{is_trigger, trigger_args},
    },
    service::llm::LlmClient,
};

use super::{ChatClient, GenericChatClient};

// Type aliases.

type FullClient = slack_morphism::SlackClient<SlackClientHyperConnector<HttpsConnector<HttpConnector>>>;

// Extra methods on `ChatClient` applied by the slack implementation.

impl ChatClient {
    /// Creates a new Slack chat client.
    pub async fn slack(config: &Config, pipeline: Pipeline, llm: LlmClient) -> Res<Self> {
        let client = SlackChatClient::new(config, pipeline, llm).await?;
        Ok(Self { inner: Arc::new(client) })
    }
}

impl From<SlackChatClient> for ChatClient {
    fn from(client: SlackChatClient) -> Self {
        Self { inner: Arc::new(client) }
    }
}

// Structs.

/// User state for the slack socket client.
struct SlackUserState {
    config: Config,
    pipeline: Pipeline,
    llm: LlmClient,
    chat: ChatClient,
    bot_user_id: String,
}

/// Slack client implementation.
#[derive(Clone)]
struct SlackChatClient {
    pub config: Config,
    pub app_token: SlackApiToken,
    pub bot_token: SlackApiToken,
    pub bot_user_id: String,
    pub client: Arc<FullClient>,
    pub pipeline: Pipeline,
    pub llm: LlmClient,
}

impl Deref for SlackChatClient {
    type Target = FullClient;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl SlackChatClient {
    /// Create a new Slack chat client.
    #[instrument(name = "SlackChatClient::new", skip_all)]
    pub async fn new(config: &Config, pipeline: Pipeline, llm: LlmClient) -> Res<Self> {
        // Initialize tokens.

        let app_token = SlackApiToken::new(SlackApiTokenValue(config.slack_app_token.clone()));
        let bot_token = SlackApiToken::new(SlackApiTokenValue(config.slack_bot_token.clone()));

        // Initialize the Slack client.

        let https_connector = HttpsConnector::<HttpConnector>::builder().with_native_roots()?.https_only().enable_all_versions().build();
        let connector = SlackClientHyperConnector::with_connector(https_connector);
        let client = Arc::new(slack_morphism::SlackClient::new(connector));

        // Get the bot's user ID.

        let session = client.open_session(&bot_token);
        let bot_user = session.auth_test().await?;
        let bot_user_id = bot_user.user_id.0;

        info!("Slack bot user ID: {}", bot_user_id);

        Ok(Self {
            config: config.clone(),
            app_token,
            bot_token,
            bot_user_id,
            client,
            pipeline,
            llm,
        })
    }
}

#[async_trait]
impl GenericChatClient for SlackChatClient {
    async fn start(&self) -> Void {
        // Initialize the socket mode listener.

        let socket_mode_callbacks = SlackSocketModeListenerCallbacks::new().with_command_events(handle_command_event).with_push_events(handle_push_event);

        // Initialize the socket mode listener environment.

        let listener_environment = Arc::new(SlackClientEventsListenerEnvironment::new(self.client.clone()).with_user_state(SlackUserState {
            config: self.config.clone(),
            pipeline: self.pipeline.clone(),
            llm: self.llm.clone(),
            chat: ChatClient::from(self.clone()),
            bot_user_id: self.bot_user_id.clone(),
        }));

        let socket_mode_listener = Arc::new(SlackClientSocketModeListener::new(
            &SlackClientSocketModeConfig::new(),
            listener_environment.clone(),
            socket_mode_callbacks,
        ));

        // Register an app token to listen for events,
        socket_mode_listener.listen_for(&self.app_token).await?;

        // Start WS connections and wait for Ctrl-C to shutdown.
        socket_mode_listener.serve().await;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn display_name(&self, user_id: &str) -> Res<String> {
        let request = SlackApiUsersInfoRequest::new(SlackUserId(user_id.to_string()));
        let session = self.client.open_session(&self.bot_token);

        let response = session.users_info(&request).await.map_err(|e| anyhow::anyhow!("Failed to look up user `{}`: {}", user_id, e))?;

        Ok(preferred_name(&response.user))
    }

    #[instrument(skip(self))]
    async fn fetch_recent_messages(&self, channel_id: &str, before_ts: Option<&str>, limit: u16) -> Res<Vec<ChatMessage>> {
        let mut request = SlackApiConversationsHistoryRequest::new()
            .with_channel(SlackChannelId(channel_id.to_string()))
            .with_limit(limit)
            .with_inclusive(false);

        if let Some(ts) = before_ts {
            request = request.with_latest(SlackTs(ts.to_string()));
        }

        let session = self.client.open_session(&self.bot_token);
        let response = session.conversations_history(&request).await.map_err(|e| anyhow::anyhow!("Failed to read history: {}", e))?;

        // Resolve every human author once, concurrently.

        let user_ids = response.messages.iter().filter_map(|m| m.sender.user.as_ref()).map(|u| u.0.clone()).collect::<HashSet<_>>();

        let lookups = user_ids.into_iter().map(|id| async move {
            let name = match self.display_name(&id).await {
                Ok(name) => name,
                Err(e) => {
                    warn!("Falling back to the user ID for `{}`: {}", id, e);
                    id.clone()
                }
            };
            (id, name)
        });

        let names = join_all(lookups).await.into_iter().collect::<std::collections::HashMap<_, _>>();

        // Slack returns newest first.

        let messages = response.messages.iter().rev().filter_map(|m| to_chat_message(m, |id| names.get(id).cloned())).collect::<Vec<_>>();

        info!("Read {} message(s) from channel history.", messages.len());

        Ok(messages)
    }

    #[instrument(skip(self, text))]
    async fn post_message(&self, channel_id: &str, username: &str, text: &str) -> Res<String> {
        let message = SlackMessageContent::new().with_text(text.to_string());

        let request = SlackApiChatPostMessageRequest::new(SlackChannelId(channel_id.to_string()), message).with_username(username.to_string());

        let session = self.client.open_session(&self.bot_token);

        let response = session.chat_post_message(&request).await.map_err(|e| anyhow::anyhow!("Failed to send message: {}", e))?;

        Ok(response.ts.0)
    }

    #[instrument(skip(self, text))]
    async fn update_message(&self, channel_id: &str, ts: &str, text: &str) -> Void {
        let message = SlackMessageContent::new().with_text(text.to_string());

        let request = SlackApiChatUpdateRequest::new(SlackChannelId(channel_id.to_string()), message, SlackTs(ts.to_string()));

        let session = self.client.open_session(&self.bot_token);

        let _ = session.chat_update(&request).await.map_err(|e| anyhow::anyhow!("Failed to update message: {}", e))?;

        Ok(())
    }
}

// Helpers.

/// Pick the name a user is shown under: display name, then real name, then handle.
fn preferred_name(user: &SlackUser) -> String {
    let non_empty = |value: Option<&String>| value.filter(|v| !v.trim().is_empty()).cloned();

    let profile = user.profile.as_ref();

    non_empty(profile.and_then(|p| p.display_name.as_ref()))
        .or_else(|| non_empty(profile.and_then(|p| p.real_name.as_ref())))
        .or_else(|| non_empty(user.name.as_ref()))
        .unwrap_or_else(|| user.id.0.clone())
}

/// Convert one history entry, resolving human names through `lookup`.
///
/// Messages the bot posted carry their character in the username; they are
/// keyed by that name so each character reads as its own speaker.
fn to_chat_message(message: &SlackHistoryMessage, lookup: impl Fn(&str) -> Option<String>) -> Option<ChatMessage> {
    let sender = &message.sender;

    let author = match (&sender.user, &sender.username) {
        (_, Some(username)) if sender.bot_id.is_some() => {
            let name = strip_bot_marker(username);
            Author::new(format!("bot:{name}"), name)
        }
        (Some(user), _) => Author::new(user.0.clone(), lookup(&user.0).unwrap_or_else(|| user.0.clone())),
        _ => return None,
    };

    let content = message.content.text.as_deref().map(unescape_entities).unwrap_or_default();

    Some(ChatMessage::new(author, content, parse_ts(&message.origin.ts.0)))
}

/// Decide whether a channel message invokes the bot.
fn message_trigger(event: &SlackMessageEvent, bot_user_id: &str, keyword: &str) -> Option<Trigger> {
    // Edits, joins, and our own posts all arrive with a subtype or a bot id.
    if event.subtype.is_some() || event.sender.bot_id.is_some() {
        return None;
    }

    let user_id = event.sender.user.as_ref()?.0.clone();
    if user_id == bot_user_id {
        return None;
    }

    // History is read from the channel, not from threads.
    if event.origin.thread_ts.is_some() {
        return None;
    }

    let channel_id = event.origin.channel.as_ref()?.0.clone();
    let text = unescape_entities(event.content.as_ref()?.text.as_deref()?);

    if !is_trigger(&text, keyword) {
        return None;
    }

    Some(Trigger {
        channel_id,
        user_id,
        args: trigger_args(&text, keyword).trim().to_string(),
        before_ts: Some(event.origin.ts.0.clone()),
    })
}

// Socket mode listener callbacks for Slack.

/// Handles the `/oblique` command.
#[instrument(skip_all)]
async fn handle_command_event(
    event: SlackCommandEvent,
    _client: Arc<SlackHyperClient>,
    states: SlackClientEventsUserState,
) -> Result<SlackCommandEventResponse, Box<dyn std::error::Error + Send + Sync>> {
    let states = states.read().await;
    let user_state = states.get_user_state::<SlackUserState>().ok_or(anyhow::anyhow!("Failed to get user state"))?;

    let args = unescape_entities(event.text.as_deref().unwrap_or_default()).trim().to_string();

    if args.eq_ignore_ascii_case("help") {
        return Ok(SlackCommandEventResponse::new(SlackMessageContent::new().with_text(USAGE.into())));
    }

    info!("Received command event ...");

    let trigger = Trigger {
        channel_id: event.channel_id.0,
        user_id: event.user_id.0,
        args,
        before_ts: None,
    };

    interaction::trigger::handle_trigger(
        trigger,
        user_state.config.clone(),
        user_state.pipeline.clone(),
        user_state.llm.clone(),
        user_state.chat.clone(),
    );

    Ok(SlackCommandEventResponse::new(SlackMessageContent::new().with_text(COMMAND_ACK.into())))
}

/// Handles push events from Slack.
#[instrument(skip_all)]
async fn handle_push_event(event_callback: SlackPushEventCallback, _client: Arc<SlackHyperClient>, states: SlackClientEventsUserState) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let event = event_callback.event;
    let states = states.read().await;
    let user_state = states.get_user_state::<SlackUserState>().ok_or(anyhow::anyhow!("Failed to get user state"))?;

    match event {
        SlackEventCallbackBody::Message(slack_message_event) => {
            let Some(trigger) = message_trigger(&slack_message_event, &user_state.bot_user_id, &user_state.config.keyword) else {
                return Ok(());
            };

            info!("Received trigger message ...");

            interaction::trigger::handle_trigger(
                trigger,
                user_state.config.clone(),
                user_state.pipeline.clone(),
                user_state.llm.clone(),
                user_state.chat.clone(),
            );
        }
        _ => {
            warn!("Received unhandled push event.")
        }
    }

    Ok(())
}

// Tests.
