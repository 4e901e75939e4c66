use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, instrument, warn};

use crate::{
    base::{
        config::Config,
        prompts::{GENERATING_NOTICE, GENERIC_FAILURE_NOTICE, NOTICE_USERNAME},
        types::{Void, bot_username, strip_bot_marker},
    },
    pipeline::Pipeline,
    service::{chat::ChatClient, llm::LlmClient},
};

use super::history::prepare_window;

/// One invocation of the bot, from a keyword message or the slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub channel_id: String,
    pub user_id: String,
    /// Everything after the keyword.
    pub args: String,
    /// Timestamp of the triggering message; history is read strictly before it.
    /// Slash commands have no message, so they read the latest history.
    pub before_ts: Option<String>,
}

/// Handle a trigger on its own task, logging any failure.
///
/// Invocations never wait on one another.
#[instrument(skip_all, fields(channel = %trigger.channel_id))]
pub fn handle_trigger(trigger: Trigger, config: Config, pipeline: Pipeline, llm: LlmClient, chat: ChatClient) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            // Process the trigger.
            let result = handle_trigger_internal(&trigger, &config, &pipeline, &llm, &chat).await;

            // Log any errors.
            if let Err(err) = &result {
                error!("Error while handling: {}", err);
            }
        }
        .in_current_span(),
    )
}

async fn handle_trigger_internal(trigger: &Trigger, config: &Config, pipeline: &Pipeline, llm: &LlmClient, chat: &ChatClient) -> Void {
    // Resolve who asked, so their name is the default character.

    let display_name = match chat.display_name(&trigger.user_id).await {
        Ok(name) => strip_bot_marker(&name),
        Err(e) => {
            warn!("Using the user ID as the display name: {}", e);
            trigger.user_id.clone()
        }
    };

    let request = match pipeline.parse_request(&trigger.args, &display_name) {
        Ok(request) => request,
        Err(e) => {
            warn!("Rejected invocation: {}", e);
            chat.post_message(&trigger.channel_id, NOTICE_USERNAME, &e.user_notice()).await?;
            return Ok(());
        }
    };

    // Read the channel as it was when the trigger was sent.

    let history = match chat.fetch_recent_messages(&trigger.channel_id, trigger.before_ts.as_deref(), config.history_limit).await {
        Ok(history) => history,
        Err(e) => {
            chat.post_message(&trigger.channel_id, NOTICE_USERNAME, GENERIC_FAILURE_NOTICE).await?;
            return Err(e);
        }
    };
    let window = prepare_window(history, &config.clear_marker);

    // Resolve the model and build the payload before anything is posted.

    let (model, payload) = match pipeline.prepare(&request, &window) {
        Ok(prepared) => prepared,
        Err(e) => {
            warn!("Could not build a prompt: {}", e);
            chat.post_message(&trigger.channel_id, NOTICE_USERNAME, &e.user_notice()).await?;
            return Ok(());
        }
    };

    let username = bot_username(&request.character_name);
    let placeholder_ts = chat.post_message(&trigger.channel_id, &username, GENERATING_NOTICE).await?;

    let text = match pipeline.run(llm, &request, model, &payload).await {
        Ok(result) => {
            info!("Posting {} chars as `{}`.", result.filtered_text.len(), username);
            result.filtered_text
        }
        Err(e) => {
            warn!("Generation failed: {}", e);
            e.user_notice()
        }
    };

    chat.update_message(&trigger.channel_id, &placeholder_ts, &text).await?;

    Ok(())
}
