//! Keeps exactly one scoreboard message per channel: edit the stored message
//! when it still exists, otherwise post a fresh one.

use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use crate::discord::{DiscordError, Embed};

/// Retries of a single call that keeps hitting the rate limit.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;
/// Longest wait honoured for one rate limit.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(10);

/// Where scoreboard messages are posted and edited.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Post a new message and return its id.
    async fn create_message(&self, channel_id: &str, embed: &Embed) -> Result<String>;

    /// Replace the content of an existing message.
    async fn edit_message(&self, channel_id: &str, message_id: &str, embed: &Embed) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// No message was stored; a new one was posted.
    Posted { message_id: String },
    /// The stored message was edited in place.
    Edited,
    /// The stored message is gone (deleted, no longer accessible, or an id
    /// Discord rejects); a new one was posted instead.
    Reposted { message_id: String },
}

impl PublishOutcome {
    /// Id the caller must store, if it changed.
    pub fn new_message_id(&self) -> Option<&str> {
        match self {
            PublishOutcome::Posted { message_id } | PublishOutcome::Reposted { message_id } => {
                Some(message_id)
            }
            PublishOutcome::Edited => None,
        }
    }
}

/// Publish `embed` to `channel_id`.
///
/// 1. Without a stored id, post a new message.
/// 2. With one, edit it. Only when the edit shows the message is gone is a
///    new message posted, once; a failure of that post is returned.
///    Rate limits are waited out and retried. Any other edit failure (server
///    error, timeout) is returned as is, since the old message may still be
///    live and a second post would duplicate it.
pub async fn publish<S: MessageSink + ?Sized>(
    sink: &S,
    channel_id: &str,
    stored_message_id: Option<&str>,
    embed: &Embed,
) -> Result<PublishOutcome> {
    let Some(message_id) = stored_message_id else {
        let message_id =
            retry_rate_limited("post", || sink.create_message(channel_id, embed)).await?;
        info!("Posted scoreboard {} in channel {}", message_id, channel_id);
        return Ok(PublishOutcome::Posted { message_id });
    };

    let edit_err =
        match retry_rate_limited("edit", || sink.edit_message(channel_id, message_id, embed))
            .await
        {
            Ok(()) => return Ok(PublishOutcome::Edited),
            Err(e) => e,
        };

    let gone = edit_err
        .downcast_ref::<DiscordError>()
        .is_some_and(DiscordError::is_gone);
    if !gone {
        return Err(edit_err.context(format!(
            "Failed to edit scoreboard {} in channel {}",
            message_id, channel_id
        )));
    }
    warn!(
        "Scoreboard {} in channel {} is gone ({}), posting a new one",
        message_id, channel_id, edit_err
    );

    let new_id = retry_rate_limited("post", || sink.create_message(channel_id, embed)).await?;
    info!(
        "Reposted scoreboard in channel {}: {} -> {}",
        channel_id, message_id, new_id
    );
    Ok(PublishOutcome::Reposted { message_id: new_id })
}

/// Run `call`, sleeping out and retrying rate-limit errors.
async fn retry_rate_limited<T, F, Fut>(action: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = 0;
    loop {
        match call().await {
            Err(e) if retries < MAX_RATE_LIMIT_RETRIES => {
                let Some(wait) = e
                    .downcast_ref::<DiscordError>()
                    .and_then(DiscordError::retry_after)
                else {
                    return Err(e);
                };
                retries += 1;
                let wait = wait.min(MAX_RETRY_AFTER);
                warn!(
                    "Rate limited on scoreboard {}, retry {}/{} in {:?}",
                    action, retries, MAX_RATE_LIMIT_RETRIES, wait
                );
                tokio::time::sleep(wait).await;
            }
            result => return result,
        }
    }
}
