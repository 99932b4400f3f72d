use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::DiscordError;
use super::ratelimit::RateLimiter;
use super::Embed;
use crate::publisher::MessageSink;

/// Interaction callback: acknowledge now, send the content later.
const DEFERRED_CHANNEL_MESSAGE_WITH_SOURCE: u8 = 5;
/// Message flag: only the invoking user sees it.
const EPHEMERAL: u32 = 1 << 6;
/// Used when a 429 carries no usable wait time.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Client for the Discord REST API.
#[derive(Clone)]
pub struct DiscordClient {
    http: Client,
    api_url: String,
    application_id: String,
    limiter: Arc<RateLimiter>,
}

impl DiscordClient {
    pub fn new(api_url: &str, token: &str, application_id: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bot {}", token))
            .context("Bot token contains invalid header characters")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!(
                "DiscordBot (https://github.com/scoreboard-bot, ",
                env!("CARGO_PKG_VERSION"),
                ")"
            )),
        );

        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(DiscordClient {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            application_id: application_id.to_string(),
            limiter: Arc::new(RateLimiter::default()),
        })
    }

    /// Replace the application's slash commands. Guild-scoped registration is
    /// visible immediately; global registration takes a while to propagate.
    pub async fn register_commands(
        &self,
        guild_id: Option<&str>,
        definitions: &Value,
    ) -> Result<usize, DiscordError> {
        let url = match guild_id {
            Some(guild_id) => format!(
                "{}/applications/{}/guilds/{}/commands",
                self.api_url, self.application_id, guild_id
            ),
            None => format!("{}/applications/{}/commands", self.api_url, self.application_id),
        };

        let route = format!("PUT {}", url);
        let resp = self.send(&route, self.http.put(&url).json(definitions)).await?;
        let registered: Value = resp.json().await?;
        let count = registered.as_array().map(Vec::len).unwrap_or(0);

        match guild_id {
            Some(guild_id) => info!("✅ Registered {} command(s) in guild {}", count, guild_id),
            None => info!(
                "✅ Registered {} global command(s) (may take a few minutes to propagate)",
                count
            ),
        }
        Ok(count)
    }

    /// Post an embed to a channel and return the new message id.
    pub async fn create_message(
        &self,
        channel_id: &str,
        embed: &Embed,
    ) -> Result<String, DiscordError> {
        let url = format!("{}/channels/{}/messages", self.api_url, channel_id);
        let route = format!("POST /channels/{}/messages", channel_id);
        let resp = self
            .send(&route, self.http.post(&url).json(&json!({ "embeds": [embed] })))
            .await?;

        let message: Value = resp.json().await?;
        let message_id = message["id"]
            .as_str()
            .ok_or(DiscordError::MissingField("id"))?
            .to_string();
        debug!("Created message {} in channel {}", message_id, channel_id);
        Ok(message_id)
    }

    /// Replace the embeds of an existing message.
    pub async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        embed: &Embed,
    ) -> Result<(), DiscordError> {
        let url = format!(
            "{}/channels/{}/messages/{}",
            self.api_url, channel_id, message_id
        );
        let route = format!("PATCH /channels/{}/messages", channel_id);
        self.send(&route, self.http.patch(&url).json(&json!({ "embeds": [embed] })))
            .await?;
        debug!("Edited message {} in channel {}", message_id, channel_id);
        Ok(())
    }

    /// Acknowledge an interaction with an ephemeral "thinking" state. The
    /// actual reply follows via [`edit_original_response`](Self::edit_original_response).
    pub async fn defer_ephemeral(
        &self,
        interaction_id: &str,
        interaction_token: &str,
    ) -> Result<(), DiscordError> {
        let url = format!(
            "{}/interactions/{}/{}/callback",
            self.api_url, interaction_id, interaction_token
        );
        let body = json!({
            "type": DEFERRED_CHANNEL_MESSAGE_WITH_SOURCE,
            "data": { "flags": EPHEMERAL },
        });
        self.send("POST /interactions/callback", self.http.post(&url).json(&body))
            .await?;
        Ok(())
    }

    /// Replace the deferred reply of an interaction with `content`.
    pub async fn edit_original_response(
        &self,
        interaction_token: &str,
        content: &str,
    ) -> Result<(), DiscordError> {
        let url = format!(
            "{}/webhooks/{}/{}/messages/@original",
            self.api_url, self.application_id, interaction_token
        );
        let route = format!("PATCH /webhooks/{}/@original", self.application_id);
        self.send(&route, self.http.patch(&url).json(&json!({ "content": content })))
            .await?;
        Ok(())
    }

    /// Send a request through the route's rate-limit bucket.
    async fn send(&self, route: &str, request: RequestBuilder) -> Result<Response, DiscordError> {
        self.limiter.acquire(route).await;
        let resp = request.send().await?;
        self.limiter.update(route, resp.headers());

        let result = check(resp).await;
        if let Err(DiscordError::RateLimited {
            retry_after,
            global,
        }) = &result
        {
            warn!(
                "Rate limited on {} for {:.2}s (global: {})",
                route,
                retry_after.as_secs_f64(),
                global
            );
            self.limiter.block(route, *retry_after);
        }
        result
    }
}

#[async_trait]
impl MessageSink for DiscordClient {
    async fn create_message(&self, channel_id: &str, embed: &Embed) -> Result<String> {
        Ok(DiscordClient::create_message(self, channel_id, embed).await?)
    }

    async fn edit_message(&self, channel_id: &str, message_id: &str, embed: &Embed) -> Result<()> {
        Ok(DiscordClient::edit_message(self, channel_id, message_id, embed).await?)
    }
}

async fn check(resp: Response) -> Result<Response, DiscordError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(rate_limited(resp).await);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(DiscordError::Api { status, body })
}

/// Read the wait time from a 429: the JSON body's `retry_after` (seconds,
/// fractional), else the `Retry-After` header.
async fn rate_limited(resp: Response) -> DiscordError {
    let header_wait = resp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok());
    let body: Value = resp.json().await.unwrap_or(Value::Null);

    let retry_after = body["retry_after"]
        .as_f64()
        .or(header_wait)
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(DEFAULT_RETRY_AFTER);
    DiscordError::RateLimited {
        retry_after,
        global: body["global"].as_bool().unwrap_or(false),
    }
}
