use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscordError {
    #[error("Discord request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Discord API error {status}: {body}")]
    Api { status: StatusCode, body: String },

    #[error("Discord rate limit hit, retry after {:.2}s", .retry_after.as_secs_f64())]
    RateLimited { retry_after: Duration, global: bool },

    #[error("Discord response is missing field '{0}'")]
    MissingField(&'static str),
}

impl DiscordError {
    /// The target can no longer be used: unknown message or channel (404),
    /// access revoked (403) or an id Discord rejects (400).
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            DiscordError::Api { status, .. }
                if matches!(
                    *status,
                    StatusCode::NOT_FOUND | StatusCode::FORBIDDEN | StatusCode::BAD_REQUEST
                )
        )
    }

    /// How long to wait before the same request may succeed.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            DiscordError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}
