//! Discord platform layer: REST client, gateway session, and the slash
//! command surface.
//!
//! ```text
//!  Gateway WS ──INTERACTION_CREATE──▶ gateway task ──mpsc──▶ channel workers
//!                                                                 │
//!     DiscordClient (REST, per-route buckets) ◀── create/edit/reply ─┘
//! ```

pub mod client;
pub mod commands;
pub mod error;
pub mod gateway;
pub mod interaction;
pub mod ratelimit;

pub use client::DiscordClient;
pub use error::DiscordError;
pub use gateway::{start_gateway, GatewayConfig};
pub use interaction::Interaction;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// The subset of a Discord embed the scoreboard uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
    /// ISO8601, shown in the embed footer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Embed {
    pub fn stamped(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = Some(at.to_rfc3339_opts(SecondsFormat::Millis, true));
        self
    }
}
