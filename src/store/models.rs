use serde::{Deserialize, Serialize};

use crate::scoreboard::Scoreboard;

/// Everything persisted for one (guild, channel) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEntry {
    /// Last scoreboard message the bot posted here. A hint only: the message
    /// may have been deleted since.
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub state: Scoreboard,
}
