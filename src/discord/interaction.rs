use serde::Deserialize;
use serde_json::Value;

/// Interaction type for slash commands.
pub const APPLICATION_COMMAND: u8 = 2;

/// Option types used by the scoreboard commands.
pub const OPTION_SUB_COMMAND: u8 = 1;
pub const OPTION_STRING: u8 = 3;
pub const OPTION_INTEGER: u8 = 4;

/// An `INTERACTION_CREATE` payload, reduced to what command handling reads.
#[derive(Debug, Clone, Deserialize)]
pub struct Interaction {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: u8,
    pub token: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub data: Option<CommandData>,
}

impl Interaction {
    pub fn is_command(&self) -> bool {
        self.kind == APPLICATION_COMMAND
    }

    /// `guild/channel`, the unit commands are serialized on. DMs use `@me`.
    pub fn channel_key(&self) -> String {
        format!(
            "{}/{}",
            self.guild_id.as_deref().unwrap_or("@me"),
            self.channel_id.as_deref().unwrap_or_default()
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandData {
    pub name: String,
    #[serde(default)]
    pub options: Vec<CommandOption>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandOption {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub options: Vec<CommandOption>,
}
