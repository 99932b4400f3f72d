//! Command handling: one invocation in, one ephemeral reply out.
//!
//! Each mutating command follows the same path:
//! read entry → mutate → save → render → publish → save new message id.
//! The mutation is saved before publishing so a failed publish never loses it.
//!
//! The store lock covers the mutation and the save only; publishing runs
//! unlocked so other channels keep going. Callers serialize invocations per
//! channel (see [`crate::workers`]).

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::discord::commands::{parse_command, CommandError};
use crate::discord::Interaction;
use crate::publisher::{publish, MessageSink};
use crate::scoreboard::{render, ScoreboardPatch, Side};
use crate::store::StateStore;

/// Longest error description echoed back to the invoker.
const MAX_ERROR_CHARS: usize = 1900;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Health check; touches no state.
    Ping,
    /// Post or refresh the scoreboard without changing it.
    Show,
    Set(ScoreboardPatch),
    Goal { side: Side, delta: i64 },
    Time(ScoreboardPatch),
    Reset,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Ping => "ping",
            Command::Show => "show",
            Command::Set(_) => "set",
            Command::Goal { .. } => "goal",
            Command::Time(_) => "time",
            Command::Reset => "reset",
        }
    }

    fn reply(&self) -> &'static str {
        match self {
            Command::Ping => "🏓 Pong!",
            Command::Show => "📣 Scoreboard ready/updated!",
            Command::Set(_) => "✅ Scoreboard updated!",
            Command::Goal { .. } => "⚽ Updated!",
            Command::Time(_) => "⏱️ Time adjusted!",
            Command::Reset => "♻️ Reset!",
        }
    }
}

/// A parsed command together with where it was invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub guild_id: Option<String>,
    pub channel_id: String,
    pub command: Command,
}

impl Invocation {
    pub fn from_interaction(interaction: &Interaction) -> Result<Self, CommandError> {
        let data = interaction
            .data
            .as_ref()
            .ok_or(CommandError::MissingSubcommand)?;
        let command = parse_command(data)?;
        let channel_id = interaction
            .channel_id
            .clone()
            .ok_or(CommandError::NotInGuild)?;
        Ok(Invocation {
            guild_id: interaction.guild_id.clone(),
            channel_id,
            command,
        })
    }
}

/// Owns the state store and applies commands to it.
pub struct Dispatcher<S> {
    store: Mutex<StateStore>,
    sink: S,
}

impl<S: MessageSink> Dispatcher<S> {
    pub fn new(store: StateStore, sink: S) -> Self {
        Dispatcher {
            store: Mutex::new(store),
            sink,
        }
    }

    #[cfg(test)]
    pub async fn entry(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> Option<crate::store::ChannelEntry> {
        self.store.lock().await.get(guild_id, channel_id).cloned()
    }

    #[cfg(test)]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Handle one invocation and return the text for the ephemeral reply.
    /// Failures are reported in the reply, never propagated.
    pub async fn handle(&self, invocation: &Invocation) -> String {
        match self.execute(invocation).await {
            Ok(reply) => reply.to_string(),
            Err(e) => {
                error!(
                    "Command '{}' failed in channel {}: {:#}",
                    invocation.command.name(),
                    invocation.channel_id,
                    e
                );
                error_reply(&e)
            }
        }
    }

    async fn execute(&self, invocation: &Invocation) -> Result<&'static str> {
        let command = &invocation.command;
        if *command == Command::Ping {
            return Ok(command.reply());
        }

        let guild_id = invocation
            .guild_id
            .as_deref()
            .ok_or(CommandError::NotInGuild)?;
        let channel_id = invocation.channel_id.as_str();

        let (embed, stored_message_id) = {
            let mut store = self.store.lock().await;
            let entry = store.get_or_create(guild_id, channel_id);
            match command {
                Command::Ping | Command::Show => {}
                Command::Set(patch) | Command::Time(patch) => entry.state.apply(patch.clone()),
                Command::Goal { side, delta } => {
                    let goals = entry.state.apply_goal_delta(*side, *delta);
                    info!(
                        "Goal {:+} for {} in {}/{}: now {}",
                        delta, side, guild_id, channel_id, goals
                    );
                }
                Command::Reset => entry.state.reset(),
            }
            let embed = render(&entry.state).stamped(Utc::now());
            let stored_message_id = entry.message_id.clone();

            if *command != Command::Show {
                store
                    .save()
                    .await
                    .context("Failed to save scoreboard state")?;
            }
            (embed, stored_message_id)
        };

        let outcome = publish(
            &self.sink,
            channel_id,
            stored_message_id.as_deref(),
            &embed,
        )
        .await
        .context("Failed to publish scoreboard")?;

        if let Some(message_id) = outcome.new_message_id() {
            let mut store = self.store.lock().await;
            store.get_or_create(guild_id, channel_id).message_id = Some(message_id.to_string());
            store
                .save()
                .await
                .context("Failed to save scoreboard message id")?;
        }

        Ok(command.reply())
    }
}

/// `❌ Error: …`, with the description cut to a fixed number of characters.
pub fn error_reply(err: &anyhow::Error) -> String {
    let description = format!("{:#}", err);
    let truncated: String = description.chars().take(MAX_ERROR_CHARS).collect();
    format!("❌ Error: {}", truncated)
}
