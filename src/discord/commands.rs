//! Slash command definitions and the mapping from an invoked command to a
//! [`Command`].

use serde_json::{json, Value};
use thiserror::Error;

use super::interaction::{CommandData, CommandOption, OPTION_INTEGER, OPTION_STRING, OPTION_SUB_COMMAND};
use crate::dispatcher::Command;
use crate::scoreboard::{ScoreboardPatch, Side};

pub const PING: &str = "ping";
pub const SCOREBOARD: &str = "scoreboard";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command '{0}'")]
    Unknown(String),

    #[error("Unknown subcommand '{0}'")]
    UnknownSubcommand(String),

    #[error("Missing subcommand")]
    MissingSubcommand,

    #[error("Missing required option '{0}'")]
    MissingOption(&'static str),

    #[error("Option '{name}' must be {expected}")]
    InvalidOption { name: String, expected: &'static str },

    #[error("{0}")]
    InvalidSide(String),

    #[error("The scoreboard only works inside a server channel")]
    NotInGuild,
}

/// JSON bodies for a bulk overwrite of the application's commands.
pub fn definitions() -> Value {
    let status = string_option("status", "Free-form status");
    let clock = string_option("clock", "Clock, e.g. 12:34");
    let period = integer_option("period", "Period number");

    json!([
        {
            "name": PING,
            "description": "Check that the bot is alive",
        },
        {
            "name": SCOREBOARD,
            "description": "Pinned scoreboard the bot keeps up to date",
            "options": [
                subcommand("show", "Post or refresh the scoreboard in this channel", vec![]),
                subcommand("set", "Set scoreboard fields", vec![
                    string_option("home_name", "Home team name"),
                    string_option("home_emoji", "Home team emoji"),
                    integer_option("home_goals", "Home team goals"),
                    string_option("away_name", "Away team name"),
                    string_option("away_emoji", "Away team emoji"),
                    integer_option("away_goals", "Away team goals"),
                    period.clone(),
                    clock.clone(),
                    status.clone(),
                ]),
                subcommand("goal", "Add or remove goals", vec![
                    json!({
                        "type": OPTION_STRING,
                        "name": "side",
                        "description": "home or away",
                        "required": true,
                        "choices": [
                            { "name": "home", "value": "home" },
                            { "name": "away", "value": "away" },
                        ],
                    }),
                    integer_option("delta", "+1, -1, +2... (default 1)"),
                ]),
                subcommand("time", "Adjust period, clock and status", vec![period, clock, status]),
                subcommand("reset", "Reset score, time and status", vec![]),
            ],
        },
    ])
}

fn subcommand(name: &str, description: &str, options: Vec<Value>) -> Value {
    json!({
        "type": OPTION_SUB_COMMAND,
        "name": name,
        "description": description,
        "options": options,
    })
}

fn string_option(name: &str, description: &str) -> Value {
    json!({ "type": OPTION_STRING, "name": name, "description": description })
}

fn integer_option(name: &str, description: &str) -> Value {
    json!({ "type": OPTION_INTEGER, "name": name, "description": description })
}

/// Map invoked command data to a [`Command`].
pub fn parse_command(data: &CommandData) -> Result<Command, CommandError> {
    match data.name.as_str() {
        PING => Ok(Command::Ping),
        SCOREBOARD => {
            let sub = data
                .options
                .iter()
                .find(|o| o.kind == OPTION_SUB_COMMAND)
                .ok_or(CommandError::MissingSubcommand)?;
            parse_subcommand(sub)
        }
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

fn parse_subcommand(sub: &CommandOption) -> Result<Command, CommandError> {
    let opts = &sub.options;
    match sub.name.as_str() {
        "show" => Ok(Command::Show),
        "set" => Ok(Command::Set(ScoreboardPatch {
            home_name: string_value(opts, "home_name")?,
            home_emoji: string_value(opts, "home_emoji")?,
            home_goals: integer_value(opts, "home_goals")?,
            away_name: string_value(opts, "away_name")?,
            away_emoji: string_value(opts, "away_emoji")?,
            away_goals: integer_value(opts, "away_goals")?,
            period: integer_value(opts, "period")?,
            clock: string_value(opts, "clock")?,
            status: string_value(opts, "status")?,
        })),
        "goal" => {
            let side = string_value(opts, "side")?
                .ok_or(CommandError::MissingOption("side"))?
                .parse::<Side>()
                .map_err(CommandError::InvalidSide)?;
            let delta = integer_value(opts, "delta")?.unwrap_or(1);
            Ok(Command::Goal { side, delta })
        }
        "time" => Ok(Command::Time(ScoreboardPatch {
            period: integer_value(opts, "period")?,
            clock: string_value(opts, "clock")?,
            status: string_value(opts, "status")?,
            ..Default::default()
        })),
        "reset" => Ok(Command::Reset),
        other => Err(CommandError::UnknownSubcommand(other.to_string())),
    }
}

fn find<'a>(options: &'a [CommandOption], name: &str) -> Option<&'a Value> {
    options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.value.as_ref())
        .filter(|v| !v.is_null())
}

fn string_value(options: &[CommandOption], name: &str) -> Result<Option<String>, CommandError> {
    match find(options, name) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(CommandError::InvalidOption {
            name: name.to_string(),
            expected: "text",
        }),
    }
}

fn integer_value(options: &[CommandOption], name: &str) -> Result<Option<i64>, CommandError> {
    match find(options, name) {
        None => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| CommandError::InvalidOption {
            name: name.to_string(),
            expected: "an integer",
        }),
    }
}
