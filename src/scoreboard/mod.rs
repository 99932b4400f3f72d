//! Scoreboard model: the per-channel record and its in-place updates.
//!
//! Every command that changes the board goes through one of three operations:
//! - [`Scoreboard::apply`] overwrites the fields present in a [`ScoreboardPatch`]
//!   (`set` and `time` are both patches)
//! - [`Scoreboard::apply_goal_delta`] adjusts one side's goals, clamped at zero
//! - [`Scoreboard::reset`] restores the default score, time and status

pub mod render;

pub use render::render;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_HOME_NAME: &str = "Home Team";
pub const DEFAULT_HOME_EMOJI: &str = "🦈";
pub const DEFAULT_AWAY_NAME: &str = "Away Team";
pub const DEFAULT_AWAY_EMOJI: &str = "🦅";
pub const DEFAULT_PERIOD: i64 = 1;
pub const DEFAULT_CLOCK: &str = "00:00";
pub const DEFAULT_STATUS: &str = "Waiting to start";

/// One side of the match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub name: String,
    pub emoji: String,
    pub goals: i64,
}

impl Team {
    fn new(name: &str, emoji: &str) -> Self {
        Team {
            name: name.to_string(),
            emoji: emoji.to_string(),
            goals: 0,
        }
    }
}

/// Live score display for a single channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scoreboard {
    pub home: Team,
    pub away: Team,
    /// Display-only, no bound
    pub period: i64,
    /// Free-form, never parsed
    pub clock: String,
    /// Free-form, may be empty
    pub status: String,
}

impl Default for Scoreboard {
    fn default() -> Self {
        Scoreboard {
            home: Team::new(DEFAULT_HOME_NAME, DEFAULT_HOME_EMOJI),
            away: Team::new(DEFAULT_AWAY_NAME, DEFAULT_AWAY_EMOJI),
            period: DEFAULT_PERIOD,
            clock: DEFAULT_CLOCK.to_string(),
            status: DEFAULT_STATUS.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Home,
    Away,
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "home" => Ok(Side::Home),
            "away" => Ok(Side::Away),
            other => Err(format!("unknown side '{}', expected home or away", other)),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Home => write!(f, "home"),
            Side::Away => write!(f, "away"),
        }
    }
}

/// Field-by-field overwrite. `None` means "not provided"; `Some("")` is an
/// explicit empty value and does overwrite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoreboardPatch {
    pub home_name: Option<String>,
    pub home_emoji: Option<String>,
    pub home_goals: Option<i64>,
    pub away_name: Option<String>,
    pub away_emoji: Option<String>,
    pub away_goals: Option<i64>,
    pub period: Option<i64>,
    pub clock: Option<String>,
    pub status: Option<String>,
}

fn overwrite<T>(field: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *field = v;
    }
}

impl Scoreboard {
    pub fn team_mut(&mut self, side: Side) -> &mut Team {
        match side {
            Side::Home => &mut self.home,
            Side::Away => &mut self.away,
        }
    }

    /// Overwrite every field the patch provides. Goals are taken as-is, negative
    /// values included; only [`apply_goal_delta`](Self::apply_goal_delta) clamps.
    pub fn apply(&mut self, patch: ScoreboardPatch) {
        let ScoreboardPatch {
            home_name,
            home_emoji,
            home_goals,
            away_name,
            away_emoji,
            away_goals,
            period,
            clock,
            status,
        } = patch;

        overwrite(&mut self.home.name, home_name);
        overwrite(&mut self.home.emoji, home_emoji);
        overwrite(&mut self.home.goals, home_goals);
        overwrite(&mut self.away.name, away_name);
        overwrite(&mut self.away.emoji, away_emoji);
        overwrite(&mut self.away.goals, away_goals);
        overwrite(&mut self.period, period);
        overwrite(&mut self.clock, clock);
        overwrite(&mut self.status, status);
    }

    /// Add `delta` goals to one side, never going below zero. Returns the new total.
    pub fn apply_goal_delta(&mut self, side: Side, delta: i64) -> i64 {
        let team = self.team_mut(side);
        team.goals = team.goals.saturating_add(delta).max(0);
        team.goals
    }

    pub fn reset(&mut self) {
        *self = Scoreboard::default();
    }
}
