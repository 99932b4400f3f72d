use super::Scoreboard;
use crate::discord::Embed;

pub const SCOREBOARD_TITLE: &str = "Official Scoreboard";
/// Discord blurple
pub const SCOREBOARD_COLOR: u32 = 0x5865F2;

/// Render a scoreboard into the embed posted to the channel.
///
/// Pure: the same board always yields the same embed. The status line is left
/// out entirely when the status is blank. The timestamp is left unset; the
/// caller stamps the publish time.
pub fn render(board: &Scoreboard) -> Embed {
    let mut lines = vec![
        format!(
            "{} **{}** — Goals: {}",
            board.home.emoji, board.home.name, board.home.goals
        ),
        "⚡ vs".to_string(),
        format!(
            "{} **{}** — Goals: {}",
            board.away.emoji, board.away.name, board.away.goals
        ),
        String::new(),
        format!("🕒 Period {} • {}", board.period, board.clock),
    ];

    if !board.status.trim().is_empty() {
        lines.push(format!("**Status:** {}", board.status));
    }

    Embed {
        title: SCOREBOARD_TITLE.to_string(),
        description: lines.join("\n").trim().to_string(),
        color: SCOREBOARD_COLOR,
        timestamp: None,
    }
}
