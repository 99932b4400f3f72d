use clap::Parser;
use std::net::SocketAddr;

/// Discord bot that keeps a live scoreboard message per channel
#[derive(Parser, Debug, Clone)]
#[command(name = "scoreboard-bot", version, about)]
pub struct Config {
    /// Bot authentication token
    #[arg(long, env = "DISCORD_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Application (client) ID used for command registration
    #[arg(long, env = "DISCORD_APPLICATION_ID")]
    pub application_id: String,

    /// Guild to register commands in (instant); registers globally when unset
    #[arg(long, env = "DISCORD_GUILD_ID")]
    pub guild_id: Option<String>,

    /// JSON file holding per-channel scoreboard state
    #[arg(long, env = "STATE_PATH", default_value = "state.json")]
    pub state_path: String,

    /// Keepalive HTTP listen address
    #[arg(long, env = "KEEPALIVE_ADDR", default_value = "0.0.0.0:3000")]
    pub keepalive_addr: String,

    /// Discord REST API base URL
    #[arg(long, env = "DISCORD_API_URL", default_value = "https://discord.com/api/v10")]
    pub api_url: String,

    /// Discord gateway WebSocket URL
    #[arg(
        long,
        env = "DISCORD_GATEWAY_URL",
        default_value = "wss://gateway.discord.gg/?v=10&encoding=json"
    )]
    pub gateway_url: String,

    /// Do not overwrite the registered slash commands on startup
    #[arg(long, env = "SKIP_COMMAND_REGISTRATION", default_value = "false")]
    pub skip_command_registration: bool,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN must not be empty");
        }
        if !is_snowflake(&self.application_id) {
            anyhow::bail!(
                "DISCORD_APPLICATION_ID must be a numeric id, got '{}'",
                self.application_id
            );
        }
        if let Some(guild_id) = &self.guild_id {
            if !is_snowflake(guild_id) {
                anyhow::bail!("DISCORD_GUILD_ID must be a numeric id, got '{}'", guild_id);
            }
        }
        if self.keepalive_addr.parse::<SocketAddr>().is_err() {
            anyhow::bail!("KEEPALIVE_ADDR is not a socket address: {}", self.keepalive_addr);
        }
        let gateway = url::Url::parse(&self.gateway_url)
            .map_err(|e| anyhow::anyhow!("DISCORD_GATEWAY_URL is invalid: {}", e))?;
        if !matches!(gateway.scheme(), "ws" | "wss") {
            anyhow::bail!("DISCORD_GATEWAY_URL must use ws:// or wss://");
        }
        if url::Url::parse(&self.api_url).is_err() {
            anyhow::bail!("DISCORD_API_URL is invalid: {}", self.api_url);
        }
        Ok(())
    }
}

fn is_snowflake(id: &str) -> bool {
    !id.is_empty() && id.len() <= 20 && id.bytes().all(|b| b.is_ascii_digit())
}
