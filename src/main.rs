use anyhow::Result;
use clap::Parser;
use futures_util::FutureExt;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

mod config;
mod discord;
mod dispatcher;
mod keepalive;
mod publisher;
mod scoreboard;
mod store;
mod workers;

use config::Config;
use discord::{commands, start_gateway, DiscordClient, DiscordError, GatewayConfig, Interaction};
use dispatcher::{Dispatcher, Invocation};
use keepalive::KeepaliveState;
use store::StateStore;
use workers::ChannelWorkers;

/// An interaction waiting for its channel's worker, with the deferred
/// acknowledgement already in flight.
struct Job {
    interaction: Interaction,
    ack: JoinHandle<Result<(), DiscordError>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    // Load persisted scoreboards
    let store = StateStore::load(&config.state_path).await;
    info!(
        "Loaded {} scoreboard(s) from {}",
        store.channel_count(),
        store.path().display()
    );

    // Build Discord REST client
    let discord = DiscordClient::new(&config.api_url, &config.token, &config.application_id)?;

    if config.skip_command_registration {
        warn!("Skipping slash command registration");
    } else {
        discord
            .register_commands(config.guild_id.as_deref(), &commands::definitions())
            .await?;
    }

    // Start the keepalive HTTP server
    let app = keepalive::router(KeepaliveState {
        channels: store.channel_count(),
    });
    let addr: SocketAddr = config.keepalive_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Keepalive listening on http://{}", addr);

    // Every interaction is acknowledged right away so Discord's 3 s deadline
    // holds; the work itself is serialized per channel.
    let mut interactions = start_gateway(GatewayConfig::new(&config.gateway_url, &config.token));
    let dispatcher = Arc::new(Dispatcher::new(store, discord.clone()));
    let mut workers = ChannelWorkers::new({
        let discord = discord.clone();
        move |job: Job| {
            let dispatcher = Arc::clone(&dispatcher);
            let discord = discord.clone();
            async move { answer(&dispatcher, &discord, job).await }.boxed()
        }
    });

    let command_loop = async {
        while let Some(interaction) = interactions.recv().await {
            let ack = tokio::spawn({
                let discord = discord.clone();
                let (id, token) = (interaction.id.clone(), interaction.token.clone());
                async move { discord.defer_ephemeral(&id, &token).await }
            });
            workers.submit(interaction.channel_key(), Job { interaction, ack });
        }
    };

    tokio::select! {
        result = axum::serve(listener, app).into_future() => result?,
        _ = command_loop => anyhow::bail!("Gateway connection closed"),
    }

    Ok(())
}

/// Run one interaction and replace its deferred reply with the result.
async fn answer(dispatcher: &Dispatcher<DiscordClient>, discord: &DiscordClient, job: Job) {
    let Job { interaction, ack } = job;
    let reply = match Invocation::from_interaction(&interaction) {
        Ok(invocation) => dispatcher.handle(&invocation).await,
        Err(e) => {
            warn!("Rejected interaction {}: {}", interaction.id, e);
            format!("❌ {}", e)
        }
    };

    match ack.await {
        Ok(Ok(())) => {
            if let Err(e) = discord
                .edit_original_response(&interaction.token, &reply)
                .await
            {
                error!("Failed to reply to interaction {}: {}", interaction.id, e);
            }
        }
        Ok(Err(e)) => error!("Failed to acknowledge interaction {}: {}", interaction.id, e),
        Err(e) => error!("Acknowledgement of interaction {} aborted: {}", interaction.id, e),
    }
}
