use anyhow::{bail, Context, Result};
use clap::Parser;
use roomsync_core::config::Config;
use roomsync_core::core_sync::adapters::{InMemoryLiveChannel, InMemoryMessageStore, InMemoryProfiles};
use roomsync_core::core_sync::{LoadState, Profile, RoomServices, RoomSession};
use roomsync_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use roomsync_core::metrics::init_metrics;
use roomsync_core::core_sync::Room;
use roomsync_core::{RoomId, UserId};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "roomsync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Set the log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// TOML configuration file; defaults plus ROOMSYNC_* variables when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Parser, Debug)]
enum Command {
    /// Two in-memory clients chatting in one room
    Demo {
        /// Room to open
        #[arg(long, default_value = "general")]
        room: String,

        /// Messages each client sends
        #[arg(long, default_value_t = 3)]
        messages: usize,

        /// Drop every live connection halfway through
        #[arg(long)]
        disconnect: bool,

        /// Print the final view as JSON instead of a transcript
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration as TOML
    PrintConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::from_env().context("reading ROOMSYNC_* environment")?,
    };

    let mut log_config = LogConfig::from_settings(&config.logging)?;
    if let Some(level) = &args.log_level {
        log_config.level = level.parse().unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', using 'info'", level);
            LogLevel::Info
        });
    }
    if args.json_logs {
        log_config.json_format = true;
    }
    init_logging_with_config(log_config)?;
    init_metrics();

    match args.command {
        Some(Command::Demo {
            room,
            messages,
            disconnect,
            json,
        }) => run_demo(&config, RoomId::new(room), messages, disconnect, json).await?,
        Some(Command::PrintConfig) => print!("{}", config.to_toml()?),
        None => {
            info!("No command specified. Use --help for usage information.");
        }
    }

    Ok(())
}

async fn run_demo(config: &Config, room_id: RoomId, messages: usize, disconnect: bool, json: bool) -> Result<()> {
    let channel = InMemoryLiveChannel::new();
    let store = InMemoryMessageStore::new().with_channel(channel.clone());
    let profiles = InMemoryProfiles::new();
    profiles.put(Profile::new(UserId::new("alice"), "Alice"));
    profiles.put(Profile::new(UserId::new("bob"), "Bob"));

    let services = RoomServices::new(
        Arc::new(store.clone()),
        Arc::new(profiles.clone()),
        Arc::new(channel.clone()),
    );

    info!(room_id = %room_id, messages, disconnect, "Starting demo");

    let room = Room::new(room_id.clone(), room_id.to_string(), UserId::new("alice")).with_participant(UserId::new("bob"));
    let alice = RoomSession::open_room(&room, services.clone(), config);
    let bob = RoomSession::open_room(&room, services, config);
    wait_ready(&alice).await?;
    wait_ready(&bob).await?;

    let clients = [(&alice, UserId::new("alice")), (&bob, UserId::new("bob"))];
    for round in 0..messages {
        if disconnect && round == messages / 2 {
            warn!(room_id = %room_id, "Dropping every live connection");
            store.insert_silently(&room_id, "bob", "(sent while everyone was offline)");
            channel.disconnect_all();
        }
        for (session, user) in &clients {
            let text = format!("message {} from {}", round + 1, user);
            if let Err(failure) = session.send(user, &text).await {
                warn!(error = %failure.error, draft = %failure.draft, "Send failed");
            }
        }
    }

    let expected = store.rows().len();
    converge(&alice, expected).await?;
    converge(&bob, expected).await?;

    let view = alice.snapshot();
    if json {
        println!("{}", serde_json::to_string_pretty(&*view)?);
    } else {
        for message in view.iter() {
            let name = if message.sender.display_name.is_empty() {
                message.sender_id().to_string()
            } else {
                message.sender.display_name.clone()
            };
            println!("[{}] {}: {}", message.created_at, name, message.content);
        }
    }

    if alice.snapshot().ids() != bob.snapshot().ids() {
        bail!("clients diverged");
    }

    alice.close().await;
    bob.close().await;
    info!(room_id = %room_id, messages = expected, "Demo finished");
    Ok(())
}

async fn wait_ready(session: &RoomSession) -> Result<()> {
    let mut status = session.status();
    tokio::time::timeout(
        Duration::from_secs(10),
        status.wait_for(|s| s.load != LoadState::Loading && (s.live.is_live() || s.live.is_terminal())),
    )
    .await
    .context("room did not become ready")??;
    Ok(())
}

async fn converge(session: &RoomSession, expected: usize) -> Result<()> {
    let mut view = session.messages();
    let caught_up = matches!(
        tokio::time::timeout(Duration::from_secs(10), view.wait_for(|v| v.len() >= expected)).await,
        Ok(Ok(_))
    );
    if !caught_up {
        // Live updates never caught up; fall back to a manual refresh
        warn!(room_id = %session.room_id(), "View incomplete, refreshing");
        session.refresh().await?;
    }
    Ok(())
}
