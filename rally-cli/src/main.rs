mod console_bridge;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use console_bridge::ConsoleBridge;
use dialoguer::{Confirm, Input};
use directories::BaseDirs;
use rally_core::HostRole;
use rally_session::{
    SessionConfig, SessionController, SessionHandle, SessionMode, SessionServices, SessionStatus,
    check_health,
};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rally", about = "Two-player rally sessions over a relay")]
struct Cli {
    /// Relay WebSocket base URL.
    #[arg(long, env = "RALLY_RELAY_URL")]
    relay: Option<String>,

    /// File that keeps host credentials between runs.
    #[arg(long, env = "RALLY_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Print every game message that arrives.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Seat {
    Driver,
    Navigator,
}

impl From<Seat> for HostRole {
    fn from(seat: Seat) -> Self {
        match seat {
            Seat::Driver => HostRole::Driver,
            Seat::Navigator => HostRole::Navigator,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Open a room and wait for a second player.
    Host {
        /// Track definition file sent to the guest.
        #[arg(long)]
        track: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "driver")]
        seat: Seat,
    },
    /// Join a room by code.
    Join { code: Option<String> },
    /// Return to a room after losing the connection.
    Reconnect {
        code: Option<String>,

        /// Try to re-claim the room as its host.
        #[arg(long)]
        host: bool,
    },
    /// Check that the relay is up.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = SessionConfig::from_env()?;
    if let Some(relay) = cli.relay {
        config.relay_url = relay;
    }
    if cli.credentials.is_some() {
        config.credentials_path = cli.credentials;
    }
    if config.credentials_path.is_none() {
        config.credentials_path = default_credentials_path();
    }

    if let Commands::Status = cli.command {
        return report_status(&config).await;
    }

    let (track_def, host_role) = match &cli.command {
        Commands::Host { track, seat } => (load_track(track.as_ref())?, HostRole::from(*seat)),
        _ => (String::new(), HostRole::Driver),
    };
    let bridge = Arc::new(ConsoleBridge::new(track_def, host_role, cli.verbose));
    let services = SessionServices::from_config(&config);
    let handle = SessionController::spawn(config, services, bridge);

    let room = match cli.command {
        Commands::Host { .. } => {
            let code = handle.host().await?;
            println!("{} {}", "🏠 Room code:".green().bold(), code.as_str().bold());
            code.to_string()
        }
        Commands::Join { code } => {
            let code = code_or_prompt(code).await?;
            handle.join(&code).await?;
            println!("{} {}", "🚪 Joined room".green().bold(), code.to_uppercase());
            code
        }
        Commands::Reconnect { code, host } => {
            let code = code_or_prompt(code).await?;
            reconnect(&handle, &code, host).await?;
            code
        }
        Commands::Status => return Ok(()),
    };

    info!("Following room {}", room);
    follow(&handle, &room).await?;
    handle.leave().await?;
    println!("{}", "👋 Left the room".cyan());
    Ok(())
}

async fn report_status(config: &SessionConfig) -> Result<()> {
    let Some(base) = config.assist_base() else {
        anyhow::bail!("Cannot derive an HTTP address from {}", config.relay_url);
    };
    if check_health(&base).await {
        println!("{} {}", "✅ Relay is up at".green(), base);
        Ok(())
    } else {
        anyhow::bail!("Relay at {base} is not answering")
    }
}

fn default_credentials_path() -> Option<PathBuf> {
    let base = BaseDirs::new()?;
    Some(base.home_dir().join(".rally").join("credentials.json"))
}

fn load_track(path: Option<&PathBuf>) -> Result<String> {
    match path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read track {}", path.display())),
        None => Ok(r#"{"name":"default","points":[]}"#.to_owned()),
    }
}

async fn code_or_prompt(code: Option<String>) -> Result<String> {
    if let Some(code) = code {
        return Ok(code);
    }
    let code = tokio::task::spawn_blocking(|| {
        Input::<String>::new()
            .with_prompt("Room code")
            .interact_text()
    })
    .await??;
    Ok(code)
}

async fn reconnect(handle: &SessionHandle, code: &str, as_host: bool) -> Result<()> {
    if as_host {
        match handle.reconnect_host(code).await? {
            SessionMode::Host => println!("{}", "🏠 Back in the room as host".green().bold()),
            _ => println!(
                "{}",
                "🚪 Host seat was not available, rejoined as guest".yellow()
            ),
        }
    } else {
        handle.reconnect_client(code).await?;
        println!("{}", "🚪 Rejoined the room".green().bold());
    }
    Ok(())
}

/// Prints status changes until Ctrl-C, offering a reconnect when the
/// session drops.
async fn follow(handle: &SessionHandle, room: &str) -> Result<()> {
    let mut updates = handle.subscribe();
    let mut last = SessionStatus::Offline;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            changed = updates.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
        }

        let snapshot = updates.borrow_and_update().clone();
        if snapshot.status == last {
            continue;
        }
        last = snapshot.status.clone();

        match &snapshot.status {
            SessionStatus::Connected => println!("{}", snapshot.status.to_string().green()),
            SessionStatus::Reconnectable { .. } => {
                println!("{}", snapshot.status.to_string().red());
                let again = tokio::task::spawn_blocking(|| {
                    Confirm::new()
                        .with_prompt("Reconnect now?")
                        .default(true)
                        .interact()
                })
                .await??;
                if !again {
                    return Ok(());
                }
                let as_host = snapshot.mode == SessionMode::Host;
                if let Err(e) = reconnect(handle, room, as_host).await {
                    println!("{} {}", "❌".red(), e);
                    if let Some(session_err) = e.downcast_ref::<rally_session::SessionError>() {
                        println!("   {}", session_err.next_step().dimmed());
                    }
                }
            }
            _ => println!("{}", snapshot.status.to_string().cyan()),
        }
    }
}
