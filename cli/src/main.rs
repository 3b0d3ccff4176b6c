// tincan — desktop CLI for the Tincan chat core
//
// The platform transport lives in the host app; here the core runs over the
// loopback transport, so commands operate on local state (identity, history,
// trust) and `demo` exercises the full two-device protocol in-process.

mod config;
mod demo;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::*;
use std::sync::Arc;
use tincan_core::transport::local::LoopbackTransport;
use tincan_core::Tincan;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "tincan")]
#[command(about = "Tincan — nearby peer-to-peer chat", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or change the local identity
    Identity {
        #[command(subcommand)]
        action: Option<IdentityAction>,
    },
    /// List known peers and their sync setting
    Peers,
    /// List blocked users
    Blocked,
    /// Block a user permanently
    Block { user_id: Uuid },
    /// Remove a user from the known-peer list
    Forget { user_id: Uuid },
    /// Enable or disable automatic reconnection for a known peer
    Sync {
        user_id: Uuid,
        #[arg(value_parser = ["on", "off"])]
        mode: String,
    },
    /// View message history
    History {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Store a message in the local history (sent on next connection sync)
    Send { message: String },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run a scripted two-device session in-process
    Demo,
}

#[derive(Subcommand)]
enum IdentityAction {
    Show,
    /// Mint a fresh device and user id
    Rotate,
    /// Change the display name (identity is untouched)
    SetName { name: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Identity { action } => cmd_identity(action),
        Commands::Peers => cmd_peers(),
        Commands::Blocked => cmd_blocked(),
        Commands::Block { user_id } => cmd_block(user_id),
        Commands::Forget { user_id } => cmd_forget(user_id),
        Commands::Sync { user_id, mode } => cmd_sync(user_id, mode == "on"),
        Commands::History { limit } => cmd_history(limit),
        Commands::Send { message } => cmd_send(message),
        Commands::Config { action } => cmd_config(action),
        Commands::Demo => demo::run(),
    }
}

fn open_core() -> Result<Tincan> {
    let config = config::Config::load()?;
    let storage = config.storage_path()?;
    let transport = Arc::new(LoopbackTransport::new());
    Tincan::with_storage(
        transport,
        storage.to_str().context("Storage path is not valid UTF-8")?,
        &config.display_name,
    )
    .map_err(|e| anyhow::anyhow!("Failed to open core: {e}"))
}

fn cmd_identity(action: Option<IdentityAction>) -> Result<()> {
    let core = open_core()?;

    match action {
        None | Some(IdentityAction::Show) => {
            let info = core.identity_info();
            println!("{}", "Identity".bold());
            println!("  Name:      {}", info.display_name.bright_cyan());
            println!("  User ID:   {}", info.user_id.to_string().bright_yellow());
            println!("  Device ID: {}", info.device_id.dimmed());
        }
        Some(IdentityAction::Rotate) => {
            let info = core
                .rotate_identity()
                .map_err(|e| anyhow::anyhow!("Rotation failed: {e}"))?;
            println!("{} Identity rotated", "✓".green());
            println!("  User ID:   {}", info.user_id.to_string().bright_yellow());
            println!("  Device ID: {}", info.device_id.dimmed());
        }
        Some(IdentityAction::SetName { name }) => {
            core.set_display_name(&name)
                .map_err(|_| anyhow::anyhow!("Display name must not be empty"))?;
            println!("{} Display name set to {}", "✓".green(), name.bright_cyan());
        }
    }
    Ok(())
}

fn cmd_peers() -> Result<()> {
    let core = open_core()?;
    let known = core.known_peers();

    if known.is_empty() {
        println!("{}", "No known peers yet.".dimmed());
        return Ok(());
    }

    println!("{} ({} total)", "Known peers".bold(), known.len());
    println!();
    for peer in known {
        let sync = if peer.sync_enabled {
            "sync on".bright_green()
        } else {
            "sync off".dimmed()
        };
        println!(
            "  {} {} [{}]",
            "•".bright_green(),
            peer.display_name.bright_cyan(),
            sync
        );
        println!("    User ID: {}", peer.user_id.to_string().dimmed());
    }
    Ok(())
}

fn cmd_blocked() -> Result<()> {
    let core = open_core()?;
    let blocked = core.blocked_users();

    if blocked.is_empty() {
        println!("{}", "No blocked users.".dimmed());
    } else {
        println!("{}", "Blocked users".bold());
        for user_id in blocked {
            println!("  {} {}", "•".red(), user_id);
        }
    }
    Ok(())
}

fn cmd_block(user_id: Uuid) -> Result<()> {
    let core = open_core()?;
    core.block_user(user_id)
        .map_err(|e| anyhow::anyhow!("Block failed: {e}"))?;
    println!("{} Blocked {}", "✓".green(), user_id);
    Ok(())
}

fn cmd_forget(user_id: Uuid) -> Result<()> {
    let core = open_core()?;
    core.forget_device(user_id)
        .map_err(|e| anyhow::anyhow!("Forget failed: {e}"))?;
    println!("{} Forgot {}", "✓".green(), user_id);
    Ok(())
}

fn cmd_sync(user_id: Uuid, enabled: bool) -> Result<()> {
    let core = open_core()?;
    let known = core
        .set_sync_enabled(user_id, enabled)
        .map_err(|e| anyhow::anyhow!("Sync toggle failed: {e}"))?;
    if !known {
        anyhow::bail!("Unknown user: {}", user_id);
    }
    let mode = if enabled { "on" } else { "off" };
    println!("{} Sync {} for {}", "✓".green(), mode, user_id);
    Ok(())
}

fn cmd_history(limit: usize) -> Result<()> {
    let core = open_core()?;
    let messages = core.messages();

    if messages.is_empty() {
        println!("{}", "No messages yet.".dimmed());
        return Ok(());
    }

    let start = messages.len().saturating_sub(limit);
    println!(
        "{} (showing {} of {})",
        "History".bold(),
        messages.len() - start,
        messages.len()
    );
    println!();
    for msg in &messages[start..] {
        let when = format_timestamp(msg.timestamp).dimmed();
        if msg.is_system {
            println!("  {} {}", when, format!("[{}]", msg.content).dimmed());
        } else {
            println!(
                "  {} {}: {}",
                when,
                msg.sender_name.bright_cyan(),
                msg.content
            );
        }
    }
    Ok(())
}

fn cmd_send(message: String) -> Result<()> {
    let core = open_core()?;
    let msg = core
        .send_message(&message)
        .map_err(|_| anyhow::anyhow!("Message must not be empty"))?;
    println!("{} Stored message {}", "✓".green(), msg.id.to_string().dimmed());
    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }
        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }
        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();
            for (key, value) in config.list() {
                println!("  {:<16} {}", key.bright_cyan(), value);
            }
        }
    }
    Ok(())
}

fn format_timestamp(millis: u64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis as i64)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| millis.to_string())
}
