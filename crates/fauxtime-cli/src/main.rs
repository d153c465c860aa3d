//! Command-line front end over the durable virtual-time configuration.

#![deny(unsafe_code)]

use clap::{Parser, Subcommand};
use fauxtime_core::{GlobalConfig, PartialGlobalConfig, Timestamp};
use serde_json::json;
use state_store::{JsonFileBackend, StateStore};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "fauxtime", about = "Inspect and change the virtual clock configuration")]
struct Cli {
    /// State file holding the configuration record
    #[arg(long, env = "FAUXTIME_STATE_PATH", default_value = "fauxtime-state.json", global = true)]
    state: PathBuf,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the stored configuration as JSON
    Get,
    /// Set the fake instant and/or run state
    Set {
        /// RFC 3339, `YYYY-MM-DD[THH:MM[:SS]]` (UTC), or epoch milliseconds
        #[arg(long)]
        at: Option<String>,
        /// Let the virtual clock tick with real time
        #[arg(long, conflicts_with = "stopped")]
        running: bool,
        /// Freeze the virtual clock
        #[arg(long)]
        stopped: bool,
    },
    /// Reset to defaults (faking disabled)
    Clear,
    /// Print the current virtual instant
    Now {
        /// Print this many readings, one per second
        #[arg(long, default_value_t = 1)]
        watch: u32,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init_json_logging();
    let cli = Cli::parse();
    let store = StateStore::new(JsonFileBackend::open(&cli.state)?);
    match cli.cmd {
        Command::Get => print_config(&store.try_read()?)?,
        Command::Set { at, running, stopped } => cmd_set(&store, at.as_deref(), running, stopped)?,
        Command::Clear => {
            store.clear()?;
            print_config(&store.try_read()?)?;
        }
        Command::Now { watch } => cmd_now(&store, watch).await?,
    }
    Ok(())
}

fn print_config(config: &GlobalConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

fn cmd_set(
    store: &StateStore,
    at: Option<&str>,
    running: bool,
    stopped: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let fake_instant = at.map(Timestamp::parse).transpose()?;
    let clock_stopped = match (running, stopped) {
        (true, _) => Some(false),
        (_, true) => Some(true),
        _ => None,
    };
    if fake_instant.is_none() && clock_stopped.is_none() {
        return Err("nothing to set: pass --at, --running or --stopped".into());
    }
    let patch = PartialGlobalConfig { fake_instant, clock_stopped, ..PartialGlobalConfig::default() };
    match store.write(&patch)? {
        Some(change) => info!(version = change.version, "configuration updated"),
        None => info!("configuration unchanged"),
    }
    print_config(&store.try_read()?)
}

async fn cmd_now(store: &StateStore, watch: u32) -> Result<(), Box<dyn std::error::Error>> {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    for _ in 0..watch.max(1) {
        ticker.tick().await;
        let config = store.try_read()?;
        let real = store.clock().now();
        let virt = config.virtual_instant(real).unwrap_or(real);
        let line = json!({
            "now": virt.to_rfc3339(),
            "epochMs": virt.as_millis(),
            "faked": config.enabled,
            "stopped": config.clock_stopped,
        });
        println!("{line}");
    }
    Ok(())
}
