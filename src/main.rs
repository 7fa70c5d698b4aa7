//! # Radiomuse - Adaptive Internet Radio
//!
//! Walks an online radio catalog, plays stations through an external player
//! and learns from how long each one held your attention.
//!
//! ## Usage
//!
//! ```bash
//! # Play from the whole catalog
//! radiomuse play
//!
//! # Only music, exploring more eagerly
//! radiomuse play --category music --temperature 2
//!
//! # What has been learned
//! radiomuse report
//! ```

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use log::{debug, info};
use path_absolutize::Absolutize;
use std::io;
use std::path::Path;
use std::time::Duration;

use radiomuse::affinity::AffinityStore;
use radiomuse::cache::ResponseCache;
use radiomuse::catalog::{CatalogTarget, CatalogWalker};
use radiomuse::cli;
use radiomuse::completion;
use radiomuse::config::RuntimeConfig;
use radiomuse::db;
use radiomuse::http::{HostProbe, HttpClient};
use radiomuse::playback::Playback;
use radiomuse::player::StreamPlayer;
use radiomuse::radio::{self, History, SelectionLoop, TemperatureSchedule};
use radiomuse::selection::{Blacklist, Selector};
use radiomuse::signal;

/// Main entry point for the Radiomuse application.
///
/// # Logging
///
/// Initializes environment logger which can be controlled via `RUST_LOG`:
/// - `RUST_LOG=debug radiomuse play` - Enable debug logging
/// - `RUST_LOG=radiomuse::catalog=trace radiomuse play` - Module-specific logging
fn main() -> Result<()> {
    env_logger::init();

    let args = cli::Args::parse();

    if let cli::Command::Completion { shell } = args.command {
        completion::generate_completions(shell, &mut cli::Args::command(), &mut io::stdout());
        return Ok(());
    }

    let mut config = load_config(args.config.as_deref())?;
    if let Some(db) = &args.db {
        config.db_path = db
            .absolutize()
            .with_context(|| format!("Invalid database path {}", db.display()))?
            .into_owned();
    }
    debug!("Using database {}", config.db_path.display());

    match args.command {
        cli::Command::Play { category, node, temperature, player, cold_start } => {
            if let Some(temperature) = temperature {
                config.temperature = temperature;
            }
            if let Some(player) = player {
                config.player_command = player;
            }
            if let Some(cold_start) = cold_start {
                config.cold_start = cold_start;
            }
            config.validate()?;

            let start = match node {
                Some(node) => CatalogTarget::Node(node),
                None => CatalogTarget::Root { category },
            };
            play(&config, start)?;
        }
        cli::Command::Report { limit } => {
            let conn = db::open(&config.db_path)?;
            radio::print_report(&AffinityStore::new(&conn, config.weight_policy()), limit)?;
        }
        cli::Command::CleanCache { days } => {
            let conn = db::open(&config.db_path)?;
            let horizon = days.map_or_else(|| config.cache_horizon(), |days| Duration::from_secs(days * 86_400));
            let removed = ResponseCache::new(&conn).evict_older_than(horizon)?;
            println!("Removed {removed} cached catalog pages");
        }
        cli::Command::Completion { .. } => {}
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::from_file(path),
        None => RuntimeConfig::load(),
    }
}

fn play(config: &RuntimeConfig, start: CatalogTarget) -> Result<()> {
    signal::install()?;

    let conn = db::open(&config.db_path)?;
    let cache = ResponseCache::new(&conn);
    cache.evict_older_than(config.cache_horizon())?;

    let affinity = AffinityStore::new(&conn, config.weight_policy());
    radio::print_report(&affinity, 10)?;

    let client = HttpClient::new(config.retry_policy(), Duration::from_secs(config.http_timeout_secs));
    let probe = HostProbe::new(config.catalog_host());
    let player = StreamPlayer::new(config.player_command.clone(), config.poll_step());

    let selector = Selector::new(
        CatalogWalker::new(cache, &client, config.browse_url()),
        affinity,
        Blacklist::new(config.blacklist.as_slice())?,
        config.catalog_home.clone(),
        config.max_depth,
    );
    let playback = Playback::new(&player, &client, &probe, config.backoff(), config.reward_policy());
    let mut radio = SelectionLoop::new(
        selector,
        playback,
        affinity,
        start,
        History::new(config.history_window()),
        TemperatureSchedule::new(config.temperature, config.temperature_step, config.fast_decision()),
        Duration::from_secs(config.retry_delay_secs),
    );

    println!("Keybinds:");
    println!("  <q>: jump next station, learn new weights");
    println!("  <Control-C>: exit without storing");

    let stored = radio.run()?;
    info!("Session ended, {stored} rewards stored");
    Ok(())
}
