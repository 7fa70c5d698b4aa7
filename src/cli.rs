//! # Command-Line Interface Module
//!
//! This module defines the command-line interface for Radiomuse using Clap
//! derive macros. Every flag that mirrors a [`RuntimeConfig`] field overrides
//! the value loaded from `config.json`.
//!
//! ## Commands
//!
//! - `play`: Run the select, play, learn loop
//! - `report`: Show what has been learned so far
//! - `clean-cache`: Sweep stale catalog responses
//! - `completion`: Print a shell completion script
//!
//! ## Examples
//!
//! ```bash
//! radiomuse play
//! radiomuse play --category music --temperature 0.5
//! radiomuse play --node r0 --player mpv
//! radiomuse report --limit 20
//! ```
//!
//! [`RuntimeConfig`]: crate::config::RuntimeConfig

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::ColdStart;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Main application arguments structure.
#[derive(Parser, Debug)]
#[command(name = "radiomuse")]
#[command(about = "Radiomuse: internet radio that learns what you keep listening to")]
#[command(version)]
pub struct Args {
    /// Database file (defaults to the platform data directory)
    #[arg(long, global = true, env = "RADIOMUSE_DB", value_hint = clap::ValueHint::FilePath)]
    pub db: Option<PathBuf>,

    /// Configuration file (defaults to config.json in the data directory)
    #[arg(long, global = true, env = "RADIOMUSE_CONFIG", value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Enumeration of all available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Pick stations and learn from how long you listen
    ///
    /// Walks the catalog, draws a station weighted by past listening time and
    /// plays it. Quitting the player (`q`) moves on to the next station and
    /// stores the listening time; Ctrl-C ends the session without storing.
    Play {
        /// Start from a root category such as `music` or `local`
        #[arg(long, conflicts_with = "node")]
        category: Option<String>,

        /// Start from a catalog node id (`r0`) or a full category URL
        #[arg(long)]
        node: Option<String>,

        /// Starting sampler temperature; higher explores more
        #[arg(short, long)]
        temperature: Option<f64>,

        /// Player command, invoked with the stream URL as its only argument
        #[arg(long, env = "RADIOMUSE_PLAYER")]
        player: Option<String>,

        /// Weight given to stations that have never been played
        #[arg(long, value_enum)]
        cold_start: Option<ColdStart>,
    },

    /// Show learned station weights
    ///
    /// Prints the corpus-wide mean weight and the strongest endpoints with
    /// their 8/16/32-update moving averages.
    Report {
        /// Number of endpoints to list
        #[arg(short, long, default_value = "25")]
        limit: usize,
    },

    /// Remove cached catalog pages older than the horizon
    CleanCache {
        /// Horizon in days (defaults to the configured cache horizon)
        #[arg(long)]
        days: Option<u64>,
    },

    /// Generate shell completions
    ///
    /// Usage: radiomuse completion bash > ~/.local/share/bash-completion/completions/radiomuse
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },
}
