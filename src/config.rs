//! # Configuration Module
//!
//! This module handles configuration management and data directory setup for
//! Radiomuse. It provides platform-appropriate data storage locations and the
//! runtime knobs of the learning loop.
//!
//! ## Data Storage
//!
//! Radiomuse stores its database and optional `config.json` in the
//! platform-standard data directory:
//! - Linux: `~/.local/share/radiomuse/`
//! - macOS: `~/Library/Application Support/radiomuse/`
//! - Windows: `%APPDATA%\radiomuse\`
//!
//! ## Configuration File
//!
//! Every field of [`RuntimeConfig`] may be set in `config.json`; missing
//! fields keep their defaults. Command-line flags override the file.
//!
//! ```json
//! { "temperature": 0.5, "cold_start": "zero", "blacklist": ["talk"] }
//! ```

use anyhow::{Result, Context};
use clap::ValueEnum;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::time::Duration;
use std::fs;
use serde::{Deserialize, Serialize};

use crate::affinity::WeightPolicy;
use crate::http::{Backoff, RetryPolicy};
use crate::outcome::RewardPolicy;

const APP_DIR: &str = "radiomuse";
const DB_FILE: &str = "radios.db";
const CONFIG_FILE: &str = "config.json";

/// Root of the catalog API all category pages hang off.
pub const DEFAULT_CATALOG_HOME: &str = "http://opml.radiotime.com/";

/// Words that exclude a category or station from selection.
pub const DEFAULT_BLACKLIST: &[&str] = &[
    "relig",
    "christ",
    "kids",
    "podcast",
    "sports",
    "talk",
    "children",
    "catho",
    "calmradio",
    "holiday",
    "christmas",
];

/// Returns the platform-appropriate data directory for Radiomuse.
///
/// The `radiomuse` subdirectory is created if it doesn't exist yet.
///
/// # Errors
///
/// This function will return an error if:
/// - The system data directory cannot be determined
/// - The subdirectory cannot be created due to permissions
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| anyhow::anyhow!(
            "Could not determine system data directory. Please ensure your platform supports standard data directories."
        ))?;

    let app_dir = data_dir.join(APP_DIR);
    fs::create_dir_all(&app_dir)
        .with_context(|| format!(
            "Failed to create Radiomuse data directory at {}. Please check file permissions.",
            app_dir.display()
        ))?;

    Ok(app_dir)
}

/// Returns the platform-appropriate database file path.
///
/// # Platform Behavior
///
/// - **Linux**: `~/.local/share/radiomuse/radios.db`
/// - **macOS**: `~/Library/Application Support/radiomuse/radios.db`
/// - **Windows**: `%APPDATA%\radiomuse\radios.db`
///
/// # Examples
///
/// ```no_run
/// use radiomuse::config::get_db_path;
///
/// let db_path = get_db_path()?;
/// println!("Database location: {}", db_path.display());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn get_db_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(DB_FILE))
}

/// Location of the optional JSON configuration file.
pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(CONFIG_FILE))
}

/// What an endpoint without any recorded reward is worth to the sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ColdStart {
    /// Unseen endpoints weigh nothing: explore conservatively.
    Zero,
    /// Unseen endpoints weigh the corpus-wide mean: explore eagerly.
    CorpusMean,
}

/// Configuration for runtime behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Path to the database file
    pub db_path: PathBuf,
    /// Catalog root; anything under it is a category page, not a stream
    pub catalog_home: String,
    /// Cached catalog responses older than this many days are swept at start
    pub cache_horizon_days: u64,
    /// Weights below this present as zero
    pub lower_threshold: u64,
    /// Weights and rewards are capped here (seconds of listening)
    pub upper_threshold: u64,
    /// Starting sampler temperature
    pub temperature: f64,
    /// Temperature increase after a quick decision
    pub temperature_step: f64,
    /// A decision shorter than this counts as quick
    pub fast_decision_secs: u64,
    pub cold_start: ColdStart,
    pub retry_attempts: u32,
    pub retry_delay_secs: u64,
    pub http_timeout_secs: u64,
    /// Command invoked with the stream URL as its only argument
    pub player_command: String,
    /// Length of one polling slice while waiting on the player
    pub poll_step_secs: u64,
    /// Playbacks shorter than this are always stored
    pub forced_store_below_secs: u64,
    /// Playbacks shorter than this (and not forced) reward zero
    pub noise_floor_secs: u64,
    /// A station played within this window is not replayed
    pub history_window_secs: u64,
    pub blacklist: Vec<String>,
    /// Deepest category nesting followed before giving up on a walk
    pub max_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            db_path: get_db_path().unwrap_or_else(|_| PathBuf::from(DB_FILE)),
            catalog_home: DEFAULT_CATALOG_HOME.to_string(),
            cache_horizon_days: 7,
            lower_threshold: 10,
            upper_threshold: 7200,
            temperature: 1.0,
            temperature_step: 0.5,
            fast_decision_secs: 120,
            cold_start: ColdStart::CorpusMean,
            retry_attempts: 10,
            retry_delay_secs: 5,
            http_timeout_secs: 30,
            player_command: "streamplayer".to_string(),
            poll_step_secs: 10,
            forced_store_below_secs: 5,
            noise_floor_secs: 60,
            history_window_secs: 60 * 60,
            blacklist: DEFAULT_BLACKLIST.iter().map(ToString::to_string).collect(),
            max_depth: 32,
        }
    }
}

impl RuntimeConfig {
    /// Load `config.json` from the data directory, or defaults when absent.
    pub fn load() -> Result<Self> {
        let path = get_config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(&path)
    }

    /// Parse a configuration file; missing fields keep their defaults.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the loop cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            anyhow::bail!("temperature must be a positive number, got {}", self.temperature);
        }
        if self.lower_threshold > self.upper_threshold {
            anyhow::bail!(
                "lower threshold {} exceeds upper threshold {}",
                self.lower_threshold, self.upper_threshold
            );
        }
        if self.retry_attempts == 0 {
            anyhow::bail!("retry_attempts must be at least 1");
        }
        if self.poll_step_secs == 0 {
            anyhow::bail!("poll_step_secs must be at least 1");
        }
        Ok(())
    }

    pub fn weight_policy(&self) -> WeightPolicy {
        WeightPolicy::new(
            Decimal::from(self.lower_threshold),
            Decimal::from(self.upper_threshold),
            self.cold_start,
        )
    }

    pub fn reward_policy(&self) -> RewardPolicy {
        RewardPolicy {
            forced_store_below: Duration::from_secs(self.forced_store_below_secs),
            noise_floor: Duration::from_secs(self.noise_floor_secs),
            cap: Duration::from_secs(self.upper_threshold),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, Duration::from_secs(self.retry_delay_secs))
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::default()
    }

    pub fn cache_horizon(&self) -> Duration {
        Duration::from_secs(self.cache_horizon_days * 24 * 60 * 60)
    }

    pub fn poll_step(&self) -> Duration {
        Duration::from_secs(self.poll_step_secs)
    }

    pub fn history_window(&self) -> Duration {
        Duration::from_secs(self.history_window_secs)
    }

    pub fn fast_decision(&self) -> Duration {
        Duration::from_secs(self.fast_decision_secs)
    }

    /// `Browse.ashx` endpoint under the catalog home.
    pub fn browse_url(&self) -> String {
        format!("{}Browse.ashx", self.catalog_home)
    }

    /// Host part of the catalog home, used for reachability probes.
    pub fn catalog_host(&self) -> String {
        self.catalog_home
            .split("://")
            .nth(1)
            .unwrap_or(&self.catalog_home)
            .split(['/', ':'])
            .next()
            .unwrap_or_default()
            .to_string()
    }
}
