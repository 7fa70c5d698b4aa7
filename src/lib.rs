//! Internet radio that learns from how long you keep listening.
//!
//! Core modules:
//! - [`catalog`] - Catalog pages and the walker that flattens them
//! - [`affinity`] - Per-endpoint moving-average weights
//! - [`sampler`] - Temperature-controlled weighted draw
//! - [`outcome`] - Player exit classification and reward derivation
//! - [`radio`] - The select, play, learn loop
//!
//! ### Supporting Modules
//!
//! - [`config`] - Configuration and data directory management
//! - [`db`] - SQLite connection and schema
//! - [`cache`] - Response cache for catalog pages
//! - [`http`] - Catalog HTTP access, retries and connectivity waits
//! - [`selection`] - Catalog walk down to one station, quota evasion
//! - [`player`] - External player process
//! - [`playback`] - One station start to finish, with remediation
//! - [`signal`] - Ctrl-C flag
//! - [`cli`] - Command-line interface definitions with clap integration
//! - [`completion`] - Shell completion generation
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use radiomuse::affinity::AffinityStore;
//! use radiomuse::cache::ResponseCache;
//! use radiomuse::catalog::{CatalogTarget, CatalogWalker};
//! use radiomuse::config::RuntimeConfig;
//! use radiomuse::http::HttpClient;
//! use radiomuse::{db, sampler};
//!
//! let config = RuntimeConfig::load()?;
//! let conn = db::open(&config.db_path)?;
//! let client = HttpClient::new(config.retry_policy(), std::time::Duration::from_secs(30));
//! let walker = CatalogWalker::new(ResponseCache::new(&conn), &client, config.browse_url());
//!
//! // Every endpoint one level below the music category
//! let (title, urls) = walker.resolve(&CatalogTarget::Root { category: Some("music".into()) })?;
//!
//! // Weigh them by what was learned so far and draw one
//! let store = AffinityStore::new(&conn, config.weight_policy());
//! let candidates = store.weigh(&urls)?;
//! if let Some(choice) = sampler::choose(&candidates, config.temperature) {
//!     println!("{title}: {} ({:.0}%)", choice.item, choice.share * 100.0);
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Learning Rule
//!
//! Each stored reward is the listening time in seconds:
//!
//! - Under 5 seconds the raw time is stored whatever the player said, so
//!   dead streams are learned quickly
//! - Under 60 seconds (configurable) the reward is 0: a quick skip
//! - Otherwise the listening time, capped at 7200 seconds
//!
//! The reward is applied to every node on the path that led to the station:
//! each category page walked through and the station itself. Weights are the
//! 8-update moving average; see [`affinity`] for the exact rule.
//!
//! ## Temperature
//!
//! The sampler raises normalised weights to `1 / temperature`. Whenever the
//! user skips a station within two minutes of it being drawn the temperature
//! rises by 0.5, so a run of skips explores further from the favourites.
//! A station that holds the user's attention resets it.
//!
//! ## Error Handling
//!
//! All public functions return `anyhow::Result`. Errors callers need to tell
//! apart are typed and travel inside it:
//!
//! - [`http::FetchError`] - quota exhausted, catalog unreachable, bad status
//! - [`catalog::CatalogError`] - malformed catalog pages
//! - [`playback::PlaybackError`] - unplayable playlists
//! - [`signal::Interrupted`] - Ctrl-C while waiting on the network
//!
//! ## Testing
//!
//! Run tests with:
//! ```bash
//! cargo test
//! cargo bench
//! ```

pub mod affinity;
pub mod cache;
pub mod catalog;
pub mod cli;
pub mod completion;
pub mod config;
pub mod db;
pub mod http;
pub mod outcome;
pub mod playback;
pub mod player;
pub mod radio;
pub mod sampler;
pub mod selection;
pub mod signal;
