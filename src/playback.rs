//! One station, start to finish.
//!
//! [`Playback::run`] hands the stream to the [`Player`], classifies the
//! result and either retries with a remediated target (https rewrite,
//! playlist resolution) or settles on a terminal state, runs the recovery it
//! asks for and derives the reward.

use anyhow::Result;
use log::{debug, info};
use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

use crate::http::{wait_for_connection, Backoff, Fetch, FetchError, Reachability, QUOTA_STATUS};
use crate::outcome::{
    classify, derive_reward, extract_stream_url, rewrite_to_https, Classification, Recovery, Remediation,
    RewardPolicy, Terminal,
};
use crate::player::Player;
use crate::signal;

/// Remediation hops allowed before a station counts as broken.
pub const MAX_HOPS: usize = 8;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no stream URL in playlist {url}:\n{body}")]
    NoStreamInPlaylist { url: String, body: String },
    #[error("gave up on {url} after {hops} redirects and playlist hops")]
    TooManyHops { url: String, hops: usize },
}

/// What one station's playback amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackResult {
    /// The user asked to end the session
    pub stop: bool,
    /// Reward to learn from, `None` when nothing should be stored
    pub reward: Option<Decimal>,
    pub terminal: Terminal,
    /// URL actually played after remediation
    pub played: String,
    /// Effective listening time
    pub runtime: Duration,
}

pub struct Playback<'a> {
    player: &'a dyn Player,
    playlists: &'a dyn Fetch,
    probe: &'a dyn Reachability,
    backoff: Backoff,
    policy: RewardPolicy,
}

impl<'a> Playback<'a> {
    pub fn new(
        player: &'a dyn Player,
        playlists: &'a dyn Fetch,
        probe: &'a dyn Reachability,
        backoff: Backoff,
        policy: RewardPolicy,
    ) -> Self {
        Self {
            player,
            playlists,
            probe,
            backoff,
            policy,
        }
    }

    /// Play `url` until a terminal state is reached.
    ///
    /// # Errors
    ///
    /// - the player cannot be started
    /// - a playlist cannot be fetched or holds no stream
    /// - more than [`MAX_HOPS`] remediations are needed
    /// - the connection does not come back after a dropped stream
    /// - Ctrl-C arrives between hops ([`signal::Interrupted`])
    pub fn run(&self, url: &str) -> Result<PlaybackResult> {
        let mut target = url.to_string();
        for hop in 0..=MAX_HOPS {
            signal::check()?;
            println!("=> {target}");
            let signals = self.player.play(&target)?;

            let terminal = match classify(&signals) {
                Classification::Remediate(Remediation::Redirect) => {
                    target = rewrite_to_https(&target);
                    debug!("Hop {hop}: following https redirect to {target}");
                    continue;
                }
                Classification::Remediate(Remediation::ResolvePlaylist) => {
                    println!("Parsing playlist: {target}");
                    target = self.resolve_playlist(&target)?;
                    continue;
                }
                Classification::Terminal(terminal) => terminal,
            };

            let runtime = signals.effective_runtime();
            if terminal == Terminal::Suspended {
                let minutes = signals.suspended_for().as_secs_f64() / 60.0;
                println!("Suspended for ~{minutes:.0} minutes");
                info!("Suspension detected, runtime corrected to {runtime:?}");
            }
            if runtime < self.policy.forced_store_below {
                println!("Reason: {terminal:?}, after {:.3} seconds", runtime.as_secs_f64());
            }

            let verdict = terminal.verdict();
            if let Some(Recovery::WaitForConnection) = verdict.recovery {
                wait_for_connection(self.probe, &self.backoff)?;
            }

            return Ok(PlaybackResult {
                stop: verdict.stop,
                reward: derive_reward(&terminal, runtime, &self.policy),
                terminal,
                played: target,
                runtime,
            });
        }
        Err(PlaybackError::TooManyHops { url: url.to_string(), hops: MAX_HOPS }.into())
    }

    fn resolve_playlist(&self, url: &str) -> Result<String> {
        let body = self.playlists.fetch(url, &[]).map_err(|err| match err.downcast::<FetchError>() {
            // A refusing playlist host is just a broken station, not the catalog's quota.
            Ok(FetchError::QuotaExceeded { url }) => FetchError::UnexpectedStatus {
                url,
                status: QUOTA_STATUS,
                body: String::new(),
            }
            .into(),
            Ok(other) => other.into(),
            Err(err) => err,
        })?;
        let stream = extract_stream_url(&body).ok_or_else(|| PlaybackError::NoStreamInPlaylist {
            url: url.to_string(),
            body,
        })?;
        debug!("Playlist {url} resolved to {stream}");
        Ok(stream)
    }
}
