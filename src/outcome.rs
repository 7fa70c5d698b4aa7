//! Playback outcome classification.
//!
//! A finished player run leaves behind a handful of raw signals: how long it
//! ran in wall-clock time, how long we actually polled it, whether the user
//! interrupted, and whatever the player printed on stderr. [`classify`] turns
//! those into either a terminal state or a remediation (retry the stream with
//! a transformed target), and [`derive_reward`] turns a terminal state and the
//! effective runtime into the reward the affinity store learns from.
//!
//! ```text
//! Running ─┬─> NormalExit(reason)
//!          ├─> UserInterrupt
//!          ├─> Suspended
//!          ├─> Redirect        ──> Running (https target)
//!          └─> ResolvePlaylist ──> Running (first stream of the playlist)
//! ```

use log::warn;
use regex::Regex;
use rust_decimal::Decimal;
use std::fmt;
use std::time::Duration;

lazy_static::lazy_static! {
    static ref EXIT_MARKER: Regex =
        Regex::new(r"^\s*Exiting\.\.\. \((?P<reason>.*?)\)").expect("valid exit marker regex");
    static ref URL_LINE: Regex =
        Regex::new(r"(?m)((?:http|ftp)s?.*?$)").expect("valid url line regex");
}

pub const PLAYLIST_MARKER: &str = "Playlist parsing disabled for security reasons.";
pub const REDIRECT_MARKER: &str = "Unsupported http 302 redirect to https protocol";

/// Reason reported by the player in its `Exiting... (<reason>)` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The stream ended by itself, usually a dropped connection
    EndOfFile,
    /// The user skipped to the next station
    Quit,
    /// A reason this program does not know about
    Other(String),
    /// No exit line at all
    Unknown,
}

impl ExitReason {
    pub fn parse(reason: &str) -> Self {
        match reason {
            "End of file" => Self::EndOfFile,
            "Quit" => Self::Quit,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfFile => write!(f, "End of file"),
            Self::Quit => write!(f, "Quit"),
            Self::Other(reason) => write!(f, "{reason}"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Final state of a playback attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    NormalExit(ExitReason),
    UserInterrupt,
    /// The machine slept while the player was running
    Suspended,
}

/// Transformation to apply before retrying the same station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    /// The stream redirects to https, which the player refuses to follow
    Redirect,
    /// The target is a playlist the player will not parse
    ResolvePlaylist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Terminal(Terminal),
    Remediate(Remediation),
}

/// Follow-up work required before the next selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    WaitForConnection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// End the selection loop
    pub stop: bool,
    /// Feed the runtime back as a reward
    pub store: bool,
    pub recovery: Option<Recovery>,
}

impl Terminal {
    pub fn verdict(&self) -> Verdict {
        let (stop, store, recovery) = match self {
            Self::NormalExit(ExitReason::EndOfFile) => (false, false, Some(Recovery::WaitForConnection)),
            Self::NormalExit(ExitReason::Quit) => (false, true, None),
            Self::NormalExit(ExitReason::Other(_) | ExitReason::Unknown) => (false, true, None),
            Self::Suspended => (false, true, Some(Recovery::WaitForConnection)),
            Self::UserInterrupt => (true, false, None),
        };
        Verdict { stop, store, recovery }
    }
}

/// Raw observations of one player run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSignals {
    /// Wall-clock time between spawn and exit
    pub runtime: Duration,
    /// Sum of the polling slices that timed out
    pub waited: Duration,
    /// Length of one polling slice
    pub step: Duration,
    pub interrupted: bool,
    pub stderr: Vec<String>,
}

impl PlaybackSignals {
    /// The wall clock ran further than polling can account for.
    pub fn suspended(&self) -> bool {
        self.waited + self.step < self.runtime
    }

    /// Runtime with any suspension cut out.
    pub fn effective_runtime(&self) -> Duration {
        if self.suspended() {
            self.waited + self.step / 2
        } else {
            self.runtime
        }
    }

    /// Approximate time spent suspended.
    pub fn suspended_for(&self) -> Duration {
        self.runtime.saturating_sub(self.effective_runtime())
    }
}

/// Classify a finished run.
///
/// Interrupts win over everything else, suspension over stderr content.
/// Remediation markers return as soon as they are seen; the last exit
/// marker names the reason.
pub fn classify(signals: &PlaybackSignals) -> Classification {
    if signals.interrupted {
        return Classification::Terminal(Terminal::UserInterrupt);
    }
    if signals.suspended() {
        return Classification::Terminal(Terminal::Suspended);
    }

    let mut reason = ExitReason::Unknown;
    for line in &signals.stderr {
        if line.contains(PLAYLIST_MARKER) {
            return Classification::Remediate(Remediation::ResolvePlaylist);
        }
        if line.contains(REDIRECT_MARKER) {
            return Classification::Remediate(Remediation::Redirect);
        }
        if let Some(captures) = EXIT_MARKER.captures(line) {
            reason = ExitReason::parse(&captures["reason"]);
        }
    }

    match &reason {
        ExitReason::Unknown => {
            warn!("Player gave no exit reason");
            dump_stderr(&signals.stderr);
        }
        ExitReason::Other(text) => {
            warn!("Unrecognized player exit reason {text:?}");
            dump_stderr(&signals.stderr);
        }
        _ => {}
    }
    Classification::Terminal(Terminal::NormalExit(reason))
}

fn dump_stderr(lines: &[String]) {
    println!("{}", stderr_report(lines));
}

fn stderr_report(lines: &[String]) -> String {
    let mut report = String::from("Player stderr:");
    for line in lines {
        report.push_str("\n  ");
        report.push_str(line.trim_end());
    }
    report
}

/// Reward shaping thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardPolicy {
    /// Runs shorter than this are stored with their raw runtime whatever the
    /// verdict says, except for user interrupts
    pub forced_store_below: Duration,
    /// Stored runs shorter than this (and not forced) reward zero
    pub noise_floor: Duration,
    /// Rewards are capped here
    pub cap: Duration,
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self {
            forced_store_below: Duration::from_secs(5),
            noise_floor: Duration::from_secs(60),
            cap: Duration::from_secs(7200),
        }
    }
}

/// Reward for a terminal state, or `None` when nothing should be stored.
pub fn derive_reward(terminal: &Terminal, runtime: Duration, policy: &RewardPolicy) -> Option<Decimal> {
    let forced = runtime < policy.forced_store_below && *terminal != Terminal::UserInterrupt;
    if !(terminal.verdict().store || forced) {
        return None;
    }

    let credited = if forced || runtime >= policy.noise_floor {
        runtime.min(policy.cap)
    } else {
        Duration::ZERO
    };
    Some(seconds(credited))
}

/// Seconds with millisecond precision.
pub fn seconds(duration: Duration) -> Decimal {
    Decimal::new(duration.as_millis() as i64, 3).normalize()
}

/// Last URL-looking line of a playlist body, if any.
pub fn extract_stream_url(playlist: &str) -> Option<String> {
    URL_LINE
        .find_iter(playlist)
        .last()
        .map(|found| found.as_str().trim().to_string())
        .filter(|url| !url.is_empty())
}

pub fn rewrite_to_https(url: &str) -> String {
    url.replace("http://", "https://")
}
