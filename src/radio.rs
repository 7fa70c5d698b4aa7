//! The endless select, play, learn loop.

use anyhow::Result;
use log::{debug, info};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use crate::affinity::AffinityStore;
use crate::catalog::CatalogTarget;
use crate::playback::Playback;
use crate::selection::Selector;
use crate::signal;

/// Stations played recently, so a quick re-draw does not replay them.
#[derive(Debug, Clone)]
pub struct History {
    window: Duration,
    played: HashMap<String, Instant>,
}

impl History {
    pub fn new(window: Duration) -> Self {
        Self { window, played: HashMap::new() }
    }

    pub fn record(&mut self, url: &str) {
        self.played.insert(url.to_string(), Instant::now());
    }

    /// Whether `url` was played within the window.
    pub fn contains(&self, url: &str) -> bool {
        self.played
            .get(url)
            .is_some_and(|played| played.elapsed() <= self.window)
    }

    /// Forget entries older than the window.
    pub fn prune(&mut self) {
        let window = self.window;
        self.played.retain(|_, played| played.elapsed() <= window);
    }

    pub fn len(&self) -> usize {
        self.played.len()
    }

    pub fn is_empty(&self) -> bool {
        self.played.is_empty()
    }
}

/// Sampler temperature across iterations. Quick decisions (the user skipped
/// soon after the draw) heat it up so the next draws explore more; a
/// station that held the user's attention resets it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureSchedule {
    base: f64,
    step: f64,
    fast: Duration,
    current: f64,
}

impl TemperatureSchedule {
    pub fn new(base: f64, step: f64, fast: Duration) -> Self {
        Self { base, step, fast, current: base }
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn after_decision(&mut self, elapsed: Duration) {
        self.current = if elapsed <= self.fast { self.current + self.step } else { self.base };
        debug!("Temperature now {:.1}", self.current);
    }
}

/// What one iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Nothing was played: empty walk, blacklisted pick or history hit
    Skipped,
    /// A station was played and its path updated with the reward
    Stored { endpoint: String, reward: Decimal },
    /// A station was played but its outcome teaches nothing
    Discarded { endpoint: String },
    /// The user ended the session
    Stop,
}

pub struct SelectionLoop<'a> {
    selector: Selector<'a>,
    playback: Playback<'a>,
    affinity: AffinityStore<'a>,
    start: CatalogTarget,
    history: History,
    schedule: TemperatureSchedule,
    /// Pause before retrying when the catalog is refusing queries and
    /// nothing is known yet
    idle: Duration,
}

impl<'a> SelectionLoop<'a> {
    pub fn new(
        selector: Selector<'a>,
        playback: Playback<'a>,
        affinity: AffinityStore<'a>,
        start: CatalogTarget,
        history: History,
        schedule: TemperatureSchedule,
        idle: Duration,
    ) -> Self {
        Self {
            selector,
            playback,
            affinity,
            start,
            history,
            schedule,
            idle,
        }
    }

    pub fn temperature(&self) -> f64 {
        self.schedule.current()
    }

    /// Iterate until the user stops the session. Returns the number of
    /// iterations that stored a reward.
    pub fn run(&mut self) -> Result<usize> {
        let mut stored = 0;
        loop {
            match self.step()? {
                Step::Stop => {
                    println!("Closing");
                    return Ok(stored);
                }
                Step::Stored { .. } => stored += 1,
                Step::Skipped | Step::Discarded { .. } => {}
            }
        }
    }

    /// One select, play, learn round.
    pub fn step(&mut self) -> Result<Step> {
        if signal::take_interrupt() {
            return Ok(Step::Stop);
        }
        println!();
        let decided_at = Instant::now();
        let Some(selection) = unless_interrupted(self.selector.select(&self.start, self.schedule.current()))? else {
            return Ok(Step::Stop);
        };
        if signal::take_interrupt() {
            return Ok(Step::Stop);
        }
        self.history.prune();

        let (endpoint, reward) = match selection.endpoint {
            None if selection.path.is_empty() && selection.evaded => {
                thread::sleep(self.idle);
                return Ok(Step::Skipped);
            }
            None => (None, Some(Decimal::ZERO)),
            Some(url) if self.history.contains(&url) => {
                println!("History hit");
                return Ok(Step::Skipped);
            }
            Some(url) => {
                let Some(result) = unless_interrupted(self.playback.run(&url))? else {
                    return Ok(Step::Stop);
                };
                self.history.record(&url);
                if result.stop {
                    return Ok(Step::Stop);
                }
                (Some(url), result.reward)
            }
        };

        let step = match (endpoint, reward) {
            (endpoint, Some(reward)) => {
                println!("Strength: {}", reward.round());
                for node in self.affinity.update_path(&selection.path, reward)? {
                    println!("{} {}", node.m8.round(), node.url);
                }
                match endpoint {
                    Some(endpoint) => {
                        info!("Stored reward {reward} for {endpoint}");
                        Step::Stored { endpoint, reward }
                    }
                    None => Step::Skipped,
                }
            }
            (Some(endpoint), None) => Step::Discarded { endpoint },
            (None, None) => Step::Skipped,
        };

        self.schedule.after_decision(decided_at.elapsed());
        Ok(step)
    }
}

/// `None` when `result` failed because of Ctrl-C, consuming the interrupt.
fn unless_interrupted<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if signal::is_interrupted(&err) => {
            signal::take_interrupt();
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Print the corpus summary and the `limit` strongest endpoints.
pub fn print_report(store: &AffinityStore<'_>, limit: usize) -> Result<()> {
    let (mean, count) = store.aggregate()?;
    println!("{count} known endpoints, mean weight {}", mean.round_dp(1));
    if count == 0 {
        return Ok(());
    }
    println!("{:>7} {:>7} {:>7} {:>5}  url", "m8", "m16", "m32", "runs");
    for node in store.top(limit)? {
        println!(
            "{:>7} {:>7} {:>7} {:>5}  {}",
            node.m8.round().to_string(),
            node.m16.round().to_string(),
            node.m32.round().to_string(),
            node.run_count,
            node.url
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_window() {
        let mut history = History::new(Duration::from_secs(3600));
        assert!(!history.contains("http://a"));
        history.record("http://a");
        assert!(history.contains("http://a"));
        history.prune();
        assert_eq!(history.len(), 1);

        let mut expired = History::new(Duration::ZERO);
        expired.record("http://a");
        thread::sleep(Duration::from_millis(5));
        assert!(!expired.contains("http://a"));
        expired.prune();
        assert!(expired.is_empty());
    }

    #[test]
    fn test_temperature_schedule() {
        let mut schedule = TemperatureSchedule::new(1.0, 0.5, Duration::from_secs(120));
        assert_eq!(schedule.current(), 1.0);

        schedule.after_decision(Duration::from_secs(30));
        schedule.after_decision(Duration::from_secs(120));
        assert_eq!(schedule.current(), 2.0);

        schedule.after_decision(Duration::from_secs(121));
        assert_eq!(schedule.current(), 1.0);
    }
}
