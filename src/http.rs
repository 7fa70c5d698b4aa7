//! Blocking HTTP access to the catalog, with retry and connectivity recovery.
//!
//! Network failures come in three flavours that callers treat differently:
//! transport errors are retried with a fixed delay and become
//! [`FetchError::Unavailable`] once the attempts run out; HTTP 403 is the
//! catalog's way of saying "too many requests" and surfaces immediately as
//! [`FetchError::QuotaExceeded`]; any other error status is fatal.

use anyhow::{bail, Result};
use log::{debug, warn};
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;
use thiserror::Error;

use crate::signal;

/// Status code the catalog answers with once the query quota is used up.
pub const QUOTA_STATUS: u16 = 403;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("query limit reached for {url}")]
    QuotaExceeded { url: String },
    #[error("{url} unreachable after {attempts} attempts: {reason}")]
    Unavailable { url: String, attempts: u32, reason: String },
    #[error("{url} answered HTTP {status}: {body}")]
    UnexpectedStatus { url: String, status: u16, body: String },
    #[error("failed to read response body of {url}: {reason}")]
    Body { url: String, reason: String },
}

/// Source of raw response bodies. Implemented over HTTP in production and by
/// in-memory fakes in tests.
pub trait Fetch {
    fn fetch(&self, url: &str, params: &[(&str, &str)]) -> Result<String>;
}

/// Fixed-delay retry schedule for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(5))
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts: attempts.max(1), delay }
    }
}

/// Outcome of a single attempt inside [`retry`].
#[derive(Debug)]
pub enum Attempt {
    /// Worth trying again after the delay.
    Transient(String),
    /// Give up immediately.
    Fatal(anyhow::Error),
}

/// Run `op` until it succeeds, fails fatally, or the policy's attempts are
/// used up. `target` names what is being fetched in the final error. A
/// pending Ctrl-C ends the retries with [`signal::Interrupted`].
pub fn retry<T>(policy: &RetryPolicy, target: &str, mut op: impl FnMut() -> Result<T, Attempt>) -> Result<T> {
    let mut last_reason = String::new();
    for attempt in 0..policy.attempts {
        if attempt > 0 {
            warn!("Retrying connection to {target} ({}/{})", attempt + 1, policy.attempts);
            signal::check()?;
            thread::sleep(policy.delay);
            signal::check()?;
        }
        match op() {
            Ok(value) => return Ok(value),
            Err(Attempt::Fatal(err)) => return Err(err),
            Err(Attempt::Transient(reason)) => {
                debug!("Transient failure on {target}: {reason}");
                last_reason = reason;
            }
        }
    }
    Err(FetchError::Unavailable {
        url: target.to_string(),
        attempts: policy.attempts,
        reason: last_reason,
    }
    .into())
}

/// `ureq`-backed [`Fetch`] implementation.
pub struct HttpClient {
    agent: ureq::Agent,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(retry: RetryPolicy, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .build();
        Self { agent, retry }
    }
}

impl Fetch for HttpClient {
    fn fetch(&self, url: &str, params: &[(&str, &str)]) -> Result<String> {
        retry(&self.retry, url, || {
            let mut request = self.agent.get(url);
            for (name, value) in params {
                request = request.query(name, value);
            }
            debug!("GET {url} {params:?}");
            match request.call() {
                Ok(response) => response.into_string().map_err(|err| {
                    Attempt::Fatal(
                        FetchError::Body { url: url.to_string(), reason: err.to_string() }.into(),
                    )
                }),
                Err(ureq::Error::Status(QUOTA_STATUS, _)) => Err(Attempt::Fatal(
                    FetchError::QuotaExceeded { url: url.to_string() }.into(),
                )),
                Err(ureq::Error::Status(status, response)) => Err(Attempt::Fatal(
                    FetchError::UnexpectedStatus {
                        url: url.to_string(),
                        status,
                        body: response.into_string().unwrap_or_default(),
                    }
                    .into(),
                )),
                Err(ureq::Error::Transport(transport)) => Err(Attempt::Transient(transport.to_string())),
            }
        })
    }
}

/// Something that can tell whether the catalog host answers right now.
pub trait Reachability {
    fn is_reachable(&self) -> bool;
}

/// TCP connect probe against a host.
#[derive(Debug, Clone)]
pub struct HostProbe {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

impl HostProbe {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 80,
            timeout: Duration::from_secs(5),
        }
    }
}

impl Reachability for HostProbe {
    fn is_reachable(&self) -> bool {
        let addrs = match (self.host.as_str(), self.port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(err) => {
                debug!("Cannot resolve {}: {err}", self.host);
                return false;
            }
        };
        addrs
            .into_iter()
            .any(|addr| TcpStream::connect_timeout(&addr, self.timeout).is_ok())
    }
}

/// Exponential backoff schedule for [`wait_for_connection`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub factor: f64,
    /// Once the next step would exceed this, the connection counts as broken
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            factor: 1.5,
            cap: Duration::from_secs(60),
        }
    }
}

/// Block until `probe` succeeds, sleeping with exponential backoff between
/// probes. Fails once the backoff step grows past the cap, or with
/// [`signal::Interrupted`] on Ctrl-C.
pub fn wait_for_connection(probe: &dyn Reachability, backoff: &Backoff) -> Result<()> {
    let mut step = backoff.initial;
    while !probe.is_reachable() {
        warn!("Catalog unreachable, waiting {:.1}s", step.as_secs_f64());
        signal::check()?;
        thread::sleep(step);
        signal::check()?;
        step = step.mul_f64(backoff.factor);
        if step > backoff.cap {
            bail!("Connection broken: catalog still unreachable after backing off to {:?}", backoff.cap);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FlakyProbe {
        failures_left: Cell<u32>,
        probes: Cell<u32>,
    }

    impl FlakyProbe {
        fn new(failures: u32) -> Self {
            Self { failures_left: Cell::new(failures), probes: Cell::new(0) }
        }
    }

    impl Reachability for FlakyProbe {
        fn is_reachable(&self) -> bool {
            self.probes.set(self.probes.get() + 1);
            match self.failures_left.get() {
                0 => true,
                n => {
                    self.failures_left.set(n - 1);
                    false
                }
            }
        }
    }

    fn fast_backoff() -> Backoff {
        Backoff {
            initial: Duration::from_millis(1),
            factor: 1.5,
            cap: Duration::from_millis(60),
        }
    }

    #[test]
    fn test_retry_succeeds_after_transient_failures() -> Result<()> {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let mut calls = 0;
        let value = retry(&policy, "http://x", || {
            calls += 1;
            if calls < 3 {
                Err(Attempt::Transient("connection reset".into()))
            } else {
                Ok(42)
            }
        })?;
        assert_eq!(value, 42);
        assert_eq!(calls, 3);
        Ok(())
    }

    #[test]
    fn test_retry_gives_up_after_bound() {
        let policy = RetryPolicy::new(4, Duration::ZERO);
        let mut calls = 0;
        let err = retry::<()>(&policy, "http://x", || {
            calls += 1;
            Err(Attempt::Transient("timed out".into()))
        })
        .unwrap_err();

        assert_eq!(calls, 4);
        match err.downcast_ref::<FetchError>() {
            Some(FetchError::Unavailable { attempts, reason, .. }) => {
                assert_eq!(*attempts, 4);
                assert_eq!(reason, "timed out");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_retry_stops_on_fatal() {
        let policy = RetryPolicy::new(10, Duration::ZERO);
        let mut calls = 0;
        let err = retry::<()>(&policy, "http://x", || {
            calls += 1;
            Err(Attempt::Fatal(FetchError::QuotaExceeded { url: "http://x".into() }.into()))
        })
        .unwrap_err();

        assert_eq!(calls, 1);
        assert!(matches!(err.downcast_ref::<FetchError>(), Some(FetchError::QuotaExceeded { .. })));
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts, 1);
    }

    #[test]
    fn test_wait_returns_once_reachable() -> Result<()> {
        let probe = FlakyProbe::new(3);
        wait_for_connection(&probe, &fast_backoff())?;
        assert_eq!(probe.probes.get(), 4);
        Ok(())
    }

    #[test]
    fn test_wait_gives_up_past_cap() {
        let probe = FlakyProbe::new(u32::MAX);
        assert!(wait_for_connection(&probe, &fast_backoff()).is_err());
        // 1ms * 1.5^n exceeds 60ms after eleven sleeps.
        assert_eq!(probe.probes.get(), 11);
    }
}
