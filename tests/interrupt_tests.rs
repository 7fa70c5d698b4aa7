//! Ctrl-C handling outside the player.
//!
//! These share the process-wide interrupt flag, so they live in their own
//! test binary and take turns through [`FLAG`].

use anyhow::Result;
use serde_json::json;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use radiomuse::affinity::{AffinityStore, WeightPolicy};
use radiomuse::cache::ResponseCache;
use radiomuse::catalog::{CatalogTarget, CatalogWalker};
use radiomuse::db;
use radiomuse::http::{retry, wait_for_connection, Attempt, Backoff, Fetch, Reachability, RetryPolicy};
use radiomuse::outcome::{PlaybackSignals, RewardPolicy};
use radiomuse::playback::Playback;
use radiomuse::player::Player;
use radiomuse::radio::{History, SelectionLoop, Step, TemperatureSchedule};
use radiomuse::selection::{Blacklist, Selector};
use radiomuse::signal;

const HOME: &str = "http://opml.radiotime.com/";
const BROWSE: &str = "http://opml.radiotime.com/Browse.ashx";
const STREAM: &str = "http://stream.example/x";

static FLAG: Mutex<()> = Mutex::new(());

/// Exclusive use of the interrupt flag, starting from a cleared one.
fn exclusive_flag() -> MutexGuard<'static, ()> {
    let guard = FLAG.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    signal::take_interrupt();
    guard
}

/// Catalog whose category page is served while the user hits Ctrl-C.
struct CtrlCDuringWalk {
    raise: bool,
}

impl Fetch for CtrlCDuringWalk {
    fn fetch(&self, url: &str, _params: &[(&str, &str)]) -> Result<String> {
        let category = format!("{BROWSE}?id=c1");
        if url == BROWSE {
            return Ok(json!({"head": {"title": "Browse"}, "body": [{"URL": category}]}).to_string());
        }
        if self.raise {
            // SAFETY: raising a signal for which a handler is installed.
            unsafe {
                libc::raise(libc::SIGINT);
            }
        }
        Ok(json!({"head": {"title": "Music"}, "body": [{"url": STREAM}]}).to_string())
    }
}

struct FakePlayer {
    runs: RefCell<VecDeque<PlaybackSignals>>,
    played: RefCell<Vec<String>>,
}

impl FakePlayer {
    fn new(runs: Vec<PlaybackSignals>) -> Self {
        Self { runs: RefCell::new(runs.into()), played: RefCell::new(Vec::new()) }
    }
}

impl Player for FakePlayer {
    fn play(&self, url: &str) -> Result<PlaybackSignals> {
        self.played.borrow_mut().push(url.to_string());
        self.runs
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no scripted run left for {url}"))
    }
}

/// Host that stays down; the user gives up on the second probe.
struct DownUntilCtrlC {
    probes: Cell<u32>,
}

impl Reachability for DownUntilCtrlC {
    fn is_reachable(&self) -> bool {
        self.probes.set(self.probes.get() + 1);
        if self.probes.get() == 2 {
            signal::interrupt();
        }
        false
    }
}

fn run_for(secs: u64, stderr: &str) -> PlaybackSignals {
    PlaybackSignals {
        runtime: Duration::from_secs(secs),
        waited: Duration::from_secs(secs),
        step: Duration::from_secs(10),
        interrupted: false,
        stderr: vec![stderr.to_string()],
    }
}

fn fast_backoff() -> Backoff {
    Backoff {
        initial: Duration::from_millis(1),
        factor: 1.5,
        cap: Duration::from_secs(60),
    }
}

fn selection_loop<'a>(
    conn: &'a rusqlite::Connection,
    catalog: &'a CtrlCDuringWalk,
    player: &'a FakePlayer,
    probe: &'a dyn Reachability,
) -> Result<SelectionLoop<'a>> {
    let affinity = AffinityStore::new(conn, WeightPolicy::default());
    let selector = Selector::new(
        CatalogWalker::new(ResponseCache::new(conn), catalog, BROWSE),
        affinity,
        Blacklist::new(&["talk"])?,
        HOME,
        16,
    );
    let playback = Playback::new(player, catalog, probe, fast_backoff(), RewardPolicy::default());
    Ok(SelectionLoop::new(
        selector,
        playback,
        affinity,
        CatalogTarget::root(),
        History::new(Duration::ZERO),
        TemperatureSchedule::new(1.0, 0.5, Duration::from_secs(120)),
        Duration::ZERO,
    ))
}

#[test]
fn test_ctrl_c_during_walk_stops_before_playing() -> Result<()> {
    let _flag = exclusive_flag();
    signal::install()?;
    let conn = db::open_in_memory()?;
    let catalog = CtrlCDuringWalk { raise: true };
    let player = FakePlayer::new(vec![run_for(900, "Exiting... (Quit)")]);
    let probe = DownUntilCtrlC { probes: Cell::new(0) };

    let mut radio = selection_loop(&conn, &catalog, &player, &probe)?;
    assert_eq!(radio.step()?, Step::Stop);
    assert!(player.played.borrow().is_empty());
    assert_eq!(AffinityStore::new(&conn, WeightPolicy::default()).aggregate()?.1, 0);
    assert!(!signal::pending());
    Ok(())
}

#[test]
fn test_ctrl_c_during_connection_wait_stops_without_storing() -> Result<()> {
    let _flag = exclusive_flag();
    let conn = db::open_in_memory()?;
    let catalog = CtrlCDuringWalk { raise: false };
    let player = FakePlayer::new(vec![run_for(900, "Exiting... (End of file)")]);
    let probe = DownUntilCtrlC { probes: Cell::new(0) };

    let mut radio = selection_loop(&conn, &catalog, &player, &probe)?;
    assert_eq!(radio.step()?, Step::Stop);
    assert_eq!(*player.played.borrow(), vec![STREAM.to_string()]);
    assert_eq!(probe.probes.get(), 2);
    assert!(AffinityStore::new(&conn, WeightPolicy::default()).node(STREAM)?.is_none());
    assert!(!signal::pending());
    Ok(())
}

#[test]
fn test_ctrl_c_aborts_retries() {
    let _flag = exclusive_flag();
    let policy = RetryPolicy::new(10, Duration::from_millis(1));
    let mut calls = 0;
    let err = retry::<()>(&policy, "http://x", || {
        calls += 1;
        signal::interrupt();
        Err(Attempt::Transient("connection reset".into()))
    })
    .unwrap_err();

    assert_eq!(calls, 1);
    assert!(signal::is_interrupted(&err));
    signal::take_interrupt();
}

#[test]
fn test_ctrl_c_aborts_connection_wait() {
    let _flag = exclusive_flag();
    let probe = DownUntilCtrlC { probes: Cell::new(0) };
    let err = wait_for_connection(&probe, &fast_backoff()).unwrap_err();

    assert!(signal::is_interrupted(&err));
    assert_eq!(probe.probes.get(), 2);
    signal::take_interrupt();
}
