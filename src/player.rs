//! External stream player process.

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use wait_timeout::ChildExt;

use crate::outcome::PlaybackSignals;
use crate::signal;

/// Plays one stream to completion and reports what happened.
pub trait Player {
    fn play(&self, url: &str) -> Result<PlaybackSignals>;
}

/// Runs a command-line player with the stream URL as its only argument.
///
/// The terminal stays attached to the player's stdin and stdout so its key
/// bindings keep working. Stderr is captured for classification.
#[derive(Debug, Clone)]
pub struct StreamPlayer {
    command: String,
    step: Duration,
}

impl StreamPlayer {
    pub fn new(command: impl Into<String>, step: Duration) -> Self {
        Self {
            command: command.into(),
            step,
        }
    }
}

impl Player for StreamPlayer {
    fn play(&self, url: &str) -> Result<PlaybackSignals> {
        let wall_start = SystemTime::now();
        let start = Instant::now();
        let mut child = Command::new(&self.command)
            .arg(url)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start player `{}`", self.command))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("player stderr was not piped"))?;
        // Drained concurrently so a chatty player never blocks on a full pipe.
        let reader = thread::spawn(move || read_lines(stderr));

        let mut waited = Duration::ZERO;
        let mut interrupted = false;
        let status = loop {
            if let Some(status) = child.wait_timeout(self.step).context("Failed to wait for player")? {
                break status;
            }
            if signal::take_interrupt() {
                interrupted = true;
                child.kill().context("Failed to stop player")?;
                break child.wait().context("Failed to reap player")?;
            }
            waited += self.step;
        };
        let runtime = wall_runtime(wall_start, start.elapsed());
        interrupted |= signal::take_interrupt();

        let stderr = reader
            .join()
            .map_err(|_| anyhow!("player stderr reader panicked"))?
            .context("Failed to read player stderr")?;

        debug!("Player exited with {status} after {runtime:?} ({} stderr lines)", stderr.len());
        if interrupted {
            info!("Playback interrupted by user");
        }
        Ok(PlaybackSignals {
            runtime,
            waited,
            step: self.step,
            interrupted,
            stderr,
        })
    }
}

/// Time since `wall_start` on the system clock, which keeps counting while
/// the host is suspended. The monotonic figure is used if the clock stepped
/// backwards.
fn wall_runtime(wall_start: SystemTime, monotonic: Duration) -> Duration {
    match wall_start.elapsed() {
        Ok(elapsed) => elapsed,
        Err(err) => {
            debug!("System clock went back by {:?}", err.duration());
            monotonic
        }
    }
}

/// Split a byte stream into lines on `\n` and `\r`, decoding lossily.
fn read_lines(stream: impl Read) -> std::io::Result<Vec<String>> {
    let mut reader = BufReader::new(stream);
    let mut lines = Vec::new();
    let mut buffer = Vec::new();
    while reader.read_until(b'\n', &mut buffer)? > 0 {
        for part in buffer.split(|byte| *byte == b'\n' || *byte == b'\r') {
            if !part.is_empty() {
                lines.push(String::from_utf8_lossy(part).into_owned());
            }
        }
        buffer.clear();
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_lines_splits_carriage_returns() -> Result<()> {
        let raw: &[u8] = b"A: 00:01\rA: 00:02\r\n\nExiting... (Quit)\n\xff tail";
        let lines = read_lines(raw)?;
        assert_eq!(lines, vec!["A: 00:01", "A: 00:02", "Exiting... (Quit)", "\u{fffd} tail"]);
        Ok(())
    }

    #[test]
    fn test_wall_clock_exposes_host_sleep() {
        // Three hours asleep, ten minutes of polling seen by the monotonic clock.
        let waited = Duration::from_secs(600);
        let wall_start = SystemTime::now() - Duration::from_secs(3 * 3600 + 600);
        let signals = PlaybackSignals {
            runtime: wall_runtime(wall_start, waited),
            waited,
            step: Duration::from_secs(10),
            interrupted: false,
            stderr: vec!["Exiting... (Quit)".to_string()],
        };

        assert!(signals.runtime >= Duration::from_secs(3 * 3600 + 600));
        assert!(signals.suspended());
        assert_eq!(signals.effective_runtime(), Duration::from_secs(605));
    }

    #[test]
    fn test_clock_stepping_back_falls_back_to_monotonic() {
        let future = SystemTime::now() + Duration::from_secs(3600);
        assert_eq!(wall_runtime(future, Duration::from_secs(42)), Duration::from_secs(42));
    }

    #[cfg(unix)]
    #[test]
    fn test_stream_player_captures_stderr() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let script = dir.path().join("fakeplayer.sh");
        std::fs::write(&script, "echo \"playing $0\" >&2\necho 'Exiting... (Quit)' >&2\n")?;
        let target = script.to_string_lossy().into_owned();

        // `sh <script>` stands in for `<player> <url>`.
        let player = StreamPlayer::new("sh", Duration::from_millis(200));
        let signals = player.play(&target)?;

        assert_eq!(signals.stderr, vec![format!("playing {target}"), "Exiting... (Quit)".to_string()]);
        assert_eq!(signals.step, Duration::from_millis(200));
        Ok(())
    }

    #[test]
    fn test_missing_player_is_an_error() {
        let player = StreamPlayer::new("/nonexistent/radiomuse-player", Duration::from_secs(1));
        assert!(player.play("http://x").is_err());
    }
}
