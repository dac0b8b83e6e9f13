//! Async driver: feeds commands into the shared `GateTimer` one at a time and
//! fires calibration timeouts.

use crate::calibration::CalibrationPhase;
use crate::timer::{Command, GateTimer, TimerEvent};
use futures_util::{stream, Stream, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

/// Process `commands` until the stream ends.
///
/// The lock is only held while a single command is handled, never across an
/// await, so other tasks may take snapshots between commands.
pub async fn run<S>(timer: Arc<Mutex<GateTimer>>, mut commands: S, events: mpsc::UnboundedSender<TimerEvent>)
where
    S: Stream<Item = Command> + Unpin,
{
    // Phase being timed and when it expires
    let mut deadline: Option<(CalibrationPhase, Instant)> = None;

    loop {
        let expiry = deadline.map(|(_, at)| at);
        let timeout = async move {
            match expiry {
                Some(at) => sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        let out = tokio::select! {
            cmd = commands.next() => match cmd {
                Some(cmd) => timer.lock().handle(cmd),
                None => break,
            },
            _ = timeout => {
                tracing::warn!("calibration phase timed out");
                timer.lock().calibration_timeout()
            }
        };
        for ev in out {
            if events.send(ev).is_err() {
                tracing::debug!("event receiver dropped");
            }
        }

        deadline = match timer.lock().phase_timeout() {
            Some((phase, _)) if deadline.map(|(p, _)| p) == Some(phase) => deadline,
            Some((phase, timeout)) => Some((phase, Instant::now() + timeout)),
            None => None,
        };
    }
    tracing::info!("command stream ended");
}

/// Newline-delimited JSON commands. Blank lines are skipped; malformed lines are logged and skipped.
pub fn json_lines<R>(reader: R) -> impl Stream<Item = Command>
where
    R: AsyncBufRead + Unpin,
{
    stream::unfold(reader.lines(), |mut lines| async move {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Command>(line) {
                        Ok(cmd) => return Some((cmd, lines)),
                        Err(e) => tracing::warn!("skipping malformed command {:?}: {}", line, e),
                    }
                }
                Ok(None) => return None,
                Err(e) => {
                    tracing::warn!("command input failed: {}", e);
                    return None;
                }
            }
        }
    })
}
