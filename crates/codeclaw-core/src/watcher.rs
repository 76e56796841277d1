//! Filesystem watch over the source roots, bridged into the daemon's channel.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const POLL: Duration = Duration::from_millis(100);

/// Handle to a running watcher thread. Dropping it stops the thread.
#[derive(Debug)]
pub struct WatchHandle {
    stop: std_mpsc::SyncSender<()>,
}

impl WatchHandle {
    pub fn stop(&self) {
        let _ = self.stop.try_send(());
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn is_relevant(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event.paths.iter().any(|p| {
        p.extension()
            .is_some_and(|ext| ext == "jsonl" || ext == "json")
    })
}

/// Watch `roots` recursively. A burst of session-file changes produces one
/// `()` on `tx` once no further change arrived for `debounce`.
#[must_use]
pub fn spawn_watcher(roots: Vec<PathBuf>, debounce: Duration, tx: mpsc::Sender<()>) -> WatchHandle {
    let (stop_tx, stop_rx) = std_mpsc::sync_channel::<()>(1);

    std::thread::spawn(move || {
        let (raw_tx, raw_rx) = std_mpsc::channel::<notify::Result<Event>>();
        let mut watcher = match RecommendedWatcher::new(raw_tx, notify::Config::default()) {
            Ok(w) => w,
            Err(e) => {
                log::error!("Watcher init failed: {e}");
                return;
            }
        };

        for root in &roots {
            match watcher.watch(root, RecursiveMode::Recursive) {
                Ok(()) => log::info!("Watching {}", root.display()),
                Err(e) => log::warn!("Cannot watch {}: {e}", root.display()),
            }
        }

        let mut dirty_since: Option<Instant> = None;
        loop {
            if stop_rx.try_recv().is_ok() {
                break;
            }

            match raw_rx.recv_timeout(POLL) {
                Ok(Ok(event)) => {
                    if is_relevant(&event) {
                        dirty_since = Some(Instant::now());
                    }
                }
                Ok(Err(e)) => log::warn!("Watch error: {e}"),
                Err(std_mpsc::RecvTimeoutError::Timeout) => {}
                Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
            }

            if dirty_since.is_some_and(|t| t.elapsed() >= debounce) {
                dirty_since = None;
                if tx.blocking_send(()).is_err() {
                    break;
                }
            }
        }
        log::debug!("Watcher thread stopped");
    });

    WatchHandle { stop: stop_tx }
}
