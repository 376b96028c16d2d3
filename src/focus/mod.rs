//! Window focus: bring the game window forward before injecting input
//!
//! A background detector looks for windows of known game processes every
//! few seconds. Before each action the executor asks the [`FocusTracker`] to
//! activate either the manually configured window or the detected one.

mod desktop;
pub(crate) mod tracker;
mod window;

pub use tracker::FocusTracker;
pub use window::*;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::SharedConfig;

/// Time between two detection passes
pub const DETECT_INTERVAL: Duration = Duration::from_secs(5);

/// Run detection passes until cancelled. Passes are skipped while
/// auto-focus is switched off; the known process list is re-read each time.
pub async fn run_detector(
    tracker: Arc<FocusTracker>,
    config: SharedConfig,
    cancel: CancellationToken,
) {
    debug!("Game window detector started");
    loop {
        let (enabled, known) = {
            let config = config.read();
            (
                config.focus.auto_focus_enabled,
                config.focus.known_game_processes.clone(),
            )
        };

        if enabled {
            let tracker = tracker.clone();
            let pass = tokio::task::spawn_blocking(move || tracker.detect(&known));
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = pass => {
                    if let Err(e) = result {
                        error!("Game window detection failed: {}", e);
                    }
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(DETECT_INTERVAL) => {}
        }
    }
    debug!("Game window detector stopped");
}

#[cfg(test)]
mod tests {
    use super::tracker::tests::FakeWindows;
    use super::*;
    use crate::config::Config;

    fn shared(dir: &tempfile::TempDir) -> SharedConfig {
        SharedConfig::new(Config::load_from(dir.path().join("config.toml")).unwrap())
    }

    #[tokio::test]
    async fn test_detector_follows_game_and_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeWindows::with(&["cs2.exe"], &["cs2"]));
        let tracker = Arc::new(FocusTracker::new(fake.clone()));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_detector(tracker.clone(), shared(&dir), cancel.clone()));

        // First pass runs immediately
        for _ in 0..100 {
            if tracker.detected().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(tracker.detected().map(|w| w.title).as_deref(), Some("cs2"));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("detector should stop promptly")
            .unwrap();
    }

    #[tokio::test]
    async fn test_detector_idles_while_auto_focus_is_off() {
        let dir = tempfile::tempdir().unwrap();
        let config = shared(&dir);
        config.update(|c| c.focus.auto_focus_enabled = false).unwrap();

        let fake = Arc::new(FakeWindows::with(&["cs2.exe"], &["cs2"]));
        let tracker = Arc::new(FocusTracker::new(fake));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_detector(tracker.clone(), config, cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(tracker.detected(), None);

        cancel.cancel();
        task.await.unwrap();
    }
}
