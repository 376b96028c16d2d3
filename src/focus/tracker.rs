//! Which window should receive the next injected action

use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::FocusConfig;

use super::{Window, WindowSystem};

/// Remembers the auto-detected game window and brings the right window
/// forward before an action.
///
/// All methods block on the window system.
pub struct FocusTracker {
    windows: Arc<dyn WindowSystem>,
    detected: Mutex<Option<Window>>,
}

impl FocusTracker {
    pub fn new(windows: Arc<dyn WindowSystem>) -> Self {
        Self {
            windows,
            detected: Mutex::new(None),
        }
    }

    pub fn detected(&self) -> Option<Window> {
        self.slot().clone()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Window>> {
        self.detected.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Look for a window belonging to the first running process in `known`
    /// and remember it. A process matches by name ignoring case; its window
    /// matches when the title contains the name without extension.
    pub fn detect(&self, known: &[String]) {
        let running = match self.windows.running_processes() {
            Ok(running) => running,
            Err(e) => {
                debug!("Error during game window detection: {}", e);
                return;
            }
        };

        let found = known
            .iter()
            .filter(|name| running.iter().any(|r| r.eq_ignore_ascii_case(name)))
            .find_map(|name| match self.windows.find_window(&base_name(name)) {
                Ok(window) => window,
                Err(e) => {
                    debug!("Error looking for the '{}' window: {}", name, e);
                    None
                }
            });

        let mut slot = self.slot();
        match found {
            Some(window) if slot.as_ref().map(|w| &w.title) != Some(&window.title) => {
                info!("Auto-detected game window: '{}'", window.title);
                *slot = Some(window);
            }
            Some(_) => {}
            None => {
                if slot.take().is_some() {
                    info!("Previously detected game window closed.");
                }
            }
        }
    }

    /// Bring the target window forward. Returns whether a window was
    /// activated; failures are logged and never propagated.
    ///
    /// A manual title wins over auto-detection.
    pub fn focus(&self, config: &FocusConfig) -> bool {
        let title = config.manual_focus_title.trim();
        let target = if !title.is_empty() {
            match self.windows.find_window(title) {
                Ok(Some(window)) => window,
                Ok(None) => {
                    warn!("Manual focus window '{}' not found.", title);
                    return false;
                }
                Err(e) => {
                    error!("Failed to look up window '{}': {}", title, e);
                    return false;
                }
            }
        } else if config.auto_focus_enabled {
            let Some(remembered) = self.detected() else {
                return false;
            };
            // The window may have closed since the last detection pass
            match self.windows.find_window(&remembered.title) {
                Ok(Some(window)) => window,
                _ => {
                    *self.slot() = None;
                    return false;
                }
            }
        } else {
            return false;
        };

        match self.windows.activate(&target) {
            Ok(()) => {
                debug!("Activated window: {}", target.title);
                true
            }
            Err(e) => {
                error!("Failed to activate window '{}': {}", target.title, e);
                false
            }
        }
    }
}

/// `cs2.exe` -> `cs2`
fn base_name(process: &str) -> String {
    process.split('.').next().unwrap_or(process).to_lowercase()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::focus::FocusError;
    use tokio::time::Instant;

    /// In-memory desktop that records activations with the (paused) tokio clock
    #[derive(Default)]
    pub struct FakeWindows {
        pub processes: Mutex<Vec<String>>,
        pub windows: Mutex<Vec<Window>>,
        pub activated: Mutex<Vec<(Instant, String)>>,
        pub refuse: bool,
    }

    impl FakeWindows {
        pub fn with(processes: &[&str], titles: &[&str]) -> Self {
            let fake = Self::default();
            fake.set(processes, titles);
            fake
        }

        pub fn set(&self, processes: &[&str], titles: &[&str]) {
            *self.processes.lock().unwrap() = processes.iter().map(|p| p.to_string()).collect();
            *self.windows.lock().unwrap() = titles
                .iter()
                .enumerate()
                .map(|(i, title)| Window {
                    id: i.to_string(),
                    title: title.to_string(),
                })
                .collect();
        }

        pub fn activated(&self) -> Vec<(Instant, String)> {
            self.activated.lock().unwrap().clone()
        }
    }

    impl WindowSystem for FakeWindows {
        fn running_processes(&self) -> Result<Vec<String>, FocusError> {
            Ok(self.processes.lock().unwrap().clone())
        }

        fn find_window(&self, fragment: &str) -> Result<Option<Window>, FocusError> {
            let fragment = fragment.to_lowercase();
            Ok(self
                .windows
                .lock()
                .unwrap()
                .iter()
                .find(|w| w.title.to_lowercase().contains(&fragment))
                .cloned())
        }

        fn activate(&self, window: &Window) -> Result<(), FocusError> {
            if self.refuse {
                return Err(FocusError::Refused(window.title.clone()));
            }
            self.activated
                .lock()
                .unwrap()
                .push((Instant::now(), window.title.clone()));
            Ok(())
        }
    }

    fn known() -> Vec<String> {
        FocusConfig::default().known_game_processes
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("RobloxPlayerBeta.exe"), "robloxplayerbeta");
        assert_eq!(base_name("minecraft"), "minecraft");
    }

    #[tokio::test]
    async fn test_detects_window_of_running_game() {
        let fake = Arc::new(FakeWindows::with(
            &["explorer.exe", "CS2.EXE"],
            &["Notepad", "Counter-Strike 2 - cs2"],
        ));
        let tracker = FocusTracker::new(fake.clone());

        tracker.detect(&known());
        assert_eq!(
            tracker.detected().map(|w| w.title).as_deref(),
            Some("Counter-Strike 2 - cs2")
        );

        // The game exits
        fake.set(&["explorer.exe"], &["Notepad"]);
        tracker.detect(&known());
        assert_eq!(tracker.detected(), None);
    }

    #[tokio::test]
    async fn test_running_game_without_window_is_not_detected() {
        let fake = Arc::new(FakeWindows::with(&["dota2.exe"], &["Steam"]));
        let tracker = FocusTracker::new(fake);

        tracker.detect(&known());
        assert_eq!(tracker.detected(), None);
    }

    #[tokio::test]
    async fn test_manual_title_wins() {
        let fake = Arc::new(FakeWindows::with(&["cs2.exe"], &["cs2", "My Notes - Editor"]));
        let tracker = FocusTracker::new(fake.clone());
        tracker.detect(&known());

        let config = FocusConfig {
            manual_focus_title: "my notes".to_string(),
            ..FocusConfig::default()
        };
        assert!(tracker.focus(&config));
        let titles: Vec<String> = fake.activated().into_iter().map(|(_, t)| t).collect();
        assert_eq!(titles, vec!["My Notes - Editor"]);
    }

    #[tokio::test]
    async fn test_missing_manual_window_does_not_fall_back() {
        let fake = Arc::new(FakeWindows::with(&["cs2.exe"], &["cs2"]));
        let tracker = FocusTracker::new(fake.clone());
        tracker.detect(&known());

        let config = FocusConfig {
            manual_focus_title: "Minecraft".to_string(),
            ..FocusConfig::default()
        };
        assert!(!tracker.focus(&config));
        assert!(fake.activated().is_empty());
    }

    #[tokio::test]
    async fn test_auto_focus_respects_switch() {
        let fake = Arc::new(FakeWindows::with(&["cs2.exe"], &["cs2"]));
        let tracker = FocusTracker::new(fake.clone());
        tracker.detect(&known());

        let off = FocusConfig {
            auto_focus_enabled: false,
            ..FocusConfig::default()
        };
        assert!(!tracker.focus(&off));
        assert!(tracker.focus(&FocusConfig::default()));
        assert_eq!(fake.activated().len(), 1);
    }

    #[tokio::test]
    async fn test_closed_window_is_forgotten_on_focus() {
        let fake = Arc::new(FakeWindows::with(&["cs2.exe"], &["cs2"]));
        let tracker = FocusTracker::new(fake.clone());
        tracker.detect(&known());

        fake.set(&["cs2.exe"], &[]);
        assert!(!tracker.focus(&FocusConfig::default()));
        assert_eq!(tracker.detected(), None);
    }

    #[tokio::test]
    async fn test_activation_failure_is_reported_as_unfocused() {
        let fake = Arc::new(FakeWindows {
            refuse: true,
            ..FakeWindows::with(&[], &["Notepad"])
        });
        let tracker = FocusTracker::new(fake);

        let config = FocusConfig {
            manual_focus_title: "Notepad".to_string(),
            ..FocusConfig::default()
        };
        assert!(!tracker.focus(&config));
    }
}
