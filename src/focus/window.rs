//! Window system trait

use std::sync::Arc;
use thiserror::Error;

/// A top-level window that can be brought to the foreground
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    /// Platform handle: an X11 window id, a macOS process name, or a
    /// Windows process id
    pub id: String,
    pub title: String,
}

#[derive(Debug, Error)]
pub enum FocusError {
    #[error("Failed to run {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} failed: {stderr}")]
    Tool { tool: &'static str, stderr: String },

    #[error("Window '{0}' refused activation")]
    Refused(String),
}

/// Access to the desktop's processes and windows.
///
/// Calls may block on helper processes; run them off the async threads.
pub trait WindowSystem: Send + Sync {
    /// Names of the running processes
    fn running_processes(&self) -> Result<Vec<String>, FocusError>;

    /// First visible window whose title contains `fragment`, ignoring case
    fn find_window(&self, fragment: &str) -> Result<Option<Window>, FocusError>;

    /// Raise `window` and give it keyboard focus
    fn activate(&self, window: &Window) -> Result<(), FocusError>;
}

/// Create the window system for the current platform
pub fn create_window_system() -> Arc<dyn WindowSystem> {
    #[cfg(target_os = "linux")]
    {
        if std::env::var("XDG_SESSION_TYPE").map(|s| s == "wayland").unwrap_or(false) {
            tracing::warn!("Wayland session detected; only XWayland windows can be focused");
        }
    }

    Arc::new(super::desktop::DesktopWindows)
}
