//! Input injection backend trait

use std::sync::Arc;
use thiserror::Error;

use super::InputAction;

/// Failure to produce an OS-level input event
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Unknown key or button '{0}'")]
    UnknownKey(String),

    #[error("Failed to simulate {action:?}: {reason}")]
    Simulate { action: InputAction, reason: String },
}

/// Trait for input injection backends
pub trait InputBackend: Send + Sync {
    /// Put a key or mouse button down
    fn press(&self, action: InputAction) -> Result<(), ActionError>;

    /// Let a key or mouse button up
    fn release(&self, action: InputAction) -> Result<(), ActionError>;
}

/// Create the input backend for the current platform
pub fn create_input_backend() -> Arc<dyn InputBackend> {
    #[cfg(target_os = "linux")]
    {
        if std::env::var("XDG_SESSION_TYPE").map(|s| s == "wayland").unwrap_or(false) {
            tracing::warn!("Wayland session detected; simulated input may only reach XWayland windows");
        }
    }

    tracing::info!("Using rdev backend for input injection");
    Arc::new(super::rdev_backend::RdevBackend::new())
}
