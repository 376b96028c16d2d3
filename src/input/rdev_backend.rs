//! rdev-based input injection backend
//! Works on Windows, macOS, and Linux (X11)

use rdev::EventType;
use tracing::trace;

use crate::input::{ActionError, InputAction, InputBackend};

/// Injects events through `rdev::simulate`
#[derive(Debug, Default)]
pub struct RdevBackend;

impl RdevBackend {
    /// Create a new rdev backend
    pub fn new() -> Self {
        Self
    }

    fn send(&self, action: InputAction, event: EventType) -> Result<(), ActionError> {
        trace!("Simulating {:?}", event);
        rdev::simulate(&event).map_err(|e| ActionError::Simulate {
            action,
            reason: format!("{:?}", e),
        })
    }
}

impl InputBackend for RdevBackend {
    fn press(&self, action: InputAction) -> Result<(), ActionError> {
        let event = match action {
            InputAction::Key(key) => EventType::KeyPress(key),
            InputAction::Click(button) => EventType::ButtonPress(button),
        };
        self.send(action, event)
    }

    fn release(&self, action: InputAction) -> Result<(), ActionError> {
        let event = match action {
            InputAction::Key(key) => EventType::KeyRelease(key),
            InputAction::Click(button) => EventType::ButtonRelease(button),
        };
        self.send(action, event)
    }
}
