//! Action executor
//!
//! Turns a logical action identifier into injected input according to the
//! behavior profile. Every action runs on its own task so a long hold never
//! delays the next event, and injection failures stay inside that task.
//! When a focus tracker is attached, the target window is brought forward
//! first.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ActionKind, FocusConfig, KeyBehavior};
use crate::focus::FocusTracker;

use super::{canonical_name, parse_action, InputAction, InputBackend};

/// Gap between key down and key up for a momentary press
const TAP_DURATION: Duration = Duration::from_millis(10);

/// Pause after activating a window so it receives the input
const FOCUS_SETTLE: Duration = Duration::from_millis(50);

/// What `execute` decided to do
#[derive(Debug)]
pub enum Dispatched {
    /// Press, wait, release is running on the returned task
    Hold(JoinHandle<()>),
    /// A momentary press or click is running on the returned task
    Press(JoinHandle<()>),
    /// The identifier is in neither key list, or names no key
    Undefined,
}

impl Dispatched {
    /// Wait for the spawned action, if any, to finish
    pub async fn join(self) {
        match self {
            Dispatched::Hold(handle) | Dispatched::Press(handle) => {
                if let Err(e) = handle.await {
                    error!("Action task failed: {}", e);
                }
            }
            Dispatched::Undefined => {}
        }
    }
}

/// Dispatches actions to an input backend
#[derive(Clone)]
pub struct ActionExecutor {
    backend: Arc<dyn InputBackend>,
    focus: Option<Arc<FocusTracker>>,
}

impl ActionExecutor {
    pub fn new(backend: Arc<dyn InputBackend>) -> Self {
        Self {
            backend,
            focus: None,
        }
    }

    /// Focus the target window before every action
    pub fn with_focus(mut self, tracker: Arc<FocusTracker>) -> Self {
        self.focus = Some(tracker);
        self
    }

    /// Start the action for `identifier` and return without waiting for it.
    /// `focus` picks the window to bring forward first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn execute(
        &self,
        identifier: &str,
        behavior: &KeyBehavior,
        focus: &FocusConfig,
    ) -> Dispatched {
        let name = canonical_name(identifier);
        let kind = behavior.classify(&name);
        if kind == ActionKind::Undefined {
            warn!("Action for key '{}' is not defined.", name.to_uppercase());
            return Dispatched::Undefined;
        }

        let action = match parse_action(&name) {
            Ok(action) => action,
            Err(e) => {
                error!("Cannot perform '{}': {}", name, e);
                return Dispatched::Undefined;
            }
        };

        let backend = self.backend.clone();
        let target = self.focus.clone().map(|tracker| (tracker, focus.clone()));
        match kind {
            ActionKind::Hold => {
                let duration = behavior.hold_duration();
                Dispatched::Hold(tokio::spawn(async move {
                    bring_forward(target).await;
                    hold(backend, action, name, duration).await
                }))
            }
            ActionKind::SinglePress => Dispatched::Press(tokio::spawn(async move {
                bring_forward(target).await;
                tap(backend, action, name).await
            })),
            ActionKind::Undefined => Dispatched::Undefined,
        }
    }
}

async fn bring_forward(target: Option<(Arc<FocusTracker>, FocusConfig)>) {
    let Some((tracker, config)) = target else {
        return;
    };
    match tokio::task::spawn_blocking(move || tracker.focus(&config)).await {
        Ok(true) => tokio::time::sleep(FOCUS_SETTLE).await,
        Ok(false) => debug!("Could not focus any game window. Input goes to the active window."),
        Err(e) => error!("Window focus task failed: {}", e),
    }
}

async fn hold(backend: Arc<dyn InputBackend>, action: InputAction, name: String, duration: Duration) {
    if let Err(e) = backend.press(action) {
        error!("Error while pressing key '{}': {}", name.to_uppercase(), e);
        return;
    }
    tokio::time::sleep(duration).await;
    if let Err(e) = backend.release(action) {
        error!("Error while releasing key '{}': {}", name.to_uppercase(), e);
        return;
    }
    info!(
        "ACTION: HOLD/RELEASED '{}' for {:.2}s",
        name.to_uppercase(),
        duration.as_secs_f64()
    );
}

async fn tap(backend: Arc<dyn InputBackend>, action: InputAction, name: String) {
    if let Err(e) = backend.press(action) {
        error!("Error while pressing key '{}': {}", name.to_uppercase(), e);
        return;
    }
    tokio::time::sleep(TAP_DURATION).await;
    if let Err(e) = backend.release(action) {
        error!("Error while releasing key '{}': {}", name.to_uppercase(), e);
        return;
    }
    match action {
        InputAction::Click(button) => info!("ACTION: CLICK {:?} Mouse Button.", button),
        InputAction::Key(_) => info!("ACTION: PRESS Key '{}'.", name.to_uppercase()),
    }
}
