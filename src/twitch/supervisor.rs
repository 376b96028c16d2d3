//! Reconnection supervisor
//!
//! Keeps an EventSub session alive: transient faults are retried with
//! exponential backoff, authorization faults and cancellation end the loop.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::session::{Connector, SessionEnd, SessionError, SessionState, SubscriptionStatus};

pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Doubling delay between reconnection attempts
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            next: INITIAL_BACKOFF,
        }
    }

    /// Delay to wait now; the following one doubles up to the ceiling
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(MAX_BACKOFF);
        delay
    }

    pub fn reset(&mut self) {
        self.next = INITIAL_BACKOFF;
    }
}

/// Why the supervisor stopped
#[derive(Debug)]
pub enum SupervisorExit {
    /// The cancellation token fired
    Cancelled,
    /// The credential was rejected; retrying with it is pointless
    AuthorizationFailed(SessionError),
}

/// Run sessions until cancelled or an authorization fault occurs
pub async fn run<C: Connector>(connector: &mut C, cancel: &CancellationToken) -> SupervisorExit {
    let mut backoff = Backoff::new();

    loop {
        let mut state = SessionState::default();
        let result = connector.serve(&mut state, cancel).await;

        if state.subscription == SubscriptionStatus::Confirmed {
            backoff.reset();
        }

        match result {
            Ok(SessionEnd::Cancelled) => return SupervisorExit::Cancelled,
            Ok(SessionEnd::ReconnectRequested) => {
                info!("Server requested a reconnect");
            }
            Err(e) if e.is_authorization() => {
                error!("Authorization failed: {}", e);
                return SupervisorExit::AuthorizationFailed(e);
            }
            Err(e) => {
                warn!("EventSub connection ended: {}", e);
            }
        }

        if cancel.is_cancelled() {
            return SupervisorExit::Cancelled;
        }

        let delay = backoff.next_delay();
        warn!("Retrying in {}s...", delay.as_secs());
        tokio::select! {
            _ = cancel.cancelled() => return SupervisorExit::Cancelled,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
