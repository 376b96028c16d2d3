//! Twitch EventSub: Helix calls, message decoding, session driver and the
//! reconnection supervisor

pub mod api;
pub mod messages;
pub mod session;
pub mod supervisor;

pub use messages::RedemptionEvent;
pub use session::{EventSubSession, SessionError};
pub use supervisor::SupervisorExit;
