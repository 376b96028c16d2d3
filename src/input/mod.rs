//! Input injection: key names, backends and the action executor

mod backend;
pub(crate) mod executor;
mod keys;
pub(crate) mod rdev_backend;

pub use backend::*;
pub use executor::{ActionExecutor, Dispatched};
pub use keys::{canonical_name, parse_action, InputAction};
