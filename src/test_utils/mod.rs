//! Shared fixtures of the view state unit tests: view builders, recording
//! listeners and hand-driven collaborators.
mod common;
mod mock;

pub use common::*;
pub use mock::*;
