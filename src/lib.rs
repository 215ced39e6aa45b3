//! Topology view state management for a cluster discovery layer.
//!
//! Tracks the sequence of topology views computed by a discovery mechanism
//! and reliably notifies a dynamic set of listeners about them:
//! TOPOLOGY_INIT once per listener, TOPOLOGY_CHANGING / TOPOLOGY_CHANGED
//! around membership changes and PROPERTIES_CHANGED when only instance
//! properties differ. Finalization of a change can be delayed to absorb
//! flapping and gated through an external consistency service.
//!
//! This crate does not discover instances nor perform network I/O; it only
//! decides when and how listeners learn about a topology computed elsewhere.

mod config;
mod constants;
mod errors;
mod topology;
mod view_state;

pub use config::*;
pub use errors::*;
pub use topology::*;
pub use view_state::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub(crate) mod test_utils;
