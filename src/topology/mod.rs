//! Value types shared by the view state machine: instances, views, events
//! and the instance-level diff between two views.

mod diff;
mod event;
mod instance;
mod view;
pub use diff::*;
pub use event::*;
pub use instance::*;
pub use view::*;
