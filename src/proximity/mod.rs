mod link;
mod monitor;

pub use link::{ProximityError, ProximityEvent, ProximityLink};
pub use monitor::{MonitorState, ProximityMonitor};
