mod dispatcher;
mod types;

pub use dispatcher::{EventDispatcher, EventHandler};
pub use types::{InboundEvent, OutboundEvent, TimerConfig, TimerPhase};
