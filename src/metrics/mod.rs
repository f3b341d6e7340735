mod aggregator;
mod store;
mod types;
mod window;

pub use aggregator::{AggregatorConfig, MetricsAggregator};
pub use store::MetricsStore;
pub use types::{HeartRateSample, MovementSample, ProximitySample, ScreenLock};
pub use window::SampleWindow;
