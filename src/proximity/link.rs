use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

/// Classified short-range radio failures. A failed link degrades to
/// "no sample" and must be explicitly restarted.
#[derive(Debug, Error)]
pub enum ProximityError {
    #[error("radio unavailable: {0}")]
    Unavailable(String),
    #[error("connect to {address} failed: {reason}")]
    ConnectFailed { address: String, reason: String },
    #[error("signal-strength read failed: {0}")]
    ReadFailed(String),
}

/// Asynchronous link-state notifications from the radio layer. The
/// underlying callback API is mapped to this explicit event stream so the
/// monitor never runs inside a radio callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProximityEvent {
    Connected,
    Disconnected { reason: Option<String> },
}

/// Opaque short-range radio link to one companion device.
#[async_trait]
pub trait ProximityLink: Send + Sync {
    async fn connect(&self, address: &str) -> Result<(), ProximityError>;
    /// Best-effort close; a no-op when nothing is connected.
    async fn disconnect(&self);
    /// Requests one signal-strength reading from the connected device.
    async fn read_signal_strength(&self) -> Result<i16, ProximityError>;
    fn subscribe(&self) -> broadcast::Receiver<ProximityEvent>;
}
