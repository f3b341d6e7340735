mod manager;
mod state;
mod transport;

pub use manager::ConnectionManager;
pub use state::{ConnectionInfo, ConnectionState, RetryPolicy, SessionTarget};
pub use transport::{ConnectError, LinkEvent, SessionLink, SessionTransport, WsTransport};
