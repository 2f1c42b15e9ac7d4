// Shared real-time connection: endpoint, transport and reconnecting manager

mod endpoint;
mod manager;
pub mod transport;

pub use endpoint::{Endpoint, DEFAULT_PATH};
pub use manager::{ConnectionManager, ConnectionState, ConnectionStatus, FrameRouter};
pub use transport::{Link, Transport, WebSocketTransport};
