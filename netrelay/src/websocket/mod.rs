pub mod connection_registry;
pub mod handler;

pub use connection_registry::{ConnectionId, ConnectionRegistry, PeerSender};
pub use handler::{websocket_handler, DisconnectReason};
