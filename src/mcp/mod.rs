//! Model Context Protocol client
//!
//! JSON-RPC 2.0 over stdio, streamable HTTP or HTTP+SSE, with a session
//! layer that performs the initialize handshake and correlates responses.

pub mod codec;
pub mod session;
pub mod transport;
pub mod types;

pub use session::Session;
pub use transport::{create_transport, Transport, TransportKind};
pub use types::*;
