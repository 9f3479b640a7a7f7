//! WebSocket server for the filedepot service.
//!
//! Accepts client connections, runs one read/write pump pair per
//! connection, and dispatches the three depot operations (streamed upload,
//! streamed download, directory listing) to [`filedepot_store::Depot`].
//! Each inbound call runs as its own task; concurrency bounding lives in
//! the store's admission controller, not here.

mod connection;
mod server;
mod service;

pub use connection::{SendError, Sender};
pub use server::{DepotServer, ServerConfig};

/// Outbound send buffer, in WebSocket messages.
///
/// Download chunks go through this channel with backpressure, so it only
/// needs to smooth bursts, not hold a transfer.
pub const SEND_BUFFER_SIZE: usize = 64;

/// Errors produced by the depot server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
