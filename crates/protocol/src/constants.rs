use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Size of outbound download chunks (1 MiB).
///
/// The download handler never emits a binary payload larger than this,
/// so client memory per transfer stays bounded regardless of file size.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Maximum accepted size for an inbound upload chunk (4 MiB).
///
/// Advertised to clients in `upload_ready`. Chunks above this limit are
/// rejected so a single call cannot balloon server memory.
pub const MAX_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Maximum WebSocket message size (8 MiB).
///
/// Leaves headroom over [`MAX_CHUNK_SIZE`] for the chunk frame header.
pub const WS_MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// How often the server sends WebSocket pings.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(5);

/// Read deadline: if nothing arrives within this window (no pong, no
/// request, no chunk) the connection is considered dead. Set high enough
/// to tolerate slow chunk production during large transfers.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// WebSocket message type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Requests from client to server
    #[serde(rename = "upload_begin")]
    UploadBegin,
    #[serde(rename = "upload_done")]
    UploadDone,
    #[serde(rename = "upload_abort")]
    UploadAbort,
    #[serde(rename = "download_file")]
    DownloadFile,
    #[serde(rename = "list_files")]
    ListFiles,

    // Responses from server to client
    #[serde(rename = "upload_ready")]
    UploadReady,
    #[serde(rename = "upload_ack")]
    UploadAck,
    #[serde(rename = "download_done")]
    DownloadDone,
    #[serde(rename = "files_info")]
    FilesInfo,
    #[serde(rename = "error")]
    Error,

    /// Forward compatibility: unknown message types deserialize here.
    #[serde(other)]
    Unknown,
}

/// Wire error codes.
pub const WS_ERR_CODE_BAD_REQUEST: i32 = 400;
pub const WS_ERR_CODE_NOT_FOUND: i32 = 404;
pub const WS_ERR_CODE_CONFLICT: i32 = 409;
pub const WS_ERR_CODE_ADMISSION: i32 = 429;
pub const WS_ERR_CODE_INTERNAL: i32 = 500;
pub const WS_ERR_CODE_NOT_IMPLEMENTED: i32 = 501;
