//! Request and response payloads for the filedepot operations.
//!
//! Correlation rules: replies reuse the request envelope id. An upload is
//! acknowledged (`upload_ack`) or failed against the `upload_begin` id once
//! its inbound stream ends; chunk frames carry the transfer id instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Opens an upload stream for a new file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadBeginRequest {
    pub file_name: String,
}

/// Signals normal end-of-stream for an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDoneRequest {
    pub transfer_id: String,
}

/// Cancels an in-flight upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAbortRequest {
    pub transfer_id: String,
}

/// Requests a streamed download of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadFileRequest {
    pub file_name: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Reply to `upload_begin`: the stream is admitted and chunks may flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReadyResponse {
    pub transfer_id: String,
    /// Largest accepted chunk payload, in bytes.
    pub chunk_size: usize,
}

/// Final acknowledgment for a completed upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAckResponse {
    pub transfer_id: String,
    pub bytes_written: u64,
}

/// Sent after the last download chunk of a transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadDoneResponse {
    pub transfer_id: String,
    pub bytes_sent: u64,
}

/// One storage entry in a `files_info` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Reply to `list_files`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesInfoResponse {
    pub infos: Vec<FileInfo>,
}
