//! The JSON message envelope and the depot's reply-correlation rules.
//!
//! Every reply constructor on [`Message`] reuses the request envelope id,
//! which is the protocol's only correlation mechanism: `upload_ack` (or
//! the error replacing it) answers the `upload_begin` id, `download_done`
//! answers the `download_file` id, and download chunk frames reuse that
//! same id as their transfer id.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::constants::MessageType;
use crate::messages::{
    DownloadDoneResponse, FileInfo, FilesInfoResponse, UploadAckResponse, UploadReadyResponse,
};

/// Error details in a WebSocket message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsError {
    pub code: i32,
    pub message: String,
}

/// Envelope for all text (JSON) WebSocket communication.
///
/// The payload stays raw until the message type is known;
/// [`Message::decode`] deserializes it on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WsError>,
}

/// Failure to decode a message payload.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("message carries no payload")]
    MissingPayload,
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl Message {
    fn carrying<T: Serialize>(
        id: &str,
        msg_type: MessageType,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: id.to_string(),
            msg_type,
            payload: Some(serde_json::value::to_raw_value(payload)?),
            error: None,
        })
    }

    /// Builds a request carrying a typed payload.
    pub fn request<T: Serialize>(
        id: impl Into<String>,
        msg_type: MessageType,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Self::carrying(&id.into(), msg_type, payload)
    }

    /// Builds a payload-free message (`list_files` is the only one).
    pub fn bare(id: impl Into<String>, msg_type: MessageType) -> Self {
        Self {
            id: id.into(),
            msg_type,
            payload: None,
            error: None,
        }
    }

    /// Decodes the payload.
    ///
    /// Every typed payload in this protocol is mandatory, so a missing
    /// payload is an error in its own right.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, DecodeError> {
        let raw = self.payload.as_deref().ok_or(DecodeError::MissingPayload)?;
        Ok(serde_json::from_str(raw.get())?)
    }

    /// `upload_ready` reply to an `upload_begin`: the stream is open and
    /// chunk frames carrying `transfer_id` may flow.
    pub fn upload_ready(
        &self,
        transfer_id: &str,
        chunk_size: usize,
    ) -> Result<Self, serde_json::Error> {
        let ready = UploadReadyResponse {
            transfer_id: transfer_id.to_string(),
            chunk_size,
        };
        Self::carrying(&self.id, MessageType::UploadReady, &ready)
    }

    /// Final `upload_ack`, answering the `upload_begin` id.
    pub fn upload_ack(
        &self,
        transfer_id: impl Into<String>,
        bytes_written: u64,
    ) -> Result<Self, serde_json::Error> {
        let ack = UploadAckResponse {
            transfer_id: transfer_id.into(),
            bytes_written,
        };
        Self::carrying(&self.id, MessageType::UploadAck, &ack)
    }

    /// `download_done` after the last chunk. Chunk frames reuse the
    /// `download_file` request id as their transfer id, so the done
    /// payload carries that same id.
    pub fn download_done(&self, bytes_sent: u64) -> Result<Self, serde_json::Error> {
        let done = DownloadDoneResponse {
            transfer_id: self.id.clone(),
            bytes_sent,
        };
        Self::carrying(&self.id, MessageType::DownloadDone, &done)
    }

    /// `files_info` reply to a `list_files`.
    pub fn files_info(&self, infos: Vec<FileInfo>) -> Result<Self, serde_json::Error> {
        Self::carrying(&self.id, MessageType::FilesInfo, &FilesInfoResponse { infos })
    }

    /// Error reply to this request.
    pub fn reject(&self, code: i32, reason: impl Into<String>) -> Self {
        Self::transfer_error(&self.id, code, reason)
    }

    /// Standalone error keyed by a transfer id instead of a request id
    /// (chunk frames have no request envelope to answer).
    pub fn transfer_error(id: impl Into<String>, code: i32, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            msg_type: MessageType::Error,
            payload: None,
            error: Some(WsError {
                code,
                message: reason.into(),
            }),
        }
    }
}
