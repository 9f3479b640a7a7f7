//! Per-connection dispatcher for the three depot operations.
//!
//! Each operation runs as its own task, mirroring an RPC runtime that
//! schedules one logical task per inbound call. The service only routes;
//! admission control and all file I/O live in the store.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use filedepot_protocol::constants::{
    MAX_CHUNK_SIZE, MessageType, WS_ERR_CODE_ADMISSION, WS_ERR_CODE_BAD_REQUEST,
    WS_ERR_CODE_CONFLICT, WS_ERR_CODE_INTERNAL, WS_ERR_CODE_NOT_FOUND,
    WS_ERR_CODE_NOT_IMPLEMENTED,
};
use filedepot_protocol::envelope::Message;
use filedepot_protocol::frame::{ChunkHeader, encode_chunk_frame, parse_chunk_frame};
use filedepot_protocol::messages::{
    DownloadFileRequest, FileInfo, UploadAbortRequest, UploadBeginRequest, UploadDoneRequest,
};
use filedepot_store::{Depot, StoreError, UploadFrame};

use crate::connection::Sender;

/// Routing state for one in-flight upload stream.
struct ActiveUpload {
    frames: mpsc::Sender<UploadFrame>,
    cancel: CancellationToken,
}

pub(crate) struct Service {
    depot: Arc<Depot>,
    sender: Sender,
    /// Connection-scoped token; transfers run on child tokens so closing
    /// the connection cancels every in-flight call.
    cancel: CancellationToken,
    uploads: Mutex<HashMap<String, ActiveUpload>>,
}

impl Service {
    pub(crate) fn new(depot: Arc<Depot>, sender: Sender, cancel: CancellationToken) -> Self {
        Self {
            depot,
            sender,
            cancel,
            uploads: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn dispatch_text(self: &Arc<Self>, msg: Message) {
        match msg.msg_type {
            MessageType::UploadBegin => self.on_upload_begin(msg).await,
            MessageType::UploadDone => self.on_upload_done(msg).await,
            MessageType::UploadAbort => self.on_upload_abort(msg).await,
            MessageType::DownloadFile => self.on_download(msg).await,
            MessageType::ListFiles => self.on_list_files(msg).await,
            _ => {
                tracing::warn!(msg_type = ?msg.msg_type, "unsupported message type");
                let _ = self
                    .sender
                    .send_error(&msg, WS_ERR_CODE_NOT_IMPLEMENTED, "unsupported message type")
                    .await;
            }
        }
    }

    /// Routes an inbound binary chunk frame to its upload stream.
    ///
    /// Awaiting the route send is deliberate: a slow disk pauses the read
    /// pump, so chunk processing within one stream stays strictly
    /// sequential and inbound frames are never buffered unboundedly. The
    /// wait aborts with the connection token, so a transfer torn down
    /// mid-route can never park the read pump for good.
    pub(crate) async fn dispatch_binary(self: &Arc<Self>, data: &[u8]) {
        let (header, payload) = match parse_chunk_frame(data) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::error!("invalid chunk frame: {e}");
                return;
            }
        };

        let frames = {
            let uploads = self.uploads.lock().await;
            uploads.get(&header.transfer_id).map(|u| u.frames.clone())
        };

        match frames {
            Some(tx) => {
                tokio::select! {
                    sent = tx.send(UploadFrame::Data(payload)) => {
                        if sent.is_err() {
                            // The transfer task already finished; its reply
                            // carries the outcome, nothing to do here.
                            tracing::debug!(transfer = %header.transfer_id, "chunk for finished transfer dropped");
                        }
                    }
                    _ = self.cancel.cancelled() => {}
                }
            }
            None => {
                tracing::warn!(transfer = %header.transfer_id, "chunk for unknown transfer");
                let err = Message::transfer_error(
                    &header.transfer_id,
                    WS_ERR_CODE_BAD_REQUEST,
                    "unknown transfer",
                );
                let _ = self.sender.send_msg(err).await;
            }
        }
    }

    async fn on_upload_begin(self: &Arc<Self>, msg: Message) {
        let req: UploadBeginRequest = match msg.decode() {
            Ok(r) => r,
            Err(e) => {
                let _ = self
                    .sender
                    .send_error(&msg, WS_ERR_CODE_BAD_REQUEST, e.to_string())
                    .await;
                return;
            }
        };

        let transfer_id = uuid::Uuid::new_v4().to_string();
        let (frames, rx) = mpsc::channel::<UploadFrame>(16);
        let cancel = self.cancel.child_token();

        // Receiver was just created, this cannot fail.
        if frames
            .send(UploadFrame::Begin {
                name: req.file_name.clone(),
            })
            .await
            .is_err()
        {
            return;
        }

        self.uploads.lock().await.insert(
            transfer_id.clone(),
            ActiveUpload {
                frames,
                cancel: cancel.clone(),
            },
        );

        match msg.upload_ready(&transfer_id, MAX_CHUNK_SIZE) {
            Ok(reply) => {
                if self.sender.send_msg(reply).await.is_err() {
                    self.uploads.lock().await.remove(&transfer_id);
                    return;
                }
            }
            Err(_) => return,
        }

        tracing::debug!(transfer = %transfer_id, file = %req.file_name, "upload stream opened");

        let service = Arc::clone(self);
        tokio::spawn(async move {
            let result = service.depot.upload(rx, &cancel).await;
            service.uploads.lock().await.remove(&transfer_id);

            // The outcome answers the upload_begin envelope id.
            match result {
                Ok(outcome) => {
                    if let Ok(reply) = msg.upload_ack(transfer_id, outcome.bytes_written) {
                        let _ = service.sender.send_msg(reply).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(file = %req.file_name, "upload failed: {e}");
                    let _ = service
                        .sender
                        .send_error(&msg, error_code(&e), e.to_string())
                        .await;
                }
            }
        });
    }

    async fn on_upload_done(self: &Arc<Self>, msg: Message) {
        let req: UploadDoneRequest = match msg.decode() {
            Ok(r) => r,
            Err(e) => {
                let _ = self
                    .sender
                    .send_error(&msg, WS_ERR_CODE_BAD_REQUEST, e.to_string())
                    .await;
                return;
            }
        };

        let frames = {
            let uploads = self.uploads.lock().await;
            uploads.get(&req.transfer_id).map(|u| u.frames.clone())
        };
        match frames {
            // The ack (or error) arrives against the upload_begin id once
            // the transfer task drains the stream.
            Some(tx) => {
                let _ = tx.send(UploadFrame::End).await;
            }
            None => {
                let _ = self
                    .sender
                    .send_error(&msg, WS_ERR_CODE_BAD_REQUEST, "unknown transfer")
                    .await;
            }
        }
    }

    async fn on_upload_abort(self: &Arc<Self>, msg: Message) {
        let req: UploadAbortRequest = match msg.decode() {
            Ok(r) => r,
            Err(e) => {
                let _ = self
                    .sender
                    .send_error(&msg, WS_ERR_CODE_BAD_REQUEST, e.to_string())
                    .await;
                return;
            }
        };

        if let Some(active) = self.uploads.lock().await.remove(&req.transfer_id) {
            tracing::debug!(transfer = %req.transfer_id, "upload aborted by client");
            active.cancel.cancel();
        }
    }

    async fn on_download(self: &Arc<Self>, msg: Message) {
        let req: DownloadFileRequest = match msg.decode() {
            Ok(r) => r,
            Err(e) => {
                let _ = self
                    .sender
                    .send_error(&msg, WS_ERR_CODE_BAD_REQUEST, e.to_string())
                    .await;
                return;
            }
        };

        let service = Arc::clone(self);
        tokio::spawn(async move {
            // Chunk frames reuse the request id as their transfer id.
            let transfer_id = msg.id.clone();
            let cancel = service.cancel.child_token();
            let (tx, mut rx) = mpsc::channel(8);

            let depot = Arc::clone(&service.depot);
            let name = req.file_name.clone();
            let reader_cancel = cancel.clone();
            let reader =
                tokio::spawn(async move { depot.download(&name, tx, &reader_cancel).await });

            while let Some(chunk) = rx.recv().await {
                let header = ChunkHeader {
                    transfer_id: transfer_id.clone(),
                    offset: chunk.offset,
                };
                let frame = match encode_chunk_frame(&header, &chunk.data) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!("chunk frame encode error: {e}");
                        cancel.cancel();
                        break;
                    }
                };
                if service.sender.send_binary(frame).await.is_err() {
                    cancel.cancel();
                    break;
                }
            }

            match reader.await {
                Ok(Ok(bytes_sent)) => {
                    if let Ok(reply) = msg.download_done(bytes_sent) {
                        let _ = service.sender.send_msg(reply).await;
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(file = %req.file_name, "download failed: {e}");
                    let _ = service
                        .sender
                        .send_error(&msg, error_code(&e), e.to_string())
                        .await;
                }
                Err(e) => {
                    tracing::error!("download task panicked: {e}");
                    let _ = service
                        .sender
                        .send_error(&msg, WS_ERR_CODE_INTERNAL, "internal error")
                        .await;
                }
            }
        });
    }

    async fn on_list_files(self: &Arc<Self>, msg: Message) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let cancel = service.cancel.child_token();
            match service.depot.list_files(&cancel).await {
                Ok(records) => {
                    let infos: Vec<FileInfo> = records
                        .into_iter()
                        .map(|r| FileInfo {
                            name: r.name,
                            created_at: r.created_at,
                            updated_at: r.updated_at,
                        })
                        .collect();
                    if let Ok(reply) = msg.files_info(infos) {
                        let _ = service.sender.send_msg(reply).await;
                    }
                }
                Err(e) => {
                    tracing::warn!("listing failed: {e}");
                    let _ = service
                        .sender
                        .send_error(&msg, error_code(&e), e.to_string())
                        .await;
                }
            }
        });
    }
}

/// Maps store errors to wire error codes.
fn error_code(e: &StoreError) -> i32 {
    match e {
        StoreError::Protocol(_) => WS_ERR_CODE_BAD_REQUEST,
        StoreError::NotFound(_) => WS_ERR_CODE_NOT_FOUND,
        StoreError::AlreadyExists(_) => WS_ERR_CODE_CONFLICT,
        StoreError::AdmissionDenied => WS_ERR_CODE_ADMISSION,
        StoreError::Io(_) => WS_ERR_CODE_INTERNAL,
    }
}
