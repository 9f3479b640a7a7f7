//! Chunked upload handler.
//!
//! Consumes an ordered stream of [`UploadFrame`]s and writes the named
//! file. Data lands in a transfer-unique dotted temporary file and becomes
//! visible only through the final atomic rename, so no partial file is
//! ever exposed under the target name; on any failure or cancellation the
//! temporary file is removed.
//!
//! The exclusive name lock is held only across publication (the existence
//! check and the rename), never while waiting for client frames. Two
//! streams racing for one name both make progress; whichever finishes
//! first wins the name and the other is refused at publication.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use filedepot_protocol::constants::MAX_CHUNK_SIZE;

use crate::admission::Pool;
use crate::{Depot, StoreError, validate};

/// Distinguishes the scratch files of concurrent uploads to one name.
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// One message of an inbound upload stream, in arrival order.
#[derive(Debug)]
pub enum UploadFrame {
    /// First frame: names the target file.
    Begin { name: String },
    /// One chunk of file data.
    Data(Vec<u8>),
    /// Normal end-of-stream.
    End,
}

/// Result of a completed upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    pub name: String,
    pub bytes_written: u64,
}

pub(crate) async fn run(
    depot: &Depot,
    mut frames: mpsc::Receiver<UploadFrame>,
    cancel: &CancellationToken,
) -> Result<UploadOutcome, StoreError> {
    // Held for the whole transfer, released by drop on every exit path.
    let _permit = depot.admission().acquire(Pool::Stream, cancel).await?;

    // INIT: the first frame must carry the target name.
    let name = match recv(&mut frames, cancel).await? {
        UploadFrame::Begin { name } => name,
        UploadFrame::Data(_) => {
            return Err(StoreError::Protocol(
                "first frame must carry the file name".into(),
            ));
        }
        UploadFrame::End => {
            return Err(StoreError::Protocol(
                "stream ended before a file name arrived".into(),
            ));
        }
    };
    validate::file_name(&name)?;

    // Fast refusal for a name that is already durable. The authoritative
    // check runs under the name lock at publication time.
    let final_path = depot.root().join(&name);
    if fs::try_exists(&final_path).await? {
        return Err(StoreError::AlreadyExists(name));
    }

    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp_path = depot.root().join(format!(".{name}.{seq}.part"));
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)
        .await?;

    match write_loop(&mut file, &mut frames, cancel).await {
        Ok(bytes_written) => match publish(depot, file, &name, &tmp_path, &final_path, cancel).await
        {
            Ok(()) => {
                tracing::debug!(name = %name, bytes = bytes_written, "upload complete");
                Ok(UploadOutcome {
                    name,
                    bytes_written,
                })
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                Err(e)
            }
        },
        Err(e) => {
            drop(file);
            let _ = fs::remove_file(&tmp_path).await;
            tracing::debug!(name = %name, "upload failed: {e}");
            Err(e)
        }
    }
}

/// WRITING: appends chunks in arrival order until end-of-stream.
async fn write_loop(
    file: &mut File,
    frames: &mut mpsc::Receiver<UploadFrame>,
    cancel: &CancellationToken,
) -> Result<u64, StoreError> {
    let mut written = 0u64;
    loop {
        match recv(frames, cancel).await? {
            UploadFrame::Data(data) => {
                if data.len() > MAX_CHUNK_SIZE {
                    return Err(StoreError::Protocol(format!(
                        "chunk of {} bytes exceeds the {MAX_CHUNK_SIZE} byte limit",
                        data.len()
                    )));
                }
                file.write_all(&data).await?;
                written += data.len() as u64;
            }
            UploadFrame::End => return Ok(written),
            UploadFrame::Begin { .. } => {
                return Err(StoreError::Protocol("unexpected second begin frame".into()));
            }
        }
    }
}

/// Publishes the finished temporary under the target name. The exclusive
/// name lock is held only across the existence check and the rename.
async fn publish(
    depot: &Depot,
    mut file: File,
    name: &str,
    tmp: &Path,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<(), StoreError> {
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    let lock = depot.name_locks().lock_for(name);
    let _guard = tokio::select! {
        guard = lock.write() => guard,
        _ = cancel.cancelled() => return Err(cancelled()),
    };

    if fs::try_exists(dest).await? {
        return Err(StoreError::AlreadyExists(name.to_string()));
    }
    fs::rename(tmp, dest).await?;
    Ok(())
}

async fn recv(
    frames: &mut mpsc::Receiver<UploadFrame>,
    cancel: &CancellationToken,
) -> Result<UploadFrame, StoreError> {
    tokio::select! {
        frame = frames.recv() => {
            frame.ok_or_else(|| StoreError::Protocol("inbound stream closed before end-of-stream".into()))
        }
        _ = cancel.cancelled() => Err(cancelled()),
    }
}

fn cancelled() -> StoreError {
    StoreError::Protocol("transfer cancelled".into())
}
