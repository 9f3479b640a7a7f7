//! Chunked download handler.
//!
//! Reads a named file and emits it as an ordered sequence of chunks of at
//! most [`CHUNK_SIZE`] bytes. Chunks are emitted eagerly as they are read,
//! so memory per transfer is O(chunk size), not O(file size).

use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use filedepot_protocol::constants::CHUNK_SIZE;

use crate::admission::Pool;
use crate::{Depot, StoreError, validate};

/// One outbound chunk of a download stream.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadChunk {
    /// Byte offset of this chunk within the file.
    pub offset: u64,
    pub data: Vec<u8>,
}

pub(crate) async fn run(
    depot: &Depot,
    name: &str,
    chunks: mpsc::Sender<DownloadChunk>,
    cancel: &CancellationToken,
) -> Result<u64, StoreError> {
    validate::file_name(name)?;

    let _permit = depot.admission().acquire(Pool::Stream, cancel).await?;

    // Shared per-name lock: many downloads may run at once, but none while
    // an upload holds the writer for this name.
    let lock = depot.name_locks().lock_for(name);
    let _guard = tokio::select! {
        guard = lock.read() => guard,
        _ = cancel.cancelled() => return Err(cancelled()),
    };

    // Open doubles as the existence check.
    let path = depot.root().join(name);
    let mut file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound(name.to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let mut offset = 0u64;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }

        let chunk = DownloadChunk {
            offset,
            data: buf[..n].to_vec(),
        };
        tokio::select! {
            sent = chunks.send(chunk) => {
                sent.map_err(|_| StoreError::Protocol("outbound stream closed".into()))?;
            }
            _ = cancel.cancelled() => return Err(cancelled()),
        }
        offset += n as u64;
    }

    tracing::debug!(name = %name, bytes = offset, "download complete");
    Ok(offset)
}

fn cancelled() -> StoreError {
    StoreError::Protocol("transfer cancelled".into())
}
