//! Concurrency-bounded chunked file storage engine.
//!
//! The [`Depot`] owns a flat storage folder and gates all access through
//! two independent permit pools: a read pool for metadata listings and a
//! stream pool shared by uploads and downloads. Each operation acquires
//! its permit before touching disk and releases it on every exit path,
//! including cancellation.

mod admission;
mod download;
mod inventory;
mod locks;
mod upload;
mod validate;

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use admission::{AdmissionController, Permit, Pool};
pub use download::DownloadChunk;
pub use inventory::FileRecord;
pub use upload::{UploadFrame, UploadOutcome};
pub use validate::file_name as validate_file_name;

/// Concurrent metadata listings admitted at once.
pub const READ_POOL_CAPACITY: usize = 100;

/// Concurrent transfers (uploads + downloads combined) admitted at once.
pub const STREAM_POOL_CAPACITY: usize = 10;

/// Errors produced by depot operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("admission denied: cancelled while waiting for a permit")]
    AdmissionDenied,

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("file already exists: {0}")]
    AlreadyExists(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stream protocol error: {0}")]
    Protocol(String),
}

/// The storage engine: a flat folder plus the admission and locking state
/// shared by all handlers.
///
/// Constructor-injected and shared by reference; never global.
pub struct Depot {
    root: PathBuf,
    admission: AdmissionController,
    locks: locks::NameLocks,
}

impl Depot {
    /// Creates a depot over `root` with the default pool capacities.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_capacities(root, READ_POOL_CAPACITY, STREAM_POOL_CAPACITY)
    }

    /// Creates a depot with explicit pool capacities (tests use small ones).
    pub fn with_capacities(
        root: impl Into<PathBuf>,
        read_capacity: usize,
        stream_capacity: usize,
    ) -> Self {
        Self {
            root: root.into(),
            admission: AdmissionController::new(read_capacity, stream_capacity),
            locks: locks::NameLocks::new(),
        }
    }

    /// The storage folder.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The permit pools gating this depot.
    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Consumes an ordered stream of upload frames and writes the named
    /// file. See [`upload::run`] for the full contract.
    pub async fn upload(
        &self,
        frames: mpsc::Receiver<UploadFrame>,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, StoreError> {
        upload::run(self, frames, cancel).await
    }

    /// Streams the named file out in chunks of at most
    /// [`filedepot_protocol::constants::CHUNK_SIZE`] bytes. Returns the
    /// total bytes sent.
    pub async fn download(
        &self,
        name: &str,
        chunks: mpsc::Sender<DownloadChunk>,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        download::run(self, name, chunks, cancel).await
    }

    /// Returns a point-in-time snapshot of the storage folder.
    pub async fn list_files(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<FileRecord>, StoreError> {
        inventory::run(self, cancel).await
    }

    pub(crate) fn name_locks(&self) -> &locks::NameLocks {
        &self.locks
    }
}
