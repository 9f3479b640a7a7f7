//! Admission control: two independent counting permit pools.
//!
//! The read pool bounds concurrent metadata listings, the stream pool
//! bounds concurrent uploads and downloads combined. The pools never
//! share permits, so read-heavy load cannot starve transfers and vice
//! versa.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::StoreError;

/// Which permit pool an operation draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    /// Metadata listings (`list_files`).
    Read,
    /// Chunked transfers (uploads and downloads).
    Stream,
}

/// An admitted slot. Dropping it releases the slot back to its pool, so a
/// permit held across an operation is released exactly once on every exit
/// path, including panics.
#[derive(Debug)]
pub struct Permit {
    _inner: OwnedSemaphorePermit,
}

/// Owns the two permit pools.
pub struct AdmissionController {
    read: Arc<Semaphore>,
    stream: Arc<Semaphore>,
}

impl AdmissionController {
    pub fn new(read_capacity: usize, stream_capacity: usize) -> Self {
        Self {
            read: Arc::new(Semaphore::new(read_capacity)),
            stream: Arc::new(Semaphore::new(stream_capacity)),
        }
    }

    /// Waits for a slot in the requested pool.
    ///
    /// Blocks until a slot frees or `cancel` fires, whichever happens
    /// first; on cancellation returns [`StoreError::AdmissionDenied`] with
    /// no partial state change. No fairness guarantee beyond the pool's
    /// arrival order.
    pub async fn acquire(
        &self,
        pool: Pool,
        cancel: &CancellationToken,
    ) -> Result<Permit, StoreError> {
        let sem = match pool {
            Pool::Read => Arc::clone(&self.read),
            Pool::Stream => Arc::clone(&self.stream),
        };

        tokio::select! {
            permit = sem.acquire_owned() => {
                // The semaphores are never closed.
                let permit = permit.map_err(|_| StoreError::AdmissionDenied)?;
                Ok(Permit { _inner: permit })
            }
            _ = cancel.cancelled() => Err(StoreError::AdmissionDenied),
        }
    }

    /// Slots currently free in the given pool.
    pub fn available(&self, pool: Pool) -> usize {
        match pool {
            Pool::Read => self.read.available_permits(),
            Pool::Stream => self.stream.available_permits(),
        }
    }
}
