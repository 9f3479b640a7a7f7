//! Directory inventory: a point-in-time snapshot of the storage folder.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::admission::Pool;
use crate::{Depot, StoreError};

/// Read-only view of one storage entry, computed fresh per listing.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Enumerates the storage folder once and builds a [`FileRecord`] per
/// regular file, sorted by name.
///
/// Consistency is best-effort: entries touched by concurrent transfers
/// during enumeration may or may not appear. In-flight upload temporaries
/// (reserved dotted names) are skipped.
pub(crate) async fn run(
    depot: &Depot,
    cancel: &CancellationToken,
) -> Result<Vec<FileRecord>, StoreError> {
    let _permit = depot.admission().acquire(Pool::Read, cancel).await?;

    let mut dir = tokio::fs::read_dir(depot.root()).await?;
    let mut records = Vec::new();

    while let Some(entry) = dir.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }

        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }

        let updated = meta.modified()?;
        // Not every filesystem reports a birth time; fall back to mtime.
        let created = meta.created().unwrap_or(updated);

        records.push(FileRecord {
            name,
            created_at: created.into(),
            updated_at: updated.into(),
        });
    }

    records.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(records)
}
