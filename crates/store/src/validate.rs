//! File-name validation for the flat storage namespace.

use std::path::{Component, Path};

use crate::StoreError;

/// Validates a client-supplied file name.
///
/// The depot is a single flat folder, so a name must be exactly one normal
/// path component: no separators, no `..`, no absolute paths. Names
/// starting with `.` are reserved for in-flight temporary files.
pub fn file_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() {
        return Err(StoreError::Protocol("file name is empty".into()));
    }
    if name.starts_with('.') {
        return Err(StoreError::Protocol(format!(
            "file names starting with '.' are reserved: {name}"
        )));
    }

    let path = Path::new(name);
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(StoreError::Protocol(format!(
            "file name must be a single path component: {name}"
        ))),
    }
}
