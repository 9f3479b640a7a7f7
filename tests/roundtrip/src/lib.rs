//! Integration-test member; see `tests/e2e.rs`.
