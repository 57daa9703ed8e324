//! Storage module for file management
//!
//! Provides the local-disk storage layer used for chunk sessions and
//! assembled artifacts. Callers address objects with opaque relative keys
//! such as `uploads/<session>/0.chunk`.

mod local_fs;

pub use local_fs::{LocalStorage, PutOutcome};
