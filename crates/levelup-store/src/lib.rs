//! Durable storage for guild configuration and member progress.
//!
//! The store keeps the full state in memory and writes it through to a
//! single JSON file after every mutation, using a temp-file-then-rename
//! write so the file on disk is always a complete snapshot.
//!
//! # Modules
//!
//! - [`store`] -- [`ProgressStore`], the write-through store
//! - [`snapshot`] -- On-disk document layout and format version
//! - [`retry`] -- Backoff policy for failed flushes
//! - [`error`] -- [`StoreError`]

pub mod error;
pub mod retry;
pub mod snapshot;
pub mod store;

pub use error::StoreError;
pub use retry::RetryPolicy;
pub use snapshot::{GuildMembers, PersistedState, STORE_FORMAT_VERSION};
pub use store::{GuildState, ProgressStore, StoreOptions, StoreStats};
