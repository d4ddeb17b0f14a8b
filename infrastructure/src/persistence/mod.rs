//! Checkpoint persistence backends.

mod file_store;

pub use file_store::FileCheckpointStore;
