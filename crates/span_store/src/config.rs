//! Process-level knobs read by the storage core.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Durability and placement knobs for one node's stores.
///
/// Loading these from a file or flags is the embedding process's concern;
/// the core only consumes the resolved values.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreOptions {
    /// Directory holding user table data.
    pub data_dir: PathBuf,
    /// Directory holding the node catalog (meta store).
    pub meta_dir: PathBuf,
    /// Fsync user writes before acknowledging them.
    pub write_sync: bool,
    /// Fsync apply-index updates. Off by default: the apply index rides the
    /// hot apply path and its durability is bounded by the caller's log
    /// fsync policy.
    pub apply_index_sync: bool,
}

impl StoreOptions {
    pub fn new(data_dir: impl Into<PathBuf>, meta_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            meta_dir: meta_dir.into(),
            write_sync: true,
            apply_index_sync: false,
        }
    }
}
