//! Ordered key/value backend adapter.
//!
//! Wraps a fjall keyspace with a single data partition and exposes the small
//! surface the stores need: point reads, durable point writes, atomic
//! batches, and bounded forward iteration. Each engine owns its on-disk
//! directory, which is created on open if absent.

use std::fs;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};

use crate::error::{Error, Result};

const DATA_PARTITION: &str = "records";

/// Handle to one on-disk ordered store.
pub struct DbEngine {
    keyspace: Keyspace,
    records: PartitionHandle,
    path: PathBuf,
    read_only: bool,
}

/// One pending mutation inside a [`WriteBatch`].
enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Ordered set of mutations applied atomically by [`DbEngine::write`].
#[derive(Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put { key, value });
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete { key });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl DbEngine {
    /// Open (creating if missing) the store directory at `path`.
    ///
    /// The backend has no native read-only mode, so `read_only` is enforced
    /// here: mutations through a read-only handle fail with an io error
    /// before touching the backend.
    pub fn open(path: &Path, read_only: bool) -> Result<Self> {
        fs::create_dir_all(path).map_err(|err| Error::io("create store directory", err))?;
        let keyspace = fjall::Config::new(path).open()?;
        let records = keyspace.open_partition(DATA_PARTITION, PartitionCreateOptions::default())?;
        Ok(Self {
            keyspace,
            records,
            path: path.to_path_buf(),
            read_only,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.records.get(key)?.map(|v| v.to_vec()))
    }

    pub fn put(&self, key: &[u8], value: &[u8], sync: bool) -> Result<()> {
        self.check_writable()?;
        self.records.insert(key, value)?;
        self.maybe_persist(sync)
    }

    /// Idempotent point delete.
    pub fn delete(&self, key: &[u8], sync: bool) -> Result<()> {
        self.check_writable()?;
        self.records.remove(key)?;
        self.maybe_persist(sync)
    }

    /// Apply every mutation in `batch` atomically. Readers observe either
    /// all of the batch or none of it.
    pub fn write(&self, batch: WriteBatch, sync: bool) -> Result<()> {
        self.check_writable()?;
        if batch.is_empty() {
            return Ok(());
        }
        let mut inner = self.keyspace.batch();
        for op in batch.ops {
            match op {
                BatchOp::Put { key, value } => inner.insert(&self.records, key, value),
                BatchOp::Delete { key } => inner.remove(&self.records, key),
            };
        }
        inner.commit()?;
        self.maybe_persist(sync)
    }

    /// Forward iterator over `lower <= key < upper` in ascending order.
    /// A `None` bound leaves that side open.
    pub fn iter(&self, lower: Option<&[u8]>, upper: Option<&[u8]>) -> RangeIter {
        let lo = match lower {
            Some(bytes) => Bound::Included(bytes.to_vec()),
            None => Bound::Unbounded,
        };
        let hi = match upper {
            Some(bytes) => Bound::Excluded(bytes.to_vec()),
            None => Bound::Unbounded,
        };
        RangeIter {
            inner: Box::new(self.records.range((lo, hi))),
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::io(
                "write rejected",
                format!("store at {} is open read-only", self.path.display()),
            ));
        }
        Ok(())
    }

    fn maybe_persist(&self, sync: bool) -> Result<()> {
        if sync {
            self.keyspace.persist(PersistMode::SyncAll)?;
        }
        Ok(())
    }
}

/// Forward-only cursor over a key span.
pub struct RangeIter {
    inner: Box<dyn Iterator<Item = fjall::Result<fjall::KvPair>>>,
}

impl Iterator for RangeIter {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next() {
            None => None,
            Some(Ok((key, value))) => Some(Ok((key.to_vec(), value.to_vec()))),
            Some(Err(err)) => Some(Err(err.into())),
        }
    }
}
