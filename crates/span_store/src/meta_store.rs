//! Durable node catalog: identity, range descriptors, apply indices.
//!
//! The catalog lives in its own backend directory. Keys use fixed one-byte
//! tags so the three namespaces stay disjoint:
//! `\x01node_id`, `\x02range/<id be64>`, `\x03apply/<id be64>`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::{DbEngine, WriteBatch};
use crate::error::{Error, Result};

const NODE_ID_KEY: &[u8] = b"\x01node_id";
const RANGE_PREFIX: &[u8] = b"\x02range/";
const APPLY_PREFIX: &[u8] = b"\x03apply/";

/// Persisted descriptor for one owned range. The key span is raw encoded
/// bytes, end-exclusive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RangeMeta {
    pub id: u64,
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
    pub schema_id: u64,
    pub replicas: Vec<u64>,
    pub version: u64,
}

/// Catalog store for one node.
pub struct MetaStore {
    engine: DbEngine,
    apply_sync: bool,
}

impl MetaStore {
    /// Open (creating if missing) the catalog at `path`.
    pub fn open(path: &Path, read_only: bool) -> Result<Self> {
        let engine = DbEngine::open(path, read_only)?;
        Ok(Self {
            engine,
            apply_sync: false,
        })
    }

    /// Override the durability of apply-index writes. Default is non-sync:
    /// the caller's log fsync policy bounds how much apply progress can be
    /// replayed after a crash.
    pub fn with_apply_sync(mut self, sync: bool) -> Self {
        self.apply_sync = sync;
        self
    }

    /// Persist the node id. Written once at bootstrap; overwriting with a
    /// different id is the control plane's responsibility to prevent.
    pub fn save_node_id(&self, node_id: u64) -> Result<()> {
        self.engine
            .put(NODE_ID_KEY, node_id.to_string().as_bytes(), true)
    }

    /// Load the node id. A fresh store reports id 0.
    pub fn node_id(&self) -> Result<u64> {
        match self.engine.get(NODE_ID_KEY)? {
            None => Ok(0),
            Some(raw) => parse_decimal(&raw, "node id"),
        }
    }

    /// Persist one range descriptor, overwriting any existing entry for the
    /// same id.
    pub fn add_range(&self, meta: &RangeMeta) -> Result<()> {
        let value = encode_range_meta(meta)?;
        self.engine.put(&range_key(meta.id), &value, true)
    }

    /// Persist several descriptors in one atomic, durable batch.
    pub fn batch_add_range(&self, metas: &[RangeMeta]) -> Result<()> {
        let mut batch = WriteBatch::new();
        for meta in metas {
            batch.put(range_key(meta.id), encode_range_meta(meta)?);
        }
        self.engine.write(batch, true)
    }

    /// Load one descriptor.
    pub fn range(&self, range_id: u64) -> Result<RangeMeta> {
        let raw = self
            .engine
            .get(&range_key(range_id))?
            .ok_or(Error::NotFound)?;
        decode_range_meta(range_id, &raw)
    }

    /// Load every descriptor in ascending range id order. Stops on the
    /// first iterator error.
    pub fn all_ranges(&self) -> Result<Vec<RangeMeta>> {
        let upper = prefix_upper(RANGE_PREFIX);
        let mut out = Vec::new();
        for entry in self.engine.iter(Some(RANGE_PREFIX), Some(&upper)) {
            let (key, value) = entry?;
            let id = range_id_from_key(&key)?;
            out.push(decode_range_meta(id, &value)?);
        }
        Ok(out)
    }

    /// Remove one descriptor. Removing an absent id is ok.
    pub fn del_range(&self, range_id: u64) -> Result<()> {
        self.engine.delete(&range_key(range_id), true)
    }

    /// Record the last applied log index for a range. Durability follows
    /// the configured apply-sync flag. Monotonicity is the caller's
    /// contract: the apply pipeline serializes writes per range.
    pub fn save_apply_index(&self, range_id: u64, index: u64) -> Result<()> {
        self.engine.put(
            &apply_key(range_id),
            index.to_string().as_bytes(),
            self.apply_sync,
        )
    }

    /// Load the last applied log index for a range; absent reports 0.
    pub fn apply_index(&self, range_id: u64) -> Result<u64> {
        match self.engine.get(&apply_key(range_id))? {
            None => Ok(0),
            Some(raw) => parse_decimal(&raw, "apply index"),
        }
    }

    /// Remove the apply index for a range. Removing an absent entry is ok.
    pub fn delete_apply_index(&self, range_id: u64) -> Result<()> {
        self.engine.delete(&apply_key(range_id), self.apply_sync)
    }
}

fn range_key(range_id: u64) -> Vec<u8> {
    let mut key = RANGE_PREFIX.to_vec();
    key.extend_from_slice(&range_id.to_be_bytes());
    key
}

fn apply_key(range_id: u64) -> Vec<u8> {
    let mut key = APPLY_PREFIX.to_vec();
    key.extend_from_slice(&range_id.to_be_bytes());
    key
}

fn range_id_from_key(key: &[u8]) -> Result<u64> {
    let raw = key
        .strip_prefix(RANGE_PREFIX)
        .filter(|rest| rest.len() == 8)
        .ok_or_else(|| Error::corruption("malformed range descriptor key", key))?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(raw);
    Ok(u64::from_be_bytes(buf))
}

fn encode_range_meta(meta: &RangeMeta) -> Result<Vec<u8>> {
    serde_json::to_vec(meta)
        .map_err(|err| Error::io("serialize range descriptor", err))
}

fn decode_range_meta(range_id: u64, raw: &[u8]) -> Result<RangeMeta> {
    match serde_json::from_slice::<RangeMeta>(raw) {
        Ok(meta) => Ok(meta),
        Err(err) => {
            warn!(range_id, error = ?err, "range descriptor failed to parse");
            Err(Error::corruption(
                format!("range {range_id} descriptor"),
                raw,
            ))
        }
    }
}

fn parse_decimal(raw: &[u8], what: &str) -> Result<u64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| Error::corruption(format!("invalid {what}"), raw))
}

/// Smallest key strictly greater than every key carrying `prefix`.
fn prefix_upper(prefix: &[u8]) -> Vec<u8> {
    let mut out = prefix.to_vec();
    while let Some(last) = out.last_mut() {
        if *last == 0xFF {
            out.pop();
        } else {
            *last += 1;
            break;
        }
    }
    out
}
