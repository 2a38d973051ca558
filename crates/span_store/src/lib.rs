//! Range-partitioned table storage core for a distributed data node.
//!
//! The crate covers the storage half of a data server: structured row
//! operations (insert, select with projection/predicates/aggregation/limit,
//! delete) against a table split into contiguous key ranges, persisted on an
//! ordered embedded key/value engine, plus the durable catalog holding node
//! identity, range descriptors, and per-range apply indices.
//!
//! Layering, leaves first:
//!
//! - [`engine`]: ordered KV adapter over fjall (get/put/delete, atomic
//!   batches, bounded iteration, sync-on-commit).
//! - [`codec`]: maps one logical row onto exactly one KV pair with
//!   order-preserving primary-key encoding.
//! - [`meta_store`]: the node catalog.
//! - [`store`] and [`scan`]: the per-range row store and its scan engine.
//!
//! Everything network-, consensus-, and routing-shaped lives above this
//! crate; the core is synchronous and blocking, and callers provide the
//! threading.

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod meta_store;
pub mod scan;
pub mod schema;
pub mod store;

pub use config::StoreOptions;
pub use engine::{DbEngine, RangeIter, WriteBatch};
pub use error::{Error, Result, StatusCode};
pub use meta_store::{MetaStore, RangeMeta};
pub use scan::{
    AggregateFunc, CancelToken, DeleteRequest, FieldItem, InsertRequest, Limit, MatchExpr,
    MatchOp, OutputRow, Scope, SelectRequest,
};
pub use schema::{Column, ColumnType, TableSchema, Value};
pub use store::{RangeState, RangeStats, Store};
