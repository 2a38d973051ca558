//! Per-range row storage and the select/delete executor.
//!
//! A `Store` owns one contiguous key span of the backend. Raw KV access,
//! structured inserts, and the scan engine all refuse keys outside
//! `[start_key, end_key)`; the replication layer above serializes writes per
//! range before calling in, so the store itself only enforces span and
//! lifecycle invariants.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::engine::{DbEngine, WriteBatch};
use crate::error::{Error, Result};
use crate::meta_store::RangeMeta;
use crate::scan::{
    self, Aggregator, CancelToken, DecodedRow, DeleteRequest, InsertRequest, OutputRow,
    Projection, ScanPlan, SelectRequest,
};
use crate::schema::{Column, TableSchema};

/// Lifecycle of one range. Transitions are driven by the control plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeState {
    Loading,
    Serving,
    Closing,
    Closed,
}

impl RangeState {
    fn from_u8(raw: u8) -> RangeState {
        match raw {
            0 => RangeState::Loading,
            1 => RangeState::Serving,
            2 => RangeState::Closing,
            _ => RangeState::Closed,
        }
    }
}

/// Scan-derived statistics for one range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RangeStats {
    pub record_count: u64,
    pub total_bytes: u64,
}

/// One range's row store.
pub struct Store {
    engine: Arc<DbEngine>,
    schema: Arc<TableSchema>,
    range_id: u64,
    start_key: Vec<u8>,
    end_key: Vec<u8>,
    write_sync: bool,
    state: AtomicU8,
    active_scans: AtomicUsize,
}

/// Keeps the in-flight scan count accurate while a request runs, so a
/// closing range can drain before releasing its resources.
struct ScanGuard<'a>(&'a AtomicUsize);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Store {
    /// Open a range over its descriptor. The boundary iterator is touched
    /// once so backend trouble surfaces before the range starts serving.
    pub fn open(
        engine: Arc<DbEngine>,
        schema: Arc<TableSchema>,
        meta: &RangeMeta,
        write_sync: bool,
    ) -> Result<Self> {
        if meta.schema_id != schema.id() {
            return Err(Error::invalid(format!(
                "descriptor for schema {} opened with schema {}",
                meta.schema_id,
                schema.id()
            )));
        }
        if meta.start_key >= meta.end_key {
            return Err(Error::invalid("range has an empty key span"));
        }
        let store = Self {
            engine,
            schema,
            range_id: meta.id,
            start_key: meta.start_key.clone(),
            end_key: meta.end_key.clone(),
            write_sync,
            state: AtomicU8::new(RangeState::Loading as u8),
            active_scans: AtomicUsize::new(0),
        };
        let mut warm = store
            .engine
            .iter(Some(&store.start_key), Some(&store.end_key));
        if let Some(entry) = warm.next() {
            entry?;
        }
        store.state.store(RangeState::Serving as u8, Ordering::SeqCst);
        debug!(range_id = store.range_id, "range serving");
        Ok(store)
    }

    pub fn range_id(&self) -> u64 {
        self.range_id
    }

    pub fn start_key(&self) -> &[u8] {
        &self.start_key
    }

    pub fn end_key(&self) -> &[u8] {
        &self.end_key
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn state(&self) -> RangeState {
        RangeState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Stop accepting requests. In-flight scans keep running; call
    /// [`Store::finish_close`] until it reports drained.
    pub fn begin_close(&self) {
        if self.state() == RangeState::Closed {
            return;
        }
        self.state.store(RangeState::Closing as u8, Ordering::SeqCst);
        debug!(range_id = self.range_id, "range closing");
    }

    /// Complete the close once every in-flight scan has finished. Returns
    /// false while scans are still draining.
    pub fn finish_close(&self) -> bool {
        if self.active_scans.load(Ordering::SeqCst) != 0 {
            return false;
        }
        self.state.store(RangeState::Closed as u8, Ordering::SeqCst);
        debug!(range_id = self.range_id, "range closed");
        true
    }

    // ---- raw KV access (control writes and tests) ----

    /// Raw put inside the range span.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_serving()?;
        self.check_in_range(key)?;
        self.engine.put(key, value, self.write_sync)
    }

    /// Raw point read. Keys outside the span report not found.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.check_serving()?;
        if !self.contains(key) {
            return Err(Error::NotFound);
        }
        self.engine.get(key)?.ok_or(Error::NotFound)
    }

    /// Raw idempotent delete inside the range span.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.check_serving()?;
        self.check_in_range(key)?;
        self.engine.delete(key, self.write_sync)
    }

    // ---- structured operations ----

    /// Insert rows as one atomic, durable batch. With `check_duplicate`,
    /// any pre-existing key aborts the whole request and nothing lands.
    pub fn insert(&self, req: &InsertRequest) -> Result<u64> {
        self.check_serving()?;
        if req.rows.is_empty() {
            return Ok(0);
        }
        let mut batch = WriteBatch::new();
        for fields in &req.rows {
            let row = self.parse_row(fields)?;
            let (key, value) = crate::codec::encode_row(&self.schema, &row)?;
            self.check_in_range(&key)?;
            if req.check_duplicate && self.engine.get(&key)?.is_some() {
                return Err(Error::Duplicate);
            }
            batch.put(key, value);
        }
        let affected = batch.len() as u64;
        self.engine.write(batch, self.write_sync)?;
        Ok(affected)
    }

    /// Run a select. Output rows carry the projected fields in request
    /// order, rendered to their textual form.
    pub fn select(&self, req: &SelectRequest, cancel: &CancelToken) -> Result<Vec<OutputRow>> {
        let _guard = self.begin_scan()?;
        let projection = scan::compile_projection(&self.schema, &req.field_list)?;
        let plan = scan::build_plan(
            &self.schema,
            &self.start_key,
            &self.end_key,
            req.key.as_deref(),
            req.scope.as_ref(),
            &req.match_list,
        )?;

        match projection {
            Projection::Fields(columns) => {
                let needed = needed_ids(
                    plan.matches
                        .iter()
                        .map(|m| m.column)
                        .chain(columns.iter().copied()),
                );
                let (offset, count) = match req.limit {
                    Some(limit) => (limit.offset, limit.count),
                    None => (0, 0),
                };
                // A zero count means no row budget was set.
                let count = if count == 0 { u64::MAX } else { count };
                let mut skipped = 0u64;
                let mut rows: Vec<OutputRow> = Vec::new();
                self.scan_rows(&plan, Some(&needed), cancel, |_key, row| {
                    if skipped < offset {
                        skipped += 1;
                        return Ok(true);
                    }
                    rows.push(
                        columns
                            .iter()
                            .map(|col| row.value(col).map(|v| v.to_text()).unwrap_or_default())
                            .collect(),
                    );
                    Ok((rows.len() as u64) < count)
                })?;
                Ok(rows)
            }
            Projection::Aggregates(mut aggregates) => {
                // Aggregates see every matching row; limit does not apply.
                let mut needed = needed_ids(plan.matches.iter().map(|m| m.column));
                for agg in &aggregates {
                    if let Some(id) = agg.needed_column() {
                        needed.push(id);
                    }
                }
                needed.sort_unstable();
                needed.dedup();
                self.scan_rows(&plan, Some(&needed), cancel, |_key, row| {
                    for agg in aggregates.iter_mut() {
                        agg.update(&row)?;
                    }
                    Ok(true)
                })?;
                Ok(vec![aggregates
                    .into_iter()
                    .map(Aggregator::finish)
                    .collect()])
            }
        }
    }

    /// Delete every matching row in one atomic, durable batch. Returns the
    /// number of keys removed.
    pub fn delete_rows(&self, req: &DeleteRequest, cancel: &CancelToken) -> Result<u64> {
        self.check_serving()?;
        let _guard = self.begin_scan()?;
        let plan = scan::build_plan(
            &self.schema,
            &self.start_key,
            &self.end_key,
            req.key.as_deref(),
            req.scope.as_ref(),
            &req.match_list,
        )?;
        let needed = needed_ids(plan.matches.iter().map(|m| m.column));
        let mut keys: Vec<Vec<u8>> = Vec::new();
        self.scan_rows(&plan, Some(&needed), cancel, |key, _row| {
            keys.push(key.to_vec());
            Ok(true)
        })?;
        if keys.is_empty() {
            return Ok(0);
        }
        let affected = keys.len() as u64;
        let mut batch = WriteBatch::new();
        for key in keys {
            batch.delete(key);
        }
        self.engine.write(batch, true)?;
        Ok(affected)
    }

    /// Remove every key in the range span. Used when the node loses
    /// ownership, so it is allowed while the range is closing.
    pub fn truncate(&self) -> Result<u64> {
        if self.state() == RangeState::Closed {
            return Err(Error::RangeClosing);
        }
        let mut keys: Vec<Vec<u8>> = Vec::new();
        for entry in self.engine.iter(Some(&self.start_key), Some(&self.end_key)) {
            let (key, _) = entry?;
            keys.push(key);
        }
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = keys.len() as u64;
        let mut batch = WriteBatch::new();
        for key in keys {
            batch.delete(key);
        }
        self.engine.write(batch, true)?;
        debug!(range_id = self.range_id, removed, "range truncated");
        Ok(removed)
    }

    /// Count records and bytes in the span. The control plane uses these to
    /// pick split candidates.
    pub fn stats(&self) -> Result<RangeStats> {
        let _guard = self.begin_scan()?;
        let mut stats = RangeStats::default();
        for entry in self.engine.iter(Some(&self.start_key), Some(&self.end_key)) {
            let (key, value) = entry?;
            stats.record_count += 1;
            stats.total_bytes += (key.len() + value.len()) as u64;
        }
        Ok(stats)
    }

    // ---- internals ----

    /// Drive the plan, invoking `visit` for each matching row in key order.
    /// `visit` returns false to stop early.
    fn scan_rows<F>(
        &self,
        plan: &ScanPlan<'_>,
        needed: Option<&[u64]>,
        cancel: &CancelToken,
        mut visit: F,
    ) -> Result<()>
    where
        F: FnMut(&[u8], DecodedRow) -> Result<bool>,
    {
        if let Some(point) = &plan.point_key {
            // A point read outside the span finds nothing rather than
            // erroring; key placement belongs to the routing layer.
            if !self.contains(point) {
                return Ok(());
            }
            if let Some(value) = self.engine.get(point)? {
                let row = DecodedRow::decode(&self.schema, point, &value, needed)?;
                if scan::eval_matches(&plan.matches, &row)? {
                    visit(point, row)?;
                }
            }
            return Ok(());
        }

        if plan.is_empty_span() {
            return Ok(());
        }
        for entry in self.engine.iter(Some(&plan.lower), Some(&plan.upper)) {
            if cancel.is_canceled() {
                return Err(Error::Canceled);
            }
            let (key, value) = entry?;
            let row = DecodedRow::decode(&self.schema, &key, &value, needed)?;
            if !scan::eval_matches(&plan.matches, &row)? {
                continue;
            }
            if !visit(&key, row)? {
                break;
            }
        }
        Ok(())
    }

    /// Turn one wire row (textual fields in schema column order) into a
    /// typed row. Trailing non-key columns may be omitted.
    fn parse_row(&self, fields: &[Vec<u8>]) -> Result<crate::codec::Row> {
        let columns = self.schema.columns();
        if fields.len() > columns.len() {
            return Err(Error::invalid(format!(
                "row has {} fields but the table has {} columns",
                fields.len(),
                columns.len()
            )));
        }
        let mut row = crate::codec::Row::new();
        for (idx, col) in columns.iter().enumerate() {
            match fields.get(idx) {
                Some(text) => {
                    row.insert(col.id, crate::schema::Value::parse_text(col.typ, text)?);
                }
                None if col.pk_order > 0 => {
                    return Err(Error::invalid(format!(
                        "row is missing primary key column `{}`",
                        col.name
                    )));
                }
                None => {}
            }
        }
        Ok(row)
    }

    fn begin_scan(&self) -> Result<ScanGuard<'_>> {
        self.check_serving()?;
        self.active_scans.fetch_add(1, Ordering::SeqCst);
        Ok(ScanGuard(&self.active_scans))
    }

    fn check_serving(&self) -> Result<()> {
        match self.state() {
            RangeState::Serving => Ok(()),
            RangeState::Loading | RangeState::Closing | RangeState::Closed => {
                Err(Error::RangeClosing)
            }
        }
    }

    fn contains(&self, key: &[u8]) -> bool {
        key >= self.start_key.as_slice() && key < self.end_key.as_slice()
    }

    fn check_in_range(&self, key: &[u8]) -> Result<()> {
        if self.contains(key) {
            Ok(())
        } else {
            Err(Error::OutOfRange)
        }
    }
}

/// Sorted, deduplicated non-key column ids a request has to decode.
fn needed_ids<'a>(columns: impl Iterator<Item = &'a Column>) -> Vec<u64> {
    let mut ids: Vec<u64> = columns
        .filter(|col| col.pk_order == 0)
        .map(|col| col.id)
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}
