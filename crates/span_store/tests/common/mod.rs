//! Shared fixtures for store integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

use span_store::{
    codec, AggregateFunc, CancelToken, Column, ColumnType, DbEngine, DeleteRequest, FieldItem,
    InsertRequest, Limit, MatchExpr, MatchOp, OutputRow, RangeMeta, Scope, SelectRequest, Store,
    TableSchema, Value,
};

pub const ACCOUNT_SCHEMA_ID: u64 = 7;
pub const ACCOUNT_RANGE_ID: u64 = 1;

/// The account table used throughout: integer `id` primary key, string
/// `name`, integer `balance`.
pub fn account_schema() -> TableSchema {
    TableSchema::new(
        ACCOUNT_SCHEMA_ID,
        "account",
        vec![
            Column {
                id: 1,
                name: "id".into(),
                typ: ColumnType::Int,
                pk_order: 1,
            },
            Column {
                id: 2,
                name: "name".into(),
                typ: ColumnType::Str,
                pk_order: 0,
            },
            Column {
                id: 3,
                name: "balance".into(),
                typ: ColumnType::Int,
                pk_order: 0,
            },
        ],
    )
    .expect("account schema")
}

/// Descriptor spanning the whole account table.
pub fn account_range_meta() -> RangeMeta {
    RangeMeta {
        id: ACCOUNT_RANGE_ID,
        start_key: codec::table_prefix(ACCOUNT_SCHEMA_ID),
        end_key: codec::table_prefix(ACCOUNT_SCHEMA_ID + 1),
        schema_id: ACCOUNT_SCHEMA_ID,
        replicas: vec![1],
        version: 1,
    }
}

/// A fresh store over a fresh backend directory, torn down on drop.
pub struct StoreFixture {
    pub dir: TempDir,
    pub engine: Arc<DbEngine>,
    pub schema: Arc<TableSchema>,
    pub store: Store,
}

pub fn open_store() -> StoreFixture {
    let schema = Arc::new(account_schema());
    open_store_with(schema, account_range_meta())
}

pub fn open_store_with(schema: Arc<TableSchema>, meta: RangeMeta) -> StoreFixture {
    let dir = TempDir::new().expect("temp dir");
    let engine = Arc::new(DbEngine::open(dir.path(), false).expect("open engine"));
    let store = Store::open(engine.clone(), schema.clone(), &meta, true).expect("open store");
    StoreFixture {
        dir,
        engine,
        schema,
        store,
    }
}

/// Insert textual rows (schema column order) without duplicate checking.
pub fn insert_rows(store: &Store, rows: &[Vec<String>]) -> span_store::Result<u64> {
    let req = InsertRequest {
        rows: rows
            .iter()
            .map(|row| row.iter().map(|field| field.clone().into_bytes()).collect())
            .collect(),
        check_duplicate: false,
    };
    store.insert(&req)
}

/// The canonical 100-row corpus: `id` in 1..=100, `name` = `user-%04d`,
/// `balance` = 100 + id.
pub fn seed_rows() -> Vec<Vec<String>> {
    (1..=100i64)
        .map(|i| {
            vec![
                i.to_string(),
                format!("user-{i:04}"),
                (100 + i).to_string(),
            ]
        })
        .collect()
}

pub fn seed_accounts(store: &Store) -> Vec<Vec<String>> {
    let rows = seed_rows();
    let affected = insert_rows(store, &rows).expect("seed rows");
    assert_eq!(affected, rows.len() as u64);
    rows
}

/// Render select output back to strings for comparison with seed rows.
pub fn rows_to_text(rows: Vec<OutputRow>) -> Vec<Vec<String>> {
    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .map(|field| String::from_utf8(field).expect("utf-8 field"))
                .collect()
        })
        .collect()
}

pub fn run_select(store: &Store, req: &SelectRequest) -> span_store::Result<Vec<Vec<String>>> {
    store.select(req, &CancelToken::new()).map(rows_to_text)
}

/// Encode a textual leading-primary-key value into a scope bound.
pub fn pk_bound(schema: &TableSchema, text: &str) -> Vec<u8> {
    let leading = schema.pk_columns().next().expect("pk column");
    let value = Value::parse_text(leading.typ, text.as_bytes()).expect("parse bound");
    codec::encode_pk_prefix(schema, &[value]).expect("encode bound")
}

/// Request builder mirroring the select request shape.
pub struct SelectBuilder {
    schema: Arc<TableSchema>,
    req: SelectRequest,
}

impl SelectBuilder {
    pub fn new(schema: Arc<TableSchema>) -> Self {
        Self {
            schema,
            req: SelectRequest::default(),
        }
    }

    pub fn all_fields(mut self) -> Self {
        for col in self.schema.columns() {
            self.req
                .field_list
                .push(FieldItem::Column(col.name.clone()));
        }
        self
    }

    pub fn field(mut self, name: &str) -> Self {
        self.req.field_list.push(FieldItem::Column(name.into()));
        self
    }

    pub fn aggregate(mut self, func: AggregateFunc, column: &str) -> Self {
        self.req.field_list.push(FieldItem::Aggregate {
            func,
            column: column.into(),
        });
        self
    }

    pub fn key(mut self, fields: &[&str]) -> Self {
        self.req.key = Some(fields.iter().map(|f| f.as_bytes().to_vec()).collect());
        self
    }

    pub fn scope(mut self, start: Option<&str>, end: Option<&str>) -> Self {
        self.req.scope = Some(Scope {
            start: start.map(|text| pk_bound(&self.schema, text)),
            end: end.map(|text| pk_bound(&self.schema, text)),
        });
        self
    }

    pub fn matching(mut self, column: &str, op: MatchOp, value: &str) -> Self {
        self.req.match_list.push(MatchExpr {
            column: column.into(),
            op,
            value: value.as_bytes().to_vec(),
        });
        self
    }

    pub fn limit(mut self, count: u64, offset: u64) -> Self {
        self.req.limit = Some(Limit { offset, count });
        self
    }

    pub fn build(self) -> SelectRequest {
        self.req
    }
}

/// Request builder mirroring the delete request shape.
pub struct DeleteBuilder {
    schema: Arc<TableSchema>,
    req: DeleteRequest,
}

impl DeleteBuilder {
    pub fn new(schema: Arc<TableSchema>) -> Self {
        Self {
            schema,
            req: DeleteRequest::default(),
        }
    }

    pub fn key(mut self, fields: &[&str]) -> Self {
        self.req.key = Some(fields.iter().map(|f| f.as_bytes().to_vec()).collect());
        self
    }

    pub fn scope(mut self, start: Option<&str>, end: Option<&str>) -> Self {
        self.req.scope = Some(Scope {
            start: start.map(|text| pk_bound(&self.schema, text)),
            end: end.map(|text| pk_bound(&self.schema, text)),
        });
        self
    }

    pub fn matching(mut self, column: &str, op: MatchOp, value: &str) -> Self {
        self.req.match_list.push(MatchExpr {
            column: column.into(),
            op,
            value: value.as_bytes().to_vec(),
        });
        self
    }

    pub fn build(self) -> DeleteRequest {
        self.req
    }
}
