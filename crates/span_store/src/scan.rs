//! Scan planning shared by select and delete.
//!
//! A request is compiled against the schema into a `ScanPlan`: effective
//! byte bounds (range span clamped by the caller's scope and by leading
//! primary-key predicates), an optional exact-key point lookup, and the
//! pre-parsed predicate list. The executor in `store` drives the plan over
//! the backend iterator.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::codec::{self, Row};
use crate::error::{Error, Result};
use crate::schema::{Column, ColumnType, TableSchema, Value};

/// Comparison operators accepted in a match list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchOp {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Larger,
    LargerOrEqual,
}

/// One predicate: `column op literal`, AND-ed with its siblings.
#[derive(Clone, Debug)]
pub struct MatchExpr {
    pub column: String,
    pub op: MatchOp,
    /// Literal in wire textual form, parsed by the column's type.
    pub value: Vec<u8>,
}

/// Aggregate functions accepted in a projection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregateFunc {
    Count,
    Min,
    Max,
    Sum,
}

/// One projection item: a raw column or an aggregate over one.
#[derive(Clone, Debug)]
pub enum FieldItem {
    Column(String),
    /// `column` is ignored for `Count`; an empty name means `count(*)`.
    Aggregate { func: AggregateFunc, column: String },
}

/// Optional byte bounds narrowing a scan inside the range span.
#[derive(Clone, Debug, Default)]
pub struct Scope {
    pub start: Option<Vec<u8>>,
    pub end: Option<Vec<u8>>,
}

/// Row budget applied after predicates.
#[derive(Clone, Copy, Debug)]
pub struct Limit {
    pub offset: u64,
    pub count: u64,
}

/// Structured insert payload. Each row carries the textual field values in
/// schema column order; trailing non-key columns may be omitted.
#[derive(Clone, Debug)]
pub struct InsertRequest {
    pub rows: Vec<Vec<Vec<u8>>>,
    pub check_duplicate: bool,
}

/// Structured select payload.
#[derive(Clone, Debug, Default)]
pub struct SelectRequest {
    /// Exact primary-key tuple in textual form. When present the scan
    /// degenerates to a point lookup and `scope` is ignored.
    pub key: Option<Vec<Vec<u8>>>,
    pub scope: Option<Scope>,
    pub match_list: Vec<MatchExpr>,
    pub field_list: Vec<FieldItem>,
    pub limit: Option<Limit>,
}

/// Structured delete payload.
#[derive(Clone, Debug, Default)]
pub struct DeleteRequest {
    pub key: Option<Vec<Vec<u8>>>,
    pub scope: Option<Scope>,
    pub match_list: Vec<MatchExpr>,
}

/// One output row: projected field values in textual form.
pub type OutputRow = Vec<Vec<u8>>;

/// Cooperative cancellation flag, checked between iterator steps.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(AtomicOrdering::Relaxed)
    }
}

/// A predicate with its literal parsed by the column type.
#[derive(Debug)]
pub(crate) struct CompiledMatch<'a> {
    pub column: &'a Column,
    pub op: MatchOp,
    pub value: Value,
}

/// Compiled scan: either a point lookup or a bounded forward walk.
#[derive(Debug)]
pub(crate) struct ScanPlan<'a> {
    pub matches: Vec<CompiledMatch<'a>>,
    pub point_key: Option<Vec<u8>>,
    pub lower: Vec<u8>,
    pub upper: Vec<u8>,
}

impl ScanPlan<'_> {
    /// True when bound clamping proved no key can match.
    pub fn is_empty_span(&self) -> bool {
        self.point_key.is_none() && self.lower >= self.upper
    }
}

/// Compile a request's key/scope/match list against the range span.
pub(crate) fn build_plan<'a>(
    schema: &'a TableSchema,
    range_start: &[u8],
    range_end: &[u8],
    key: Option<&[Vec<u8>]>,
    scope: Option<&Scope>,
    match_list: &[MatchExpr],
) -> Result<ScanPlan<'a>> {
    let matches = compile_matches(schema, match_list)?;

    if let Some(fields) = key {
        let point_key = encode_point_key(schema, fields)?;
        return Ok(ScanPlan {
            matches,
            point_key: Some(point_key),
            lower: range_start.to_vec(),
            upper: range_end.to_vec(),
        });
    }

    let mut lower = range_start.to_vec();
    let mut upper = range_end.to_vec();
    if let Some(scope) = scope {
        if let Some(start) = &scope.start {
            lower = lower.max(start.clone());
        }
        if let Some(end) = &scope.end {
            upper = upper.min(end.clone());
        }
    }
    trim_bounds_by_leading_pk(schema, &matches, &mut lower, &mut upper)?;

    Ok(ScanPlan {
        matches,
        point_key: None,
        lower,
        upper,
    })
}

fn compile_matches<'a>(
    schema: &'a TableSchema,
    match_list: &[MatchExpr],
) -> Result<Vec<CompiledMatch<'a>>> {
    let mut out = Vec::with_capacity(match_list.len());
    for expr in match_list {
        let column = schema
            .column_by_name(&expr.column)
            .ok_or_else(|| Error::invalid(format!("unknown column `{}` in match", expr.column)))?;
        let value = Value::parse_text(column.typ, &expr.value)?;
        out.push(CompiledMatch {
            column,
            op: expr.op,
            value,
        });
    }
    Ok(out)
}

fn encode_point_key(schema: &TableSchema, fields: &[Vec<u8>]) -> Result<Vec<u8>> {
    if fields.len() != schema.pk_len() {
        return Err(Error::invalid(format!(
            "point key needs {} values, got {}",
            schema.pk_len(),
            fields.len()
        )));
    }
    let mut values = Vec::with_capacity(fields.len());
    for (col, text) in schema.pk_columns().zip(fields) {
        values.push(Value::parse_text(col.typ, text)?);
    }
    codec::encode_pk_prefix(schema, &values)
}

/// Tighten scan bounds using predicates on the leading primary-key column.
///
/// Each ordered operator on that column translates into a key bound under
/// the order-preserving encoding; the predicates themselves stay in the
/// plan, so the trim only has to be conservative, never exact.
fn trim_bounds_by_leading_pk(
    schema: &TableSchema,
    matches: &[CompiledMatch<'_>],
    lower: &mut Vec<u8>,
    upper: &mut Vec<u8>,
) -> Result<()> {
    let leading = match schema.pk_columns().next() {
        Some(col) => col,
        None => return Ok(()),
    };
    for m in matches {
        if m.column.id != leading.id || m.op == MatchOp::NotEqual {
            continue;
        }
        let encoded = codec::encode_pk_prefix(schema, std::slice::from_ref(&m.value))?;
        match m.op {
            MatchOp::Equal => {
                *lower = lower.clone().max(encoded.clone());
                if let Some(succ) = prefix_successor(&encoded) {
                    *upper = upper.clone().min(succ);
                }
            }
            MatchOp::Less => {
                *upper = upper.clone().min(encoded);
            }
            MatchOp::LessOrEqual => {
                if let Some(succ) = prefix_successor(&encoded) {
                    *upper = upper.clone().min(succ);
                }
            }
            MatchOp::Larger => {
                if let Some(succ) = prefix_successor(&encoded) {
                    *lower = lower.clone().max(succ);
                }
            }
            MatchOp::LargerOrEqual => {
                *lower = lower.clone().max(encoded);
            }
            MatchOp::NotEqual => unreachable!("filtered above"),
        }
    }
    Ok(())
}

/// Smallest byte string strictly greater than every string starting with
/// `prefix`, or `None` when the prefix is all 0xFF.
pub(crate) fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    while let Some(last) = out.last_mut() {
        if *last == 0xFF {
            out.pop();
        } else {
            *last += 1;
            return Some(out);
        }
    }
    None
}

/// A row decoded far enough to answer the current request: the primary-key
/// tuple from the key plus the non-key columns the request touches.
pub(crate) struct DecodedRow {
    pk: Vec<Value>,
    fields: Row,
}

impl DecodedRow {
    /// Decode a backend entry. `needed` lists the non-key column ids the
    /// request reads; `None` decodes everything.
    pub fn decode(
        schema: &TableSchema,
        key: &[u8],
        value: &[u8],
        needed: Option<&[u64]>,
    ) -> Result<Self> {
        let pk = codec::decode_key(schema, key)?;
        let fields = codec::decode_value(schema, value, needed)?;
        Ok(Self { pk, fields })
    }

    /// Current value of a column, or `None` when NULL/absent.
    pub fn value(&self, column: &Column) -> Option<&Value> {
        if column.pk_order > 0 {
            self.pk.get(column.pk_order as usize - 1)
        } else {
            self.fields.get(&column.id).filter(|v| !v.is_null())
        }
    }
}

/// Evaluate the AND of all compiled predicates against one row.
/// NULL columns satisfy no operator.
pub(crate) fn eval_matches(matches: &[CompiledMatch<'_>], row: &DecodedRow) -> Result<bool> {
    for m in matches {
        let Some(value) = row.value(m.column) else {
            return Ok(false);
        };
        let ord = value.compare(&m.value)?;
        let pass = match m.op {
            MatchOp::Equal => ord == Ordering::Equal,
            MatchOp::NotEqual => ord != Ordering::Equal,
            MatchOp::Less => ord == Ordering::Less,
            MatchOp::LessOrEqual => ord != Ordering::Greater,
            MatchOp::Larger => ord == Ordering::Greater,
            MatchOp::LargerOrEqual => ord != Ordering::Less,
        };
        if !pass {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Compiled projection: either raw columns or aggregates, never mixed.
#[derive(Debug)]
pub(crate) enum Projection<'a> {
    Fields(Vec<&'a Column>),
    Aggregates(Vec<Aggregator<'a>>),
}

pub(crate) fn compile_projection<'a>(
    schema: &'a TableSchema,
    field_list: &[FieldItem],
) -> Result<Projection<'a>> {
    if field_list.is_empty() {
        return Err(Error::invalid("empty field list"));
    }
    let has_aggregate = field_list
        .iter()
        .any(|item| matches!(item, FieldItem::Aggregate { .. }));
    let has_column = field_list
        .iter()
        .any(|item| matches!(item, FieldItem::Column(_)));
    if has_aggregate && has_column {
        return Err(Error::invalid(
            "projection mixes raw columns with aggregates",
        ));
    }

    if !has_aggregate {
        let mut fields = Vec::with_capacity(field_list.len());
        for item in field_list {
            let FieldItem::Column(name) = item else {
                unreachable!("aggregate ruled out above");
            };
            let column = schema
                .column_by_name(name)
                .ok_or_else(|| Error::invalid(format!("unknown column `{name}` in field list")))?;
            fields.push(column);
        }
        return Ok(Projection::Fields(fields));
    }

    let mut aggregates = Vec::with_capacity(field_list.len());
    for item in field_list {
        let FieldItem::Aggregate { func, column } = item else {
            unreachable!("raw column ruled out above");
        };
        aggregates.push(Aggregator::new(schema, *func, column)?);
    }
    Ok(Projection::Aggregates(aggregates))
}

/// Streaming aggregate state. One aggregator sees every matching row and
/// emits exactly one output field.
#[derive(Debug)]
pub(crate) enum Aggregator<'a> {
    Count {
        rows: u64,
    },
    Min {
        column: &'a Column,
        best: Option<Value>,
    },
    Max {
        column: &'a Column,
        best: Option<Value>,
    },
    SumInt {
        column: &'a Column,
        total: i64,
    },
    SumUInt {
        column: &'a Column,
        total: u64,
    },
    SumFloat {
        column: &'a Column,
        total: f64,
    },
}

impl<'a> Aggregator<'a> {
    fn new(schema: &'a TableSchema, func: AggregateFunc, column: &str) -> Result<Self> {
        if func == AggregateFunc::Count {
            // count ignores its column argument; count("") is count(*).
            return Ok(Aggregator::Count { rows: 0 });
        }
        let column = schema
            .column_by_name(column)
            .ok_or_else(|| Error::invalid(format!("unknown column `{column}` in aggregate")))?;
        match func {
            AggregateFunc::Count => unreachable!("handled above"),
            AggregateFunc::Min => Ok(Aggregator::Min { column, best: None }),
            AggregateFunc::Max => Ok(Aggregator::Max { column, best: None }),
            AggregateFunc::Sum => match column.typ {
                ColumnType::Int => Ok(Aggregator::SumInt { column, total: 0 }),
                ColumnType::UInt => Ok(Aggregator::SumUInt { column, total: 0 }),
                ColumnType::Float => Ok(Aggregator::SumFloat { column, total: 0.0 }),
                other => Err(Error::invalid(format!(
                    "sum over non-numeric column `{}` ({other:?})",
                    column.name
                ))),
            },
        }
    }

    /// Non-key column id this aggregator reads, if any.
    pub fn needed_column(&self) -> Option<u64> {
        let column = match self {
            Aggregator::Count { .. } => return None,
            Aggregator::Min { column, .. }
            | Aggregator::Max { column, .. }
            | Aggregator::SumInt { column, .. }
            | Aggregator::SumUInt { column, .. }
            | Aggregator::SumFloat { column, .. } => column,
        };
        (column.pk_order == 0).then_some(column.id)
    }

    pub fn update(&mut self, row: &DecodedRow) -> Result<()> {
        match self {
            Aggregator::Count { rows } => {
                *rows += 1;
            }
            Aggregator::Min { column, best } => {
                if let Some(value) = row.value(column) {
                    let replace = match best {
                        None => true,
                        Some(current) => value.compare(current)? == Ordering::Less,
                    };
                    if replace {
                        *best = Some(value.clone());
                    }
                }
            }
            Aggregator::Max { column, best } => {
                if let Some(value) = row.value(column) {
                    let replace = match best {
                        None => true,
                        Some(current) => value.compare(current)? == Ordering::Greater,
                    };
                    if replace {
                        *best = Some(value.clone());
                    }
                }
            }
            // Sums wrap in 64-bit two's complement on overflow.
            Aggregator::SumInt { column, total } => {
                if let Some(Value::Int(v)) = row.value(column) {
                    *total = total.wrapping_add(*v);
                }
            }
            Aggregator::SumUInt { column, total } => {
                if let Some(Value::UInt(v)) = row.value(column) {
                    *total = total.wrapping_add(*v);
                }
            }
            Aggregator::SumFloat { column, total } => {
                if let Some(Value::Float(v)) = row.value(column) {
                    *total += *v;
                }
            }
        }
        Ok(())
    }

    /// Render the final field. Empty input emits the column type's
    /// zero/empty form so the output row shape never changes.
    pub fn finish(self) -> Vec<u8> {
        match self {
            Aggregator::Count { rows } => rows.to_string().into_bytes(),
            Aggregator::Min { column, best } | Aggregator::Max { column, best } => match best {
                Some(value) => value.to_text(),
                None => Value::zero_text(column.typ),
            },
            Aggregator::SumInt { total, .. } => total.to_string().into_bytes(),
            Aggregator::SumUInt { total, .. } => total.to_string().into_bytes(),
            Aggregator::SumFloat { total, .. } => total.to_string().into_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType, TableSchema};

    fn schema() -> TableSchema {
        TableSchema::new(
            7,
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
        .unwrap()
    }

    fn span(schema: &TableSchema) -> (Vec<u8>, Vec<u8>) {
        (
            codec::table_prefix(schema.id()),
            codec::table_prefix(schema.id() + 1),
        )
    }

    fn match_expr(column: &str, op: MatchOp, value: &str) -> MatchExpr {
        MatchExpr {
            column: column.into(),
            op,
            value: value.as_bytes().to_vec(),
        }
    }

    #[test]
    fn prefix_successor_carries_trailing_ff() {
        assert_eq!(prefix_successor(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_successor(&[0x01, 0xFF]), Some(vec![0x02]));
        assert_eq!(prefix_successor(&[0xFF, 0xFF]), None);
    }

    #[test]
    fn contradictory_leading_pk_bounds_make_an_empty_span() {
        let schema = schema();
        let (start, end) = span(&schema);
        let plan = build_plan(
            &schema,
            &start,
            &end,
            None,
            None,
            &[
                match_expr("id", MatchOp::Larger, "4"),
                match_expr("id", MatchOp::Less, "1"),
            ],
        )
        .unwrap();
        assert!(plan.is_empty_span());
    }

    #[test]
    fn equal_on_leading_pk_narrows_to_one_key() {
        let schema = schema();
        let (start, end) = span(&schema);
        let plan = build_plan(
            &schema,
            &start,
            &end,
            None,
            None,
            &[match_expr("id", MatchOp::Equal, "5")],
        )
        .unwrap();
        let exact = codec::encode_pk_prefix(&schema, &[Value::Int(5)]).unwrap();
        assert_eq!(plan.lower, exact);
        assert_eq!(plan.upper, prefix_successor(&exact).unwrap());
    }

    #[test]
    fn non_key_predicates_leave_bounds_alone() {
        let schema = schema();
        let (start, end) = span(&schema);
        let plan = build_plan(
            &schema,
            &start,
            &end,
            None,
            None,
            &[match_expr("balance", MatchOp::Less, "105")],
        )
        .unwrap();
        assert_eq!(plan.lower, start);
        assert_eq!(plan.upper, end);
    }

    #[test]
    fn unknown_match_column_is_invalid() {
        let schema = schema();
        let (start, end) = span(&schema);
        let err = build_plan(
            &schema,
            &start,
            &end,
            None,
            None,
            &[match_expr("ghost", MatchOp::Equal, "1")],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn mixed_projection_is_invalid() {
        let schema = schema();
        let err = compile_projection(
            &schema,
            &[
                FieldItem::Column("id".into()),
                FieldItem::Aggregate {
                    func: AggregateFunc::Count,
                    column: String::new(),
                },
            ],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn sum_requires_a_numeric_column() {
        let schema = schema();
        let err = compile_projection(
            &schema,
            &[FieldItem::Aggregate {
                func: AggregateFunc::Sum,
                column: "name".into(),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn aggregates_over_no_rows_emit_zero_forms() {
        let schema = schema();
        let projection = compile_projection(
            &schema,
            &[
                FieldItem::Aggregate {
                    func: AggregateFunc::Count,
                    column: String::new(),
                },
                FieldItem::Aggregate {
                    func: AggregateFunc::Min,
                    column: "name".into(),
                },
                FieldItem::Aggregate {
                    func: AggregateFunc::Sum,
                    column: "balance".into(),
                },
            ],
        )
        .unwrap();
        let Projection::Aggregates(aggs) = projection else {
            panic!("expected aggregates");
        };
        let fields: Vec<Vec<u8>> = aggs.into_iter().map(Aggregator::finish).collect();
        assert_eq!(fields, vec![b"0".to_vec(), Vec::new(), b"0".to_vec()]);
    }

    #[test]
    fn int_sum_wraps_in_two_complement() {
        let schema = schema();
        let mut agg = Aggregator::new(&schema, AggregateFunc::Sum, "balance").unwrap();
        let row_bytes = |v: i64| {
            let mut row = Row::new();
            row.insert(1, Value::Int(1));
            row.insert(3, Value::Int(v));
            codec::encode_row(&schema, &row).unwrap()
        };
        let (k1, v1) = row_bytes(i64::MAX);
        let decoded = DecodedRow::decode(&schema, &k1, &v1, None).unwrap();
        agg.update(&decoded).unwrap();
        let (k2, v2) = row_bytes(1);
        let decoded = DecodedRow::decode(&schema, &k2, &v2, None).unwrap();
        agg.update(&decoded).unwrap();
        assert_eq!(agg.finish(), i64::MIN.to_string().into_bytes());
    }

    #[test]
    fn cancel_token_flips_once() {
        let token = CancelToken::new();
        assert!(!token.is_canceled());
        token.cancel();
        assert!(token.is_canceled());
        assert!(token.clone().is_canceled());
    }
}
