//! Table schema model and tagged column values.

use std::cmp::Ordering;

use crate::error::{Error, Result};

/// Logical column types supported by the row codec.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    /// Signed 64-bit integer.
    Int,
    /// Unsigned 64-bit integer.
    UInt,
    /// 64-bit IEEE-754 float.
    Float,
    /// UTF-8 string.
    Str,
    /// Opaque bytes.
    Bytes,
    /// Boolean.
    Bool,
}

/// Named, typed table attribute.
#[derive(Clone, Debug)]
pub struct Column {
    /// Stable id, unique within the table. Survives schema evolution.
    pub id: u64,
    pub name: String,
    pub typ: ColumnType,
    /// 0 when not part of the primary key, else the 1-based position in the
    /// composite key.
    pub pk_order: u16,
}

/// Ordered column set with a validated composite primary key.
#[derive(Clone, Debug)]
pub struct TableSchema {
    id: u64,
    name: String,
    columns: Vec<Column>,
    /// Indices into `columns`, sorted by `pk_order`.
    pk: Vec<usize>,
}

impl TableSchema {
    /// Validate and build a schema. Requires at least one primary-key column,
    /// with pk orders forming exactly 1..=K, and unique column ids and names.
    pub fn new(id: u64, name: impl Into<String>, columns: Vec<Column>) -> Result<Self> {
        let mut pk: Vec<usize> = Vec::new();
        for (idx, col) in columns.iter().enumerate() {
            if columns[..idx].iter().any(|c| c.id == col.id) {
                return Err(Error::invalid(format!("duplicate column id {}", col.id)));
            }
            if columns[..idx].iter().any(|c| c.name == col.name) {
                return Err(Error::invalid(format!("duplicate column name `{}`", col.name)));
            }
            if col.pk_order > 0 {
                pk.push(idx);
            }
        }
        if pk.is_empty() {
            return Err(Error::invalid("table has no primary key"));
        }
        pk.sort_by_key(|idx| columns[*idx].pk_order);
        for (pos, idx) in pk.iter().enumerate() {
            if columns[*idx].pk_order as usize != pos + 1 {
                return Err(Error::invalid(format!(
                    "primary key orders must be contiguous from 1, found {}",
                    columns[*idx].pk_order
                )));
            }
        }
        Ok(Self {
            id,
            name: name.into(),
            columns,
            pk,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_by_id(&self, id: u64) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Primary-key columns in key order.
    pub fn pk_columns(&self) -> impl Iterator<Item = &Column> + '_ {
        self.pk.iter().map(move |idx| &self.columns[*idx])
    }

    pub fn pk_len(&self) -> usize {
        self.pk.len()
    }
}

/// A decoded column value. Comparisons and aggregates dispatch on the tag.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Bool(bool),
    Null,
}

impl Value {
    /// Parse the wire textual form of a field into a typed value.
    pub fn parse_text(typ: ColumnType, text: &[u8]) -> Result<Value> {
        match typ {
            ColumnType::Int => {
                let s = text_utf8(text)?;
                s.parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| Error::invalid(format!("invalid integer literal `{s}`")))
            }
            ColumnType::UInt => {
                let s = text_utf8(text)?;
                s.parse::<u64>()
                    .map(Value::UInt)
                    .map_err(|_| Error::invalid(format!("invalid unsigned literal `{s}`")))
            }
            ColumnType::Float => {
                let s = text_utf8(text)?;
                s.parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| Error::invalid(format!("invalid float literal `{s}`")))
            }
            ColumnType::Str => String::from_utf8(text.to_vec())
                .map(Value::Str)
                .map_err(|_| Error::invalid("string field is not valid utf-8")),
            ColumnType::Bytes => Ok(Value::Bytes(text.to_vec())),
            ColumnType::Bool => match text {
                b"1" | b"true" => Ok(Value::Bool(true)),
                b"0" | b"false" => Ok(Value::Bool(false)),
                other => Err(Error::invalid(format!(
                    "invalid bool literal `{}`",
                    String::from_utf8_lossy(other)
                ))),
            },
        }
    }

    /// Render the value back into the wire textual form.
    pub fn to_text(&self) -> Vec<u8> {
        match self {
            Value::Int(v) => v.to_string().into_bytes(),
            Value::UInt(v) => v.to_string().into_bytes(),
            Value::Float(v) => v.to_string().into_bytes(),
            Value::Str(v) => v.clone().into_bytes(),
            Value::Bytes(v) => v.clone(),
            Value::Bool(v) => if *v { b"1".to_vec() } else { b"0".to_vec() },
            Value::Null => Vec::new(),
        }
    }

    /// The zero/empty textual form for a column type, used by aggregates
    /// over empty input.
    pub fn zero_text(typ: ColumnType) -> Vec<u8> {
        match typ {
            ColumnType::Int | ColumnType::UInt | ColumnType::Float | ColumnType::Bool => {
                b"0".to_vec()
            }
            ColumnType::Str | ColumnType::Bytes => Vec::new(),
        }
    }

    /// Compare two values of the same tag. Mixing tags (or comparing NULL)
    /// is an argument error; predicate evaluation filters NULLs before
    /// getting here.
    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::UInt(a), Value::UInt(b)) => Ok(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => Ok(a.total_cmp(b)),
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Ok(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
            (a, b) => Err(Error::invalid(format!(
                "cannot compare {} with {}",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Bool(_) => "bool",
            Value::Null => "null",
        }
    }
}

fn text_utf8(text: &[u8]) -> Result<&str> {
    std::str::from_utf8(text).map_err(|_| Error::invalid("numeric field is not valid utf-8"))
}
