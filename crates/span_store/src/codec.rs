//! Row codec: maps a logical table row onto exactly one ordered key/value
//! pair.
//!
//! The key is the table prefix followed by the order-preserving encoding of
//! the primary-key tuple, so that byte-wise key order equals primary-key
//! order and range scans, point lookups, and span trimming all work directly
//! on the backend. The value carries the non-key columns as a tagged stream
//! keyed by column id; unknown ids survive a decode/re-encode round trip.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::schema::{Column, ColumnType, TableSchema, Value};

/// A logical row: column id to value.
pub type Row = BTreeMap<u64, Value>;

/// Tag byte for user table keys. Keeps table data disjoint from the catalog
/// prefixes (`0x01`..`0x03`) when a backend instance is shared.
const TABLE_KEY_TAG: u8 = 0x10;

/// Length of `table_prefix` output: tag byte plus big-endian schema id.
pub const TABLE_PREFIX_LEN: usize = 9;

// Wire type tags in the value stream. The tag fixes the payload shape so
// unknown columns can be skipped or preserved without schema knowledge.
const WIRE_INT: u8 = 1;
const WIRE_UINT: u8 = 2;
const WIRE_FLOAT: u8 = 3;
const WIRE_BYTES: u8 = 4;
const WIRE_BOOL: u8 = 5;

/// Fixed-length key prefix for a table's rows.
pub fn table_prefix(schema_id: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(TABLE_PREFIX_LEN);
    out.push(TABLE_KEY_TAG);
    out.extend_from_slice(&schema_id.to_be_bytes());
    out
}

/// Encode a full row into its key/value pair.
pub fn encode_row(schema: &TableSchema, row: &Row) -> Result<(Vec<u8>, Vec<u8>)> {
    let key = encode_row_key(schema, row)?;
    let value = encode_row_value(schema, row)?;
    Ok((key, value))
}

/// Encode the record key for a row. Every primary-key column must be present
/// with a matching type.
pub fn encode_row_key(schema: &TableSchema, row: &Row) -> Result<Vec<u8>> {
    let mut key = table_prefix(schema.id());
    for col in schema.pk_columns() {
        let value = row
            .get(&col.id)
            .filter(|v| !v.is_null())
            .ok_or_else(|| {
                Error::invalid(format!("missing primary key column `{}`", col.name))
            })?;
        encode_ordered(&mut key, col, value)?;
    }
    Ok(key)
}

/// Encode a (possibly partial) primary-key tuple under the table prefix.
/// Used for point lookups and for turning user scopes into key bounds.
pub fn encode_pk_prefix(schema: &TableSchema, values: &[Value]) -> Result<Vec<u8>> {
    if values.len() > schema.pk_len() {
        return Err(Error::invalid(format!(
            "primary key has {} columns, got {} values",
            schema.pk_len(),
            values.len()
        )));
    }
    let mut key = table_prefix(schema.id());
    for (col, value) in schema.pk_columns().zip(values) {
        encode_ordered(&mut key, col, value)?;
    }
    Ok(key)
}

/// Decode the primary-key tuple out of a record key.
pub fn decode_key(schema: &TableSchema, key: &[u8]) -> Result<Vec<Value>> {
    let prefix = table_prefix(schema.id());
    if key.len() < prefix.len() || key[..prefix.len()] != prefix[..] {
        return Err(Error::corruption("record key has foreign table prefix", key));
    }
    let mut offset = prefix.len();
    let mut tuple = Vec::with_capacity(schema.pk_len());
    for col in schema.pk_columns() {
        tuple.push(decode_ordered(key, &mut offset, col.typ)?);
    }
    if offset != key.len() {
        return Err(Error::corruption("trailing bytes after primary key", key));
    }
    Ok(tuple)
}

/// Encode the non-key columns of a row into the tagged value stream.
///
/// Entries are written in ascending column id order. NULL columns are
/// omitted. Row entries whose id the schema does not know are written back
/// by their value tag, which preserves unknown columns across rewrites.
pub fn encode_row_value(schema: &TableSchema, row: &Row) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for (id, value) in row {
        if value.is_null() {
            continue;
        }
        if let Some(col) = schema.column_by_id(*id) {
            if col.pk_order > 0 {
                continue;
            }
            check_column_type(col, value)?;
        }
        write_uvarint(&mut out, *id);
        match value {
            Value::Int(v) => {
                out.push(WIRE_INT);
                out.extend_from_slice(&v.to_be_bytes());
            }
            Value::UInt(v) => {
                out.push(WIRE_UINT);
                out.extend_from_slice(&v.to_be_bytes());
            }
            Value::Float(v) => {
                out.push(WIRE_FLOAT);
                out.extend_from_slice(&v.to_bits().to_be_bytes());
            }
            Value::Str(v) => {
                out.push(WIRE_BYTES);
                write_uvarint(&mut out, v.len() as u64);
                out.extend_from_slice(v.as_bytes());
            }
            Value::Bytes(v) => {
                out.push(WIRE_BYTES);
                write_uvarint(&mut out, v.len() as u64);
                out.extend_from_slice(v);
            }
            Value::Bool(v) => {
                out.push(WIRE_BOOL);
                out.push(*v as u8);
            }
            Value::Null => unreachable!("nulls are skipped above"),
        }
    }
    Ok(out)
}

/// Decode the tagged value stream.
///
/// With `projection = None` every column is decoded. With `Some(ids)` only
/// the listed ids are materialized and the rest are skipped by wire type;
/// the whole stream is still walked so duplicate ids and truncation are
/// detected either way.
pub fn decode_value(
    schema: &TableSchema,
    data: &[u8],
    projection: Option<&[u64]>,
) -> Result<Row> {
    let mut row = Row::new();
    let mut seen: Vec<u64> = Vec::new();
    let mut offset = 0usize;
    while offset < data.len() {
        let id = read_uvarint(data, &mut offset)
            .ok_or_else(|| Error::corruption("truncated column id", data))?;
        if seen.contains(&id) {
            return Err(Error::corruption(
                format!("duplicate column id {id} in value"),
                data,
            ));
        }
        seen.push(id);
        let wire = *data
            .get(offset)
            .ok_or_else(|| Error::corruption("truncated wire type", data))?;
        offset += 1;
        let wanted = projection.map_or(true, |ids| ids.contains(&id));
        let value = decode_wire(data, &mut offset, wire)?;
        if !wanted {
            continue;
        }
        let value = match schema.column_by_id(id) {
            Some(col) => coerce_decoded(col, value, data)?,
            None => value,
        };
        row.insert(id, value);
    }
    Ok(row)
}

fn decode_wire(data: &[u8], offset: &mut usize, wire: u8) -> Result<Value> {
    match wire {
        WIRE_INT => Ok(Value::Int(i64::from_be_bytes(take_array(data, offset)?))),
        WIRE_UINT => Ok(Value::UInt(u64::from_be_bytes(take_array(data, offset)?))),
        WIRE_FLOAT => Ok(Value::Float(f64::from_bits(u64::from_be_bytes(
            take_array(data, offset)?,
        )))),
        WIRE_BYTES => {
            let len = read_uvarint(data, offset)
                .ok_or_else(|| Error::corruption("truncated bytes length", data))?
                as usize;
            if *offset + len > data.len() {
                return Err(Error::corruption("truncated bytes payload", data));
            }
            let bytes = data[*offset..*offset + len].to_vec();
            *offset += len;
            Ok(Value::Bytes(bytes))
        }
        WIRE_BOOL => {
            let byte = *data
                .get(*offset)
                .ok_or_else(|| Error::corruption("truncated bool payload", data))?;
            *offset += 1;
            Ok(Value::Bool(byte != 0))
        }
        other => Err(Error::corruption(format!("unknown wire type {other}"), data)),
    }
}

/// Re-type a decoded wire value against the schema's declared column type.
fn coerce_decoded(col: &Column, value: Value, raw: &[u8]) -> Result<Value> {
    match (col.typ, value) {
        (ColumnType::Int, v @ Value::Int(_)) => Ok(v),
        (ColumnType::UInt, v @ Value::UInt(_)) => Ok(v),
        (ColumnType::Float, v @ Value::Float(_)) => Ok(v),
        (ColumnType::Bytes, v @ Value::Bytes(_)) => Ok(v),
        (ColumnType::Bool, v @ Value::Bool(_)) => Ok(v),
        (ColumnType::Str, Value::Bytes(bytes)) => String::from_utf8(bytes)
            .map(Value::Str)
            .map_err(|err| Error::corruption(
                format!("column `{}` is not valid utf-8", col.name),
                err.as_bytes(),
            )),
        (_, v) => Err(Error::corruption(
            format!(
                "column `{}` stored as {} but declared {:?}",
                col.name,
                v.type_name(),
                col.typ
            ),
            raw,
        )),
    }
}

fn check_column_type(col: &Column, value: &Value) -> Result<()> {
    let ok = matches!(
        (col.typ, value),
        (ColumnType::Int, Value::Int(_))
            | (ColumnType::UInt, Value::UInt(_))
            | (ColumnType::Float, Value::Float(_))
            | (ColumnType::Str, Value::Str(_))
            | (ColumnType::Bytes, Value::Bytes(_))
            | (ColumnType::Bool, Value::Bool(_))
    );
    if ok {
        Ok(())
    } else {
        Err(Error::invalid(format!(
            "column `{}` expects {:?}, got {}",
            col.name,
            col.typ,
            value.type_name()
        )))
    }
}

/// Append the order-preserving encoding of one primary-key value.
fn encode_ordered(buf: &mut Vec<u8>, col: &Column, value: &Value) -> Result<()> {
    check_column_type(col, value)?;
    match value {
        Value::UInt(v) => buf.extend_from_slice(&v.to_be_bytes()),
        // Sign bit flipped so negatives sort before non-negatives.
        Value::Int(v) => buf.extend_from_slice(&((*v as u64) ^ SIGN_BIT).to_be_bytes()),
        Value::Float(v) => buf.extend_from_slice(&f64_to_lex(*v)),
        Value::Str(v) => put_escaped(buf, v.as_bytes()),
        Value::Bytes(v) => put_escaped(buf, v),
        Value::Bool(v) => buf.push(*v as u8),
        Value::Null => unreachable!("null rejected by type check"),
    }
    Ok(())
}

fn decode_ordered(data: &[u8], offset: &mut usize, typ: ColumnType) -> Result<Value> {
    match typ {
        ColumnType::UInt => Ok(Value::UInt(u64::from_be_bytes(take_array(data, offset)?))),
        ColumnType::Int => {
            let raw = u64::from_be_bytes(take_array(data, offset)?);
            Ok(Value::Int((raw ^ SIGN_BIT) as i64))
        }
        ColumnType::Float => Ok(Value::Float(f64_from_lex(take_array(data, offset)?))),
        ColumnType::Str => {
            let bytes = take_escaped(data, offset)?;
            String::from_utf8(bytes)
                .map(Value::Str)
                .map_err(|err| Error::corruption("key string is not valid utf-8", err.as_bytes()))
        }
        ColumnType::Bytes => Ok(Value::Bytes(take_escaped(data, offset)?)),
        ColumnType::Bool => {
            let byte = *data
                .get(*offset)
                .ok_or_else(|| Error::corruption("truncated bool key field", data))?;
            *offset += 1;
            Ok(Value::Bool(byte != 0))
        }
    }
}

const SIGN_BIT: u64 = 0x8000_0000_0000_0000;

/// IEEE-754 bits rewritten so byte order matches numeric order: negatives
/// have every bit inverted, non-negatives only the sign bit flipped.
fn f64_to_lex(v: f64) -> [u8; 8] {
    let bits = v.to_bits();
    let bits = if bits & SIGN_BIT != 0 {
        !bits
    } else {
        bits ^ SIGN_BIT
    };
    bits.to_be_bytes()
}

fn f64_from_lex(bytes: [u8; 8]) -> f64 {
    let bits = u64::from_be_bytes(bytes);
    let bits = if bits & SIGN_BIT != 0 {
        bits ^ SIGN_BIT
    } else {
        !bits
    };
    f64::from_bits(bits)
}

/// Append `bytes` with every 0x00 escaped as 0x00 0xFF, then the 0x00 0x00
/// terminator. The escape keeps encodings prefix-free and order-preserving.
fn put_escaped(buf: &mut Vec<u8>, bytes: &[u8]) {
    for byte in bytes {
        if *byte == 0x00 {
            buf.push(0x00);
            buf.push(0xFF);
        } else {
            buf.push(*byte);
        }
    }
    buf.push(0x00);
    buf.push(0x00);
}

fn take_escaped(data: &[u8], offset: &mut usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let byte = *data
            .get(*offset)
            .ok_or_else(|| Error::corruption("unterminated key string", data))?;
        *offset += 1;
        if byte != 0x00 {
            out.push(byte);
            continue;
        }
        let next = *data
            .get(*offset)
            .ok_or_else(|| Error::corruption("unterminated key string escape", data))?;
        *offset += 1;
        match next {
            0x00 => return Ok(out),
            0xFF => out.push(0x00),
            _ => return Err(Error::corruption("invalid key string escape", data)),
        }
    }
}

fn take_array(data: &[u8], offset: &mut usize) -> Result<[u8; 8]> {
    if *offset + 8 > data.len() {
        return Err(Error::corruption("truncated fixed-width field", data));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[*offset..*offset + 8]);
    *offset += 8;
    Ok(buf)
}

fn write_uvarint(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push((v as u8) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

fn read_uvarint(data: &[u8], offset: &mut usize) -> Option<u64> {
    let mut out = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *data.get(*offset)?;
        *offset += 1;
        out |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Some(out);
        }
        shift += 7;
        if shift >= 64 {
            return None;
        }
    }
}
