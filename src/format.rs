//! Fixed-width binary encoding shared by record tuples and B+-tree keys.
//!
//! Every column is one of three formats, packed little-endian with no
//! padding between columns. Strings are zero-padded ASCII of a declared
//! width; comparisons and ordering treat them as raw byte sequences, so
//! ordering matches lexicographic order over the zero-padded bytes.

use crate::error::{DbError, Result};
use serde::{Deserialize, Serialize};

/// The on-disk shape of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnFormat {
    Int,
    Double,
    Str(usize),
}

impl ColumnFormat {
    pub fn width(self) -> usize {
        match self {
            ColumnFormat::Int => 4,
            ColumnFormat::Double => 8,
            ColumnFormat::Str(w) => w,
        }
    }
}

/// A single decoded column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i32),
    Double(f64),
    Str(String),
}

impl Value {
    fn format_matches(&self, fmt: ColumnFormat) -> bool {
        matches!(
            (self, fmt),
            (Value::Int(_), ColumnFormat::Int)
                | (Value::Double(_), ColumnFormat::Double)
                | (Value::Str(_), ColumnFormat::Str(_))
        )
    }
}

/// Packs a tuple of values according to a column format list.
///
/// The caller's value order must match `formats` exactly.
pub fn pack(formats: &[ColumnFormat], values: &[Value]) -> Result<Vec<u8>> {
    if formats.len() != values.len() {
        return Err(DbError::InvalidRecord(format!(
            "expected {} columns, got {}",
            formats.len(),
            values.len()
        )));
    }
    let mut out = Vec::with_capacity(formats.iter().map(|f| f.width()).sum());
    for (fmt, value) in formats.iter().zip(values) {
        if !value.format_matches(*fmt) {
            return Err(DbError::InvalidRecord(format!(
                "column format mismatch: expected {:?}, got {:?}",
                fmt, value
            )));
        }
        match (fmt, value) {
            (ColumnFormat::Int, Value::Int(v)) => out.extend_from_slice(&v.to_le_bytes()),
            (ColumnFormat::Double, Value::Double(v)) => out.extend_from_slice(&v.to_le_bytes()),
            (ColumnFormat::Str(width), Value::Str(s)) => {
                if !s.is_ascii() {
                    return Err(DbError::InvalidRecord(format!(
                        "string column is not ASCII: {s:?}"
                    )));
                }
                if s.len() > *width {
                    return Err(DbError::InvalidRecord(format!(
                        "string {:?} exceeds column width {}",
                        s, width
                    )));
                }
                out.extend_from_slice(s.as_bytes());
                out.resize(out.len() + (width - s.len()), 0u8);
            }
            _ => unreachable!("format_matches already rejected mismatches"),
        }
    }
    Ok(out)
}

/// Unpacks a byte slice into values according to a column format list.
pub fn unpack(formats: &[ColumnFormat], bytes: &[u8]) -> Result<Vec<Value>> {
    let total_width: usize = formats.iter().map(|f| f.width()).sum();
    if bytes.len() < total_width {
        return Err(DbError::InvalidRecord(format!(
            "buffer too short: need {} bytes, have {}",
            total_width,
            bytes.len()
        )));
    }
    let mut values = Vec::with_capacity(formats.len());
    let mut offset = 0usize;
    for fmt in formats {
        let width = fmt.width();
        let slice = &bytes[offset..offset + width];
        let value = match fmt {
            ColumnFormat::Int => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(slice);
                Value::Int(i32::from_le_bytes(buf))
            }
            ColumnFormat::Double => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(slice);
                Value::Double(f64::from_le_bytes(buf))
            }
            ColumnFormat::Str(_) => {
                let end = slice.iter().position(|&b| b == 0).unwrap_or(slice.len());
                Value::Str(String::from_utf8_lossy(&slice[..end]).into_owned())
            }
        };
        values.push(value);
        offset += width;
    }
    Ok(values)
}

/// Total packed width in bytes of a column format list.
pub fn row_width(formats: &[ColumnFormat]) -> usize {
    formats.iter().map(|f| f.width()).sum()
}

/// Lexicographic comparison over a key tuple, column by column. Strings
/// compare the same way their zero-padded byte encoding would.
pub fn compare_keys(a: &[Value], b: &[Value]) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = match (x, y) {
            (Value::Int(x), Value::Int(y)) => x.cmp(y),
            (Value::Double(x), Value::Double(y)) => {
                x.partial_cmp(y).unwrap_or(Ordering::Equal)
            }
            (Value::Str(x), Value::Str(y)) => x.cmp(y),
            _ => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}
