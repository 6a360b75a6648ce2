use std::fmt;

use vexec_error::{DbError, Result};

use super::block::{Block, TypedBlock};
use super::builder::BlockBuilder;
use super::element_type::ElementType;
use super::page::Page;
use super::value_buffer::ValueBuffer;
use crate::buffer::buffer_manager::BufferManagerRef;

/// A single dynamically typed cell.
///
/// Used for building pages from rows and for reading them back, not on any
/// hot path.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i32),
    Long(i64),
    Double(f64),
    Bytes(Vec<u8>),
    Bool(bool),
    /// A multivalued cell.
    Multi(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn try_as_i64(&self) -> Result<i64> {
        match self {
            Value::Int(v) => Ok(*v as i64),
            Value::Long(v) => Ok(*v),
            other => Err(DbError::new("Value is not an integer")
                .with_field("value", other.to_string())),
        }
    }

    pub fn try_as_f64(&self) -> Result<f64> {
        match self {
            Value::Int(v) => Ok(*v as f64),
            Value::Long(v) => Ok(*v as f64),
            Value::Double(v) => Ok(*v),
            other => Err(DbError::new("Value is not numeric")
                .with_field("value", other.to_string())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Bytes(v) => write!(f, "{}", String::from_utf8_lossy(v)),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Multi(vals) => {
                write!(f, "[")?;
                for (idx, v) in vals.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Bytes(v.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// Build a block from values.
pub fn block_from_values<'a>(
    element_type: ElementType,
    values: impl IntoIterator<Item = &'a Value>,
    manager: &BufferManagerRef,
) -> Result<Block> {
    let mut builder = BlockBuilder::new(element_type, manager);
    for value in values {
        builder.append_scalar(value)?;
    }
    builder.build()
}

/// Build a page from rows of values.
///
/// Every row must have one value per column type.
pub fn page_from_rows(
    types: &[ElementType],
    rows: &[Vec<Value>],
    manager: &BufferManagerRef,
) -> Result<Page> {
    let mut builders: Vec<_> = types
        .iter()
        .map(|&typ| BlockBuilder::new(typ, manager))
        .collect();

    for (row_idx, row) in rows.iter().enumerate() {
        if row.len() != types.len() {
            return Err(DbError::new("Row has wrong number of columns")
                .with_field("row", row_idx)
                .with_field("expected", types.len())
                .with_field("got", row.len()));
        }
        for (builder, value) in builders.iter_mut().zip(row) {
            builder.append_scalar(value)?;
        }
    }

    if builders.is_empty() {
        return Ok(Page::with_positions(rows.len()));
    }

    let blocks = builders
        .into_iter()
        .map(|b| b.build())
        .collect::<Result<Vec<_>>>()?;
    Page::try_new(blocks)
}

fn typed_values<B, F>(block: &TypedBlock<B>, to_value: F) -> Vec<Value>
where
    B: ValueBuffer,
    F: Fn(&B::Item) -> Value,
{
    (0..block.position_count())
        .map(|p| match block.value_count(p) {
            0 => Value::Null,
            1 => to_value(block.get_value(block.first_value_index(p))),
            _ => Value::Multi(block.values(p).map(&to_value).collect()),
        })
        .collect()
}

/// Read every position of a block back as values.
pub fn block_values(block: &Block) -> Vec<Value> {
    match block {
        Block::Null(n) => vec![Value::Null; *n],
        Block::Int(b) => typed_values(b, |v| Value::Int(*v)),
        Block::Long(b) => typed_values(b, |v| Value::Long(*v)),
        Block::Double(b) => typed_values(b, |v| Value::Double(*v)),
        Block::Bytes(b) => typed_values(b, |v| Value::Bytes(v.to_vec())),
        Block::Boolean(b) => typed_values(b, |v| Value::Bool(*v)),
    }
}

/// Read a page back as rows.
pub fn page_rows(page: &Page) -> Vec<Vec<Value>> {
    let columns: Vec<_> = page.blocks().iter().map(block_values).collect();
    (0..page.position_count())
        .map(|row| columns.iter().map(|col| col[row].clone()).collect())
        .collect()
}
