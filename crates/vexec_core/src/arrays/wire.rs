//! Binary encoding of vectors, blocks and pages for handing off between
//! partitions.
//!
//! Block layout:
//!
//! ```text
//! element type tag: u8
//! position count: varint
//! -- non-null blocks only --
//! flags: u8 (bit 0: first value indexes, bit 1: null bitmap)
//! first value indexes: position count + 1 varints (if flagged)
//! null bitmap: ceil(position count / 8) bytes (if flagged)
//! vector
//! ```
//!
//! Vector layout is an encoding tag (u8), a varint position count, then the
//! payload. Constant vectors write one value, arrays write every value, and
//! filters write their positions as varints followed by the base vector.
//!
//! A page is a varint block count and a varint position count followed by
//! each block.

use std::sync::Arc;

use bytes::{Buf, BufMut};
use vexec_error::{DbError, Result};

use super::bitmap::Bitmap;
use super::block::{Block, TypedBlock};
use super::element_type::ElementType;
use super::page::Page;
use super::value_buffer::{
    BooleanBuffer,
    BytesBuffer,
    DoubleBuffer,
    IntBuffer,
    LongBuffer,
    ValueBuffer,
    ensure_remaining,
};
use super::vector::TypedVector;

const FLAG_FIRST_VALUE_INDEXES: u8 = 1;
const FLAG_NULLS: u8 = 1 << 1;

/// Write an unsigned LEB128 varint.
pub fn write_vint<W: BufMut>(buf: &mut W, mut v: u64) {
    while v >= 0x80 {
        buf.put_u8((v as u8) | 0x80);
        v >>= 7;
    }
    buf.put_u8(v as u8);
}

/// Read an unsigned LEB128 varint.
pub fn read_vint<R: Buf>(buf: &mut R) -> Result<u64> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        ensure_remaining(buf, 1)?;
        let byte = buf.get_u8();
        if shift == 63 && byte > 1 {
            return Err(DbError::new("Varint overflows u64"));
        }
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift > 63 {
            return Err(DbError::new("Varint too long"));
        }
    }
}

fn read_usize<R: Buf>(buf: &mut R) -> Result<usize> {
    let v = read_vint(buf)?;
    usize::try_from(v).map_err(|_| DbError::new("Varint does not fit in usize").with_field("v", v))
}

pub fn write_vector<B: ValueBuffer, W: BufMut>(vector: &TypedVector<B>, buf: &mut W) {
    buf.put_u8(vector.encoding().wire_tag());
    write_vint(buf, vector.position_count() as u64);
    match vector {
        TypedVector::Constant { value, .. } => B::write_value(value.get(0), buf),
        TypedVector::Array(values) => {
            for idx in 0..values.len() {
                B::write_value(values.get(idx), buf);
            }
        }
        TypedVector::Filter { base, positions } => {
            for &p in positions.iter() {
                write_vint(buf, p as u64);
            }
            write_vector(base, buf);
        }
    }
}

pub fn read_vector<B: ValueBuffer, R: Buf>(buf: &mut R) -> Result<TypedVector<B>> {
    ensure_remaining(buf, 1)?;
    let tag = buf.get_u8();
    let count = read_usize(buf)?;
    match tag {
        0 => {
            let mut value = B::default();
            value.read_value(buf)?;
            Ok(TypedVector::Constant {
                value: Arc::new(value),
                len: count,
            })
        }
        1 => {
            let mut values = B::default();
            for _ in 0..count {
                values.read_value(buf)?;
            }
            Ok(TypedVector::new_array(values))
        }
        2 => {
            let positions = (0..count)
                .map(|_| read_usize(buf))
                .collect::<Result<Vec<_>>>()?;
            let base = read_vector::<B, _>(buf)?;
            base.filter(&positions)
        }
        other => Err(DbError::new("Unknown vector encoding tag").with_field("tag", other)),
    }
}

fn write_typed_block<B: ValueBuffer, W: BufMut>(block: &TypedBlock<B>, buf: &mut W) {
    let mut flags = 0;
    if block.first_value_indexes().is_some() {
        flags |= FLAG_FIRST_VALUE_INDEXES;
    }
    if block.nulls().is_some() {
        flags |= FLAG_NULLS;
    }
    buf.put_u8(flags);

    if let Some(indexes) = block.first_value_indexes() {
        for &idx in indexes {
            write_vint(buf, idx as u64);
        }
    }
    if let Some(nulls) = block.nulls() {
        buf.put_slice(nulls.data());
    }
    write_vector(block.vector(), buf);
}

fn read_typed_block<B: ValueBuffer, R: Buf>(
    position_count: usize,
    buf: &mut R,
) -> Result<TypedBlock<B>> {
    ensure_remaining(buf, 1)?;
    let flags = buf.get_u8();

    let first_value_indexes = if flags & FLAG_FIRST_VALUE_INDEXES != 0 {
        Some(
            (0..=position_count)
                .map(|_| read_usize(buf))
                .collect::<Result<Vec<_>>>()?,
        )
    } else {
        None
    };

    let nulls = if flags & FLAG_NULLS != 0 {
        let num_bytes = position_count.div_ceil(8);
        ensure_remaining(buf, num_bytes)?;
        let mut data = vec![0; num_bytes];
        buf.copy_to_slice(&mut data);
        Some(Bitmap::try_new(data, position_count)?)
    } else {
        None
    };

    let vector = read_vector::<B, _>(buf)?;
    TypedBlock::try_new(vector, position_count, first_value_indexes, nulls)
}

pub fn write_block<W: BufMut>(block: &Block, buf: &mut W) {
    buf.put_u8(block.element_type().wire_tag());
    write_vint(buf, block.position_count() as u64);
    match block {
        Block::Null(_) => (),
        Block::Int(b) => write_typed_block(b, buf),
        Block::Long(b) => write_typed_block(b, buf),
        Block::Double(b) => write_typed_block(b, buf),
        Block::Bytes(b) => write_typed_block(b, buf),
        Block::Boolean(b) => write_typed_block(b, buf),
    }
}

pub fn read_block<R: Buf>(buf: &mut R) -> Result<Block> {
    ensure_remaining(buf, 1)?;
    let element_type = ElementType::from_wire_tag(buf.get_u8())?;
    let position_count = read_usize(buf)?;
    Ok(match element_type {
        ElementType::Null => Block::Null(position_count),
        ElementType::Int => Block::Int(read_typed_block::<IntBuffer, _>(position_count, buf)?),
        ElementType::Long => Block::Long(read_typed_block::<LongBuffer, _>(position_count, buf)?),
        ElementType::Double => {
            Block::Double(read_typed_block::<DoubleBuffer, _>(position_count, buf)?)
        }
        ElementType::Bytes => {
            Block::Bytes(read_typed_block::<BytesBuffer, _>(position_count, buf)?)
        }
        ElementType::Boolean => {
            Block::Boolean(read_typed_block::<BooleanBuffer, _>(position_count, buf)?)
        }
    })
}

pub fn write_page<W: BufMut>(page: &Page, buf: &mut W) {
    write_vint(buf, page.block_count() as u64);
    write_vint(buf, page.position_count() as u64);
    for block in page.blocks() {
        write_block(block, buf);
    }
}

pub fn read_page<R: Buf>(buf: &mut R) -> Result<Page> {
    let block_count = read_usize(buf)?;
    let position_count = read_usize(buf)?;
    let mut page = Page::with_positions(position_count);
    for _ in 0..block_count {
        page = page.append_block(read_block(buf)?)?;
    }
    Ok(page)
}
