//! Columnar, vectorized execution core.
//!
//! Batches of rows are represented as [`arrays::page::Page`]s made up of typed
//! [`arrays::block::Block`]s. Rows are grouped through the
//! [`hash::block_hash::BlockHash`] family, folded into aggregate state, and
//! moved between partitions through an exchange with explicit backpressure.

pub mod aggregate;
pub mod arrays;
pub mod buffer;
pub mod config;
pub mod dedupe;
pub mod execution;
pub mod explain;
pub mod hash;

#[cfg(test)]
pub(crate) mod testutil;
