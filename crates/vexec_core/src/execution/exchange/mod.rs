//! Moving pages between partitions.
//!
//! Sinks on the producing side write into a bounded [`buffer::ExchangeBuffer`]
//! and are blocked once it fills up. Sources on the consuming side read from
//! it until every sink has finished.

pub mod buffer;
pub mod sink;
pub mod source;
