use std::sync::Arc;

use serde::{Deserialize, Serialize};
use vexec_error::{DbError, Result, ResultExt};

use crate::buffer::buffer_manager::{BufferManagerRef, NopBufferManager, TrackingBufferManager};
use crate::dedupe::ALWAYS_COPY_MISSING;
use crate::execution::exchange::buffer::ExchangeBuffer;

/// Configuration for executing a single query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Target number of positions per page produced by sources.
    pub page_size: usize,
    /// Number of pages an exchange buffers before blocking its writers.
    pub exchange_buffer_size: usize,
    /// Bytes the query may reserve. Unlimited if not set.
    pub memory_limit: Option<usize>,
    /// Value count below which multivalue dedupe copies missing values
    /// instead of sorting.
    pub dedupe_threshold: usize,
    /// Track reservations even without a memory limit.
    pub track_memory: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            page_size: 4096,
            exchange_buffer_size: 4,
            memory_limit: None,
            dedupe_threshold: ALWAYS_COPY_MISSING,
            track_memory: true,
        }
    }
}

impl ExecutionConfig {
    /// Parse a config from json, using defaults for missing fields.
    pub fn from_json(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s).context("Failed to parse execution config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(DbError::new("Page size must be greater than zero"));
        }
        if self.exchange_buffer_size == 0 {
            return Err(DbError::new("Exchange buffer size must be greater than zero"));
        }
        Ok(())
    }

    /// Create an exchange buffer holding `exchange_buffer_size` pages for
    /// `sink_count` writers.
    pub fn exchange_buffer(&self, sink_count: usize) -> Result<ExchangeBuffer> {
        ExchangeBuffer::try_new(self.exchange_buffer_size, sink_count)
    }

    /// Create the buffer manager all components of a query reserve against.
    pub fn buffer_manager(&self) -> BufferManagerRef {
        if self.memory_limit.is_none() && !self.track_memory {
            return NopBufferManager::new_ref();
        }
        Arc::new(TrackingBufferManager::new(self.memory_limit))
    }
}

#[cfg(test)]
mod tests {
    use vexec_error::ErrorKind;

    use super::*;
    use crate::arrays::element_type::ElementType;
    use crate::arrays::value::{Value, block_from_values, block_values};
    use crate::buffer::buffer_manager::Reservation;
    use crate::dedupe::dedupe_block;

    #[test]
    fn from_json_partial() {
        let config = ExecutionConfig::from_json(r#"{"memory_limit": 1024}"#).unwrap();
        assert_eq!(Some(1024), config.memory_limit);
        assert_eq!(4096, config.page_size);
        assert_eq!(ALWAYS_COPY_MISSING, config.dedupe_threshold);
    }

    #[test]
    fn from_json_invalid() {
        ExecutionConfig::from_json(r#"{"page_size": "big"}"#).unwrap_err();
        ExecutionConfig::from_json(r#"{"exchange_buffer_size": 0}"#).unwrap_err();
    }

    #[test]
    fn buffer_manager_enforces_limit() {
        let config = ExecutionConfig {
            memory_limit: Some(64),
            ..Default::default()
        };
        let manager = config.buffer_manager();
        let _r = Reservation::try_with_size(&manager, 48).unwrap();
        let err = Reservation::try_with_size(&manager, 32).unwrap_err();
        assert!(err.is_kind(ErrorKind::MemoryLimitExceeded));
    }

    #[test]
    fn nop_manager_when_untracked() {
        let config = ExecutionConfig {
            track_memory: false,
            ..Default::default()
        };
        let manager = config.buffer_manager();
        let _r = Reservation::try_with_size(&manager, 1 << 20).unwrap();
        assert_eq!(0, manager.reserved_bytes());
    }

    #[test]
    fn exchange_buffer_uses_configured_size() {
        let config = ExecutionConfig::from_json(r#"{"exchange_buffer_size": 1}"#).unwrap();
        let buffer = config.exchange_buffer(1).unwrap();
        let mut sink = buffer.create_sink().unwrap();

        assert!(sink.wait_for_writable().is_ready());
        sink.add_page(crate::testutil::long_pairs(&[(1, 1)])).unwrap();
        assert!(!sink.wait_for_writable().is_ready());
    }

    #[test]
    fn dedupe_with_configured_threshold() {
        let config = ExecutionConfig::from_json(r#"{"dedupe_threshold": 0}"#).unwrap();
        let manager = config.buffer_manager();
        let values = [Value::Multi(vec![3_i64.into(), 1_i64.into(), 3_i64.into()])];
        let block = block_from_values(ElementType::Long, &values, &manager).unwrap();

        // Threshold of zero always sorts.
        let deduped = dedupe_block(&block, config.dedupe_threshold, &manager).unwrap();
        assert_eq!(
            vec![Value::Multi(vec![1_i64.into(), 3_i64.into()])],
            block_values(&deduped)
        );
    }
}
