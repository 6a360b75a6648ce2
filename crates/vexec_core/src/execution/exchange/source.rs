use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use vexec_error::{DbError, Result};

use super::buffer::{ExchangeBuffer, ExchangeSource};
use crate::arrays::page::Page;
use crate::arrays::wire::{read_vint, write_vint};
use crate::buffer::buffer_manager::BufferManagerRef;
use crate::execution::operators::{Operator, OperatorFactory, OperatorStatus};
use crate::execution::readiness::ReadinessToken;
use crate::explain::ExplainEntry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeSourceOperatorStatus {
    pub pages_emitted: u64,
}

impl ExchangeSourceOperatorStatus {
    pub fn encode<W: BufMut>(&self, buf: &mut W) {
        write_vint(buf, self.pages_emitted);
    }

    pub fn decode<R: Buf>(buf: &mut R) -> Result<Self> {
        Ok(ExchangeSourceOperatorStatus {
            pages_emitted: read_vint(buf)?,
        })
    }
}

/// Source operator reading pages from an exchange.
#[derive(Debug)]
pub struct ExchangeSourceOperator {
    source: ExchangeSource,
    pages_emitted: u64,
}

impl ExchangeSourceOperator {
    pub fn new(source: ExchangeSource) -> Self {
        ExchangeSourceOperator {
            source,
            pages_emitted: 0,
        }
    }
}

impl Operator for ExchangeSourceOperator {
    fn needs_input(&mut self) -> bool {
        false
    }

    fn add_input(&mut self, _page: Page) -> Result<()> {
        Err(DbError::invalid_state("Exchange source does not accept input"))
    }

    fn finish(&mut self) -> Result<()> {
        self.source.finish();
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.source.is_finished()
    }

    fn get_output(&mut self) -> Result<Option<Page>> {
        let page = self.source.poll_page();
        if page.is_some() {
            self.pages_emitted += 1;
        }
        Ok(page)
    }

    fn is_blocked(&mut self) -> ReadinessToken {
        self.source.wait_for_reading()
    }

    fn status(&self) -> Option<OperatorStatus> {
        Some(OperatorStatus::ExchangeSource(ExchangeSourceOperatorStatus {
            pages_emitted: self.pages_emitted,
        }))
    }

    fn close(&mut self) {
        // Unblocks writers if we're closed early.
        self.source.finish();
    }
}

#[derive(Debug, Clone)]
pub struct ExchangeSourceOperatorFactory {
    buffer: ExchangeBuffer,
}

impl ExchangeSourceOperatorFactory {
    pub fn new(buffer: ExchangeBuffer) -> Self {
        ExchangeSourceOperatorFactory { buffer }
    }
}

impl OperatorFactory for ExchangeSourceOperatorFactory {
    fn create(&self, _manager: &BufferManagerRef) -> Result<Box<dyn Operator>> {
        Ok(Box::new(ExchangeSourceOperator::new(self.buffer.create_source())))
    }

    fn explain_entry(&self) -> ExplainEntry {
        ExplainEntry::new("ExchangeSource")
    }
}
