use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use tracing::trace;
use vexec_error::Result;

use super::buffer::{ExchangeBuffer, ExchangeSink};
use crate::arrays::page::Page;
use crate::arrays::wire::{read_vint, write_vint};
use crate::buffer::buffer_manager::BufferManagerRef;
use crate::execution::operators::{Operator, OperatorFactory, OperatorStatus};
use crate::execution::readiness::ReadinessToken;
use crate::explain::ExplainEntry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeSinkOperatorStatus {
    pub pages_accepted: u64,
}

impl ExchangeSinkOperatorStatus {
    pub fn encode<W: BufMut>(&self, buf: &mut W) {
        write_vint(buf, self.pages_accepted);
    }

    pub fn decode<R: Buf>(buf: &mut R) -> Result<Self> {
        Ok(ExchangeSinkOperatorStatus {
            pages_accepted: read_vint(buf)?,
        })
    }
}

/// Terminal operator writing pages into an exchange.
#[derive(Debug)]
pub struct ExchangeSinkOperator {
    sink: ExchangeSink,
    /// Last token that wasn't ready when queried.
    blocked: Option<ReadinessToken>,
    pages_accepted: u64,
}

impl ExchangeSinkOperator {
    pub fn new(sink: ExchangeSink) -> Self {
        ExchangeSinkOperator {
            sink,
            blocked: None,
            pages_accepted: 0,
        }
    }

    pub fn pages_accepted(&self) -> u64 {
        self.pages_accepted
    }
}

impl Operator for ExchangeSinkOperator {
    fn needs_input(&mut self) -> bool {
        !self.is_finished() && self.is_blocked().is_ready()
    }

    fn add_input(&mut self, page: Page) -> Result<()> {
        if self.sink.add_page(page)? {
            self.pages_accepted += 1;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.sink.finish();
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.sink.is_finished()
    }

    fn get_output(&mut self) -> Result<Option<Page>> {
        Ok(None)
    }

    fn is_blocked(&mut self) -> ReadinessToken {
        if let Some(token) = &self.blocked {
            if !token.is_ready() {
                return token.clone();
            }
            self.blocked = None;
        }

        let token = self.sink.wait_for_writable();
        if token.is_ready() {
            return token;
        }
        trace!(pages_accepted = self.pages_accepted, "exchange sink blocked");
        self.blocked = Some(token.clone());
        token
    }

    fn status(&self) -> Option<OperatorStatus> {
        Some(OperatorStatus::ExchangeSink(ExchangeSinkOperatorStatus {
            pages_accepted: self.pages_accepted,
        }))
    }

    fn close(&mut self) {
        self.sink.finish();
        self.blocked = None;
    }
}

#[derive(Debug, Clone)]
pub struct ExchangeSinkOperatorFactory {
    buffer: ExchangeBuffer,
}

impl ExchangeSinkOperatorFactory {
    pub fn new(buffer: ExchangeBuffer) -> Self {
        ExchangeSinkOperatorFactory { buffer }
    }
}

impl OperatorFactory for ExchangeSinkOperatorFactory {
    fn create(&self, _manager: &BufferManagerRef) -> Result<Box<dyn Operator>> {
        Ok(Box::new(ExchangeSinkOperator::new(self.buffer.create_sink()?)))
    }

    fn explain_entry(&self) -> ExplainEntry {
        ExplainEntry::new("ExchangeSink")
    }
}
