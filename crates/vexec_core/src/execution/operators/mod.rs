//! Operators in a driver's pipeline.

pub mod aggregate;
pub mod collector;
pub mod hash_aggregate;
pub mod page_source;

use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use vexec_error::{Result, ResultExt};

use super::exchange::sink::ExchangeSinkOperatorStatus;
use super::exchange::source::ExchangeSourceOperatorStatus;
use super::readiness::ReadinessToken;
use crate::arrays::page::Page;
use crate::buffer::buffer_manager::BufferManagerRef;
use crate::explain::ExplainEntry;

/// A push/pull operator driven by a single thread.
///
/// Pages are pushed with `add_input` while `needs_input` is true and pulled
/// with `get_output`. `finish` signals no more input will arrive. Once
/// `is_finished` returns true the operator won't produce any more output.
pub trait Operator: Debug + Send {
    /// If the operator can accept a page right now.
    fn needs_input(&mut self) -> bool;

    fn add_input(&mut self, page: Page) -> Result<()>;

    /// Signal that no more input will be added.
    ///
    /// Calling this more than once has no additional effect.
    fn finish(&mut self) -> Result<()>;

    fn is_finished(&self) -> bool;

    /// Take the next output page if there is one.
    fn get_output(&mut self) -> Result<Option<Page>>;

    /// Token resolving once the operator can make progress.
    ///
    /// Operators that never block return an already resolved token.
    fn is_blocked(&mut self) -> ReadinessToken {
        ReadinessToken::ready()
    }

    /// Operator specific status for reporting.
    fn status(&self) -> Option<OperatorStatus> {
        None
    }

    /// Release all resources held by the operator. Idempotent.
    fn close(&mut self);
}

/// Creates operator instances, one per driver.
pub trait OperatorFactory: Debug + Send + Sync {
    fn create(&self, manager: &BufferManagerRef) -> Result<Box<dyn Operator>>;

    /// Single line description of the operators this factory creates.
    fn describe(&self) -> String {
        self.explain_entry().to_string()
    }

    fn explain_entry(&self) -> ExplainEntry;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperatorStatus {
    ExchangeSink(ExchangeSinkOperatorStatus),
    ExchangeSource(ExchangeSourceOperatorStatus),
}

impl OperatorStatus {
    /// Render the status as json.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize operator status")
    }
}
