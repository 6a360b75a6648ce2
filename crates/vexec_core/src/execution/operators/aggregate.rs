use serde::{Deserialize, Serialize};
use tracing::trace;
use vexec_error::{DbError, Result};

use super::hash_aggregate::AggregationState;
use super::{Operator, OperatorFactory};
use crate::aggregate::{Aggregator, AggregatorFactory};
use crate::arrays::element_type::ElementType;
use crate::arrays::page::Page;
use crate::buffer::buffer_manager::BufferManagerRef;
use crate::explain::ExplainEntry;

/// Computes aggregates over all input, producing a single row.
#[derive(Debug)]
pub struct AggregationOperator {
    state: AggregationState,
    aggregators: Vec<Box<dyn Aggregator>>,
    closed: bool,
}

impl AggregationOperator {
    pub fn try_new(aggregators: &[AggregatorFactory], manager: &BufferManagerRef) -> Result<Self> {
        let mut built: Vec<Box<dyn Aggregator>> = Vec::with_capacity(aggregators.len());
        for factory in aggregators {
            match factory.create(manager) {
                Ok(agg) => built.push(agg),
                Err(e) => {
                    for agg in &mut built {
                        agg.close();
                    }
                    return Err(e);
                }
            }
        }

        Ok(AggregationOperator {
            state: AggregationState::NeedsInput,
            aggregators: built,
            closed: false,
        })
    }

    pub fn state(&self) -> AggregationState {
        self.state
    }

    fn transition(&mut self, next: AggregationState) {
        trace!(from = ?self.state, to = ?next, "aggregation transition");
        self.state = next;
    }
}

impl Operator for AggregationOperator {
    fn needs_input(&mut self) -> bool {
        self.state == AggregationState::NeedsInput
    }

    fn add_input(&mut self, page: Page) -> Result<()> {
        if self.state != AggregationState::NeedsInput {
            return Err(DbError::invalid_state("Aggregation does not need input")
                .with_field("state", format!("{:?}", self.state)));
        }
        for agg in &mut self.aggregators {
            agg.process_page(&page)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.state == AggregationState::NeedsInput {
            self.transition(AggregationState::HasOutput);
        }
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.state == AggregationState::Finished
    }

    fn get_output(&mut self) -> Result<Option<Page>> {
        if self.state != AggregationState::HasOutput {
            return Ok(None);
        }
        self.transition(AggregationState::Finishing);

        let blocks = self
            .aggregators
            .iter()
            .map(|agg| agg.evaluate())
            .collect::<Result<Vec<_>>>()?;
        let page = if blocks.is_empty() {
            Page::with_positions(1)
        } else {
            Page::try_new(blocks)?
        };

        self.transition(AggregationState::Finished);
        Ok(Some(page))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for agg in &mut self.aggregators {
            agg.close();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationOperatorFactory {
    pub aggregators: Vec<AggregatorFactory>,
}

impl AggregationOperatorFactory {
    pub fn new(aggregators: Vec<AggregatorFactory>) -> Self {
        AggregationOperatorFactory { aggregators }
    }

    pub fn output_types(&self) -> Result<Vec<ElementType>> {
        self.aggregators.iter().map(|a| a.output_type()).collect()
    }
}

impl OperatorFactory for AggregationOperatorFactory {
    fn create(&self, manager: &BufferManagerRef) -> Result<Box<dyn Operator>> {
        Ok(Box::new(AggregationOperator::try_new(&self.aggregators, manager)?))
    }

    fn explain_entry(&self) -> ExplainEntry {
        ExplainEntry::new("Aggregation")
            .with_values("aggregates", self.aggregators.iter().map(|a| a.describe()))
    }
}
