use serde::{Deserialize, Serialize};
use tracing::trace;
use vexec_error::{DbError, Result};

use super::{Operator, OperatorFactory};
use crate::aggregate::{AggregatorFactory, GroupingAggregator};
use crate::arrays::element_type::ElementType;
use crate::arrays::page::Page;
use crate::buffer::buffer_manager::BufferManagerRef;
use crate::explain::{Channels, ExplainEntry};
use crate::dedupe::ALWAYS_COPY_MISSING;
use crate::hash::block_hash::{BlockHash, new_block_hash_with_threshold};

/// States of an aggregation operator.
///
/// Transitions only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AggregationState {
    NeedsInput,
    HasOutput,
    Finishing,
    Finished,
}

/// Groups input on a single channel and computes aggregates per group.
///
/// Produces exactly one output page laid out as `[keys, agg1, agg2, ...]`.
#[derive(Debug)]
pub struct HashAggregationOperator {
    state: AggregationState,
    block_hash: Box<dyn BlockHash>,
    aggregators: Vec<Box<dyn GroupingAggregator>>,
    closed: bool,
}

impl HashAggregationOperator {
    pub fn try_new(
        group_by_channel: usize,
        group_type: ElementType,
        aggregators: &[AggregatorFactory],
        manager: &BufferManagerRef,
    ) -> Result<Self> {
        Self::try_with_dedupe_threshold(
            group_by_channel,
            group_type,
            ALWAYS_COPY_MISSING,
            aggregators,
            manager,
        )
    }

    /// Create the operator, deduplicating multivalued keys with the given
    /// adaptive threshold.
    pub fn try_with_dedupe_threshold(
        group_by_channel: usize,
        group_type: ElementType,
        dedupe_threshold: usize,
        aggregators: &[AggregatorFactory],
        manager: &BufferManagerRef,
    ) -> Result<Self> {
        let mut block_hash =
            new_block_hash_with_threshold(group_by_channel, group_type, dedupe_threshold, manager)?;

        let mut built: Vec<Box<dyn GroupingAggregator>> = Vec::with_capacity(aggregators.len());
        for factory in aggregators {
            match factory.create_grouping(manager) {
                Ok(agg) => built.push(agg),
                Err(e) => {
                    for agg in &mut built {
                        agg.close();
                    }
                    block_hash.close();
                    return Err(e);
                }
            }
        }

        Ok(HashAggregationOperator {
            state: AggregationState::NeedsInput,
            block_hash,
            aggregators: built,
            closed: false,
        })
    }

    pub fn state(&self) -> AggregationState {
        self.state
    }

    /// Bytes currently reserved by the hash and every aggregator.
    pub fn memory_usage(&self) -> usize {
        self.block_hash.memory_usage()
            + self
                .aggregators
                .iter()
                .map(|agg| agg.memory_usage())
                .sum::<usize>()
    }

    fn transition(&mut self, next: AggregationState) {
        trace!(from = ?self.state, to = ?next, "hash aggregation transition");
        self.state = next;
    }

    fn build_output(&mut self) -> Result<Page> {
        let keys = self.block_hash.keys()?;
        let selected = self.block_hash.non_empty();

        let mut blocks = Vec::with_capacity(self.aggregators.len() + 1);
        blocks.push(keys);
        for agg in &self.aggregators {
            blocks.push(agg.evaluate(&selected)?);
        }

        Page::try_new(blocks)
    }
}

impl Operator for HashAggregationOperator {
    fn needs_input(&mut self) -> bool {
        self.state == AggregationState::NeedsInput
    }

    fn add_input(&mut self, page: Page) -> Result<()> {
        if self.state != AggregationState::NeedsInput {
            return Err(DbError::invalid_state("Hash aggregation does not need input")
                .with_field("state", format!("{:?}", self.state)));
        }

        let group_ids = self.block_hash.add(&page)?;
        for agg in &mut self.aggregators {
            agg.process_page(&group_ids, &page)?;
        }

        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.state == AggregationState::NeedsInput {
            trace!(groups = self.block_hash.group_count(), "hash aggregation input finished");
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
        let page = self.build_output()?;
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
        self.block_hash.close();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashAggregationOperatorFactory {
    pub group_by_channel: usize,
    pub group_type: ElementType,
    pub aggregators: Vec<AggregatorFactory>,
    #[serde(default = "default_dedupe_threshold")]
    pub dedupe_threshold: usize,
}

fn default_dedupe_threshold() -> usize {
    ALWAYS_COPY_MISSING
}

impl HashAggregationOperatorFactory {
    pub fn new(
        group_by_channel: usize,
        group_type: ElementType,
        aggregators: Vec<AggregatorFactory>,
    ) -> Self {
        HashAggregationOperatorFactory {
            group_by_channel,
            group_type,
            aggregators,
            dedupe_threshold: ALWAYS_COPY_MISSING,
        }
    }

    pub fn with_dedupe_threshold(mut self, threshold: usize) -> Self {
        self.dedupe_threshold = threshold;
        self
    }

    /// Element types of the output page.
    pub fn output_types(&self) -> Result<Vec<ElementType>> {
        let mut types = vec![self.group_type];
        for agg in &self.aggregators {
            types.push(agg.output_type()?);
        }
        Ok(types)
    }
}

impl OperatorFactory for HashAggregationOperatorFactory {
    fn create(&self, manager: &BufferManagerRef) -> Result<Box<dyn Operator>> {
        let op = HashAggregationOperator::try_with_dedupe_threshold(
            self.group_by_channel,
            self.group_type,
            self.dedupe_threshold,
            &self.aggregators,
            manager,
        )?;
        Ok(Box::new(op))
    }

    fn explain_entry(&self) -> ExplainEntry {
        ExplainEntry::new("HashAggregation")
            .with_value("group_by", Channels(&[self.group_by_channel]))
            .with_values("aggregates", self.aggregators.iter().map(|a| a.describe()))
    }
}

#[cfg(test)]
mod tests {
    use vexec_error::ErrorKind;

    use super::*;
    use crate::aggregate::{AggregateFunction, AggregatorMode};
    use crate::arrays::value::{Value, page_rows};
    use crate::buffer::buffer_manager::{NopBufferManager, TrackingBufferManager};
    use crate::testutil::{long_pairs, page};

    fn sum_and_count(mode: AggregatorMode) -> Vec<AggregatorFactory> {
        vec![
            AggregatorFactory::new(AggregateFunction::Sum, ElementType::Long, 1, mode),
            AggregatorFactory::new(AggregateFunction::Count, ElementType::Long, 1, mode),
        ]
    }

    fn operator(manager: &BufferManagerRef) -> HashAggregationOperator {
        HashAggregationOperator::try_new(
            0,
            ElementType::Long,
            &sum_and_count(AggregatorMode::Single),
            manager,
        )
        .unwrap()
    }

    #[test]
    fn state_machine() {
        let mut op = operator(&NopBufferManager::new_ref());
        assert_eq!(AggregationState::NeedsInput, op.state());
        assert!(op.needs_input());
        assert!(op.get_output().unwrap().is_none());
        assert_eq!(AggregationState::NeedsInput, op.state());

        op.add_input(long_pairs(&[(1, 10), (2, 20), (1, 5)])).unwrap();
        op.add_input(long_pairs(&[(3, 1), (2, 2)])).unwrap();
        op.finish().unwrap();
        assert_eq!(AggregationState::HasOutput, op.state());
        assert!(!op.needs_input());
        assert!(!op.is_finished());

        let err = op.add_input(long_pairs(&[(1, 1)])).unwrap_err();
        assert!(err.is_kind(ErrorKind::InvalidState));

        let out = op.get_output().unwrap().unwrap();
        assert_eq!(AggregationState::Finished, op.state());
        assert!(op.is_finished());
        assert_eq!(
            vec![
                vec![Value::Long(1), Value::Long(15), Value::Long(2)],
                vec![Value::Long(2), Value::Long(22), Value::Long(2)],
                vec![Value::Long(3), Value::Long(1), Value::Long(1)],
            ],
            page_rows(&out)
        );

        // Single shot.
        assert!(op.get_output().unwrap().is_none());
        op.finish().unwrap();
        assert_eq!(AggregationState::Finished, op.state());

        let err = op.add_input(long_pairs(&[(1, 1)])).unwrap_err();
        assert!(err.is_kind(ErrorKind::InvalidState));

        op.close();
        op.close();
    }

    #[test]
    fn no_input_produces_empty_page() {
        let mut op = operator(&NopBufferManager::new_ref());
        op.finish().unwrap();

        let out = op.get_output().unwrap().unwrap();
        assert_eq!(0, out.position_count());
        assert_eq!(3, out.block_count());
        assert_eq!(ElementType::Long, out.block(0).unwrap().element_type());
        assert!(op.is_finished());
    }

    #[test]
    fn null_keys_are_skipped() {
        let mut op = operator(&NopBufferManager::new_ref());
        let input = page(
            &[ElementType::Long, ElementType::Long],
            vec![
                vec![Value::Null, Value::Long(100)],
                vec![Value::Long(4), Value::Long(1)],
                vec![
                    Value::Multi(vec![Value::Long(4), Value::Long(5)]),
                    Value::Long(2),
                ],
            ],
        );
        op.add_input(input).unwrap();
        op.finish().unwrap();

        let out = op.get_output().unwrap().unwrap();
        assert_eq!(
            vec![
                vec![Value::Long(4), Value::Long(3), Value::Long(2)],
                vec![Value::Long(5), Value::Long(2), Value::Long(1)],
            ],
            page_rows(&out)
        );
    }

    #[test]
    fn dedupe_threshold_orders_multivalued_keys() {
        let input = || {
            page(
                &[ElementType::Long, ElementType::Long],
                vec![vec![
                    Value::Multi(vec![Value::Long(9), Value::Long(4), Value::Long(9)]),
                    Value::Long(3),
                ]],
            )
        };
        let manager = NopBufferManager::new_ref();
        let factory = HashAggregationOperatorFactory::new(
            0,
            ElementType::Long,
            sum_and_count(AggregatorMode::Single),
        );

        let mut first_seen = factory.create(&manager).unwrap();
        first_seen.add_input(input()).unwrap();
        first_seen.finish().unwrap();
        assert_eq!(
            vec![
                vec![Value::Long(9), Value::Long(3), Value::Long(1)],
                vec![Value::Long(4), Value::Long(3), Value::Long(1)],
            ],
            page_rows(&first_seen.get_output().unwrap().unwrap())
        );

        // Sorting puts the smaller key in the first group.
        let mut sorted = factory.with_dedupe_threshold(0).create(&manager).unwrap();
        sorted.add_input(input()).unwrap();
        sorted.finish().unwrap();
        assert_eq!(
            vec![
                vec![Value::Long(4), Value::Long(3), Value::Long(1)],
                vec![Value::Long(9), Value::Long(3), Value::Long(1)],
            ],
            page_rows(&sorted.get_output().unwrap().unwrap())
        );
    }

    #[test]
    fn factory_from_json() {
        let factory: HashAggregationOperatorFactory = serde_json::from_str(
            r#"{"group_by_channel": 0, "group_type": "Long", "aggregators": []}"#,
        )
        .unwrap();
        assert_eq!(ALWAYS_COPY_MISSING, factory.dedupe_threshold);
    }

    #[test]
    fn memory_released_on_close() {
        let manager: BufferManagerRef = TrackingBufferManager::new_ref(None);
        let mut op = operator(&manager);

        let rows: Vec<_> = (0..1000).map(|i| (i, i)).collect();
        op.add_input(long_pairs(&rows)).unwrap();
        assert!(op.memory_usage() > 0);
        assert_eq!(op.memory_usage(), manager.reserved_bytes());

        op.finish().unwrap();
        op.get_output().unwrap().unwrap();

        op.close();
        assert_eq!(0, manager.reserved_bytes());
    }

    #[test]
    fn memory_limit_refused() {
        let manager: BufferManagerRef = TrackingBufferManager::new_ref(Some(4096));
        let mut op = operator(&manager);

        let rows: Vec<_> = (0..10_000).map(|i| (i, i)).collect();
        let err = op.add_input(long_pairs(&rows)).unwrap_err();
        assert!(err.is_kind(ErrorKind::MemoryLimitExceeded));

        op.close();
        assert_eq!(0, manager.reserved_bytes());
    }

    #[test]
    fn construction_rolls_back() {
        let manager: BufferManagerRef = TrackingBufferManager::new_ref(None);
        let aggregators = vec![
            AggregatorFactory::new(
                AggregateFunction::Sum,
                ElementType::Long,
                1,
                AggregatorMode::Single,
            ),
            AggregatorFactory::new(
                AggregateFunction::Sum,
                ElementType::Bytes,
                1,
                AggregatorMode::Single,
            ),
        ];

        let err = HashAggregationOperator::try_new(0, ElementType::Long, &aggregators, &manager)
            .unwrap_err();
        assert!(err.is_kind(ErrorKind::UnsupportedType));
        assert_eq!(0, manager.reserved_bytes());
    }

    #[test]
    fn factory_describe() {
        let factory = HashAggregationOperatorFactory::new(
            0,
            ElementType::Long,
            sum_and_count(AggregatorMode::Initial),
        );
        assert_eq!(
            "HashAggregation (aggregates = [sum(long) INITIAL channel=1, \
             count(long) INITIAL channel=1], group_by = #0)",
            factory.describe()
        );
        assert_eq!(
            vec![ElementType::Long, ElementType::Bytes, ElementType::Bytes],
            factory.output_types().unwrap()
        );
    }
}
