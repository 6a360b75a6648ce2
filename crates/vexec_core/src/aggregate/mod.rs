//! Aggregate functions and the aggregators that drive them.
//!
//! An aggregate is computed in one of four modes. Partial aggregation runs
//! `Initial` on each partition and merges the intermediate states with
//! `Final` (optionally chaining `Intermediate` stages in between). `Single`
//! does both in one step.

pub mod aggregator;
pub mod state;

use std::fmt::{self, Debug};

use serde::{Deserialize, Serialize};
use vexec_error::{DbError, Result};

use self::aggregator::{GroupedAggregator, UngroupedAggregator};
use self::state::{
    CompensatedSumState,
    CountState,
    DoubleAvgState,
    LongAvgState,
    MaxDoubleState,
    MaxLongState,
    MinDoubleState,
    MinLongState,
    SumLongState,
};
use crate::arrays::block::Block;
use crate::arrays::element_type::ElementType;
use crate::arrays::page::Page;
use crate::arrays::vector::LongVector;
use crate::buffer::buffer_manager::BufferManagerRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregatorMode {
    /// Raw input, intermediate output.
    Initial,
    /// Intermediate input and output.
    Intermediate,
    /// Intermediate input, final output.
    Final,
    /// Raw input, final output.
    Single,
}

impl AggregatorMode {
    pub const fn is_input_raw(&self) -> bool {
        matches!(self, Self::Initial | Self::Single)
    }

    pub const fn is_output_final(&self) -> bool {
        matches!(self, Self::Final | Self::Single)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::Intermediate => "INTERMEDIATE",
            Self::Final => "FINAL",
            Self::Single => "SINGLE",
        }
    }
}

impl fmt::Display for AggregatorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggregateFunction {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Avg => "avg",
        }
    }
}

/// Aggregate over every input row.
pub trait Aggregator: Debug + Send {
    fn process_page(&mut self, page: &Page) -> Result<()>;

    /// Produce a block with exactly one position.
    fn evaluate(&self) -> Result<Block>;

    fn output_type(&self) -> ElementType;

    fn memory_usage(&self) -> usize;

    /// Release all state. Idempotent.
    fn close(&mut self);
}

/// Aggregate with one state per group id.
pub trait GroupingAggregator: Debug + Send {
    /// Fold a page into the states for the page's group ids.
    ///
    /// Null group ids are skipped. A position with multiple group ids
    /// contributes to each of them.
    fn process_page(&mut self, group_ids: &Block, page: &Page) -> Result<()>;

    /// Produce one position per selected group id.
    fn evaluate(&self, selected: &LongVector) -> Result<Block>;

    fn output_type(&self) -> ElementType;

    fn memory_usage(&self) -> usize;

    /// Release all state. Idempotent.
    fn close(&mut self);
}

/// Picks the state for a function and raw input type, binding it to `$s`.
macro_rules! with_state {
    ($function:expr, $input:expr, $s:ident => $body:expr) => {{
        use ElementType as E;
        match ($function, $input) {
            (AggregateFunction::Count, _) => {
                type $s = CountState;
                $body
            }
            (AggregateFunction::Sum, E::Int | E::Long) => {
                type $s = SumLongState;
                $body
            }
            (AggregateFunction::Sum, E::Double) => {
                type $s = CompensatedSumState;
                $body
            }
            (AggregateFunction::Max, E::Int | E::Long) => {
                type $s = MaxLongState;
                $body
            }
            (AggregateFunction::Max, E::Double) => {
                type $s = MaxDoubleState;
                $body
            }
            (AggregateFunction::Min, E::Int | E::Long) => {
                type $s = MinLongState;
                $body
            }
            (AggregateFunction::Min, E::Double) => {
                type $s = MinDoubleState;
                $body
            }
            (AggregateFunction::Avg, E::Int | E::Long) => {
                type $s = LongAvgState;
                $body
            }
            (AggregateFunction::Avg, E::Double) => {
                type $s = DoubleAvgState;
                $body
            }
            (function, input) => Err(DbError::unsupported_type(
                "Unsupported input type for aggregate",
            )
            .with_field("function", function.name())
            .with_field("input", input)),
        }
    }};
}

/// Creates aggregators for a single aggregate function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorFactory {
    pub function: AggregateFunction,
    /// Element type of the raw input.
    pub input_type: ElementType,
    /// Input channel. Holds raw values for `Initial` and `Single`,
    /// intermediate states otherwise.
    pub channel: usize,
    pub mode: AggregatorMode,
}

impl AggregatorFactory {
    pub fn new(
        function: AggregateFunction,
        input_type: ElementType,
        channel: usize,
        mode: AggregatorMode,
    ) -> Self {
        AggregatorFactory {
            function,
            input_type,
            channel,
            mode,
        }
    }

    /// Factory for the same function reading from a different stage.
    pub fn with_mode(&self, mode: AggregatorMode, channel: usize) -> Self {
        AggregatorFactory {
            mode,
            channel,
            ..self.clone()
        }
    }

    /// Output element type, validating the function accepts the input type.
    pub fn output_type(&self) -> Result<ElementType> {
        with_state!(self.function, self.input_type, S => {
            Ok(aggregator::output_type::<S>(self.mode))
        })
    }

    pub fn create(&self, manager: &BufferManagerRef) -> Result<Box<dyn Aggregator>> {
        with_state!(self.function, self.input_type, S => {
            let agg = UngroupedAggregator::<S>::try_new(self.channel, self.mode, manager)?;
            Ok(Box::new(agg) as Box<dyn Aggregator>)
        })
    }

    pub fn create_grouping(&self, manager: &BufferManagerRef) -> Result<Box<dyn GroupingAggregator>> {
        with_state!(self.function, self.input_type, S => {
            let agg = GroupedAggregator::<S>::new(self.channel, self.mode, manager);
            Ok(Box::new(agg) as Box<dyn GroupingAggregator>)
        })
    }

    pub fn describe(&self) -> String {
        format!(
            "{}({}) {} channel={}",
            self.function.name(),
            self.input_type,
            self.mode,
            self.channel
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use vexec_error::ErrorKind;

    use super::*;
    use crate::arrays::value::{Value, block_values, page_from_rows};
    use crate::buffer::buffer_manager::{NopBufferManager, TrackingBufferManager};
    use crate::hash::block_hash::new_block_hash;

    fn long_page(rows: &[(i64, Option<i64>)]) -> Page {
        let rows: Vec<_> = rows
            .iter()
            .map(|&(k, v)| vec![Value::Long(k), v.into()])
            .collect();
        page_from_rows(
            &[ElementType::Long, ElementType::Long],
            &rows,
            &NopBufferManager::new_ref(),
        )
        .unwrap()
    }

    #[test]
    fn unsupported_inputs() {
        let manager = NopBufferManager::new_ref();
        for (function, input) in [
            (AggregateFunction::Sum, ElementType::Bytes),
            (AggregateFunction::Max, ElementType::Boolean),
            (AggregateFunction::Avg, ElementType::Null),
        ] {
            let factory = AggregatorFactory::new(function, input, 0, AggregatorMode::Single);
            let err = factory.create_grouping(&manager).unwrap_err();
            assert!(err.is_kind(ErrorKind::UnsupportedType));
            factory.output_type().unwrap_err();
        }

        let count = AggregatorFactory::new(
            AggregateFunction::Count,
            ElementType::Bytes,
            0,
            AggregatorMode::Single,
        );
        count.create(&manager).unwrap();
        assert_eq!(ElementType::Long, count.output_type().unwrap());
    }

    #[test]
    fn output_types() {
        let avg = AggregatorFactory::new(
            AggregateFunction::Avg,
            ElementType::Int,
            0,
            AggregatorMode::Single,
        );
        assert_eq!(ElementType::Double, avg.output_type().unwrap());
        assert_eq!(
            ElementType::Bytes,
            avg.with_mode(AggregatorMode::Initial, 0)
                .output_type()
                .unwrap()
        );
        assert_eq!("avg(int) SINGLE channel=0", avg.describe());
    }

    #[test]
    fn ungrouped_single() {
        let manager = NopBufferManager::new_ref();
        let page = long_page(&[(0, Some(3)), (0, None), (0, Some(-1)), (0, Some(10))]);

        let mut results = Vec::new();
        for function in [
            AggregateFunction::Count,
            AggregateFunction::Sum,
            AggregateFunction::Min,
            AggregateFunction::Max,
            AggregateFunction::Avg,
        ] {
            let mut agg = AggregatorFactory::new(function, ElementType::Long, 1, AggregatorMode::Single)
                .create(&manager)
                .unwrap();
            agg.process_page(&page).unwrap();
            results.extend(block_values(&agg.evaluate().unwrap()));
        }

        assert_eq!(
            vec![
                Value::Long(3),
                Value::Long(12),
                Value::Long(-1),
                Value::Long(10),
                Value::Double(4.0),
            ],
            results
        );
    }

    #[test]
    fn ungrouped_no_input() {
        let manager = NopBufferManager::new_ref();
        let max = AggregatorFactory::new(
            AggregateFunction::Max,
            ElementType::Double,
            0,
            AggregatorMode::Single,
        )
        .create(&manager)
        .unwrap();
        let out = max.evaluate().unwrap();
        assert_eq!(1, out.position_count());
        assert!(out.is_null(0));
    }

    #[test]
    fn grouped_mean_and_max_random() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let manager: BufferManagerRef = TrackingBufferManager::new_ref(None);

        let mut hash = new_block_hash(0, ElementType::Long, &manager).unwrap();
        let mut avg = AggregatorFactory::new(
            AggregateFunction::Avg,
            ElementType::Long,
            1,
            AggregatorMode::Single,
        )
        .create_grouping(&manager)
        .unwrap();
        let mut max = AggregatorFactory::new(
            AggregateFunction::Max,
            ElementType::Long,
            1,
            AggregatorMode::Single,
        )
        .create_grouping(&manager)
        .unwrap();

        let mut expected: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for _ in 0..10 {
            let rows: Vec<(i64, Option<i64>)> = (0..100)
                .map(|_| (rng.random_range(0..5), Some(rng.random_range(-1000..1000))))
                .collect();
            for &(k, v) in &rows {
                expected.entry(k).or_default().extend(v);
            }
            let page = long_page(&rows);
            let groups = hash.add(&page).unwrap();
            avg.process_page(&groups, &page).unwrap();
            max.process_page(&groups, &page).unwrap();
        }

        let selected = hash.non_empty();
        let keys = block_values(&hash.keys().unwrap());
        let avgs = block_values(&avg.evaluate(&selected).unwrap());
        let maxes = block_values(&max.evaluate(&selected).unwrap());

        assert_eq!(5, keys.len());
        for ((key, avg), max) in keys.iter().zip(&avgs).zip(&maxes) {
            let vals = &expected[&key.try_as_i64().unwrap()];
            let mean = vals.iter().sum::<i64>() as f64 / vals.len() as f64;
            assert!((avg.try_as_f64().unwrap() - mean).abs() < 1e-9);
            assert_eq!(*vals.iter().max().unwrap(), max.try_as_i64().unwrap());
        }

        assert!(manager.reserved_bytes() > 0);
        hash.close();
        avg.close();
        max.close();
        assert_eq!(0, manager.reserved_bytes());
    }

    #[test]
    fn two_stage_equals_single() {
        let manager = NopBufferManager::new_ref();
        let partitions = [
            long_page(&[(1, Some(5)), (2, Some(7)), (1, Some(1))]),
            long_page(&[(2, Some(-3)), (3, None), (1, Some(4))]),
        ];

        for function in [
            AggregateFunction::Count,
            AggregateFunction::Sum,
            AggregateFunction::Min,
            AggregateFunction::Max,
            AggregateFunction::Avg,
        ] {
            let single = AggregatorFactory::new(function, ElementType::Long, 1, AggregatorMode::Single);
            let initial = single.with_mode(AggregatorMode::Initial, 1);
            let final_ = single.with_mode(AggregatorMode::Final, 1);

            // Single stage over everything.
            let mut hash = new_block_hash(0, ElementType::Long, &manager).unwrap();
            let mut agg = single.create_grouping(&manager).unwrap();
            for page in &partitions {
                let groups = hash.add(page).unwrap();
                agg.process_page(&groups, page).unwrap();
            }
            let expected_keys = hash.keys().unwrap();
            let expected = agg.evaluate(&hash.non_empty()).unwrap();

            // Partial per partition, then merge on keys.
            let mut final_hash = new_block_hash(0, ElementType::Long, &manager).unwrap();
            let mut final_agg = final_.create_grouping(&manager).unwrap();
            for page in &partitions {
                let mut hash = new_block_hash(0, ElementType::Long, &manager).unwrap();
                let mut agg = initial.create_grouping(&manager).unwrap();
                let groups = hash.add(page).unwrap();
                agg.process_page(&groups, page).unwrap();

                let intermediate = Page::try_new([
                    hash.keys().unwrap(),
                    agg.evaluate(&hash.non_empty()).unwrap(),
                ])
                .unwrap();
                let groups = final_hash.add(&intermediate).unwrap();
                final_agg.process_page(&groups, &intermediate).unwrap();
            }

            assert_eq!(expected_keys, final_hash.keys().unwrap());
            assert_eq!(
                expected,
                final_agg.evaluate(&final_hash.non_empty()).unwrap(),
                "function: {}",
                function.name()
            );
        }
    }

    #[test]
    fn multivalued_input_contributes_every_value() {
        let manager = NopBufferManager::new_ref();
        let page = page_from_rows(
            &[ElementType::Int],
            &[
                vec![Value::Multi(vec![1.into(), 2.into(), 3.into()])],
                vec![Value::Null],
                vec![4.into()],
            ],
            &manager,
        )
        .unwrap();

        let mut sum = AggregatorFactory::new(
            AggregateFunction::Sum,
            ElementType::Int,
            0,
            AggregatorMode::Single,
        )
        .create(&manager)
        .unwrap();
        sum.process_page(&page).unwrap();
        assert_eq!(vec![Value::Long(10)], block_values(&sum.evaluate().unwrap()));
    }
}
