use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tracing::{debug, trace};
use vexec_error::{DbError, Result};

use super::operators::{Operator, OperatorFactory};
use super::readiness::ReadinessToken;
use crate::buffer::buffer_manager::BufferManagerRef;

/// Result of a single pass over a driver's operators.
#[derive(Debug)]
enum DriverStep {
    /// Some page moved or some operator was finished.
    Progress,
    /// Nothing can move until the token resolves.
    Blocked(ReadinessToken),
    /// The last operator is finished.
    Done,
}

/// Moves pages through one partition's chain of operators.
///
/// The first operator is the source and the last is the sink. Polling the
/// driver runs the chain until either the sink finishes or every operator
/// that could make progress is blocked.
#[derive(Debug)]
pub struct Driver {
    partition: usize,
    operators: Vec<Box<dyn Operator>>,
    /// Operators `finish` has been called on by the driver.
    finish_called: Vec<bool>,
    closed: bool,
}

impl Driver {
    pub fn try_new(partition: usize, operators: Vec<Box<dyn Operator>>) -> Result<Self> {
        if operators.len() < 2 {
            return Err(DbError::new("Driver requires at least a source and a sink")
                .with_field("operators", operators.len()));
        }
        let finish_called = vec![false; operators.len()];
        Ok(Driver {
            partition,
            operators,
            finish_called,
            closed: false,
        })
    }

    /// Create a driver with an operator from each factory.
    ///
    /// Already created operators are closed if a later factory fails.
    pub fn try_from_factories(
        partition: usize,
        factories: &[&dyn OperatorFactory],
        manager: &BufferManagerRef,
    ) -> Result<Self> {
        let mut operators: Vec<Box<dyn Operator>> = Vec::with_capacity(factories.len());
        for factory in factories {
            match factory.create(manager) {
                Ok(op) => operators.push(op),
                Err(e) => {
                    for op in &mut operators {
                        op.close();
                    }
                    return Err(e);
                }
            }
        }
        Self::try_new(partition, operators)
    }

    pub fn partition(&self) -> usize {
        self.partition
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn step(&mut self) -> Result<DriverStep> {
        let mut progress = false;

        for idx in 0..self.operators.len() - 1 {
            let (head, tail) = self.operators.split_at_mut(idx + 1);
            let upstream = &mut head[idx];
            let downstream = &mut tail[0];

            if self.finish_called[idx + 1] {
                continue;
            }

            if downstream.is_finished() {
                // Downstream doesn't need anything else from us.
                if !self.finish_called[idx] && !upstream.is_finished() {
                    upstream.finish()?;
                    self.finish_called[idx] = true;
                    progress = true;
                }
                continue;
            }

            if !downstream.is_blocked().is_ready() {
                continue;
            }

            if upstream.is_blocked().is_ready() && downstream.needs_input() {
                if let Some(page) = upstream.get_output()? {
                    trace!(
                        partition = self.partition,
                        operator = idx + 1,
                        positions = page.position_count(),
                        "moving page"
                    );
                    downstream.add_input(page)?;
                    progress = true;
                }
            }

            if upstream.is_finished() {
                downstream.finish()?;
                self.finish_called[idx + 1] = true;
                progress = true;
            }
        }

        if self.operators.last().is_some_and(|op| op.is_finished()) {
            return Ok(DriverStep::Done);
        }
        if progress {
            return Ok(DriverStep::Progress);
        }

        for (idx, op) in self.operators.iter_mut().enumerate() {
            let token = op.is_blocked();
            if !token.is_ready() {
                trace!(partition = self.partition, operator = idx, "driver blocked");
                return Ok(DriverStep::Blocked(token));
            }
        }

        Err(DbError::new("Driver cannot make progress")
            .with_field("partition", self.partition))
    }

    /// Close every operator. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for op in &mut self.operators {
            op.close();
        }
        debug!(partition = self.partition, "driver closed");
    }
}

impl Future for Driver {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Ok(()));
        }

        loop {
            match this.step() {
                Ok(DriverStep::Progress) => continue,
                Ok(DriverStep::Blocked(token)) => {
                    if token.register(cx.waker()) {
                        // Resolved in the meantime.
                        continue;
                    }
                    return Poll::Pending;
                }
                Ok(DriverStep::Done) => {
                    this.close();
                    return Poll::Ready(Ok(()));
                }
                Err(e) => {
                    this.close();
                    return Poll::Ready(Err(e));
                }
            }
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.close();
    }
}

/// Run drivers to completion, one thread per driver.
///
/// Returns the first error encountered.
pub fn run_drivers(drivers: Vec<Driver>) -> Result<()> {
    debug!(drivers = drivers.len(), "running drivers");

    let results: Vec<Result<()>> = std::thread::scope(|s| {
        let handles: Vec<_> = drivers
            .into_iter()
            .map(|driver| s.spawn(move || futures::executor::block_on(driver)))
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(DbError::new("Driver thread panicked")))
            })
            .collect()
    });

    results.into_iter().collect()
}
