use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;
use vexec_error::{DbError, Result};

use crate::arrays::page::Page;
use crate::execution::readiness::ReadinessToken;

/// Bounded in-memory queue of pages shared between partitions.
///
/// Any number of sinks write to the buffer, and any number of sources read
/// from it. Writers are blocked once the buffer holds `capacity` pages, and
/// readers are blocked while the buffer is empty and some sink is still
/// writing.
#[derive(Debug, Clone)]
pub struct ExchangeBuffer {
    inner: Arc<Mutex<BufferState>>,
}

#[derive(Debug)]
struct BufferState {
    pages: VecDeque<Page>,
    capacity: usize,
    /// Sinks that haven't been created yet.
    sinks_uncreated: usize,
    /// Sinks still writing. Once this and `sinks_uncreated` reach zero, no
    /// more pages will arrive.
    sinks_open: usize,
    /// Set once a source indicated no more pages are needed.
    source_finished: bool,
    /// Resolved when the buffer drops below capacity.
    not_full: ReadinessToken,
    /// Resolved when a page arrives or every sink finishes.
    not_empty: ReadinessToken,
}

impl BufferState {
    fn sinks_done(&self) -> bool {
        self.sinks_uncreated == 0 && self.sinks_open == 0
    }
}

/// Get a pending token from a slot, replacing a previously resolved one.
fn pending_token(slot: &mut ReadinessToken) -> ReadinessToken {
    if slot.is_ready() {
        *slot = ReadinessToken::pending();
    }
    slot.clone()
}

impl ExchangeBuffer {
    /// Create a buffer holding at most `capacity` pages, written to by
    /// `sink_count` sinks.
    pub fn try_new(capacity: usize, sink_count: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(DbError::new("Exchange buffer capacity must be greater than zero"));
        }
        Ok(ExchangeBuffer {
            inner: Arc::new(Mutex::new(BufferState {
                pages: VecDeque::with_capacity(capacity),
                capacity,
                sinks_uncreated: sink_count,
                sinks_open: 0,
                source_finished: false,
                not_full: ReadinessToken::ready(),
                not_empty: ReadinessToken::ready(),
            })),
        })
    }

    /// Create a sink writing to this buffer.
    ///
    /// Errors if every sink has already been created.
    pub fn create_sink(&self) -> Result<ExchangeSink> {
        let mut state = self.inner.lock();
        if state.sinks_uncreated == 0 {
            return Err(DbError::invalid_state("All exchange sinks already created"));
        }
        state.sinks_uncreated -= 1;
        state.sinks_open += 1;
        Ok(ExchangeSink {
            buffer: self.clone(),
            finished: false,
        })
    }

    pub fn create_source(&self) -> ExchangeSource {
        ExchangeSource {
            buffer: self.clone(),
        }
    }

    /// Number of buffered pages.
    pub fn buffered_pages(&self) -> usize {
        self.inner.lock().pages.len()
    }

    fn add_page(&self, page: Page) -> bool {
        let mut state = self.inner.lock();
        if state.source_finished {
            // Nobody will read it.
            return false;
        }
        state.pages.push_back(page);
        state.not_empty.resolve();
        true
    }

    fn write_token(&self) -> ReadinessToken {
        let mut state = self.inner.lock();
        if state.source_finished || state.pages.len() < state.capacity {
            return ReadinessToken::ready();
        }
        trace!(buffered = state.pages.len(), "exchange buffer full");
        pending_token(&mut state.not_full)
    }

    fn finish_sink(&self) {
        let mut state = self.inner.lock();
        state.sinks_open -= 1;
        if state.sinks_done() {
            trace!(buffered = state.pages.len(), "all exchange sinks finished");
            state.not_empty.resolve();
        }
    }

    fn poll_page(&self) -> Option<Page> {
        let mut state = self.inner.lock();
        let page = state.pages.pop_front()?;
        if state.pages.len() < state.capacity {
            state.not_full.resolve();
        }
        Some(page)
    }

    fn read_token(&self) -> ReadinessToken {
        let mut state = self.inner.lock();
        if !state.pages.is_empty() || state.sinks_done() || state.source_finished {
            return ReadinessToken::ready();
        }
        pending_token(&mut state.not_empty)
    }

    fn is_drained(&self) -> bool {
        let state = self.inner.lock();
        state.source_finished || (state.sinks_done() && state.pages.is_empty())
    }

    fn finish_source(&self) {
        let mut state = self.inner.lock();
        if state.source_finished {
            return;
        }
        trace!(discarded = state.pages.len(), "exchange source finished");
        state.source_finished = true;
        state.pages.clear();
        state.not_full.resolve();
        state.not_empty.resolve();
    }
}

/// Write side of an exchange buffer.
///
/// Finishes itself on drop.
#[derive(Debug)]
pub struct ExchangeSink {
    buffer: ExchangeBuffer,
    finished: bool,
}

impl ExchangeSink {
    /// Token resolving once the buffer can accept another page.
    pub fn wait_for_writable(&self) -> ReadinessToken {
        self.buffer.write_token()
    }

    /// Add a page to the buffer.
    ///
    /// Returns false if the page was discarded because the readers need no
    /// more pages.
    pub fn add_page(&mut self, page: Page) -> Result<bool> {
        if self.finished {
            return Err(DbError::invalid_state("Exchange sink already finished"));
        }
        Ok(self.buffer.add_page(page))
    }

    pub fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.buffer.finish_sink();
        }
    }

    /// If this sink finished, or the readers need no more pages.
    pub fn is_finished(&self) -> bool {
        self.finished || self.buffer.inner.lock().source_finished
    }
}

impl Drop for ExchangeSink {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Read side of an exchange buffer.
#[derive(Debug, Clone)]
pub struct ExchangeSource {
    buffer: ExchangeBuffer,
}

impl ExchangeSource {
    pub fn poll_page(&self) -> Option<Page> {
        self.buffer.poll_page()
    }

    /// Token resolving once a page is available or no more will arrive.
    pub fn wait_for_reading(&self) -> ReadinessToken {
        self.buffer.read_token()
    }

    /// If no page will ever be returned from `poll_page` again.
    pub fn is_finished(&self) -> bool {
        self.buffer.is_drained()
    }

    /// Indicate no more pages are needed.
    ///
    /// Buffered pages are discarded and writers are unblocked.
    pub fn finish(&self) {
        self.buffer.finish_source();
    }
}

#[cfg(test)]
mod tests {
    use vexec_error::ErrorKind;

    use super::*;
    use crate::testutil::long_pairs;

    #[test]
    fn writers_block_at_capacity() {
        let buffer = ExchangeBuffer::try_new(2, 1).unwrap();
        let mut sink = buffer.create_sink().unwrap();
        let source = buffer.create_source();

        assert!(!source.wait_for_reading().is_ready());

        sink.add_page(long_pairs(&[(1, 1)])).unwrap();
        assert!(sink.wait_for_writable().is_ready());
        sink.add_page(long_pairs(&[(2, 2)])).unwrap();

        let token = sink.wait_for_writable();
        assert!(!token.is_ready());
        assert!(source.wait_for_reading().is_ready());

        assert_eq!(long_pairs(&[(1, 1)]), source.poll_page().unwrap());
        assert!(token.is_ready());
        assert!(sink.wait_for_writable().is_ready());
    }

    #[test]
    fn source_finishes_after_all_sinks() {
        let buffer = ExchangeBuffer::try_new(4, 2).unwrap();
        let source = buffer.create_source();
        assert!(!source.is_finished());

        let mut s1 = buffer.create_sink().unwrap();
        let s2 = buffer.create_sink().unwrap();
        let err = buffer.create_sink().unwrap_err();
        assert!(err.is_kind(ErrorKind::InvalidState));

        s1.add_page(long_pairs(&[(1, 1)])).unwrap();
        s1.finish();
        let err = s1.add_page(long_pairs(&[(1, 1)])).unwrap_err();
        assert!(err.is_kind(ErrorKind::InvalidState));

        let token = source.wait_for_reading();
        assert!(token.is_ready());
        source.poll_page().unwrap();

        let token = source.wait_for_reading();
        assert!(!token.is_ready());
        assert!(!source.is_finished());

        // Dropping the last sink finishes it.
        drop(s2);
        assert!(token.is_ready());
        assert!(source.is_finished());
        assert!(source.poll_page().is_none());
    }

    #[test]
    fn source_finish_releases_writers() {
        let buffer = ExchangeBuffer::try_new(1, 1).unwrap();
        let mut sink = buffer.create_sink().unwrap();
        let source = buffer.create_source();

        assert!(sink.add_page(long_pairs(&[(1, 1)])).unwrap());
        let token = sink.wait_for_writable();
        assert!(!token.is_ready());

        source.finish();
        assert!(token.is_ready());
        assert!(sink.is_finished());
        assert_eq!(0, buffer.buffered_pages());

        // Discarded.
        assert!(!sink.add_page(long_pairs(&[(2, 2)])).unwrap());
        assert_eq!(0, buffer.buffered_pages());
        assert!(source.is_finished());
    }
}
