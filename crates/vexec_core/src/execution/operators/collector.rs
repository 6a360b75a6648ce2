use std::sync::Arc;

use parking_lot::Mutex;
use vexec_error::{DbError, Result};

use super::{Operator, OperatorFactory};
use crate::arrays::page::Page;
use crate::buffer::buffer_manager::BufferManagerRef;
use crate::explain::ExplainEntry;

/// Terminal operator collecting every input page.
#[derive(Debug)]
pub struct PageCollectorOperator {
    pages: Arc<Mutex<Vec<Page>>>,
    finished: bool,
}

impl PageCollectorOperator {
    pub fn new(pages: Arc<Mutex<Vec<Page>>>) -> Self {
        PageCollectorOperator {
            pages,
            finished: false,
        }
    }
}

impl Operator for PageCollectorOperator {
    fn needs_input(&mut self) -> bool {
        !self.finished
    }

    fn add_input(&mut self, page: Page) -> Result<()> {
        if self.finished {
            return Err(DbError::invalid_state("Page collector already finished"));
        }
        self.pages.lock().push(page);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn get_output(&mut self) -> Result<Option<Page>> {
        Ok(None)
    }

    fn close(&mut self) {
        self.finished = true;
    }
}

/// Creates collectors that all write into the same shared list.
#[derive(Debug, Clone, Default)]
pub struct PageCollectorOperatorFactory {
    pages: Arc<Mutex<Vec<Page>>>,
}

impl PageCollectorOperatorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every page collected so far.
    pub fn take_pages(&self) -> Vec<Page> {
        std::mem::take(&mut *self.pages.lock())
    }
}

impl OperatorFactory for PageCollectorOperatorFactory {
    fn create(&self, _manager: &BufferManagerRef) -> Result<Box<dyn Operator>> {
        Ok(Box::new(PageCollectorOperator::new(self.pages.clone())))
    }

    fn explain_entry(&self) -> ExplainEntry {
        ExplainEntry::new("PageCollector")
    }
}
