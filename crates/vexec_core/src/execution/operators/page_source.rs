use std::collections::VecDeque;

use vexec_error::{DbError, Result};

use super::{Operator, OperatorFactory};
use crate::arrays::element_type::ElementType;
use crate::arrays::page::Page;
use crate::arrays::value::{Value, page_from_rows};
use crate::buffer::buffer_manager::BufferManagerRef;
use crate::config::ExecutionConfig;
use crate::explain::ExplainEntry;

/// Emits a fixed list of pages, then finishes.
#[derive(Debug)]
pub struct PageSourceOperator {
    pages: VecDeque<Page>,
}

impl PageSourceOperator {
    pub fn new(pages: impl IntoIterator<Item = Page>) -> Self {
        PageSourceOperator {
            pages: pages.into_iter().collect(),
        }
    }
}

impl Operator for PageSourceOperator {
    fn needs_input(&mut self) -> bool {
        false
    }

    fn add_input(&mut self, _page: Page) -> Result<()> {
        Err(DbError::invalid_state("Page source does not accept input"))
    }

    fn finish(&mut self) -> Result<()> {
        // Downstream doesn't need anything else.
        self.pages.clear();
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.pages.is_empty()
    }

    fn get_output(&mut self) -> Result<Option<Page>> {
        Ok(self.pages.pop_front())
    }

    fn close(&mut self) {
        self.pages.clear();
    }
}

#[derive(Debug, Clone, Default)]
pub struct PageSourceOperatorFactory {
    pages: Vec<Page>,
}

impl PageSourceOperatorFactory {
    pub fn new(pages: Vec<Page>) -> Self {
        PageSourceOperatorFactory { pages }
    }

    /// Build pages of at most the configured page size.
    pub fn from_rows(
        types: &[ElementType],
        rows: &[Vec<Value>],
        config: &ExecutionConfig,
        manager: &BufferManagerRef,
    ) -> Result<Self> {
        config.validate()?;
        let pages = rows
            .chunks(config.page_size)
            .map(|chunk| page_from_rows(types, chunk, manager))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(pages))
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }
}

impl OperatorFactory for PageSourceOperatorFactory {
    fn create(&self, _manager: &BufferManagerRef) -> Result<Box<dyn Operator>> {
        Ok(Box::new(PageSourceOperator::new(self.pages.clone())))
    }

    fn explain_entry(&self) -> ExplainEntry {
        ExplainEntry::new("PageSource").with_value("pages", self.pages.len())
    }
}
