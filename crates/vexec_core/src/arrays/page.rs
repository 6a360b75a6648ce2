use vexec_error::{DbError, Result};

use super::block::Block;

/// An ordered collection of blocks sharing the same position count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    blocks: Vec<Block>,
    position_count: usize,
}

impl Page {
    /// Create a new page from blocks.
    ///
    /// Errors if the blocks don't all have the same position count. A page
    /// without any blocks has zero positions, use [`Page::with_positions`] to
    /// create a block-less page with some number of rows.
    pub fn try_new(blocks: impl IntoIterator<Item = Block>) -> Result<Self> {
        let blocks: Vec<_> = blocks.into_iter().collect();
        let position_count = match blocks.first() {
            Some(block) => block.position_count(),
            None => 0,
        };
        Self::try_new_with_positions(blocks, position_count)
    }

    fn try_new_with_positions(blocks: Vec<Block>, position_count: usize) -> Result<Self> {
        for (idx, block) in blocks.iter().enumerate() {
            if block.position_count() != position_count {
                return Err(DbError::new("Block position count differs from page")
                    .with_field("block", idx)
                    .with_field("block_positions", block.position_count())
                    .with_field("page_positions", position_count));
            }
        }
        Ok(Page {
            blocks,
            position_count,
        })
    }

    /// Create a page with no blocks but some number of positions.
    pub fn with_positions(position_count: usize) -> Self {
        Page {
            blocks: Vec::new(),
            position_count,
        }
    }

    pub fn position_count(&self) -> usize {
        self.position_count
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, idx: usize) -> Result<&Block> {
        self.blocks.get(idx).ok_or_else(|| {
            DbError::new("Missing block")
                .with_field("idx", idx)
                .with_field("block_count", self.blocks.len())
        })
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }

    /// Return a new page with a block appended.
    pub fn append_block(mut self, block: Block) -> Result<Self> {
        if block.position_count() != self.position_count {
            return Err(DbError::new("Block position count differs from page")
                .with_field("block_positions", block.position_count())
                .with_field("page_positions", self.position_count));
        }
        self.blocks.push(block);
        Ok(self)
    }

    /// Select positions from every block.
    pub fn filter(&self, positions: &[usize]) -> Result<Self> {
        let blocks = self
            .blocks
            .iter()
            .map(|b| b.filter(positions))
            .collect::<Result<Vec<_>>>()?;
        Self::try_new_with_positions(blocks, positions.len())
    }
}
