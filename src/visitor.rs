use crate::bitcode::{Block, Record};
use crate::read::BlockHeader;

/// A visitor which receives callbacks while reading a bitstream.
pub trait BitStreamVisitor {
    /// Called when a new block is encountered. Return `true` to enter the block
    /// and read its contents, or `false` to skip it.
    fn should_enter_block(&mut self, header: &BlockHeader) -> bool;
    /// Called when an entered block is exited.
    fn did_exit_block(&mut self, id: u32);
    /// Called whenever a record is encountered.
    fn visit(&mut self, block_id: u32, record: Record);
}

/// A basic visitor that collects all the blocks and records in a stream into
/// a tree rooted at the outermost block.
#[derive(Debug, Default)]
pub struct CollectingVisitor {
    stack: Vec<Block>,
    root: Option<Block>,
}

impl CollectingVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The outermost block, once it has been fully read.
    pub fn finalize(self) -> Option<Block> {
        self.root
    }
}

impl BitStreamVisitor for CollectingVisitor {
    fn should_enter_block(&mut self, header: &BlockHeader) -> bool {
        self.stack.push(Block::new(header));
        true
    }

    fn did_exit_block(&mut self, _id: u32) {
        let Some(block) = self.stack.pop() else {
            return;
        };
        match self.stack.last_mut() {
            Some(parent) => parent.blocks.push(block),
            None => self.root = Some(block),
        }
    }

    fn visit(&mut self, _block_id: u32, record: Record) {
        if let Some(block) = self.stack.last_mut() {
            block.records.push(record);
        }
    }
}
