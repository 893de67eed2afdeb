/*
 * @copyright (C) 2024 Ruslan Iusupov <https://github.com/rus0000>
 *
 * SPDX-License-Identifier: MIT
 */
use core::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BlockStoreError {
    #[error("no block at head")]
    Empty,
    #[error("cannot consume {requested} bytes, head block holds {available} bytes")]
    ConsumeBeyondBlock { requested: usize, available: usize },
}

/// A contiguous chunk of received data at a logical offset of the connection byte-stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub offset: u64,
    pub data: Vec<u8>,
}

impl Block {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

/// Received byte ranges of one connection, ordered by offset.
///
/// Invariant on [BlockStore::blocks]:
/// - Blocks are sorted by offset.
/// - Blocks never overlap and never touch. Touching or overlapping ranges are coalesced on insert.
/// - No block starts before `consumed_offset`.
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct BlockStore {
    blocks: Vec<Block>,
    /// Everything before this offset was handed to the extractor and consumed. Late data below it is ignored.
    consumed_offset: u64,
}

impl fmt::Display for BlockStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[ ")?;
        let mut position = self.consumed_offset;
        for block in self.blocks.iter() {
            if block.offset > position {
                write!(f, "({}) ", block.offset - position)?;
            }
            write!(f, "{} ", block.len())?;
            position = block.end();
        }
        write!(f, "]")?;
        Ok(())
    }
}

impl BlockStore {
    pub fn new() -> BlockStore {
        BlockStore::default()
    }

    /// Byte-stream starting at `offset`, bytes before it are never stored.
    pub fn starting_at(offset: u64) -> BlockStore {
        BlockStore {
            blocks: Vec::new(),
            consumed_offset: offset,
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Amount of blocks, not bytes.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Amount of buffered bytes, holes excluded.
    pub fn buffered_bytes(&self) -> usize {
        self.blocks.iter().map(Block::len).sum()
    }

    pub fn consumed_offset(&self) -> u64 {
        self.consumed_offset
    }

    pub fn front(&self) -> Option<&Block> {
        self.blocks.first()
    }

    /// Head block when it starts right at `consumed_offset`, i.e. no hole in front of it.
    pub fn contiguous_front(&self) -> Option<&Block> {
        self.blocks.first().filter(|front| front.offset == self.consumed_offset)
    }

    /// True when there are no holes between buffered blocks: zero or one block.
    pub fn is_contiguous(&self) -> bool {
        self.blocks.len() <= 1
    }

    /// Holes as `(offset, size)`, including a leading hole between `consumed_offset` and the first block.
    pub fn gaps(&self) -> Vec<(u64, u64)> {
        let mut gaps = Vec::new();
        let mut position = self.consumed_offset;
        for block in self.blocks.iter() {
            if block.offset > position {
                gaps.push((position, block.offset - position));
            }
            position = block.end();
        }
        gaps
    }

    /// Insert data received at `offset`, return amount of newly stored bytes.
    /// * Bytes already present win over retransmitted ones.
    /// * Bytes before `consumed_offset` are dropped.
    /// * Adjacent and overlapping blocks are coalesced into one.
    pub fn insert(&mut self, offset: u64, data: &[u8]) -> usize {
        let mut start = offset;
        let mut data = data;
        if start < self.consumed_offset {
            let skip = self.consumed_offset - start;
            if skip >= data.len() as u64 {
                return 0;
            }
            data = &data[skip as usize..];
            start = self.consumed_offset;
        }
        if data.is_empty() {
            return 0;
        }
        let end = start + data.len() as u64;

        // Blocks [first..last) overlap or touch the new range.
        let first = self.blocks.partition_point(|block| block.end() < start);
        let last = self.blocks.partition_point(|block| block.offset <= end);

        if first == last {
            self.blocks.insert(
                first,
                Block {
                    offset: start,
                    data: data.to_vec(),
                },
            );
            return data.len();
        }

        let touched: Vec<Block> = self.blocks.drain(first..last).collect();
        let before = touched.iter().map(Block::len).sum::<usize>();
        let mut touched = touched.into_iter();
        let Some(mut merged) = touched.next() else {
            return 0;
        };

        if merged.offset > start {
            let mut prefix = Vec::with_capacity((merged.end() - start) as usize);
            prefix.extend_from_slice(&data[..(merged.offset - start) as usize]);
            prefix.append(&mut merged.data);
            merged.data = prefix;
            merged.offset = start;
        }

        // Holes between touched blocks lie within the new range, fill them from it.
        for mut next in touched {
            let hole_from = (merged.end() - start) as usize;
            let hole_to = (next.offset - start) as usize;
            merged.data.extend_from_slice(&data[hole_from..hole_to]);
            merged.data.append(&mut next.data);
        }
        if merged.end() < end {
            let tail_from = (merged.end() - start) as usize;
            merged.data.extend_from_slice(&data[tail_from..]);
        }

        let stored = merged.len() - before;
        self.blocks.insert(first, merged);
        stored
    }

    /// Drop `size` bytes from the beginning of the head block and move `consumed_offset` after them.
    /// Head block is removed once empty.
    pub fn consume_front(&mut self, size: usize) -> Result<(), BlockStoreError> {
        let Some(front) = self.blocks.first_mut() else {
            return Err(BlockStoreError::Empty);
        };
        if size > front.len() {
            return Err(BlockStoreError::ConsumeBeyondBlock {
                requested: size,
                available: front.len(),
            });
        }
        front.data.drain(..size);
        front.offset += size as u64;
        self.consumed_offset = front.offset;
        if front.is_empty() {
            self.blocks.remove(0);
        }

        Ok(())
    }

    /// Remove head block entirely, unconsumed bytes are dropped.
    pub fn remove_front(&mut self) -> Option<Block> {
        if self.blocks.is_empty() {
            return None;
        }
        let front = self.blocks.remove(0);
        self.consumed_offset = front.end();
        Some(front)
    }
}
