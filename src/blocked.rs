//! The blocked-block queue.
//!
//! Header blocks that reference insertions the table mirror has not yet
//! received wait here. The queue is FIFO by arrival, holds at most one block
//! per stream, and is bounded by the negotiated blocked-streams limit. Each
//! entry stores the explicit resumable-parser state: the raw block, the
//! cursor just past the prefix, and the decoded prefix values.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::header_block::Prefix;

/// A header block parked until the table reaches its required insert count.
#[derive(Debug)]
pub struct PendingBlock {
    pub stream_id: u64,
    pub data: Bytes,
    /// Parse position just past the field section prefix.
    pub cursor: usize,
    pub prefix: Prefix,
    /// Set once `feed_encoder` has reported this stream as resumable.
    pub notified: bool,
}

/// FIFO of pending header blocks, one per stream.
#[derive(Default)]
pub struct BlockedQueue {
    blocks: Vec<PendingBlock>,
}

impl BlockedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains(&self, stream_id: u64) -> bool {
        self.blocks.iter().any(|b| b.stream_id == stream_id)
    }

    /// Enqueues a block, enforcing one-per-stream and the queue bound.
    pub fn push(&mut self, block: PendingBlock, limit: usize) -> Result<()> {
        if self.contains(block.stream_id) {
            return Err(Error::DuplicateStreamBlock(block.stream_id));
        }
        if self.blocks.len() >= limit {
            return Err(Error::TooManyBlockedStreams {
                count: self.blocks.len() + 1,
                limit,
            });
        }
        self.blocks.push(block);
        Ok(())
    }

    pub fn get(&self, stream_id: u64) -> Option<&PendingBlock> {
        self.blocks.iter().find(|b| b.stream_id == stream_id)
    }

    /// Removes and returns the block for `stream_id`.
    pub fn remove(&mut self, stream_id: u64) -> Option<PendingBlock> {
        let pos = self.blocks.iter().position(|b| b.stream_id == stream_id)?;
        Some(self.blocks.remove(pos))
    }

    /// Scans in FIFO order for blocks satisfied by `insert_count` that have
    /// not been reported yet, marks them, and returns their stream ids.
    pub fn newly_satisfied(&mut self, insert_count: u64) -> Vec<u64> {
        let mut ready = Vec::new();
        for block in &mut self.blocks {
            if !block.notified && block.prefix.required_insert_count <= insert_count {
                block.notified = true;
                ready.push(block.stream_id);
            }
        }
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(stream_id: u64, required: u64) -> PendingBlock {
        PendingBlock {
            stream_id,
            data: Bytes::from_static(b"\x00\x00"),
            cursor: 2,
            prefix: Prefix {
                required_insert_count: required,
                base: required,
            },
            notified: false,
        }
    }

    #[test]
    fn one_block_per_stream() {
        let mut q = BlockedQueue::new();
        q.push(block(4, 2), 16).unwrap();
        assert_eq!(
            q.push(block(4, 3), 16),
            Err(Error::DuplicateStreamBlock(4))
        );
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn queue_bound_enforced() {
        let mut q = BlockedQueue::new();
        q.push(block(0, 1), 1).unwrap();
        assert!(matches!(
            q.push(block(4, 1), 1),
            Err(Error::TooManyBlockedStreams { .. })
        ));
    }

    #[test]
    fn satisfied_blocks_reported_in_fifo_order_once() {
        let mut q = BlockedQueue::new();
        q.push(block(8, 3), 16).unwrap();
        q.push(block(0, 1), 16).unwrap();
        q.push(block(4, 2), 16).unwrap();

        assert_eq!(q.newly_satisfied(0), Vec::<u64>::new());
        assert_eq!(q.newly_satisfied(2), vec![0, 4]);
        // Already-reported blocks are not repeated.
        assert_eq!(q.newly_satisfied(2), Vec::<u64>::new());
        assert_eq!(q.newly_satisfied(3), vec![8]);
    }

    #[test]
    fn remove_returns_stored_state() {
        let mut q = BlockedQueue::new();
        q.push(block(4, 2), 16).unwrap();
        let removed = q.remove(4).unwrap();
        assert_eq!(removed.prefix.required_insert_count, 2);
        assert!(q.remove(4).is_none());
        assert!(q.is_empty());
    }
}
