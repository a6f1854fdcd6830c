//! Windowed transfer management
//!
//! Holds the Data blocks that have been sent but not yet acknowledged,
//! oldest first, each with its own retransmit deadline. Blocks are located
//! by number rather than by arithmetic on the base, so wrap-around from
//! 65535 to 0 needs no special handling.

use std::collections::VecDeque;
use std::time::Instant;

use super::packet::Packet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub block_num: u16,
    pub data: Vec<u8>,
    pub deadline: Instant,
}

impl Block {
    pub fn to_packet(&self) -> Packet {
        Packet::Data {
            block_num: self.block_num,
            data: self.data.clone(),
        }
    }
}

/// What an acknowledgement did to the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledged {
    /// The newest block was acknowledged; the window is now empty.
    All,
    /// An older block was acknowledged. It and everything before it were
    /// dropped; this many blocks remain outstanding.
    Partial(usize),
    /// The block number is not in flight.
    Unknown,
}

#[derive(Debug)]
pub struct Window {
    blocks: VecDeque<Block>,
    size: usize,
}

impl Window {
    pub fn new(size: u16) -> Self {
        let size = usize::from(size.max(1));
        Self {
            blocks: VecDeque::with_capacity(size),
            size,
        }
    }

    pub fn is_full(&self) -> bool {
        self.blocks.len() >= self.size
    }

    pub fn push(&mut self, block: Block) {
        debug_assert!(!self.is_full(), "window overflow");
        self.blocks.push_back(block);
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    pub fn acknowledge(&mut self, block_num: u16) -> Acknowledged {
        let Some(pos) = self.blocks.iter().position(|b| b.block_num == block_num) else {
            return Acknowledged::Unknown;
        };
        self.blocks.drain(..=pos);
        if self.blocks.is_empty() {
            Acknowledged::All
        } else {
            Acknowledged::Partial(self.blocks.len())
        }
    }

    /// Re-arm every outstanding block and return them for resending.
    pub fn rearm_all(&mut self, deadline: Instant) -> Vec<Packet> {
        for block in self.blocks.iter_mut() {
            block.deadline = deadline;
        }
        self.blocks.iter().map(Block::to_packet).collect()
    }

    /// Re-arm the blocks whose deadline has passed and return them.
    pub fn rearm_expired(&mut self, now: Instant, deadline: Instant) -> Vec<Packet> {
        let mut resend = Vec::new();
        for block in self.blocks.iter_mut().filter(|block| block.deadline <= now) {
            block.deadline = deadline;
            resend.push(block.to_packet());
        }
        resend
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.blocks.iter().map(|b| b.deadline).min()
    }
}
