//! Per-thread bump allocation of scheduling records.
//!
//! Each worker thread owns one [`TileArena`] and allocates the records it
//! creates during a frame from it. Records are never freed one by one:
//! the whole arena is reset at the frame boundary, which needs `&mut`
//! access and therefore cannot overlap with any outstanding borrow of a
//! record. Records are addressed by [`ArenaHandle`]s that carry the
//! arena generation, so a handle that survives a reset resolves to `None`
//! instead of aliasing a newer record.
//!
//! Storage grows in doubling blocks that are never moved, so a record can
//! be read by any thread while its owner keeps allocating.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use crate::error::{SchedError, SchedResult};

/// Maximum number of doubling blocks per arena.
const MAX_BLOCKS: usize = 32;

/// Address of a record: which arena, which slot, which generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaHandle {
    pub arena: u32,
    pub slot: u32,
    pub generation: u32,
}

type Block<T> = Box<[OnceLock<T>]>;

/// A bump allocator with bulk reset.
pub struct TileArena<T> {
    id: u32,
    generation: u32,
    first_block: usize,
    capacity: usize,
    len: AtomicUsize,
    blocks: Vec<OnceLock<Block<T>>>,
}

impl<T> TileArena<T> {
    /// Create an arena whose first block holds `first_block` records and
    /// which refuses to hold more than `capacity` records per generation.
    pub fn new(id: u32, first_block: usize, capacity: usize) -> Self {
        let first_block = first_block.max(1);
        let addressable = first_block.saturating_mul((1usize << (MAX_BLOCKS - 1)) - 1);
        Self {
            id,
            generation: 0,
            first_block,
            capacity: capacity.min(addressable).min(u32::MAX as usize),
            len: AtomicUsize::new(0),
            blocks: (0..MAX_BLOCKS).map(|_| OnceLock::new()).collect(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of records allocated in the current generation.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire).min(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store a record and return its handle.
    pub fn allocate(&self, value: T) -> SchedResult<ArenaHandle> {
        let slot = self.len.fetch_add(1, Ordering::AcqRel);
        if slot >= self.capacity {
            self.len.fetch_sub(1, Ordering::AcqRel);
            return Err(SchedError::Capacity {
                arena: self.id as usize,
                capacity: self.capacity,
            });
        }

        let (block, offset) = self.locate(slot);
        let size = self.block_size(block);
        let storage =
            self.blocks[block].get_or_init(|| (0..size).map(|_| OnceLock::new()).collect());
        let stored = storage[offset].set(value);
        debug_assert!(stored.is_ok(), "arena slot {slot} handed out twice");

        Ok(ArenaHandle {
            arena: self.id,
            slot: slot as u32,
            generation: self.generation,
        })
    }

    /// Resolve a handle from this arena's current generation.
    pub fn get(&self, handle: ArenaHandle) -> Option<&T> {
        if handle.arena != self.id
            || handle.generation != self.generation
            || handle.slot as usize >= self.len()
        {
            return None;
        }
        let (block, offset) = self.locate(handle.slot as usize);
        self.blocks.get(block)?.get()?.get(offset)?.get()
    }

    /// Drop every record and start a new generation. Block storage is kept.
    pub fn reset(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        *self.len.get_mut() = 0;
        for block in self.blocks.iter_mut() {
            if let Some(slots) = block.get_mut() {
                for slot in slots.iter_mut() {
                    slot.take();
                }
            }
        }
    }

    fn block_size(&self, block: usize) -> usize {
        self.first_block << block
    }

    // Block b starts at first_block * (2^b - 1).
    fn locate(&self, slot: usize) -> (usize, usize) {
        let q = slot / self.first_block + 1;
        let block = (usize::BITS - 1 - q.leading_zeros()) as usize;
        let start = self.first_block * ((1usize << block) - 1);
        (block, slot - start)
    }
}

/// One arena per worker thread.
pub struct ArenaSet<T> {
    arenas: Vec<TileArena<T>>,
}

impl<T> ArenaSet<T> {
    pub fn new(num_threads: usize, first_block: usize, capacity: usize) -> Self {
        Self {
            arenas: (0..num_threads.max(1))
                .map(|i| TileArena::new(i as u32, first_block, capacity))
                .collect(),
        }
    }

    pub fn num_arenas(&self) -> usize {
        self.arenas.len()
    }

    pub fn arena(&self, thread_id: usize) -> &TileArena<T> {
        &self.arenas[thread_id]
    }

    /// Allocate from the calling thread's arena.
    pub fn allocate(&self, thread_id: usize, value: T) -> SchedResult<ArenaHandle> {
        self.arenas[thread_id].allocate(value)
    }

    /// Resolve a handle from any arena.
    pub fn get(&self, handle: ArenaHandle) -> Option<&T> {
        self.arenas.get(handle.arena as usize)?.get(handle)
    }

    /// Records allocated across all arenas in the current generation.
    pub fn total_len(&self) -> usize {
        self.arenas.iter().map(|a| a.len()).sum()
    }

    /// Bulk reset at a frame boundary.
    pub fn reset_all(&mut self) {
        for arena in self.arenas.iter_mut() {
            arena.reset();
        }
    }
}
