//! ID generation with recycling

use parking_lot::Mutex;
use std::sync::atomic::{self, AtomicU32};

/// ID generator handing out monotonically increasing `u32`s
///
/// Released IDs are reused before new ones are minted. Sequence counters
/// never release, so they stay strictly increasing (modulo wrap-around).
#[derive(Debug)]
pub struct IdGenerator {
    free: Mutex<Vec<u32>>,
    next_id: AtomicU32,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Create a generator whose first fresh ID is `first`
    pub fn starting_at(first: u32) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            next_id: AtomicU32::new(first),
        }
    }

    /// Get the next available ID, preferring released ones
    pub fn acquire(&self) -> u32 {
        if let Some(id) = self.free.lock().pop() {
            return id;
        }
        self.next()
    }

    /// Mint a fresh ID without consulting the free list
    pub fn next(&self) -> u32 {
        self.next_id.fetch_add(1, atomic::Ordering::Relaxed)
    }

    /// Return an ID to the pool
    pub fn release(&self, id: u32) {
        let mut free = self.free.lock();
        if !free.contains(&id) {
            free.push(id);
        }
    }

    /// Peek at the next fresh ID
    pub fn peek(&self) -> u32 {
        self.next_id.load(atomic::Ordering::Relaxed)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generation() {
        let gen = IdGenerator::new();
        let id1 = gen.next();
        let id2 = gen.next();
        assert_ne!(id1, id2);
        assert_eq!(id2, id1 + 1);
    }

    #[test]
    fn test_released_ids_are_reused() {
        let gen = IdGenerator::starting_at(10);
        let a = gen.acquire();
        let b = gen.acquire();
        assert_eq!((a, b), (10, 11));

        gen.release(a);
        gen.release(a);
        assert_eq!(gen.acquire(), 10);
        assert_eq!(gen.acquire(), 12);
    }

    #[test]
    fn test_wraps_around() {
        let gen = IdGenerator::starting_at(u32::MAX);
        assert_eq!(gen.next(), u32::MAX);
        assert_eq!(gen.next(), 0);
    }
}
