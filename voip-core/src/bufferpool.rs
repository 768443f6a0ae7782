//! Fixed-size slot allocator for audio payloads (component C). Grounded on
//! the teacher's chunk pool (`net/chunkpool.rs`): a flat `Vec` of
//! preallocated buffers plus a free list, so the hot send/receive path never
//! calls the system allocator.
//!
//! Exhaustion is a programming error per spec §7 ("Resource" error class) —
//! the pool is sized once at startup for the worst case the transport can
//! produce (one slot per in-flight fragment across all streams), so running
//! out means a leak, and the spec calls for aborting rather than handling it
//! as a recoverable condition.

pub struct BufferPool {
    slot_size: usize,
    slots: Vec<Box<[u8]>>,
    free: Vec<usize>,
    in_use: Vec<bool>,
}

/// An owned handle into the pool. Returned to the pool on drop so callers
/// never have to remember to free it explicitly.
pub struct PooledBuffer<'a> {
    pool: &'a mut BufferPool,
    index: usize,
    len: usize,
}

impl BufferPool {
    pub fn new(slot_size: usize, slot_count: usize) -> Self {
        let slots = (0..slot_count).map(|_| vec![0u8; slot_size].into_boxed_slice()).collect();
        BufferPool {
            slot_size,
            slots,
            free: (0..slot_count).rev().collect(),
            in_use: vec![false; slot_count],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Acquires a slot. Aborts the process if the pool is exhausted — see
    /// the module doc comment.
    pub fn acquire(&mut self) -> PooledBuffer<'_> {
        let index = self.free.pop().unwrap_or_else(|| {
            panic!("buffer pool exhausted: {} slots of {} bytes all in use", self.slots.len(), self.slot_size)
        });
        self.in_use[index] = true;
        PooledBuffer { pool: self, index, len: 0 }
    }

    fn release(&mut self, index: usize) {
        debug_assert!(self.in_use[index], "releasing a slot that wasn't acquired");
        self.in_use[index] = false;
        self.free.push(index);
    }

    #[cfg(test)]
    fn leaked_count(&self) -> usize {
        self.in_use.iter().filter(|&&b| b).count()
    }
}

impl<'a> PooledBuffer<'a> {
    pub fn as_slice(&self) -> &[u8] {
        &self.pool.slots[self.index][..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.pool.slots[self.index][..self.len]
    }

    pub fn capacity(&self) -> usize {
        self.pool.slots[self.index].len()
    }

    pub fn set_len(&mut self, len: usize) {
        assert!(len <= self.capacity(), "length exceeds slot capacity");
        self.len = len;
    }

    pub fn copy_from(&mut self, data: &[u8]) {
        assert!(data.len() <= self.capacity(), "data exceeds slot capacity");
        self.pool.slots[self.index][..data.len()].copy_from_slice(data);
        self.len = data.len();
    }
}

impl<'a> Drop for PooledBuffer<'a> {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release_round_trips() {
        let mut pool = BufferPool::new(64, 4);
        assert_eq!(pool.available(), 4);
        {
            let mut buf = pool.acquire();
            buf.copy_from(b"hello");
            assert_eq!(buf.as_slice(), b"hello");
        }
        assert_eq!(pool.available(), 4);
        assert_eq!(pool.leaked_count(), 0);
    }

    #[test]
    #[should_panic(expected = "buffer pool exhausted")]
    fn exhaustion_aborts() {
        let mut pool = BufferPool::new(16, 1);
        let _a = pool.acquire();
        let _b = pool.acquire();
    }

    #[test]
    fn no_leaks_after_many_cycles() {
        let mut pool = BufferPool::new(32, 2);
        for _ in 0..100 {
            let mut a = pool.acquire();
            a.copy_from(&[1, 2, 3]);
            let mut b = pool.acquire();
            b.copy_from(&[4, 5, 6]);
        }
        assert_eq!(pool.leaked_count(), 0);
        assert_eq!(pool.available(), 2);
    }
}
