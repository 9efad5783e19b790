use std::hint::black_box;
use std::ptr;

use rand::{Rng, RngCore};
use tracing::warn;

use crate::{BufferBacking, Kernel, KernelError, Result, StressBuffer, WorkerRng};

/// The smallest buffer the memory kernel accepts. Rowhammer needs two aggressor rows inside it.
pub const MIN_MEMORY_BUFFER_BYTES: usize = 4096;

/// Distance between the two aggressor addresses: two typical DRAM rows, so that the row between
/// them is the victim of a double-sided hammer.
const AGGRESSOR_DISTANCE_BYTES: usize = 2 * 8 * 1024;

/// Activations of each aggressor per rowhammer burst.
const HAMMER_ROUNDS: usize = 4096;

const CACHE_LINE_BYTES: usize = 64;

/// Floods a large buffer with write/verify passes and hammers adjacent DRAM rows.
///
/// Each iteration writes a fresh random pattern over the whole buffer, verifies it (counting
/// any corrupted words) and then performs one rowhammer burst at a random location.
#[derive(Debug)]
pub struct MemoryKernel {
    buffer: StressBuffer,
    aggressor_distance: usize,
    corrupted_words: u64,
}

impl MemoryKernel {
    /// Allocates a buffer of `buffer_bytes` on the calling thread and prepares the kernel.
    ///
    /// Call this on a thread that is already pinned, so the buffer is local to its processor.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::BufferTooSmall`] for buffers under
    /// [`MIN_MEMORY_BUFFER_BYTES`] and [`KernelError::Allocation`] if the memory cannot be
    /// obtained.
    pub fn new(buffer_bytes: usize, try_huge_pages: bool) -> Result<Self> {
        if buffer_bytes < MIN_MEMORY_BUFFER_BYTES {
            return Err(KernelError::BufferTooSmall {
                bytes: buffer_bytes,
                minimum: MIN_MEMORY_BUFFER_BYTES,
            });
        }

        let buffer = StressBuffer::allocate(buffer_bytes, try_huge_pages)?;

        // Small buffers cannot span two DRAM rows; hammer the two halves instead.
        let aggressor_distance = AGGRESSOR_DISTANCE_BYTES.min(buffer_bytes / 2);

        Ok(Self {
            buffer,
            aggressor_distance,
            corrupted_words: 0,
        })
    }

    /// How the stress buffer was obtained.
    #[must_use]
    pub fn backing(&self) -> BufferBacking {
        self.buffer.backing()
    }

    /// Total number of words that did not read back as written, over the kernel's lifetime.
    #[must_use]
    pub fn corrupted_words(&self) -> u64 {
        self.corrupted_words
    }

    fn flood(&mut self, pattern: u64) -> u64 {
        let words = self.buffer.as_words_mut();

        for (index, word) in (0_u64..).zip(words.iter_mut()) {
            *word = pattern ^ index;
        }

        let words = black_box(words);

        (0_u64..)
            .zip(words.iter())
            .filter(|(index, word)| **word != pattern ^ *index)
            .count() as u64
    }

    fn hammer(&mut self, rng: &mut WorkerRng) {
        let last_start = self
            .buffer
            .len()
            .saturating_sub(self.aggressor_distance)
            .saturating_sub(CACHE_LINE_BYTES);

        let offset = rng.random_range(0..=last_start) & !(CACHE_LINE_BYTES - 1);
        let base = self.buffer.as_mut_ptr();

        // SAFETY: `offset + aggressor_distance + CACHE_LINE_BYTES <= len`, so both addresses and
        // the cache lines they start stay inside the buffer.
        let first = unsafe { base.add(offset) };
        // SAFETY: See above.
        let second = unsafe { first.add(self.aggressor_distance) };

        for _ in 0..HAMMER_ROUNDS {
            // SAFETY: Both pointers are in bounds and the buffer is initialized.
            black_box(unsafe { ptr::read_volatile(first) });
            // SAFETY: See above.
            black_box(unsafe { ptr::read_volatile(second) });

            flush_cache_line(first);
            flush_cache_line(second);
        }
    }
}

impl Kernel for MemoryKernel {
    fn run_batch(&mut self, rng: &mut WorkerRng, iterations: u64) -> Result<()> {
        let mut batch_corrupted: u64 = 0;

        for _ in 0..iterations {
            let pattern = rng.next_u64();
            batch_corrupted = batch_corrupted.saturating_add(self.flood(pattern));
            self.hammer(rng);
        }

        if batch_corrupted > 0 {
            warn!(
                corrupted_words = batch_corrupted,
                "memory flood read back corrupted words"
            );
            self.corrupted_words = self.corrupted_words.saturating_add(batch_corrupted);
        }

        Ok(())
    }
}

/// Evicts the cache line containing `address` so the next read goes to DRAM.
#[cfg(target_arch = "x86_64")]
fn flush_cache_line(address: *const u8) {
    // SAFETY: `clflush` accepts any mapped address and only affects caching. SSE2 is part of
    // the x86_64 baseline.
    unsafe {
        std::arch::x86_64::_mm_clflush(address);
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn flush_cache_line(_address: *const u8) {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn too_small_buffer_is_rejected() {
        assert!(matches!(
            MemoryKernel::new(1024, false),
            Err(KernelError::BufferTooSmall {
                bytes: 1024,
                minimum: MIN_MEMORY_BUFFER_BYTES
            })
        ));
    }

    #[test]
    fn small_buffer_hammers_its_halves() {
        let kernel = MemoryKernel::new(MIN_MEMORY_BUFFER_BYTES, false).unwrap();

        assert_eq!(kernel.aggressor_distance, MIN_MEMORY_BUFFER_BYTES / 2);
    }

    #[test]
    fn large_buffer_hammers_row_pairs() {
        let kernel = MemoryKernel::new(1024 * 1024, false).unwrap();

        assert_eq!(kernel.aggressor_distance, AGGRESSOR_DISTANCE_BYTES);
    }

    #[test]
    fn flood_leaves_pattern_in_buffer() {
        let mut kernel = MemoryKernel::new(64 * 1024, false).unwrap();
        let mut rng = WorkerRng::new(42, 54);

        kernel.run_batch(&mut rng, 3).unwrap();

        assert_eq!(kernel.corrupted_words(), 0);

        let words = kernel.buffer.as_words_mut();
        let pattern = words[0];
        assert_eq!(words[1], pattern ^ 1);
        assert_eq!(words[words.len() - 1], pattern ^ (words.len() as u64 - 1));
    }
}
