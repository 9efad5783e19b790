use std::sync::atomic::{AtomicU64, Ordering};

use rand::distr::{Distribution, Uniform};

use crate::{Kernel, KernelError, Result, WorkerRng};

/// Counts the steps the Collatz (3n + 1) sequence starting at `seed` takes to reach 1.
///
/// A seed of zero is treated as one. If an intermediate value would overflow `u128`, counting
/// stops and the steps taken so far are returned.
#[must_use]
pub fn collatz_steps(seed: u64) -> u64 {
    let mut value = u128::from(seed.max(1));
    let mut steps: u64 = 0;

    while value != 1 {
        value = if value % 2 == 0 {
            value / 2
        } else {
            match value.checked_mul(3).and_then(|v| v.checked_add(1)) {
                Some(next) => next,
                None => break,
            }
        };

        steps = steps.wrapping_add(1);
    }

    steps
}

/// Keeps the scalar integer pipeline busy with branchy Collatz step counting over random seeds.
///
/// Step counts are accumulated locally and published to the shared counter once per batch, so
/// the atomic is touched rarely enough to stay out of the measurement.
#[derive(Debug)]
pub struct CollatzKernel<'a> {
    seeds: Uniform<u64>,
    shared_steps: &'a AtomicU64,
}

impl<'a> CollatzKernel<'a> {
    /// Creates a kernel that draws seeds from `[max(lower, 1), upper]` and adds its step counts
    /// to `shared_steps`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidRange`] if the range is inverted.
    pub fn new(lower: u64, upper: u64, shared_steps: &'a AtomicU64) -> Result<Self> {
        let seeds = Uniform::new_inclusive(lower.max(1), upper.max(1))
            .ok()
            .filter(|_| lower <= upper)
            .ok_or(KernelError::InvalidRange { lower, upper })?;

        Ok(Self {
            seeds,
            shared_steps,
        })
    }
}

impl Kernel for CollatzKernel<'_> {
    fn run_batch(&mut self, rng: &mut WorkerRng, iterations: u64) -> Result<()> {
        let mut batch_steps: u64 = 0;

        for _ in 0..iterations {
            let seed = self.seeds.sample(rng);
            batch_steps = batch_steps.wrapping_add(collatz_steps(seed));
        }

        // Only the total matters, so no ordering with other memory operations is required.
        self.shared_steps.fetch_add(batch_steps, Ordering::Relaxed);

        Ok(())
    }
}
