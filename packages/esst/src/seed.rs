use esst_kernels::WorkerRng;

/// The `(state, stream)` pair from which every worker derives its private random stream.
///
/// Worker `t` seeds its generator with `(state + t, stream + t)`, so repeated runs with the same
/// base produce identical per-worker sequences while no two workers share a stream.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SeedBase {
    state: u64,
    stream: u64,
}

impl SeedBase {
    /// The seed base used unless configured otherwise.
    pub const DEFAULT: Self = Self::new(42, 54);

    /// Creates a seed base from an initial generator state and stream selector.
    #[must_use]
    pub const fn new(state: u64, stream: u64) -> Self {
        Self { state, stream }
    }

    /// Creates the generator for the worker with the given index.
    #[must_use]
    pub fn rng_for(&self, thread_id: usize) -> WorkerRng {
        // usize is at most 64 bits on every supported target.
        let offset = u64::try_from(thread_id).unwrap_or(u64::MAX);

        WorkerRng::new(
            self.state.wrapping_add(offset),
            self.stream.wrapping_add(offset),
        )
    }
}

impl Default for SeedBase {
    fn default() -> Self {
        Self::DEFAULT
    }
}
