#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Stress kernels for the ESST hardware stability harness.
//!
//! Each kernel saturates one hardware unit (vector ALUs, scalar integer pipeline, AES units, the
//! memory subsystem or the storage stack) and exposes the same batched shape through the
//! [`Kernel`] trait. A worker thread constructs its kernel once (unmeasured setup: buffer
//! allocation, key schedule, file creation) and then calls [`Kernel::run_batch()`] repeatedly
//! inside its measured window.
//!
//! Kernels own all of their scratch state. The only cross-thread state any kernel touches is the
//! optional shared step counter of [`CollatzKernel`], which is updated with relaxed atomics once
//! per batch.
//!
//! # Example
//!
//! ```
//! use esst_kernels::{ArithmeticKernel, Kernel, WorkerRng};
//!
//! let mut rng = WorkerRng::new(42, 54);
//! let mut kernel = ArithmeticKernel::new(0, 1).unwrap();
//!
//! kernel.run_batch(&mut rng, 1000).unwrap();
//! ```

mod arithmetic;
mod buffer;
mod collatz;
mod crypto;
mod disk;
mod error;
mod memory;

pub use arithmetic::*;
pub use buffer::*;
pub use collatz::*;
pub use crypto::*;
pub use disk::*;
pub use error::*;
pub use memory::*;

/// The pseudo-random generator every worker feeds into its kernel.
///
/// PCG32 takes a `(state, stream)` seed pair, which lets each worker own a non-overlapping
/// stream derived from its thread index while staying reproducible across runs.
pub type WorkerRng = rand_pcg::Pcg32;

/// A batched stress operation executed by one worker thread.
///
/// Implementations must not share mutable state with kernels on other threads, apart from
/// relaxed atomic counters that are updated at batch granularity.
pub trait Kernel {
    /// Executes `iterations` iterations of the stress operation, drawing any random inputs
    /// from `rng`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying resource (e.g. the disk) fails mid-run. The worker
    /// stops driving the kernel after the first error.
    fn run_batch(&mut self, rng: &mut WorkerRng, iterations: u64) -> Result<()>;
}
