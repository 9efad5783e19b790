use std::num::NonZero;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Instant;

use esst_kernels::{Kernel, KernelError, WorkerRng};
use many_cpus::{MemoryRegionId, ProcessorId, ProcessorSet};
use nonempty::NonEmpty;
use tracing::{debug, warn};

use crate::{SeedBase, TestParameters, WorkerResult};

/// Iterations executed between two checks for kernel errors. Small enough that a failing disk
/// is noticed quickly, large enough that the check does not show up in the measurement.
const BATCH_SIZE: u64 = 1024;

const SPAWN_FAILURE: &str = "worker thread could not be spawned";
const PANIC_FAILURE: &str = "worker thread panicked";

/// What a kernel factory knows about the worker it is building a kernel for.
#[derive(Clone, Copy, Debug)]
pub struct WorkerSetup {
    thread_id: usize,
    processor_id: ProcessorId,
    memory_region_id: MemoryRegionId,
    parameters: TestParameters,
}

impl WorkerSetup {
    /// Index of the worker within the run, in `[0, worker_count)`.
    #[must_use]
    pub fn thread_id(&self) -> usize {
        self.thread_id
    }

    /// The processor the worker is pinned to.
    #[must_use]
    pub fn processor_id(&self) -> ProcessorId {
        self.processor_id
    }

    /// The memory region local to the worker's processor.
    #[must_use]
    pub fn memory_region_id(&self) -> MemoryRegionId {
        self.memory_region_id
    }

    /// The parameters of the run.
    #[must_use]
    pub fn parameters(&self) -> &TestParameters {
        &self.parameters
    }
}

/// Runs one pinned worker thread per processor and collects their measured results.
///
/// The pool owns no threads between runs. Every [`execute()`][Self::execute] spawns a fresh set
/// of scoped threads, one per processor, and joins all of them before returning. Worker `t` is
/// pinned to processor `t mod worker_count`.
#[derive(Debug)]
pub struct WorkerPool {
    // One single-processor set per worker, in worker order.
    processors: NonEmpty<ProcessorSet>,
}

impl WorkerPool {
    /// Creates a pool with one worker for each processor in `processors`.
    #[must_use]
    pub fn new(processors: &ProcessorSet) -> Self {
        Self {
            processors: processors
                .processors()
                .clone()
                .map(ProcessorSet::from_processor),
        }
    }

    /// How many workers every run uses.
    #[must_use]
    pub fn worker_count(&self) -> NonZero<usize> {
        NonZero::new(self.processors.len()).expect("NonEmpty always has at least one element")
    }

    /// Runs the kernel built by `factory` on every worker and returns their results in worker
    /// order.
    ///
    /// Each worker pins itself, seeds its generator from `seed`, calls `factory` (unmeasured),
    /// then times `parameters.iterations()` iterations of the kernel. The kernel is dropped after
    /// the timer stops. A worker whose factory or kernel fails, or whose thread cannot be
    /// spawned, reports a failure and does not affect its siblings.
    pub fn execute<F, K>(
        &self,
        parameters: &TestParameters,
        seed: SeedBase,
        factory: F,
    ) -> NonEmpty<WorkerResult>
    where
        F: Fn(&WorkerSetup, &mut WorkerRng) -> esst_kernels::Result<K> + Sync,
        K: Kernel,
    {
        // Every slot starts out as a failure and is overwritten by its worker.
        let mut results: Vec<WorkerResult> = self
            .processors
            .iter()
            .enumerate()
            .map(|(thread_id, processors)| {
                WorkerResult::failed(thread_id, first_processor_id(processors), SPAWN_FAILURE)
            })
            .collect();

        let factory = &factory;
        let parameters = *parameters;

        thread::scope(|scope| {
            for ((thread_id, slot), processors) in
                results.iter_mut().enumerate().zip(self.processors.iter().cloned())
            {
                let spawned = thread::Builder::new()
                    .name(format!("esst-worker-{thread_id}"))
                    .spawn_scoped(scope, move || {
                        let setup = WorkerSetup {
                            thread_id,
                            processor_id: first_processor_id(&processors),
                            memory_region_id: processors.processors().first().memory_region_id(),
                            parameters,
                        };

                        *slot = panic::catch_unwind(AssertUnwindSafe(|| {
                            run_worker(&setup, &processors, seed, factory)
                        }))
                        .unwrap_or_else(|_| {
                            warn!(thread_id, "{PANIC_FAILURE}");
                            WorkerResult::failed(thread_id, setup.processor_id, PANIC_FAILURE)
                        });
                    });

                if let Err(e) = spawned {
                    warn!(thread_id, error = %e, "{SPAWN_FAILURE}");
                }
            }
        });

        NonEmpty::from_vec(results).expect("there is one result slot per processor")
    }
}

fn first_processor_id(processors: &ProcessorSet) -> ProcessorId {
    processors.processors().first().id()
}

fn run_worker<F, K>(
    setup: &WorkerSetup,
    processors: &ProcessorSet,
    seed: SeedBase,
    factory: &F,
) -> WorkerResult
where
    F: Fn(&WorkerSetup, &mut WorkerRng) -> esst_kernels::Result<K>,
    K: Kernel,
{
    let thread_id = setup.thread_id;
    let processor_id = setup.processor_id;

    processors.pin_current_thread_to();

    debug!(
        thread_id,
        processor_id,
        memory_region_id = setup.memory_region_id,
        "worker thread started"
    );

    let mut rng = seed.rng_for(thread_id);

    let mut kernel = match factory(setup, &mut rng) {
        Ok(kernel) => kernel,
        Err(e) => return worker_failed(setup, &e),
    };

    let iterations = setup.parameters.iterations().get();
    let mut remaining = iterations;

    let start = Instant::now();

    while remaining > 0 {
        let batch = remaining.min(BATCH_SIZE);

        if let Err(e) = kernel.run_batch(&mut rng, batch) {
            return worker_failed(setup, &e);
        }

        remaining = remaining.saturating_sub(batch);
    }

    let elapsed = start.elapsed();

    // Teardown (freeing buffers, removing files) is not part of the measurement.
    drop(kernel);

    debug!(thread_id, processor_id, ?elapsed, "worker thread finished");

    WorkerResult::completed(thread_id, processor_id, iterations, elapsed)
}

fn worker_failed(setup: &WorkerSetup, error: &KernelError) -> WorkerResult {
    warn!(
        thread_id = setup.thread_id,
        processor_id = setup.processor_id,
        error = %error,
        "worker failed"
    );

    WorkerResult::failed(setup.thread_id, setup.processor_id, error.to_string())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    use esst_kernels::CollatzKernel;
    use new_zealand::nz;

    use super::*;
    use crate::WorkerOutcome;

    struct CountingKernel<'a> {
        executed: &'a AtomicU64,
    }

    impl Kernel for CountingKernel<'_> {
        fn run_batch(&mut self, _rng: &mut WorkerRng, iterations: u64) -> esst_kernels::Result<()> {
            self.executed.fetch_add(iterations, Ordering::Relaxed);
            Ok(())
        }
    }

    fn pool() -> WorkerPool {
        WorkerPool::new(&ProcessorSet::default())
    }

    #[test]
    fn one_result_per_processor_in_thread_order() {
        let pool = pool();
        let executed = AtomicU64::new(0);
        let params = TestParameters::iterations_only(nz!(2500));

        let results = pool.execute(&params, SeedBase::DEFAULT, |_, _| {
            Ok(CountingKernel {
                executed: &executed,
            })
        });

        assert_eq!(results.len(), pool.worker_count().get());
        assert_eq!(results.len(), ProcessorSet::default().len());

        for (index, result) in results.iter().enumerate() {
            assert_eq!(result.thread_id(), index);
            assert!(!result.is_failed());
            assert!(result.throughput() > 0.0);
            assert!(matches!(
                result.outcome(),
                WorkerOutcome::Completed {
                    iterations: 2500,
                    ..
                }
            ));
        }

        // Every worker runs the full iteration count.
        let expected = 2500 * u64::try_from(results.len()).unwrap();
        assert_eq!(executed.load(Ordering::Relaxed), expected);
    }

    #[test]
    fn factory_sees_every_thread_once() {
        let pool = pool();
        let seen = Mutex::new(Vec::new());
        let executed = AtomicU64::new(0);
        let params = TestParameters::iterations_only(nz!(1));

        pool.execute(&params, SeedBase::DEFAULT, |setup, _| {
            seen.lock().unwrap().push(setup.thread_id());
            Ok(CountingKernel {
                executed: &executed,
            })
        });

        let mut seen = seen.into_inner().unwrap();
        seen.sort_unstable();

        let expected: Vec<usize> = (0..pool.worker_count().get()).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn failed_setup_affects_only_that_worker() {
        let pool = pool();
        let executed = AtomicU64::new(0);
        let params = TestParameters::iterations_only(nz!(10));

        let results = pool.execute(&params, SeedBase::DEFAULT, |setup, _| {
            if setup.thread_id() == 0 {
                Err(KernelError::Allocation { bytes: 1 })
            } else {
                Ok(CountingKernel {
                    executed: &executed,
                })
            }
        });

        assert!(results.first().is_failed());
        assert!(results.first().throughput().abs() < f64::EPSILON);
        assert!(results.iter().skip(1).all(|r| !r.is_failed()));
    }

    #[test]
    fn panicking_worker_is_reported_as_failed() {
        let pool = pool();
        let executed = AtomicU64::new(0);
        let params = TestParameters::iterations_only(nz!(10));

        let results = pool.execute(&params, SeedBase::DEFAULT, |setup, _| {
            assert!(setup.thread_id() != 0, "boom");
            Ok(CountingKernel {
                executed: &executed,
            })
        });

        assert!(matches!(
            results.first().outcome(),
            WorkerOutcome::Failed { reason } if reason == PANIC_FAILURE
        ));
    }

    #[test]
    fn shared_counter_sees_all_workers() {
        let pool = pool();
        let steps = AtomicU64::new(0);
        let params = TestParameters::with_range(nz!(3), 27, 27).unwrap();
        let calls = AtomicUsize::new(0);

        pool.execute(&params, SeedBase::DEFAULT, |setup, _| {
            calls.fetch_add(1, Ordering::Relaxed);
            CollatzKernel::new(
                setup.parameters().lower(),
                setup.parameters().upper(),
                &steps,
            )
        });

        let workers = u64::try_from(calls.load(Ordering::Relaxed)).unwrap();
        assert_eq!(steps.load(Ordering::Relaxed), workers * 3 * 111);
    }
}
