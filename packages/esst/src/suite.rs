use std::fmt::{self, Display};
use std::num::NonZero;
use std::sync::atomic::AtomicU64;

use esst_kernels::{
    AesKernel, ArithmeticKernel, CipherDirection, CollatzKernel, DiskKernel,
    MIN_MEMORY_BUFFER_BYTES, MemoryKernel, available_memory_bytes, validate_aes_block_size,
};
use many_cpus::ProcessorSet;
use nonempty::NonEmpty;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    AggregateReport, HarnessConfig, ParamError, TestParameters, WorkerOutcome, WorkerPool,
    WorkerResult,
};

/// The hardware unit a stress run targets.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum StressKind {
    /// Memory flood and rowhammer over a large per-worker buffer.
    Memory,

    /// Vector fused multiply-add over random operands.
    Arithmetic,

    /// Collatz step counting over random seeds.
    Collatz,

    /// AES-256 encryption of random data units.
    AesEncrypt,

    /// AES-256 decryption of random data units.
    AesDecrypt,

    /// Synced sequential writes to a per-worker file.
    Disk,
}

impl StressKind {
    /// The order in which a composite run executes the stress kinds.
    pub const COMPOSITE_ORDER: [Self; 6] = [
        Self::Memory,
        Self::Arithmetic,
        Self::Collatz,
        Self::AesEncrypt,
        Self::AesDecrypt,
        Self::Disk,
    ];

    /// Short name used in reports and logs.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Arithmetic => "arithmetic",
            Self::Collatz => "collatz",
            Self::AesEncrypt => "aes-encrypt",
            Self::AesDecrypt => "aes-decrypt",
            Self::Disk => "disk",
        }
    }

    /// Checks that `parameters` carry what this kind of run needs.
    ///
    /// AES runs need a block size that is a multiple of 16 bytes; disk runs need any block
    /// size. The other kinds accept any valid [`TestParameters`].
    ///
    /// # Errors
    ///
    /// Returns [`ParamError::MissingBlockSize`] or [`ParamError::InvalidBlockSize`].
    pub fn validate(self, parameters: &TestParameters) -> Result<(), ParamError> {
        match self {
            Self::AesEncrypt | Self::AesDecrypt => {
                let block_size = parameters
                    .block_size()
                    .ok_or(ParamError::MissingBlockSize)?;

                validate_aes_block_size(block_size.get()).map_err(ParamError::InvalidBlockSize)
            }
            Self::Disk => parameters
                .block_size()
                .map(|_| ())
                .ok_or(ParamError::MissingBlockSize),
            Self::Memory | Self::Arithmetic | Self::Collatz => Ok(()),
        }
    }
}

impl Display for StressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A stress run could not produce a report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SuiteError {
    /// The parameters do not fit the requested kind of run. No worker was started.
    #[error(transparent)]
    Parameters(#[from] ParamError),

    /// Every worker failed, so there is no throughput to report.
    #[error("all {workers} {kind} workers failed, first failure: {reason}")]
    AllWorkersFailed {
        /// The kind of run that failed.
        kind: StressKind,

        /// How many workers were started.
        workers: usize,

        /// The failure reported by the first worker.
        reason: String,
    },
}

/// Executes stress runs with resolved parameters.
///
/// This is the single entry point shared by the interactive dispatcher and the composite
/// orchestrator.
#[cfg_attr(test, mockall::automock)]
pub trait StressSuite {
    /// How many workers each run uses.
    fn worker_count(&self) -> NonZero<usize>;

    /// Runs `kind` on every worker with `parameters` and aggregates the results.
    ///
    /// # Errors
    ///
    /// Returns [`SuiteError::Parameters`] before any worker starts if the parameters do not fit
    /// `kind`, and [`SuiteError::AllWorkersFailed`] if no worker completed.
    fn run(
        &self,
        kind: StressKind,
        parameters: &TestParameters,
    ) -> Result<AggregateReport, SuiteError>;
}

/// The stress suite that drives the real kernels on pinned worker threads.
#[derive(Debug)]
pub struct HardwareSuite {
    pool: WorkerPool,
    config: HarnessConfig,
}

impl HardwareSuite {
    /// Creates a suite with one worker per processor in `processors`.
    #[must_use]
    pub fn new(processors: &ProcessorSet, config: HarnessConfig) -> Self {
        Self {
            pool: WorkerPool::new(processors),
            config,
        }
    }

    /// The configuration the suite runs with.
    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// The per-worker memory buffer size: the configured size, reduced to an even share of the
    /// currently available memory if that is smaller.
    fn memory_buffer_bytes(&self) -> usize {
        let configured = self.config.memory_buffer_bytes();

        let Some(available) = available_memory_bytes() else {
            return configured;
        };

        let workers = u64::try_from(self.pool.worker_count().get()).unwrap_or(u64::MAX);
        let share = available.checked_div(workers).unwrap_or(available);
        let share = usize::try_from(share).unwrap_or(usize::MAX);

        if configured <= share {
            return configured;
        }

        let clamped = share.max(MIN_MEMORY_BUFFER_BYTES);

        warn!(
            configured,
            clamped, available, "memory stress buffer exceeds available memory share, clamping"
        );

        clamped
    }

    fn aggregate(
        kind: StressKind,
        results: NonEmpty<WorkerResult>,
    ) -> Result<AggregateReport, SuiteError> {
        let report = AggregateReport::new(kind.label(), results);
        let workers = report.per_thread().len();

        if report.failed_count() < workers {
            return Ok(report);
        }

        let reason = match report.per_thread().first().outcome() {
            WorkerOutcome::Failed { reason } => reason.clone(),
            WorkerOutcome::Completed { .. } => String::new(),
        };

        Err(SuiteError::AllWorkersFailed {
            kind,
            workers,
            reason,
        })
    }
}

impl StressSuite for HardwareSuite {
    fn worker_count(&self) -> NonZero<usize> {
        self.pool.worker_count()
    }

    fn run(
        &self,
        kind: StressKind,
        parameters: &TestParameters,
    ) -> Result<AggregateReport, SuiteError> {
        kind.validate(parameters)?;

        info!(
            kind = kind.label(),
            iterations = parameters.iterations().get(),
            workers = self.pool.worker_count().get(),
            "stress run starting"
        );

        let seed = self.config.seed();
        let block_size = parameters.block_size().map_or(0, NonZero::get);

        let report = match kind {
            StressKind::Memory => {
                let buffer_bytes = self.memory_buffer_bytes();
                let huge_pages = self.config.huge_pages();

                let results = self.pool.execute(parameters, seed, |_, _| {
                    MemoryKernel::new(buffer_bytes, huge_pages)
                });

                Self::aggregate(kind, results)?
            }
            StressKind::Arithmetic => {
                let results = self.pool.execute(parameters, seed, |setup, _| {
                    ArithmeticKernel::new(setup.parameters().lower(), setup.parameters().upper())
                });

                Self::aggregate(kind, results)?
            }
            StressKind::Collatz => {
                // Owned by this run; workers publish into it once per batch.
                let steps = AtomicU64::new(0);

                let results = self.pool.execute(parameters, seed, |setup, _| {
                    CollatzKernel::new(
                        setup.parameters().lower(),
                        setup.parameters().upper(),
                        &steps,
                    )
                });

                Self::aggregate(kind, results)?.with_work_units(steps.into_inner())
            }
            StressKind::AesEncrypt | StressKind::AesDecrypt => {
                let direction = if kind == StressKind::AesEncrypt {
                    CipherDirection::Encrypt
                } else {
                    CipherDirection::Decrypt
                };

                let results = self.pool.execute(parameters, seed, |_, rng| {
                    AesKernel::new(direction, block_size, rng)
                });

                Self::aggregate(kind, results)?
            }
            StressKind::Disk => {
                let directory = self.config.disk_dir();
                let max_file_bytes = self.config.max_disk_file_bytes();

                let results = self.pool.execute(parameters, seed, |setup, rng| {
                    DiskKernel::new(
                        directory,
                        setup.thread_id(),
                        block_size,
                        max_file_bytes,
                        rng,
                    )
                });

                Self::aggregate(kind, results)?
            }
        };

        info!(
            kind = kind.label(),
            average = report.average(),
            median = report.median(),
            failed = report.failed_count(),
            "stress run finished"
        );

        Ok(report)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use many_cpus::ProcessorSet;
    use new_zealand::nz;

    use super::*;

    #[test]
    fn composite_order_is_fixed() {
        assert_eq!(
            StressKind::COMPOSITE_ORDER.map(StressKind::label),
            [
                "memory",
                "arithmetic",
                "collatz",
                "aes-encrypt",
                "aes-decrypt",
                "disk"
            ]
        );
    }

    #[test]
    fn aes_requires_aligned_block_size() {
        let aligned = TestParameters::with_block_size(nz!(1), nz!(4096));
        let misaligned = TestParameters::with_block_size(nz!(1), nz!(100));
        let missing = TestParameters::iterations_only(nz!(1));

        StressKind::AesEncrypt.validate(&aligned).unwrap();
        assert!(matches!(
            StressKind::AesDecrypt.validate(&misaligned),
            Err(ParamError::InvalidBlockSize(_))
        ));
        assert!(matches!(
            StressKind::AesEncrypt.validate(&missing),
            Err(ParamError::MissingBlockSize)
        ));
    }

    #[test]
    fn disk_requires_block_size() {
        let missing = TestParameters::iterations_only(nz!(1));
        let odd = TestParameters::with_block_size(nz!(1), nz!(100));

        StressKind::Disk.validate(&odd).unwrap();
        assert!(matches!(
            StressKind::Disk.validate(&missing),
            Err(ParamError::MissingBlockSize)
        ));
    }

    #[test]
    fn range_kinds_accept_any_valid_parameters() {
        let params = TestParameters::iterations_only(nz!(1));

        StressKind::Memory.validate(&params).unwrap();
        StressKind::Arithmetic.validate(&params).unwrap();
        StressKind::Collatz.validate(&params).unwrap();
    }

    #[test]
    fn invalid_parameters_fail_before_running() {
        let suite = HardwareSuite::new(&ProcessorSet::default(), HarnessConfig::default());
        let params = TestParameters::iterations_only(nz!(1));

        assert!(matches!(
            suite.run(StressKind::AesEncrypt, &params),
            Err(SuiteError::Parameters(ParamError::MissingBlockSize))
        ));
    }

    #[test]
    fn all_failed_workers_is_an_error() {
        let config = HarnessConfig::default().with_disk_dir("/nonexistent/esst/disk/dir");
        let suite = HardwareSuite::new(&ProcessorSet::default(), config);
        let params = TestParameters::with_block_size(nz!(1), nz!(512));

        let error = suite.run(StressKind::Disk, &params).unwrap_err();

        assert!(matches!(
            error,
            SuiteError::AllWorkersFailed {
                kind: StressKind::Disk,
                ..
            }
        ));
    }

    #[test]
    fn unallocatable_block_size_fails_workers_not_the_process() {
        let suite = HardwareSuite::new(&ProcessorSet::default(), HarnessConfig::default());
        let params = TestParameters::with_block_size(nz!(1), nz!(70_368_744_177_664));

        for kind in [StressKind::AesEncrypt, StressKind::AesDecrypt] {
            let error = suite.run(kind, &params).unwrap_err();

            let SuiteError::AllWorkersFailed { reason, .. } = error else {
                panic!("expected every {kind} worker to fail, got {error}");
            };
            assert!(reason.contains("allocate"), "{reason}");
        }
    }

    #[test]
    fn memory_buffer_never_exceeds_configuration() {
        let config = HarnessConfig::default().with_memory_buffer_bytes(64 * 1024);
        let suite = HardwareSuite::new(&ProcessorSet::default(), config);

        assert!(suite.memory_buffer_bytes() <= 64 * 1024);
    }
}
