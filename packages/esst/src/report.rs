use std::fmt::{self, Display};
use std::time::Duration;

use many_cpus::ProcessorId;
use nonempty::NonEmpty;

/// Width of the line separating per-worker results from the summary.
const SEPARATOR: &str = "----------------------------------------";

/// How one worker's run ended.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum WorkerOutcome {
    /// The worker executed all its iterations.
    Completed {
        /// Iterations executed inside the measured window.
        iterations: u64,

        /// Wall-clock time of the measured window.
        elapsed: Duration,
    },

    /// The worker could not set up or run its kernel. It contributes zero throughput.
    Failed {
        /// Human-readable description of the failure.
        reason: String,
    },
}

/// The measured result of one worker.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkerResult {
    thread_id: usize,
    processor_id: ProcessorId,
    throughput: f64,
    outcome: WorkerOutcome,
}

impl WorkerResult {
    /// Result of a worker that executed `iterations` iterations in `elapsed` wall-clock time.
    #[must_use]
    pub fn completed(
        thread_id: usize,
        processor_id: ProcessorId,
        iterations: u64,
        elapsed: Duration,
    ) -> Self {
        // A window below timer resolution still ran the iterations; count it as one nanosecond.
        let seconds = elapsed.max(Duration::from_nanos(1)).as_secs_f64();

        #[expect(
            clippy::cast_precision_loss,
            reason = "throughput is reported with two decimals, exactness is irrelevant"
        )]
        let throughput = iterations as f64 / seconds;

        Self {
            thread_id,
            processor_id,
            throughput,
            outcome: WorkerOutcome::Completed {
                iterations,
                elapsed,
            },
        }
    }

    /// Result of a worker that failed before or during its run.
    #[must_use]
    pub fn failed(thread_id: usize, processor_id: ProcessorId, reason: impl Into<String>) -> Self {
        Self {
            thread_id,
            processor_id,
            throughput: 0.0,
            outcome: WorkerOutcome::Failed {
                reason: reason.into(),
            },
        }
    }

    /// Index of the worker within its run.
    #[must_use]
    pub fn thread_id(&self) -> usize {
        self.thread_id
    }

    /// The processor the worker was pinned to.
    #[must_use]
    pub fn processor_id(&self) -> ProcessorId {
        self.processor_id
    }

    /// Iterations per second; zero for failed workers.
    #[must_use]
    pub fn throughput(&self) -> f64 {
        self.throughput
    }

    /// How the worker's run ended.
    #[must_use]
    pub fn outcome(&self) -> &WorkerOutcome {
        &self.outcome
    }

    /// Whether the worker failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, WorkerOutcome::Failed { .. })
    }
}

impl Display for WorkerResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thread {}: {:.2} it/s", self.thread_id, self.throughput)?;

        if let WorkerOutcome::Failed { reason } = &self.outcome {
            write!(f, " (failed: {reason})")?;
        }

        Ok(())
    }
}

/// Summary statistics over all workers of one stress run.
///
/// Only ever built from the complete set of results, after every worker has been joined.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregateReport {
    label: String,
    per_thread: NonEmpty<WorkerResult>,
    total: f64,
    average: f64,
    median: f64,
    work_units: Option<u64>,
}

impl AggregateReport {
    /// Computes the statistics over `per_thread`, which is expected in thread order.
    #[must_use]
    pub fn new(label: impl Into<String>, per_thread: NonEmpty<WorkerResult>) -> Self {
        let mut throughputs: Vec<f64> = per_thread.iter().map(WorkerResult::throughput).collect();
        throughputs.sort_by(f64::total_cmp);

        let total: f64 = throughputs.iter().sum();

        #[expect(
            clippy::cast_precision_loss,
            reason = "worker counts are far below the f64 mantissa"
        )]
        let average = total / per_thread.len() as f64;

        Self {
            label: label.into(),
            median: upper_median(&throughputs),
            per_thread,
            total,
            average,
            work_units: None,
        }
    }

    /// Attaches a total count of work units (e.g. Collatz steps) performed by all workers.
    #[must_use]
    pub fn with_work_units(mut self, work_units: u64) -> Self {
        self.work_units = Some(work_units);
        self
    }

    /// Name of the stress test the report belongs to.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Per-worker results in thread order.
    #[must_use]
    pub fn per_thread(&self) -> &NonEmpty<WorkerResult> {
        &self.per_thread
    }

    /// Sum of all workers' throughput.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.total
    }

    /// Mean throughput per worker, counting failed workers as zero.
    #[must_use]
    pub fn average(&self) -> f64 {
        self.average
    }

    /// The median throughput: for an even worker count, the upper of the two middle values.
    #[must_use]
    pub fn median(&self) -> f64 {
        self.median
    }

    /// Total work units, for tests that count them.
    #[must_use]
    pub fn work_units(&self) -> Option<u64> {
        self.work_units
    }

    /// Number of workers that failed.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.per_thread.iter().filter(|r| r.is_failed()).count()
    }
}

impl Display for AggregateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.per_thread {
            writeln!(f, "{result}")?;
        }

        writeln!(f, "{SEPARATOR}")?;
        writeln!(f, "Avg: {:.2} it/s", self.average)?;
        write!(f, "Median: {:.2} it/s", self.median)?;

        if let Some(work_units) = self.work_units {
            write!(f, "\nSteps: {work_units}")?;
        }

        Ok(())
    }
}

/// The element at index `len / 2` of an ascending slice, or zero for an empty slice.
fn upper_median(sorted: &[f64]) -> f64 {
    sorted.get(sorted.len() / 2).copied().unwrap_or_default()
}
