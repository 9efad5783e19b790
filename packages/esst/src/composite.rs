use std::io::{self, Write};
use std::num::NonZero;
use std::time::{Duration, Instant};

use new_zealand::nz;
use tracing::{info, warn};

use crate::{StressKind, StressSuite, SuiteError, TestParameters};

/// Base parameters of every sub-test of a composite run, before the intensity multiplier is
/// applied.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompositePlan {
    memory: TestParameters,
    arithmetic: TestParameters,
    collatz: TestParameters,
    aes_encrypt: TestParameters,
    aes_decrypt: TestParameters,
    disk: TestParameters,
}

impl CompositePlan {
    /// The base parameters of `kind`.
    #[must_use]
    pub fn base(&self, kind: StressKind) -> &TestParameters {
        match kind {
            StressKind::Memory => &self.memory,
            StressKind::Arithmetic => &self.arithmetic,
            StressKind::Collatz => &self.collatz,
            StressKind::AesEncrypt => &self.aes_encrypt,
            StressKind::AesDecrypt => &self.aes_decrypt,
            StressKind::Disk => &self.disk,
        }
    }

    /// Replaces the base parameters of `kind`.
    #[must_use]
    pub fn with_base(mut self, kind: StressKind, parameters: TestParameters) -> Self {
        let slot = match kind {
            StressKind::Memory => &mut self.memory,
            StressKind::Arithmetic => &mut self.arithmetic,
            StressKind::Collatz => &mut self.collatz,
            StressKind::AesEncrypt => &mut self.aes_encrypt,
            StressKind::AesDecrypt => &mut self.aes_decrypt,
            StressKind::Disk => &mut self.disk,
        };

        *slot = parameters;
        self
    }
}

impl Default for CompositePlan {
    fn default() -> Self {
        Self {
            memory: TestParameters::iterations_only(nz!(8)),
            arithmetic: TestParameters::with_range(nz!(10_000_000), 0, 100)
                .expect("constant range is not inverted"),
            collatz: TestParameters::with_range(nz!(1_000_000), 1, 1_000_000)
                .expect("constant range is not inverted"),
            aes_encrypt: TestParameters::with_block_size(nz!(200_000), nz!(4096)),
            aes_decrypt: TestParameters::with_block_size(nz!(200_000), nz!(4096)),
            disk: TestParameters::with_block_size(nz!(256), nz!(1_048_576)),
        }
    }
}

/// What happened during a composite run.
#[derive(Clone, Debug, PartialEq)]
pub struct CompositeSummary {
    completed: Vec<StressKind>,
    aborted: Vec<StressKind>,
    elapsed: Duration,
}

impl CompositeSummary {
    /// Sub-tests that produced a report, in execution order.
    #[must_use]
    pub fn completed(&self) -> &[StressKind] {
        &self.completed
    }

    /// Sub-tests that were aborted, in execution order.
    #[must_use]
    pub fn aborted(&self) -> &[StressKind] {
        &self.aborted
    }

    /// Wall-clock time of the whole composite run.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// Runs every stress kind in [`StressKind::COMPOSITE_ORDER`] with the base parameters of `plan`
/// scaled by `intensity`, writing each sub-test's report to `out`.
///
/// A sub-test that fails (including when scaling overflows) is reported as aborted and the
/// sequence continues. The run ends with one line stating the total elapsed time.
///
/// # Errors
///
/// Returns an error only if writing to `out` fails.
pub fn run_composite<S, W>(
    suite: &S,
    plan: &CompositePlan,
    intensity: NonZero<u64>,
    out: &mut W,
) -> io::Result<CompositeSummary>
where
    S: StressSuite + ?Sized,
    W: Write + ?Sized,
{
    info!(intensity = intensity.get(), "composite run starting");

    let start = Instant::now();
    let mut completed = Vec::with_capacity(StressKind::COMPOSITE_ORDER.len());
    let mut aborted = Vec::new();

    for kind in StressKind::COMPOSITE_ORDER {
        writeln!(out, "=== {kind} ===")?;

        let outcome = plan
            .base(kind)
            .scaled(intensity)
            .map_err(SuiteError::from)
            .and_then(|parameters| suite.run(kind, &parameters));

        match outcome {
            Ok(report) => {
                writeln!(out, "{report}")?;
                completed.push(kind);
            }
            Err(e) => {
                warn!(kind = kind.label(), error = %e, "composite sub-test aborted");
                writeln!(out, "{kind} aborted: {e}")?;
                aborted.push(kind);
            }
        }
    }

    let elapsed = start.elapsed();
    writeln!(out, "Total elapsed: {:.2} s", elapsed.as_secs_f64())?;

    Ok(CompositeSummary {
        completed,
        aborted,
        elapsed,
    })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use mockall::Sequence;
    use mockall::predicate::{always, eq};
    use nonempty::nonempty;

    use super::*;
    use crate::{AggregateReport, MockStressSuite, ParamError, WorkerResult};

    fn report(kind: StressKind) -> AggregateReport {
        AggregateReport::new(
            kind.label(),
            nonempty![WorkerResult::completed(0, 0, 10, Duration::from_secs(1))],
        )
    }

    #[test]
    fn runs_all_kinds_in_order() {
        let mut suite = MockStressSuite::new();
        let mut sequence = Sequence::new();

        for kind in StressKind::COMPOSITE_ORDER {
            suite
                .expect_run()
                .with(eq(kind), always())
                .times(1)
                .in_sequence(&mut sequence)
                .returning(|kind, _| Ok(report(kind)));
        }

        let mut out = Vec::new();
        let summary = run_composite(&suite, &CompositePlan::default(), nz!(1), &mut out).unwrap();

        assert_eq!(summary.completed(), StressKind::COMPOSITE_ORDER);
        assert!(summary.aborted().is_empty());

        let text = String::from_utf8(out).unwrap();
        let headers: Vec<&str> = text.lines().filter(|l| l.starts_with("===")).collect();
        assert_eq!(
            headers,
            [
                "=== memory ===",
                "=== arithmetic ===",
                "=== collatz ===",
                "=== aes-encrypt ===",
                "=== aes-decrypt ===",
                "=== disk ===",
            ]
        );
        assert_eq!(text.lines().filter(|l| l.starts_with("Avg:")).count(), 6);
        assert_eq!(
            text.lines().filter(|l| l.starts_with("Total elapsed:")).count(),
            1
        );
        assert!(text.trim_end().lines().last().unwrap().starts_with("Total elapsed:"));
    }

    #[test]
    fn intensity_scales_base_iterations() {
        let mut suite = MockStressSuite::new();
        let plan = CompositePlan::default();

        for kind in StressKind::COMPOSITE_ORDER {
            let expected = plan.base(kind).scaled(nz!(3)).unwrap();

            suite
                .expect_run()
                .with(eq(kind), eq(expected))
                .times(1)
                .returning(|kind, _| Ok(report(kind)));
        }

        run_composite(&suite, &plan, nz!(3), &mut Vec::new()).unwrap();
    }

    #[test]
    fn failing_sub_test_does_not_stop_the_sequence() {
        let mut suite = MockStressSuite::new();

        suite.expect_run().times(6).returning(|kind, _| {
            if kind == StressKind::Collatz {
                Err(SuiteError::AllWorkersFailed {
                    kind,
                    workers: 1,
                    reason: "boom".to_owned(),
                })
            } else {
                Ok(report(kind))
            }
        });

        let mut out = Vec::new();
        let summary = run_composite(&suite, &CompositePlan::default(), nz!(1), &mut out).unwrap();

        assert_eq!(summary.aborted(), [StressKind::Collatz]);
        assert_eq!(summary.completed().len(), 5);

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("collatz aborted: all 1 collatz workers failed"));
    }

    #[test]
    fn overflowing_intensity_aborts_only_that_sub_test() {
        let mut suite = MockStressSuite::new();
        let plan = CompositePlan::default()
            .with_base(StressKind::Memory, TestParameters::iterations_only(NonZero::<u64>::MAX));

        suite
            .expect_run()
            .with(eq(StressKind::Memory), always())
            .never();
        suite
            .expect_run()
            .times(5)
            .returning(|kind, _| Ok(report(kind)));

        let mut out = Vec::new();
        let summary = run_composite(&suite, &plan, nz!(2), &mut out).unwrap();

        assert_eq!(summary.aborted(), [StressKind::Memory]);
        assert_eq!(summary.completed().len(), 5);

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("memory aborted:"));

        // The overflow is a parameter error, reported without reaching the suite.
        let overflow = plan.base(StressKind::Memory).scaled(nz!(2)).unwrap_err();
        assert!(matches!(overflow, ParamError::IterationOverflow { .. }));
    }
}
