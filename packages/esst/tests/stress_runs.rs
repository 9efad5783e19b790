//! End-to-end stress runs on the real hardware of the test machine, with parameters small
//! enough to finish in milliseconds.

#![cfg(not(miri))]

use std::io::Cursor;
use std::num::NonZero;

use esst::{
    CompositePlan, Console, Dispatcher, HardwareSuite, HarnessConfig, ReplState, StressKind,
    StressSuite, TestParameters, run_composite,
};
use many_cpus::ProcessorSet;
use new_zealand::nz;

fn tiny_plan() -> CompositePlan {
    CompositePlan::default()
        .with_base(StressKind::Memory, TestParameters::iterations_only(nz!(1)))
        .with_base(
            StressKind::Arithmetic,
            TestParameters::with_range(nz!(100), 0, 1).unwrap(),
        )
        .with_base(
            StressKind::Collatz,
            TestParameters::with_range(nz!(100), 1, 1000).unwrap(),
        )
        .with_base(
            StressKind::AesEncrypt,
            TestParameters::with_block_size(nz!(100), nz!(16)),
        )
        .with_base(
            StressKind::AesDecrypt,
            TestParameters::with_block_size(nz!(10), nz!(4096)),
        )
        .with_base(
            StressKind::Disk,
            TestParameters::with_block_size(nz!(4), nz!(512)),
        )
}

fn tiny_config(disk_dir: &std::path::Path) -> HarnessConfig {
    HarnessConfig::new()
        .with_memory_buffer_bytes(64 * 1024)
        .with_huge_pages(false)
        .with_disk_dir(disk_dir)
        .with_composite_plan(tiny_plan())
}

fn processor_count() -> usize {
    ProcessorSet::default().len()
}

#[test]
fn avx_reports_one_line_per_processor() {
    let disk_dir = tempfile::tempdir().unwrap();
    let config = tiny_config(disk_dir.path());
    let suite = HardwareSuite::new(&ProcessorSet::default(), config.clone());

    let console = Console::new(Cursor::new(b"avx\n100\n0\n1\nexit\n".to_vec()), Vec::new());
    let mut dispatcher = Dispatcher::new(suite, &config, console);

    dispatcher.run().unwrap();
    assert_eq!(dispatcher.state(), ReplState::Terminated);

    let (_, output) = dispatcher.into_console().into_parts();
    let text = String::from_utf8(output).unwrap();

    let thread_lines: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("Thread "))
        .collect();
    assert_eq!(thread_lines.len(), processor_count());

    for line in thread_lines {
        let (_, rate) = line.split_once(": ").unwrap();
        let value: f64 = rate.trim_end_matches(" it/s").parse().unwrap();
        assert!(value > 0.0, "{line}");
    }

    let avg_line = text.lines().find(|l| l.starts_with("Avg: ")).unwrap();
    assert_ne!(avg_line, "Avg: 0.00 it/s");
    assert!(text.lines().any(|l| l.starts_with("Median: ")));
}

#[test]
fn every_kind_completes_on_every_worker() {
    let disk_dir = tempfile::tempdir().unwrap();
    let config = tiny_config(disk_dir.path());
    let suite = HardwareSuite::new(&ProcessorSet::default(), config.clone());

    for kind in StressKind::COMPOSITE_ORDER {
        let parameters = config.composite_plan().base(kind);

        let report = suite.run(kind, parameters).unwrap();

        assert_eq!(report.per_thread().len(), suite.worker_count().get(), "{kind}");
        assert_eq!(report.failed_count(), 0, "{kind}");
        assert!(report.average() > 0.0, "{kind}");
    }

    // Disk stress cleans up after itself.
    assert_eq!(std::fs::read_dir(disk_dir.path()).unwrap().count(), 0);
}

#[test]
fn collatz_reports_step_total() {
    let disk_dir = tempfile::tempdir().unwrap();
    let suite = HardwareSuite::new(&ProcessorSet::default(), tiny_config(disk_dir.path()));

    // Every seed is 27, which takes 111 steps.
    let parameters = TestParameters::with_range(nz!(10), 27, 27).unwrap();
    let report = suite.run(StressKind::Collatz, &parameters).unwrap();

    let workers = u64::try_from(processor_count()).unwrap();
    assert_eq!(report.work_units(), Some(workers * 10 * 111));
    assert!(report.to_string().contains("Steps: "));
}

#[test]
fn full_run_covers_every_kind_in_order() {
    let disk_dir = tempfile::tempdir().unwrap();
    let config = tiny_config(disk_dir.path());
    let suite = HardwareSuite::new(&ProcessorSet::default(), config.clone());

    let mut out = Vec::new();
    let intensity: NonZero<u64> = nz!(1);
    let summary = run_composite(&suite, config.composite_plan(), intensity, &mut out).unwrap();

    assert_eq!(summary.completed(), StressKind::COMPOSITE_ORDER);
    assert!(summary.aborted().is_empty());

    let text = String::from_utf8(out).unwrap();
    let sections: Vec<&str> = text.lines().filter(|l| l.starts_with("=== ")).collect();
    assert_eq!(
        sections,
        [
            "=== memory ===",
            "=== arithmetic ===",
            "=== collatz ===",
            "=== aes-encrypt ===",
            "=== aes-decrypt ===",
            "=== disk ===",
        ]
    );
    assert_eq!(
        text.lines().filter(|l| l.starts_with("Total elapsed: ")).count(),
        1
    );
}

#[test]
fn identical_seeds_give_identical_workloads() {
    let disk_dir = tempfile::tempdir().unwrap();
    let suite = HardwareSuite::new(&ProcessorSet::default(), tiny_config(disk_dir.path()));
    let parameters = TestParameters::with_range(nz!(500), 1, 100_000).unwrap();

    let first = suite.run(StressKind::Collatz, &parameters).unwrap();
    let second = suite.run(StressKind::Collatz, &parameters).unwrap();

    assert_eq!(first.work_units(), second.work_units());
}
