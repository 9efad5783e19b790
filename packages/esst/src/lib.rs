#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! ESST saturates every logical processor with one stress kernel at a time and reports
//! throughput-based stability scores.
//!
//! A run starts one worker thread per processor. Each worker pins itself to its processor,
//! builds its kernel outside the measured window, then times a fixed number of iterations.
//! Once every worker has been joined, the per-worker throughput is aggregated into an
//! [`AggregateReport`] (average and median). A processor that produces noticeably lower
//! throughput than its siblings, or a worker that fails, points at unstable hardware.
//!
//! The crate is layered as follows:
//!
//! * [`StressSuite`] is the single entry point for running a [`StressKind`] with resolved
//!   [`TestParameters`]. [`HardwareSuite`] is the implementation that drives the kernels from
//!   `esst_kernels` on a [`WorkerPool`].
//! * [`Dispatcher`] is the interactive command loop that prompts the operator for parameters
//!   through a [`Console`] and hands them to the suite.
//! * [`run_composite()`] runs every stress kind in a fixed order with intensity-scaled base
//!   parameters from a [`CompositePlan`].
//!
//! # Example
//!
//! ```
//! use esst::{HardwareSuite, HarnessConfig, StressKind, StressSuite, TestParameters};
//! use many_cpus::ProcessorSet;
//!
//! let suite = HardwareSuite::new(&ProcessorSet::default(), HarnessConfig::new());
//!
//! let parameters = TestParameters::new(1000, 0, 100, None).unwrap();
//! let report = suite.run(StressKind::Arithmetic, &parameters).unwrap();
//!
//! assert_eq!(report.per_thread().len(), suite.worker_count().get());
//! println!("{report}");
//! ```

mod composite;
mod config;
mod dispatcher;
mod params;
mod pool;
mod prompt;
mod report;
mod seed;
mod suite;

pub use composite::*;
pub use config::*;
pub use dispatcher::*;
pub use params::*;
pub use pool::*;
pub use prompt::*;
pub use report::*;
pub use seed::*;
pub use suite::*;
