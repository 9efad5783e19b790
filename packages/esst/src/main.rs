#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]

//! Binary entry point of the ESST hardware stress tester.
//!
//! This module is excluded from mutation testing because it only wires process-global state
//! (arguments, standard streams, logging) into the library.

use std::io;
use std::num::NonZero;
use std::path::PathBuf;
use std::process::ExitCode;

use argh::FromArgs;
use esst::{Console, Dispatcher, HardwareSuite, HarnessConfig, run_single};
use many_cpus::ProcessorSet;
use tracing::info;
use tracing_subscriber::EnvFilter;

const MIB: usize = 1024 * 1024;

/// Hardware stability harness. Saturates every logical processor with one stress test at a time
/// and reports per-thread throughput.
#[derive(FromArgs)]
struct Args {
    /// multiplier applied to the base iteration counts of the full/nuke run (default 1)
    #[argh(option)]
    intensity: Option<u64>,

    /// per-worker memory stress buffer in MiB (default 1024)
    #[argh(option)]
    mem_buffer_mib: Option<usize>,

    /// directory in which disk stress files are created (default: system temp directory)
    #[argh(option)]
    disk_dir: Option<PathBuf>,

    /// do not try huge pages for memory stress buffers
    #[argh(switch)]
    no_huge_pages: bool,

    /// run one command, then exit; any parameters it prompts for are read from stdin
    #[argh(option)]
    run: Option<String>,
}

// Binary entry point - mutations would require subprocess testing which is impractical.
#[cfg_attr(test, mutants::skip)]
fn main() -> ExitCode {
    let args: Args = argh::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let config = match config_from_args(&args) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("Error: {message}");
            return ExitCode::FAILURE;
        }
    };

    info!(?config, "configuration resolved");

    let suite = HardwareSuite::new(&ProcessorSet::default(), config.clone());
    let console = Console::new(io::stdin().lock(), io::stdout().lock());
    let mut dispatcher = Dispatcher::new(suite, &config, console);

    let result = match &args.run {
        Some(command) => run_single(&mut dispatcher, command),
        None => dispatcher.run(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn config_from_args(args: &Args) -> Result<HarnessConfig, String> {
    let mut config = HarnessConfig::new().with_huge_pages(!args.no_huge_pages);

    if let Some(intensity) = args.intensity {
        let intensity =
            NonZero::new(intensity).ok_or_else(|| "--intensity must be at least 1".to_owned())?;
        config = config.with_intensity(intensity);
    }

    if let Some(mib) = args.mem_buffer_mib {
        let bytes = mib
            .checked_mul(MIB)
            .ok_or_else(|| format!("--mem-buffer-mib {mib} does not fit in memory"))?;
        config = config.with_memory_buffer_bytes(bytes);
    }

    if let Some(disk_dir) = &args.disk_dir {
        config = config.with_disk_dir(disk_dir.clone());
    }

    Ok(config)
}
