use std::env;
use std::num::NonZero;
use std::path::{Path, PathBuf};

use esst_kernels::DEFAULT_MAX_FILE_BYTES;
use new_zealand::nz;

use crate::{CompositePlan, SeedBase};

/// Per-worker memory stress buffer unless configured otherwise: 1 GiB.
pub const DEFAULT_MEMORY_BUFFER_BYTES: usize = 1024 * 1024 * 1024;

/// Settings of the harness that stay fixed for the lifetime of the process.
///
/// # Example
///
/// ```
/// use esst::HarnessConfig;
/// use new_zealand::nz;
///
/// let config = HarnessConfig::new()
///     .with_intensity(nz!(4))
///     .with_memory_buffer_bytes(64 * 1024 * 1024)
///     .with_huge_pages(false);
///
/// assert_eq!(config.intensity().get(), 4);
/// ```
#[derive(Clone, Debug)]
pub struct HarnessConfig {
    intensity: NonZero<u64>,
    memory_buffer_bytes: usize,
    huge_pages: bool,
    disk_dir: PathBuf,
    max_disk_file_bytes: u64,
    seed: SeedBase,
    composite_plan: CompositePlan,
}

impl HarnessConfig {
    /// The default configuration: intensity 1, a 1 GiB memory buffer with huge pages, disk
    /// files in the system temporary directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            intensity: nz!(1),
            memory_buffer_bytes: DEFAULT_MEMORY_BUFFER_BYTES,
            huge_pages: true,
            disk_dir: env::temp_dir(),
            max_disk_file_bytes: DEFAULT_MAX_FILE_BYTES,
            seed: SeedBase::DEFAULT,
            composite_plan: CompositePlan::default(),
        }
    }

    /// Sets the multiplier applied to every composite sub-test's base iteration count.
    #[must_use]
    pub fn with_intensity(mut self, intensity: NonZero<u64>) -> Self {
        self.intensity = intensity;
        self
    }

    /// Sets the size of each worker's memory stress buffer.
    #[must_use]
    pub fn with_memory_buffer_bytes(mut self, bytes: usize) -> Self {
        self.memory_buffer_bytes = bytes;
        self
    }

    /// Sets whether memory stress tries huge pages before the standard allocator.
    #[must_use]
    pub fn with_huge_pages(mut self, huge_pages: bool) -> Self {
        self.huge_pages = huge_pages;
        self
    }

    /// Sets the directory in which disk stress creates its files.
    #[must_use]
    pub fn with_disk_dir(mut self, disk_dir: impl Into<PathBuf>) -> Self {
        self.disk_dir = disk_dir.into();
        self
    }

    /// Sets the size at which each disk stress file wraps around to its start.
    #[must_use]
    pub fn with_max_disk_file_bytes(mut self, bytes: u64) -> Self {
        self.max_disk_file_bytes = bytes;
        self
    }

    /// Sets the base from which worker random streams are derived.
    #[must_use]
    pub fn with_seed(mut self, seed: SeedBase) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the base parameters of the composite run.
    #[must_use]
    pub fn with_composite_plan(mut self, plan: CompositePlan) -> Self {
        self.composite_plan = plan;
        self
    }

    /// The composite intensity multiplier.
    #[must_use]
    pub fn intensity(&self) -> NonZero<u64> {
        self.intensity
    }

    /// The requested per-worker memory stress buffer size.
    #[must_use]
    pub fn memory_buffer_bytes(&self) -> usize {
        self.memory_buffer_bytes
    }

    /// Whether memory stress tries huge pages first.
    #[must_use]
    pub fn huge_pages(&self) -> bool {
        self.huge_pages
    }

    /// The directory for disk stress files.
    #[must_use]
    pub fn disk_dir(&self) -> &Path {
        &self.disk_dir
    }

    /// The size at which disk stress files wrap around.
    #[must_use]
    pub fn max_disk_file_bytes(&self) -> u64 {
        self.max_disk_file_bytes
    }

    /// The base of the worker random streams.
    #[must_use]
    pub fn seed(&self) -> SeedBase {
        self.seed
    }

    /// The base parameters of the composite run.
    #[must_use]
    pub fn composite_plan(&self) -> &CompositePlan {
        &self.composite_plan
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::new()
    }
}
