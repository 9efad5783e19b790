use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process;

use rand::RngCore;
use tracing::{debug, warn};

use crate::{Kernel, KernelError, Result, WorkerRng, zeroed_bytes};

/// Once a worker's stress file reaches this size, writing wraps around to the start of the file.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 1024 * 1024 * 1024;

/// Bytes of each chunk that are refreshed from the RNG before every write, so consecutive
/// writes are never identical.
const REFRESH_BYTES: usize = 64;

/// Streams random chunks into a per-worker file and syncs them to stable storage.
///
/// The file is created during setup and removed when the kernel is dropped, both outside the
/// measured window. Syncing happens at the end of every batch and is part of the measurement.
#[derive(Debug)]
pub struct DiskKernel {
    file: File,
    path: PathBuf,
    chunk: Vec<u8>,

    written: u64,
    max_file_bytes: u64,
}

impl DiskKernel {
    /// Creates the stress file for worker `thread_id` in `directory`, writing chunks of
    /// `block_size` bytes per iteration.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidBlockSize`] for a zero block size,
    /// [`KernelError::Allocation`] if a chunk does not fit in memory and [`KernelError::Io`] if
    /// the file cannot be created.
    pub fn new(
        directory: &Path,
        thread_id: usize,
        block_size: u64,
        max_file_bytes: u64,
        rng: &mut WorkerRng,
    ) -> Result<Self> {
        let chunk_len = usize::try_from(block_size)
            .ok()
            .filter(|len| *len > 0)
            .ok_or(KernelError::InvalidBlockSize {
                block_size,
                problem: "must be greater than zero and addressable",
            })?;

        // Allocated before the file exists, so a failure leaves nothing behind to clean up.
        let mut chunk = zeroed_bytes(chunk_len)?;
        rng.fill_bytes(&mut chunk);

        let path = directory.join(format!("esst-disk-{}-{thread_id}.bin", process::id()));

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| KernelError::Io {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), chunk_len, "disk stress file created");

        Ok(Self {
            file,
            path,
            chunk,
            written: 0,
            max_file_bytes: max_file_bytes.max(block_size),
        })
    }

    /// The path of the stress file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> KernelError {
        KernelError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl Kernel for DiskKernel {
    fn run_batch(&mut self, rng: &mut WorkerRng, iterations: u64) -> Result<()> {
        let chunk_len = self.chunk.len() as u64;

        for _ in 0..iterations {
            if self.written.saturating_add(chunk_len) > self.max_file_bytes {
                self.file
                    .seek(SeekFrom::Start(0))
                    .map_err(|e| self.io_error(e))?;
                self.written = 0;
            }

            let refresh_len = self.chunk.len().min(REFRESH_BYTES);
            if let Some(head) = self.chunk.get_mut(..refresh_len) {
                rng.fill_bytes(head);
            }

            self.file
                .write_all(&self.chunk)
                .map_err(|e| self.io_error(e))?;
            self.written = self.written.saturating_add(chunk_len);
        }

        self.file.sync_data().map_err(|e| self.io_error(e))
    }
}

impl Drop for DiskKernel {
    #[cfg_attr(test, mutants::skip)] // Cleanup failures are only logged.
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove disk stress file");
        }
    }
}
