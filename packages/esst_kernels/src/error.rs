use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while setting up or driving a stress kernel.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KernelError {
    /// The stress buffer could not be allocated, neither from huge pages nor from the
    /// standard aligned allocator.
    #[error("failed to allocate a {bytes}-byte stress buffer")]
    Allocation {
        /// The number of bytes that was requested.
        bytes: usize,
    },

    /// The requested stress buffer is too small for the access patterns of the kernel.
    #[error("stress buffer of {bytes} bytes is too small, at least {minimum} bytes are required")]
    BufferTooSmall {
        /// The number of bytes that was requested.
        bytes: usize,

        /// The smallest buffer the kernel can operate on.
        minimum: usize,
    },

    /// The block size does not fit the kernel.
    #[error("block size {block_size} is invalid: {problem}")]
    InvalidBlockSize {
        /// The rejected block size.
        block_size: u64,

        /// A human-readable description of the problem.
        problem: &'static str,
    },

    /// The value range cannot be sampled from.
    #[error("value range {lower}..={upper} is invalid")]
    InvalidRange {
        /// Lower bound of the rejected range.
        lower: u64,

        /// Upper bound of the rejected range.
        upper: u64,
    },

    /// The cipher rejected its key material.
    #[error("cipher setup failed: {0}")]
    Cipher(String),

    /// A disk stress file operation failed.
    #[error("disk stress I/O on '{}' failed: {source}", .path.display())]
    Io {
        /// The file the operation was performed on.
        path: PathBuf,

        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// A specialized `Result` type for kernel operations, returning the crate's
/// [`KernelError`] type as the error value.
pub type Result<T> = std::result::Result<T, KernelError>;
