use std::alloc::{self, Layout};
#[cfg(target_os = "linux")]
use std::{fs, mem};
use std::ptr::{self, NonNull};
use std::slice;

use tracing::debug;

use crate::{KernelError, Result};

/// Alignment of stress buffers obtained from the standard allocator. One page, so that word and
/// cache-line accesses are always aligned and huge-page fallback keeps the same guarantees.
pub const BUFFER_ALIGNMENT: usize = 4096;

/// Byte pattern written into every new buffer.
const INITIAL_FILL: u8 = 0xA5;

#[cfg(target_os = "linux")]
const HUGE_PAGE_SIZE: usize = 2 * 1024 * 1024;

/// How the memory behind a [`StressBuffer`] was obtained.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum BufferBacking {
    /// Anonymous huge-page mapping.
    HugePages,

    /// Page-aligned allocation from the global allocator.
    Aligned,
}

/// A page-aligned, fully initialized memory region used as the working set of memory stress.
///
/// The buffer is written in full when it is created. Because pages are physically allocated on
/// first touch, creating the buffer on a thread that is already pinned places its pages in the
/// memory region of that thread's processor.
#[derive(Debug)]
pub struct StressBuffer {
    ptr: NonNull<u8>,
    len: usize,

    // Size of the underlying allocation, which may be rounded up from `len`.
    allocated_len: usize,
    backing: BufferBacking,
}

impl StressBuffer {
    /// Allocates and initializes a buffer of `len` bytes.
    ///
    /// When `try_huge_pages` is set, a huge-page mapping is attempted first. If the operating
    /// system refuses (no huge pages reserved, or an unsupported platform), the buffer falls
    /// back to a page-aligned allocation from the global allocator.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Allocation`] if neither allocation strategy succeeds or if `len`
    /// is zero.
    pub fn allocate(len: usize, try_huge_pages: bool) -> Result<Self> {
        if len == 0 {
            return Err(KernelError::Allocation { bytes: len });
        }

        let buffer = if try_huge_pages {
            Self::map_huge_pages(len).map_or_else(|| Self::allocate_aligned(len), Ok)?
        } else {
            Self::allocate_aligned(len)?
        };

        // SAFETY: The pointer is valid for `len` bytes of writes, as established by whichever
        // allocation strategy produced it.
        unsafe {
            ptr::write_bytes(buffer.ptr.as_ptr(), INITIAL_FILL, buffer.len);
        }

        debug!(len, backing = ?buffer.backing, "stress buffer allocated");

        Ok(buffer)
    }

    fn allocate_aligned(len: usize) -> Result<Self> {
        let layout = Layout::from_size_align(len, BUFFER_ALIGNMENT)
            .ok()
            .ok_or(KernelError::Allocation { bytes: len })?;

        // SAFETY: The layout has a non-zero size, checked by the caller.
        let raw = unsafe { alloc::alloc(layout) };

        let ptr = NonNull::new(raw).ok_or(KernelError::Allocation { bytes: len })?;

        Ok(Self {
            ptr,
            len,
            allocated_len: len,
            backing: BufferBacking::Aligned,
        })
    }

    #[cfg(target_os = "linux")]
    fn map_huge_pages(len: usize) -> Option<Self> {
        let allocated_len = len.checked_next_multiple_of(HUGE_PAGE_SIZE)?;

        // SAFETY: Anonymous private mapping with no address hint; the kernel validates all
        // arguments and reports failure through MAP_FAILED.
        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                allocated_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_HUGETLB,
                -1,
                0,
            )
        };

        if raw == libc::MAP_FAILED {
            debug!(len, "huge page mapping refused, falling back to aligned allocation");
            return None;
        }

        Some(Self {
            ptr: NonNull::new(raw.cast::<u8>())?,
            len,
            allocated_len,
            backing: BufferBacking::HugePages,
        })
    }

    #[cfg(not(target_os = "linux"))]
    #[expect(
        clippy::unnecessary_wraps,
        reason = "signature shared with the Linux implementation"
    )]
    fn map_huge_pages(_len: usize) -> Option<Self> {
        None
    }

    /// The length of the buffer in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always `false`; zero-length buffers cannot be allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// How the memory behind the buffer was obtained.
    #[must_use]
    pub fn backing(&self) -> BufferBacking {
        self.backing
    }

    /// Raw pointer to the start of the buffer, for access patterns that must bypass references
    /// (volatile reads, cache flushes).
    #[must_use]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// The buffer contents as bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: The memory is valid for `len` bytes, initialized in `allocate()` and borrowed
        // immutably for the lifetime of `self`.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// The buffer contents as 64-bit words. Trailing bytes that do not fill a whole word are
    /// not included.
    #[must_use]
    pub fn as_words_mut(&mut self) -> &mut [u64] {
        let word_count = self.len / size_of::<u64>();

        // SAFETY: The pointer is page-aligned (so also u64-aligned), the memory is initialized
        // and valid for `word_count * 8 <= len` bytes and exclusively borrowed via `&mut self`.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr().cast::<u64>(), word_count) }
    }
}

impl Drop for StressBuffer {
    #[cfg_attr(test, mutants::skip)] // Impractical to test that memory is returned.
    fn drop(&mut self) {
        match self.backing {
            BufferBacking::Aligned => {
                let layout = Layout::from_size_align(self.allocated_len, BUFFER_ALIGNMENT)
                    .expect("layout was already validated when the buffer was allocated");

                // SAFETY: The pointer was returned by `alloc::alloc` with this exact layout.
                unsafe {
                    alloc::dealloc(self.ptr.as_ptr(), layout);
                }
            }
            #[cfg(target_os = "linux")]
            BufferBacking::HugePages => {
                // SAFETY: The pointer and length describe a mapping created by `mmap` that has
                // not been unmapped yet.
                let result = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.allocated_len) };

                if result != 0 {
                    tracing::warn!(
                        len = self.allocated_len,
                        "failed to unmap huge page stress buffer"
                    );
                }
            }
            #[cfg(not(target_os = "linux"))]
            BufferBacking::HugePages => unreachable!("huge pages are only mapped on Linux"),
        }
    }
}

/// Allocates a zero-filled byte vector, reporting allocation failure as an error instead of
/// aborting the process.
pub(crate) fn zeroed_bytes(len: usize) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();

    bytes
        .try_reserve_exact(len)
        .map_err(|_| KernelError::Allocation { bytes: len })?;
    bytes.resize(len, 0);

    Ok(bytes)
}

/// Returns the amount of memory currently available for new allocations, if the platform can
/// report it.
///
/// On Linux this is `MemAvailable` from `/proc/meminfo`, which includes reclaimable page cache.
/// Kernels that do not publish that field are answered with the free RAM from `sysinfo`.
#[must_use]
pub fn available_memory_bytes() -> Option<u64> {
    available_memory_bytes_core()
}

#[cfg(target_os = "linux")]
fn available_memory_bytes_core() -> Option<u64> {
    fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|meminfo| parse_mem_available(&meminfo))
        .or_else(free_memory_bytes)
}

/// Extracts `MemAvailable` (reported in kB) from the contents of `/proc/meminfo`, in bytes.
#[cfg(target_os = "linux")]
fn parse_mem_available(meminfo: &str) -> Option<u64> {
    let value = meminfo
        .lines()
        .find_map(|line| line.strip_prefix("MemAvailable:"))?;

    let kib: u64 = value.trim().strip_suffix("kB")?.trim().parse().ok()?;

    kib.checked_mul(1024)
}

#[cfg(target_os = "linux")]
fn free_memory_bytes() -> Option<u64> {
    // SAFETY: `sysinfo` is a plain C struct for which all-zero bytes is a valid value.
    let mut info: libc::sysinfo = unsafe { mem::zeroed() };

    // SAFETY: The pointer refers to a live, writable `sysinfo` struct.
    let result = unsafe { libc::sysinfo(&raw mut info) };

    if result != 0 {
        return None;
    }

    #[expect(
        clippy::useless_conversion,
        reason = "field widths differ between Linux targets"
    )]
    let free = u64::from(info.freeram);

    free.checked_mul(u64::from(info.mem_unit))
}

#[cfg(not(target_os = "linux"))]
fn available_memory_bytes_core() -> Option<u64> {
    None
}
