use std::fmt;
use std::hint::black_box;

use aes::Aes256;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use rand::RngCore;
use xts_mode::{Xts128, get_tweak_default};

use crate::{Kernel, KernelError, Result, WorkerRng, zeroed_bytes};

/// Size of one AES block in bytes. Every AES block size must be a multiple of this.
pub const AES_BLOCK_BYTES: u64 = 16;

const AES256_KEY_BYTES: usize = 32;

/// Whether an [`AesKernel`] encrypts or decrypts its data unit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum CipherDirection {
    /// Encrypt in place.
    Encrypt,

    /// Decrypt in place.
    Decrypt,
}

/// Checks that `block_size` describes a data unit the AES kernel can process: a non-zero
/// multiple of the 16-byte AES block.
///
/// # Errors
///
/// Returns [`KernelError::InvalidBlockSize`] describing the problem.
pub fn validate_aes_block_size(block_size: u64) -> Result<()> {
    if block_size == 0 {
        return Err(KernelError::InvalidBlockSize {
            block_size,
            problem: "must be greater than zero",
        });
    }

    if block_size % AES_BLOCK_BYTES != 0 {
        return Err(KernelError::InvalidBlockSize {
            block_size,
            problem: "must be a multiple of 16 bytes",
        });
    }

    Ok(())
}

enum Mode {
    // One 16-byte block through the raw AES-256 round function.
    SingleBlock { cipher: Box<Aes256>, block: aes::Block },

    // One XTS data unit of arbitrary (block-multiple) size.
    Xts {
        cipher: Box<Xts128<Aes256>>,
        data_unit: Vec<u8>,
        sector_index: u128,
    },
}

/// Keeps the AES units busy with AES-256 encryption or decryption of a random data unit.
///
/// A block size of exactly 16 bytes drives the single-block primitive. Larger block sizes run
/// XTS mode over the whole data unit, advancing the sector tweak every iteration.
pub struct AesKernel {
    direction: CipherDirection,
    mode: Mode,
}

impl AesKernel {
    /// Creates a kernel with a key schedule and data unit drawn from `rng`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidBlockSize`] if `block_size` is not a non-zero multiple of
    /// 16 bytes, or [`KernelError::Allocation`] if the data unit does not fit in memory.
    pub fn new(direction: CipherDirection, block_size: u64, rng: &mut WorkerRng) -> Result<Self> {
        validate_aes_block_size(block_size)?;

        let mode = if block_size == AES_BLOCK_BYTES {
            let mut block = aes::Block::default();
            rng.fill_bytes(&mut block);

            Mode::SingleBlock {
                cipher: Box::new(new_cipher(rng)?),
                block,
            }
        } else {
            let len = usize::try_from(block_size)
                .ok()
                .ok_or(KernelError::Allocation { bytes: usize::MAX })?;

            let mut data_unit = zeroed_bytes(len)?;
            rng.fill_bytes(&mut data_unit);

            Mode::Xts {
                cipher: Box::new(Xts128::new(new_cipher(rng)?, new_cipher(rng)?)),
                data_unit,
                sector_index: 0,
            }
        };

        Ok(Self { direction, mode })
    }

    /// The direction this kernel runs the cipher in.
    #[must_use]
    pub fn direction(&self) -> CipherDirection {
        self.direction
    }
}

fn new_cipher(rng: &mut WorkerRng) -> Result<Aes256> {
    let mut key = [0_u8; AES256_KEY_BYTES];
    rng.fill_bytes(&mut key);

    Aes256::new_from_slice(&key).map_err(|e| KernelError::Cipher(e.to_string()))
}

impl Kernel for AesKernel {
    fn run_batch(&mut self, _rng: &mut WorkerRng, iterations: u64) -> Result<()> {
        match &mut self.mode {
            Mode::SingleBlock { cipher, block } => {
                for _ in 0..iterations {
                    match self.direction {
                        CipherDirection::Encrypt => cipher.encrypt_block(block),
                        CipherDirection::Decrypt => cipher.decrypt_block(block),
                    }

                    black_box(&block);
                }
            }
            Mode::Xts {
                cipher,
                data_unit,
                sector_index,
            } => {
                for _ in 0..iterations {
                    let tweak = get_tweak_default(*sector_index);

                    match self.direction {
                        CipherDirection::Encrypt => cipher.encrypt_sector(data_unit, tweak),
                        CipherDirection::Decrypt => cipher.decrypt_sector(data_unit, tweak),
                    }

                    *sector_index = sector_index.wrapping_add(1);
                    black_box(&data_unit);
                }
            }
        }

        Ok(())
    }
}

// The ciphers hold expanded key schedules which must never end up in logs.
impl fmt::Debug for AesKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match &self.mode {
            Mode::SingleBlock { .. } => "single-block",
            Mode::Xts { .. } => "xts",
        };

        f.debug_struct("AesKernel")
            .field("direction", &self.direction)
            .field("mode", &mode)
            .finish_non_exhaustive()
    }
}
