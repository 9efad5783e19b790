use std::num::NonZero;

use esst_kernels::KernelError;
use thiserror::Error;

/// The resolved numeric parameters of one stress run.
///
/// Values of this type are always valid: the iteration count is non-zero, the value range is
/// not inverted and a block size, if present, is non-zero. Kernel-specific shape requirements
/// (such as AES block alignment) are checked separately by [`StressKind::validate()`][1] before
/// any worker is started.
///
/// [1]: crate::StressKind::validate
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TestParameters {
    iterations: NonZero<u64>,
    lower: u64,
    upper: u64,
    block_size: Option<NonZero<u64>>,
}

impl TestParameters {
    /// Validates and bundles the parameters of a stress run.
    ///
    /// Tests that do not use a value range pass zero for both bounds. Tests that do not use a
    /// block size pass `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ParamError::ZeroIterations`], [`ParamError::InvertedRange`] or
    /// [`ParamError::ZeroBlockSize`] for the corresponding malformed input.
    pub fn new(
        iterations: u64,
        lower: u64,
        upper: u64,
        block_size: Option<u64>,
    ) -> Result<Self, ParamError> {
        let iterations = NonZero::new(iterations).ok_or(ParamError::ZeroIterations)?;

        if lower > upper {
            return Err(ParamError::InvertedRange { lower, upper });
        }

        let block_size = block_size
            .map(|size| NonZero::new(size).ok_or(ParamError::ZeroBlockSize))
            .transpose()?;

        Ok(Self {
            iterations,
            lower,
            upper,
            block_size,
        })
    }

    /// Parameters for tests that only take an iteration count.
    #[must_use]
    pub const fn iterations_only(iterations: NonZero<u64>) -> Self {
        Self {
            iterations,
            lower: 0,
            upper: 0,
            block_size: None,
        }
    }

    /// Parameters for tests that draw values from `[lower, upper]`.
    ///
    /// # Errors
    ///
    /// Returns [`ParamError::InvertedRange`] if `lower > upper`.
    pub fn with_range(iterations: NonZero<u64>, lower: u64, upper: u64) -> Result<Self, ParamError> {
        Self::new(iterations.get(), lower, upper, None)
    }

    /// Parameters for tests that process `block_size`-byte units.
    #[must_use]
    pub const fn with_block_size(iterations: NonZero<u64>, block_size: NonZero<u64>) -> Self {
        Self {
            iterations,
            lower: 0,
            upper: 0,
            block_size: Some(block_size),
        }
    }

    /// How many iterations every worker executes.
    #[must_use]
    pub fn iterations(&self) -> NonZero<u64> {
        self.iterations
    }

    /// Inclusive lower bound of the value range.
    #[must_use]
    pub fn lower(&self) -> u64 {
        self.lower
    }

    /// Inclusive upper bound of the value range.
    #[must_use]
    pub fn upper(&self) -> u64 {
        self.upper
    }

    /// The block size in bytes, if the test was given one.
    #[must_use]
    pub fn block_size(&self) -> Option<NonZero<u64>> {
        self.block_size
    }

    /// Returns the same parameters with the iteration count multiplied by `multiplier`.
    ///
    /// # Errors
    ///
    /// Returns [`ParamError::IterationOverflow`] if the product does not fit in `u64`.
    pub fn scaled(&self, multiplier: NonZero<u64>) -> Result<Self, ParamError> {
        let iterations =
            self.iterations
                .checked_mul(multiplier)
                .ok_or(ParamError::IterationOverflow {
                    iterations: self.iterations.get(),
                    multiplier: multiplier.get(),
                })?;

        Ok(Self {
            iterations,
            ..*self
        })
    }
}

/// Reasons why a set of test parameters was rejected.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParamError {
    /// A stress run needs at least one iteration.
    #[error("iteration count must be greater than zero")]
    ZeroIterations,

    /// The lower bound of the value range is above the upper bound.
    #[error("lower bound {lower} exceeds upper bound {upper}")]
    InvertedRange {
        /// The rejected lower bound.
        lower: u64,

        /// The rejected upper bound.
        upper: u64,
    },

    /// A block size of zero bytes was given.
    #[error("block size must be greater than zero")]
    ZeroBlockSize,

    /// The test needs a block size but none was given.
    #[error("a block size is required")]
    MissingBlockSize,

    /// The block size does not fit the kernel of the test.
    #[error(transparent)]
    InvalidBlockSize(KernelError),

    /// Scaling the iteration count by the intensity multiplier overflowed.
    #[error("{iterations} iterations scaled by {multiplier} do not fit in 64 bits")]
    IterationOverflow {
        /// The unscaled iteration count.
        iterations: u64,

        /// The multiplier that was applied.
        multiplier: u64,
    },
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(TestParameters: Copy, Send, Sync);
    assert_impl_all!(ParamError: Send, Sync);

    #[test]
    fn valid_parameters_are_kept() {
        let params = TestParameters::new(100, 0, 1, Some(4096)).unwrap();

        assert_eq!(params.iterations(), nz!(100));
        assert_eq!(params.lower(), 0);
        assert_eq!(params.upper(), 1);
        assert_eq!(params.block_size(), Some(nz!(4096)));
    }

    #[test]
    fn zero_iterations_rejected() {
        assert!(matches!(
            TestParameters::new(0, 0, 1, None),
            Err(ParamError::ZeroIterations)
        ));
    }

    #[test]
    fn inverted_range_rejected() {
        assert!(matches!(
            TestParameters::new(10, 5, 4, None),
            Err(ParamError::InvertedRange { lower: 5, upper: 4 })
        ));
    }

    #[test]
    fn equal_bounds_accepted() {
        let params = TestParameters::new(10, 7, 7, None).unwrap();

        assert_eq!(params.lower(), params.upper());
    }

    #[test]
    fn zero_block_size_rejected() {
        assert!(matches!(
            TestParameters::new(10, 0, 0, Some(0)),
            Err(ParamError::ZeroBlockSize)
        ));
    }

    #[test]
    fn scaling_multiplies_iterations_only() {
        let base = TestParameters::with_range(nz!(1000), 3, 9).unwrap();

        let scaled = base.scaled(nz!(4)).unwrap();

        assert_eq!(scaled.iterations(), nz!(4000));
        assert_eq!(scaled.lower(), 3);
        assert_eq!(scaled.upper(), 9);
    }

    #[test]
    fn scaling_overflow_is_an_error() {
        let base = TestParameters::iterations_only(NonZero::<u64>::MAX);

        assert!(matches!(
            base.scaled(nz!(2)),
            Err(ParamError::IterationOverflow {
                iterations: u64::MAX,
                multiplier: 2
            })
        ));
    }
}
