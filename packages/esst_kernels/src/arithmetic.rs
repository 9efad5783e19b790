use std::hint::black_box;

use rand::distr::{Distribution, Uniform};

use crate::{Kernel, KernelError, Result, WorkerRng};

/// Number of `f32` lanes processed per fused multiply-add, matching one 256-bit vector register.
pub const LANE_COUNT: usize = 8;

/// One vector register worth of `f32` operands, aligned so the compiler can use aligned
/// 256-bit loads and stores.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[repr(C, align(32))]
pub struct Lanes(pub [f32; LANE_COUNT]);

/// Computes `out = a * b + c` lane by lane.
///
/// The loop has a fixed trip count over aligned storage and is vectorized into a single FMA
/// instruction on targets that support it.
#[inline]
pub fn fused_multiply_add(a: &Lanes, b: &Lanes, c: &Lanes, out: &mut Lanes) {
    for (((out, a), b), c) in out.0.iter_mut().zip(a.0).zip(b.0).zip(c.0) {
        *out = a.mul_add(b, c);
    }
}

/// Saturates the vector floating-point units with fused multiply-adds over random operands
/// drawn from `[lower, upper]`.
#[derive(Debug)]
pub struct ArithmeticKernel {
    operands: Uniform<f32>,

    a: Lanes,
    b: Lanes,
    c: Lanes,
    out: Lanes,
}

impl ArithmeticKernel {
    /// Creates a kernel that draws operands from the inclusive range `[lower, upper]`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidRange`] if the range is inverted.
    #[expect(
        clippy::cast_precision_loss,
        reason = "operand bounds only steer the magnitude of the random inputs"
    )]
    pub fn new(lower: u64, upper: u64) -> Result<Self> {
        let operands = Uniform::new_inclusive(lower as f32, upper as f32)
            .ok()
            .ok_or(KernelError::InvalidRange { lower, upper })?;

        Ok(Self {
            operands,
            a: Lanes::default(),
            b: Lanes::default(),
            c: Lanes::default(),
            out: Lanes::default(),
        })
    }

    fn refill(&mut self, rng: &mut WorkerRng) {
        for lanes in [&mut self.a, &mut self.b, &mut self.c] {
            for lane in &mut lanes.0 {
                *lane = self.operands.sample(rng);
            }
        }
    }
}

impl Kernel for ArithmeticKernel {
    fn run_batch(&mut self, rng: &mut WorkerRng, iterations: u64) -> Result<()> {
        for _ in 0..iterations {
            self.refill(rng);
            fused_multiply_add(&self.a, &self.b, &self.c, &mut self.out);

            // Keep the result observable so the multiply-add is not optimized away.
            black_box(&self.out);
        }

        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::mem;

    use super::*;

    #[test]
    fn lanes_are_vector_aligned() {
        assert_eq!(mem::align_of::<Lanes>(), 32);
        assert_eq!(mem::size_of::<Lanes>(), 32);
    }

    #[test]
    fn fused_multiply_add_is_lane_wise() {
        let a = Lanes([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let b = Lanes([2.0; LANE_COUNT]);
        let c = Lanes([0.5; LANE_COUNT]);
        let mut out = Lanes::default();

        fused_multiply_add(&a, &b, &c, &mut out);

        assert_eq!(
            out,
            Lanes([2.5, 4.5, 6.5, 8.5, 10.5, 12.5, 14.5, 16.5])
        );
    }

    #[test]
    fn operands_stay_in_range() {
        let mut kernel = ArithmeticKernel::new(3, 5).unwrap();
        let mut rng = WorkerRng::new(42, 54);

        kernel.run_batch(&mut rng, 10).unwrap();

        for lane in kernel.a.0.iter().chain(&kernel.b.0).chain(&kernel.c.0) {
            assert!((3.0..=5.0).contains(lane), "{lane} escaped the range");
        }
    }

    #[test]
    fn degenerate_range_is_accepted() {
        let mut kernel = ArithmeticKernel::new(0, 0).unwrap();
        let mut rng = WorkerRng::new(42, 54);

        kernel.run_batch(&mut rng, 3).unwrap();

        assert_eq!(kernel.out, Lanes([0.0; LANE_COUNT]));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let result = ArithmeticKernel::new(2, 1);

        assert!(matches!(
            result,
            Err(KernelError::InvalidRange { lower: 2, upper: 1 })
        ));
    }
}
