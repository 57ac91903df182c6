//! Integer-only numeric helpers for the detection hot path.
//!
//! The detection loop runs on a MIPS core without a hardware FPU, so the
//! per-pixel and per-vote paths stay in fixed-point / integer arithmetic.
//! Floating point is allowed only in once-per-block work (line geometry).

pub mod trig;

pub use trig::{cos1024, sin1024, TRIG_SCALE_SHIFT};

use ndarray::Array2;

/// Integer square root via Newton's method, returning ⌊√n⌋.
///
/// Initial guess is `n` itself; the iteration is monotonically decreasing
/// and terminates when it stops improving.
pub fn isqrt(n: u32) -> u32 {
    if n == 0 {
        return 0;
    }
    let mut x = n;
    let mut x1 = (x + 1) / 2;
    while x1 < x {
        x = x1;
        x1 = (x + n / x) / 2;
    }
    x
}

/// Nearest-neighbour downsample of a luma plane into `dst`.
///
/// The sampling step is `src_dim / dst_dim` with integer division, so the
/// source dimensions must be at least the destination dimensions. `stride`
/// is the source row pitch in bytes and may exceed `src_w`.
pub fn downsample_luma(
    src: &[u8],
    src_w: usize,
    src_h: usize,
    stride: usize,
    dst: &mut Array2<u8>,
) {
    let (dst_h, dst_w) = dst.dim();
    debug_assert!(src_w >= dst_w && src_h >= dst_h);
    let x_step = src_w / dst_w;
    let y_step = src_h / dst_h;

    for (dy, mut row) in dst.rows_mut().into_iter().enumerate() {
        let src_row = &src[dy * y_step * stride..];
        for (dx, out) in row.iter_mut().enumerate() {
            *out = src_row[dx * x_step];
        }
    }
}
