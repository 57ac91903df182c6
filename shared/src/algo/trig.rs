//! Fixed-point trigonometry table for the Hough vote loop.
//!
//! Sine and cosine are precomputed for every whole-degree angle in
//! [0°, 180°), scaled by 1024 and stored as `i16`. The vote inner loop then
//! needs only integer multiplies and an arithmetic shift, which matters on
//! targets without an FPU.

use once_cell::sync::Lazy;
use std::f64::consts::PI;

/// Number of angular bins: one per degree over the half-circle.
pub const THETA_STEPS: usize = 180;

/// The table stores `round(f(θ) · 2^TRIG_SCALE_SHIFT)`.
pub const TRIG_SCALE_SHIFT: u32 = 10;

struct TrigTables {
    cos: [i16; THETA_STEPS],
    sin: [i16; THETA_STEPS],
}

static TABLES: Lazy<TrigTables> = Lazy::new(|| {
    let mut cos = [0i16; THETA_STEPS];
    let mut sin = [0i16; THETA_STEPS];
    let scale = f64::from(1u32 << TRIG_SCALE_SHIFT);
    for t in 0..THETA_STEPS {
        let theta = t as f64 * PI / THETA_STEPS as f64;
        cos[t] = (theta.cos() * scale).round() as i16;
        sin[t] = (theta.sin() * scale).round() as i16;
    }
    TrigTables { cos, sin }
});

/// `round(cos(t°) · 1024)` for `t` in `[0, 180)`.
#[inline]
pub fn cos1024(t: usize) -> i32 {
    i32::from(TABLES.cos[t])
}

/// `round(sin(t°) · 1024)` for `t` in `[0, 180)`.
#[inline]
pub fn sin1024(t: usize) -> i32 {
    i32::from(TABLES.sin[t])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_and_cardinals() {
        assert_eq!(cos1024(0), 1024);
        assert_eq!(sin1024(0), 0);
        assert_eq!(cos1024(90), 0);
        assert_eq!(sin1024(90), 1024);
    }

    #[test]
    fn forty_five_degrees() {
        // round(0.7071... * 1024) = 724
        assert_eq!(cos1024(45), 724);
        assert_eq!(sin1024(45), 724);
    }

    #[test]
    fn matches_float_reference_everywhere() {
        for t in 0..THETA_STEPS {
            let theta = t as f64 * PI / THETA_STEPS as f64;
            assert_eq!(cos1024(t), (theta.cos() * 1024.0).round() as i32, "cos t={t}");
            assert_eq!(sin1024(t), (theta.sin() * 1024.0).round() as i32, "sin t={t}");
        }
    }

    #[test]
    fn sin_never_negative_on_half_circle() {
        for t in 0..THETA_STEPS {
            assert!(sin1024(t) >= 0);
        }
    }
}
