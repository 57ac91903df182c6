//! Hough-transform line detection over sparse candidate pixels.
//!
//! Votes use the shared fixed-point trig table, so the inner loop is one
//! integer multiply-add and an arithmetic shift per angle bin. The
//! accumulator is ~648 KB at the default ρ range and lives on the heap.

use shared::algo::trig::{cos1024, sin1024, THETA_STEPS, TRIG_SCALE_SHIFT};

/// A line candidate extracted from the accumulator.
///
/// `length_px` is initialised to the vote count as a cheap proxy; the engine
/// replaces it with the geometric endpoint-to-endpoint length during
/// validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeteorLine {
    /// Signed ρ in pixels.
    pub rho: i32,
    /// Angle in whole degrees, 0-179.
    pub theta: u16,
    pub votes: u32,
    pub length_px: u32,
}

/// 2D vote accumulator indexed by (ρ + rho_max, θ).
pub struct HoughAccum {
    rho_max: i32,
    /// Row-major `[2*rho_max][THETA_STEPS]`, saturating counters.
    cells: Vec<u16>,
}

impl HoughAccum {
    pub fn new(rho_max: usize) -> Self {
        Self {
            rho_max: rho_max as i32,
            cells: vec![0; 2 * rho_max * THETA_STEPS],
        }
    }

    /// Zero every cell for a new detection round.
    pub fn reset(&mut self) {
        self.cells.fill(0);
    }

    /// Cast one vote for candidate pixel (x, y) across every angle bin.
    ///
    /// ρ indices falling outside [0, 2·rho_max) are skipped; in-range cells
    /// saturate at `u16::MAX`.
    pub fn vote(&mut self, x: i32, y: i32) {
        for t in 0..THETA_STEPS {
            let rho_f = x * cos1024(t) + y * sin1024(t);
            let rho = rho_f / (1 << TRIG_SCALE_SHIFT);
            let idx = rho + self.rho_max;
            if idx >= 0 && idx < 2 * self.rho_max {
                let cell = &mut self.cells[idx as usize * THETA_STEPS + t];
                *cell = cell.saturating_add(1);
            }
        }
    }

    /// Votes at a given (ρ, θ); out-of-range ρ reads as zero.
    pub fn votes_at(&self, rho: i32, theta: usize) -> u16 {
        let idx = rho + self.rho_max;
        if idx < 0 || idx >= 2 * self.rho_max {
            return 0;
        }
        self.cells[idx as usize * THETA_STEPS + theta]
    }

    #[inline]
    fn cell(&self, r: usize, t: usize) -> u16 {
        self.cells[r * THETA_STEPS + t]
    }

    /// Extract up to `max_lines` vote peaks at or above `threshold`.
    ///
    /// Scans the accumulator interior in row-major order and applies 3×3
    /// local-maximum suppression: a cell survives only if no neighbour holds
    /// strictly more votes, so a plateau is reported once per member but a
    /// genuine ridge collapses to its crest.
    pub fn find_peaks(&self, threshold: u16, max_lines: usize) -> Vec<MeteorLine> {
        let mut out = Vec::with_capacity(max_lines.min(16));
        let rows = 2 * self.rho_max as usize;

        'scan: for r in 1..rows - 1 {
            for t in 1..THETA_STEPS - 1 {
                let v = self.cell(r, t);
                if v < threshold {
                    continue;
                }
                if v < self.cell(r - 1, t - 1)
                    || v < self.cell(r - 1, t)
                    || v < self.cell(r - 1, t + 1)
                    || v < self.cell(r, t - 1)
                    || v < self.cell(r, t + 1)
                    || v < self.cell(r + 1, t - 1)
                    || v < self.cell(r + 1, t)
                    || v < self.cell(r + 1, t + 1)
                {
                    continue;
                }
                out.push(MeteorLine {
                    rho: r as i32 - self.rho_max,
                    theta: t as u16,
                    votes: u32::from(v),
                    length_px: u32::from(v),
                });
                if out.len() >= max_lines {
                    break 'scan;
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RHO_MAX: usize = 900;

    #[test]
    fn vote_touches_one_cell_per_angle() {
        let mut h = HoughAccum::new(RHO_MAX);
        h.vote(100, 100);
        let touched: u32 = (0..2 * RHO_MAX as i32)
            .flat_map(|r| (0..THETA_STEPS).map(move |t| (r, t)))
            .map(|(r, t)| u32::from(h.votes_at(r - RHO_MAX as i32, t)))
            .sum();
        // Every rho for a 640x480-range point fits inside +/-900.
        assert_eq!(touched, THETA_STEPS as u32);
    }

    #[test]
    fn all_detect_resolution_votes_stay_in_range() {
        // Image corners bound |rho|: max |x cosθ + y sinθ| over the frame.
        let mut h = HoughAccum::new(RHO_MAX);
        for &(x, y) in &[(0, 0), (639, 0), (0, 479), (639, 479)] {
            h.vote(x, y);
        }
        let total: u32 = (0..2 * RHO_MAX as i32)
            .flat_map(|r| (0..THETA_STEPS).map(move |t| (r, t)))
            .map(|(r, t)| u32::from(h.votes_at(r - RHO_MAX as i32, t)))
            .sum();
        assert_eq!(total, 4 * THETA_STEPS as u32);
    }

    #[test]
    fn collinear_antidiagonal_points_peak_at_45_degrees() {
        let mut h = HoughAccum::new(RHO_MAX);
        // 40 pixels along x + y = 200: normal angle 45°, rho = 200/sqrt(2).
        for i in 0..40 {
            h.vote(100 + i, 100 - i);
        }
        // (100+i + 100-i) * 724 / 1024 = 141 for every point.
        assert_eq!(h.votes_at(141, 45), 40);

        let peaks = h.find_peaks(8, 16);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].rho, 141);
        assert_eq!(peaks[0].theta, 45);
        assert_eq!(peaks[0].votes, 40);
        assert_eq!(peaks[0].length_px, 40);
    }

    #[test]
    fn peaks_below_threshold_are_not_reported() {
        let mut h = HoughAccum::new(RHO_MAX);
        for i in 0..5 {
            h.vote(100 + i, 100 - i);
        }
        assert_eq!(h.votes_at(141, 45), 5);
        assert!(h.find_peaks(8, 16).is_empty());
    }

    #[test]
    fn no_peak_beats_a_strict_neighbour() {
        let mut h = HoughAccum::new(RHO_MAX);
        for i in 0..60 {
            h.vote(50 + i, 300 - i);
        }
        let peaks = h.find_peaks(8, 16);
        assert!(!peaks.is_empty());
        for p in &peaks {
            let r = p.rho + RHO_MAX as i32;
            for dr in -1..=1i32 {
                for dt in -1..=1i32 {
                    let n = h.votes_at(r + dr - RHO_MAX as i32, (p.theta as i32 + dt) as usize);
                    assert!(p.votes as u16 >= n, "peak {:?} beaten by neighbour", p);
                }
            }
        }
    }

    #[test]
    fn find_peaks_respects_max_lines() {
        let mut h = HoughAccum::new(RHO_MAX);
        // Scatter enough isolated points that several cells cross threshold 1.
        for i in 0..20 {
            let x = 30 + 31 * i;
            let y = 17 + 13 * i;
            h.vote(x % 640, y % 480);
        }
        let peaks = h.find_peaks(1, 3);
        assert_eq!(peaks.len(), 3);
    }

    #[test]
    fn reset_clears_votes() {
        let mut h = HoughAccum::new(RHO_MAX);
        h.vote(10, 10);
        h.reset();
        assert_eq!(h.votes_at(10, 0), 0);
        assert!(h.find_peaks(1, 16).is_empty());
    }

    #[test]
    fn cells_saturate_at_u16_max() {
        let mut h = HoughAccum::new(4);
        // rho for (0,0) is 0 at every angle; hammer it past the counter width.
        for _ in 0..70_000 {
            h.vote(0, 0);
        }
        assert_eq!(h.votes_at(0, 90), u16::MAX);
    }
}
