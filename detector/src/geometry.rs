//! Line endpoint estimation from image-boundary intersections.
//!
//! A Hough peak gives the parametric line `x·cosθ + y·sinθ = ρ`. The
//! endpoints published with an event are the first two intersections of that
//! line with the image borders that fall inside the frame. This runs once
//! per validated peak, so plain floating point is fine here.

/// Intersect the line with the image borders (left, right, top, bottom, in
/// that order) and return the first two in-image points, or `None` when the
/// line clips fewer than two borders.
pub fn line_endpoints(
    rho: i32,
    theta_deg: u16,
    width: usize,
    height: usize,
) -> Option<((i32, i32), (i32, i32))> {
    let theta = f64::from(theta_deg).to_radians();
    let c = theta.cos();
    let s = theta.sin();
    let w = width as f64;
    let h = height as f64;
    let rho = f64::from(rho);

    let mut pts = [(0i32, 0i32); 4];
    let mut n = 0;

    // Left edge x = 0.
    if s.abs() > 1e-6 {
        let v = rho / s;
        if v >= 0.0 && v < h {
            pts[n] = (0, v as i32);
            n += 1;
        }
    }
    // Right edge x = W-1.
    if s.abs() > 1e-6 && n < 4 {
        let v = (rho - (w - 1.0) * c) / s;
        if v >= 0.0 && v < h {
            pts[n] = (width as i32 - 1, v as i32);
            n += 1;
        }
    }
    // Top edge y = 0.
    if c.abs() > 1e-6 && n < 4 {
        let v = rho / c;
        if v >= 0.0 && v < w {
            pts[n] = (v as i32, 0);
            n += 1;
        }
    }
    // Bottom edge y = H-1.
    if c.abs() > 1e-6 && n < 4 {
        let v = (rho - (h - 1.0) * s) / c;
        if v >= 0.0 && v < w {
            pts[n] = (v as i32, height as i32 - 1);
            n += 1;
        }
    }

    if n >= 2 {
        Some((pts[0], pts[1]))
    } else {
        None
    }
}

/// Euclidean length between two endpoints, truncated to whole pixels.
pub fn segment_length(p1: (i32, i32), p2: (i32, i32)) -> u32 {
    let dx = f64::from(p2.0 - p1.0);
    let dy = f64::from(p2.1 - p1.1);
    (dx * dx + dy * dy).sqrt() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn horizontal_line_spans_left_to_right() {
        // theta = 90: line y = rho.
        let ((x1, y1), (x2, y2)) = line_endpoints(100, 90, 640, 480).unwrap();
        assert_eq!((x1, y1), (0, 100));
        assert_eq!((x2, y2), (639, 100));
        assert_eq!(segment_length((x1, y1), (x2, y2)), 639);
    }

    #[test]
    fn vertical_line_spans_top_to_bottom() {
        // theta = 0: line x = rho; sin is 0 so only top/bottom intersect.
        let ((x1, y1), (x2, y2)) = line_endpoints(320, 0, 640, 480).unwrap();
        assert_eq!((x1, y1), (320, 0));
        assert_eq!((x2, y2), (320, 479));
    }

    #[test]
    fn antidiagonal_cuts_left_and_top() {
        // theta = 45, rho = 141: x + y ≈ 199.4.
        let ((x1, y1), (x2, y2)) = line_endpoints(141, 45, 640, 480).unwrap();
        assert_eq!((x1, y1), (0, 199));
        assert_eq!((x2, y2), (199, 0));
        assert_eq!(segment_length((x1, y1), (x2, y2)), 281);
    }

    #[test]
    fn line_outside_the_frame_has_no_endpoints() {
        // theta = 90, rho = 600: y = 600 is below a 480-row frame.
        assert!(line_endpoints(600, 90, 640, 480).is_none());
    }

    #[test]
    fn negative_rho_picks_right_then_top_edges() {
        // theta = 135: y - x = rho·sqrt(2); rho = -141 gives y ≈ x - 199.4,
        // which misses the left edge and cuts the right and top borders.
        let ((x1, y1), (x2, y2)) = line_endpoints(-141, 135, 640, 480).unwrap();
        assert_eq!((x1, y1), (639, 439));
        assert_eq!((x2, y2), (199, 0));
        assert_eq!(segment_length((x1, y1), (x2, y2)), 621);
    }
}
