//! Inversion: desired display value -> normalized value.

use crate::display::normalize_token;
use crate::fit::Fit;

/// Relative readback tolerance (2%).
pub const DEFAULT_RELATIVE_TOLERANCE: f64 = 0.02;
/// Absolute floor for targets near zero.
pub const DEFAULT_ABSOLUTE_TOLERANCE: f64 = 0.02;
/// Bisection steps allowed after the first write.
pub const DEFAULT_MAX_ITERATIONS: usize = 6;

fn clamp_to_domain(x: f64, domain_min: f64, domain_max: f64) -> f64 {
    if !x.is_finite() {
        return domain_min;
    }
    let (lo, hi) = if domain_min <= domain_max {
        (domain_min, domain_max)
    } else {
        (domain_max, domain_min)
    };
    x.clamp(lo, hi)
}

/// Solve `fit(x) = target` for x, clamped to the domain.
pub fn invert(fit: &Fit, target: f64, domain_min: f64, domain_max: f64) -> f64 {
    let x = match fit {
        Fit::Linear { a, b, .. } => {
            if *a == 0.0 {
                domain_min
            } else {
                (target - b) / a
            }
        }
        Fit::Log { a, b, .. } => {
            if *a == 0.0 {
                domain_min
            } else {
                ((target - b) / a).exp()
            }
        }
        Fit::Exp { a, b, .. } => {
            let ratio = target / a;
            if *a != 0.0 && *b != 0.0 && ratio > 0.0 {
                ratio.ln() / b
            } else {
                domain_min
            }
        }
        Fit::Piecewise { points, .. } => invert_piecewise(points, target).unwrap_or(domain_min),
    };
    clamp_to_domain(x, domain_min, domain_max)
}

/// Interpolate x between the first pair of consecutive points whose
/// y-interval brackets `target`; outside the observed range use the x of the
/// point whose y is closest.
fn invert_piecewise(points: &[(f64, f64)], target: f64) -> Option<f64> {
    if points.len() == 1 {
        return Some(points[0].0);
    }

    for pair in points.windows(2) {
        let (x1, y1) = pair[0];
        let (x2, y2) = pair[1];
        let (low, high) = if y1 <= y2 { (y1, y2) } else { (y2, y1) };
        if target < low || target > high {
            continue;
        }
        if y2 == y1 {
            return Some(x1);
        }
        let t = (target - y1) / (y2 - y1);
        return Some(x1 + t * (x2 - x1));
    }

    points
        .iter()
        .min_by(|a, b| (a.1 - target).abs().total_cmp(&(b.1 - target).abs()))
        .map(|p| p.0)
}

/// Linear interpolation between declared display bounds, used when a
/// continuous parameter has no fit.
pub fn invert_linear_bounds(
    min_display: f64,
    max_display: f64,
    target: f64,
    domain_min: f64,
    domain_max: f64,
) -> f64 {
    let span = max_display - min_display;
    if span == 0.0 || !span.is_finite() {
        return domain_min;
    }
    let t = (target - min_display) / span;
    clamp_to_domain(domain_min + t * (domain_max - domain_min), domain_min, domain_max)
}

/// Find the normalized value for a label.
///
/// Exact (case-insensitive) matches win over normalized-token containment.
pub fn invert_label(label_map: &[(f64, String)], label: &str) -> Option<f64> {
    let wanted = label.trim().to_lowercase();
    if let Some((x, _)) = label_map.iter().find(|(_, l)| l.trim().to_lowercase() == wanted) {
        return Some(*x);
    }
    let token = normalize_token(label);
    if token.is_empty() {
        return None;
    }
    label_map
        .iter()
        .find(|(_, l)| {
            let lt = normalize_token(l);
            !lt.is_empty() && (lt.contains(&token) || token.contains(&lt))
        })
        .map(|(x, _)| *x)
}

/// Readback tolerance: `max(relative·|target|, absolute)`.
pub fn refinement_tolerance(target: f64, relative: f64, absolute: f64) -> f64 {
    (relative * target.abs()).max(absolute)
}

/// Bisection over the normalized domain, driven by live readback.
///
/// The caller writes a value, reads the display back and reports it through
/// [`Bisection::observe`], which narrows the bracket and returns the next
/// value to try. Callers keep their own best observation.
#[derive(Debug, Clone)]
pub struct Bisection {
    lo: f64,
    hi: f64,
    target: f64,
    increasing: bool,
}

impl Bisection {
    pub fn new(domain_min: f64, domain_max: f64, target: f64, increasing: bool) -> Self {
        let (lo, hi) = if domain_min <= domain_max {
            (domain_min, domain_max)
        } else {
            (domain_max, domain_min)
        };
        Self {
            lo,
            hi,
            target,
            increasing,
        }
    }

    /// Record that writing `x` produced display `readback`; returns the next
    /// value to write.
    pub fn observe(&mut self, x: f64, readback: f64) -> f64 {
        let error = readback - self.target;
        // Overshoot on an increasing curve means the answer lies below x.
        let overshoot = error > 0.0;
        if overshoot == self.increasing {
            self.hi = x.clamp(self.lo, self.hi);
        } else {
            self.lo = x.clamp(self.lo, self.hi);
        }
        self.next()
    }

    /// Skip an observation (no readback); the bracket is unchanged.
    pub fn next(&self) -> f64 {
        (self.lo + self.hi) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn test_invert_linear() {
        let f = Fit::Linear { a: 3.0, b: 1.0, r2: 1.0 };
        assert!(approx(invert(&f, 2.5, 0.0, 1.0), 0.5, 1e-12));
        assert_eq!(invert(&f, 100.0, 0.0, 1.0), 1.0);
        assert_eq!(invert(&f, -100.0, 0.0, 1.0), 0.0);
    }

    #[test]
    fn test_invert_zero_slope_returns_domain_min() {
        let f = Fit::Linear { a: 0.0, b: 1.0, r2: 1.0 };
        assert_eq!(invert(&f, 1.0, 0.0, 1.0), 0.0);
        let l = Fit::Log { a: 0.0, b: 1.0, r2: 1.0 };
        assert_eq!(invert(&l, 1.0, 0.0, 1.0), 0.0);
    }

    #[test]
    fn test_invert_log_and_exp() {
        let l = Fit::Log { a: 20.0, b: 100.0, r2: 1.0 };
        let x = invert(&l, l.evaluate(0.3), 0.0, 1.0);
        assert!(approx(x, 0.3, 1e-9));

        let e = Fit::Exp { a: 0.1, b: 100f64.ln(), r2: 1.0 };
        let x = invert(&e, 2.0, 0.0, 1.0);
        assert!(approx(e.evaluate(x), 2.0, 1e-9));
        assert_eq!(invert(&e, -1.0, 0.0, 1.0), 0.0);
    }

    #[test]
    fn test_invert_piecewise_brackets_and_clamps() {
        let f = Fit::Piecewise {
            points: vec![(0.0, -60.0), (0.5, -12.0), (1.0, 6.0)],
            r2: 0.5,
        };
        assert!(approx(invert(&f, -36.0, 0.0, 1.0), 0.25, 1e-12));
        assert!(approx(invert(&f, 0.0, 0.0, 1.0), 0.5 + 0.5 * 12.0 / 18.0, 1e-12));
        assert_eq!(invert(&f, 20.0, 0.0, 1.0), 1.0);
        assert_eq!(invert(&f, -90.0, 0.0, 1.0), 0.0);

        let decreasing = Fit::Piecewise {
            points: vec![(0.0, 10.0), (1.0, 0.0)],
            r2: 0.0,
        };
        assert!(approx(invert(&decreasing, 2.5, 0.0, 1.0), 0.75, 1e-12));

        let empty = Fit::Piecewise { points: vec![], r2: 0.0 };
        assert_eq!(invert(&empty, 1.0, 0.0, 1.0), 0.0);
    }

    #[test]
    fn test_invert_linear_bounds() {
        assert!(approx(invert_linear_bounds(-60.0, 0.0, -30.0, 0.0, 1.0), 0.5, 1e-12));
        assert_eq!(invert_linear_bounds(5.0, 5.0, 3.0, 0.0, 1.0), 0.0);
    }

    #[test]
    fn test_invert_label() {
        let map = vec![
            (0.0, "Hall".to_string()),
            (0.5, "Large Room".to_string()),
            (1.0, "Plate".to_string()),
        ];
        assert_eq!(invert_label(&map, "plate"), Some(1.0));
        assert_eq!(invert_label(&map, "room"), Some(0.5));
        assert_eq!(invert_label(&map, "Spring"), None);
    }

    #[test]
    fn test_tolerance_has_absolute_floor() {
        assert!(approx(refinement_tolerance(100.0, 0.02, 0.02), 2.0, 1e-12));
        assert!(approx(refinement_tolerance(0.0, 0.02, 0.02), 0.02, 1e-12));
        assert!(approx(refinement_tolerance(-10.0, 0.02, 0.02), 0.2, 1e-12));
    }

    #[test]
    fn test_bisection_converges_on_quadratic_curve() {
        // Device curve y = 10·x², target 2.5 -> x = 0.5.
        let device = |x: f64| 10.0 * x * x;
        let target = 2.5;
        let tol = refinement_tolerance(target, 0.02, 0.02);
        let mut bisection = Bisection::new(0.0, 1.0, target, true);

        let mut x = 0.25;
        for _ in 0..DEFAULT_MAX_ITERATIONS {
            let readback = device(x);
            if (readback - target).abs() <= tol {
                break;
            }
            x = bisection.observe(x, readback);
        }
        assert!((device(x) - target).abs() <= tol);
    }

    #[test]
    fn test_bisection_on_decreasing_curve() {
        let mut bisection = Bisection::new(0.0, 1.0, 4.0, false);
        let next = bisection.observe(0.5, 5.0);
        // Display too high on a decreasing curve: the answer is above 0.5.
        assert!(next > 0.5);
        assert_eq!(next, 0.75);
        // Now too low: the answer lies between 0.5 and 0.75.
        assert_eq!(bisection.observe(next, 3.9), 0.625);
    }
}
