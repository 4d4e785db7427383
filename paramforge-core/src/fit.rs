//! Curve fitting between normalized values and numeric display values.
//!
//! Three closed-form families cover most host curves: linear controls,
//! log-perceptual controls (frequency, time) and exponential controls
//! (feedback, resonance). Anything else falls back to a piecewise table.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Default minimum R² for accepting a closed-form model.
pub const DEFAULT_ACCEPT_R2: f64 = 0.9;

/// Lower clamp for x before taking ln(x).
pub const LOG_X_EPSILON: f64 = 1e-6;

/// A later candidate must beat the current best by more than this to win,
/// so exact ties keep the simpler model (linear < log < exp).
const TIE_MARGIN: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Fit {
    /// display = a·x + b
    Linear { a: f64, b: f64, r2: f64 },
    /// display = a·ln(x) + b
    Log { a: f64, b: f64, r2: f64 },
    /// display = a·e^(b·x)
    Exp { a: f64, b: f64, r2: f64 },
    /// Linear interpolation over points sorted strictly by x.
    /// `r2` is the best closed-form score seen, kept for diagnostics only.
    Piecewise { points: Vec<(f64, f64)>, r2: f64 },
}

impl Fit {
    pub fn kind(&self) -> &'static str {
        match self {
            Fit::Linear { .. } => "linear",
            Fit::Log { .. } => "log",
            Fit::Exp { .. } => "exp",
            Fit::Piecewise { .. } => "piecewise",
        }
    }

    pub fn r2(&self) -> f64 {
        match self {
            Fit::Linear { r2, .. }
            | Fit::Log { r2, .. }
            | Fit::Exp { r2, .. }
            | Fit::Piecewise { r2, .. } => *r2,
        }
    }

    pub fn is_closed_form(&self) -> bool {
        !matches!(self, Fit::Piecewise { .. })
    }

    /// Forward-evaluate the display value at normalized `x`.
    ///
    /// Piecewise fits clamp to the end points outside the sampled range and
    /// return NaN when they hold no points at all.
    pub fn evaluate(&self, x: f64) -> f64 {
        match self {
            Fit::Linear { a, b, .. } => a * x + b,
            Fit::Log { a, b, .. } => a * x.max(LOG_X_EPSILON).ln() + b,
            Fit::Exp { a, b, .. } => a * (b * x).exp(),
            Fit::Piecewise { points, .. } => interpolate(points, x),
        }
    }

    /// Whether display grows with the normalized value.
    pub fn is_increasing(&self) -> bool {
        match self {
            Fit::Linear { a, .. } | Fit::Log { a, .. } => *a >= 0.0,
            Fit::Exp { a, b, .. } => a * b >= 0.0,
            Fit::Piecewise { points, .. } => match (points.first(), points.last()) {
                (Some(first), Some(last)) => last.1 >= first.1,
                _ => true,
            },
        }
    }
}

fn interpolate(points: &[(f64, f64)], x: f64) -> f64 {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return f64::NAN;
    };
    if x <= first.0 {
        return first.1;
    }
    if x >= last.0 {
        return last.1;
    }
    for pair in points.windows(2) {
        let (x1, y1) = pair[0];
        let (x2, y2) = pair[1];
        if x >= x1 && x <= x2 {
            let span = x2 - x1;
            if span <= 0.0 {
                return y1;
            }
            return y1 + (x - x1) / span * (y2 - y1);
        }
    }
    last.1
}

/// Sort by x and drop repeated x values, keeping the first occurrence.
pub fn sorted_unique(points: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
    sorted.dedup_by(|next, prev| next.0 == prev.0);
    sorted
}

/// Ordinary least squares `y = slope·x + intercept`.
fn ols(xs: &[f64], ys: &[f64]) -> Option<(f64, f64)> {
    let mean_x = xs.iter().mean();
    let mean_y = ys.iter().mean();
    let sxx: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();
    if sxx <= f64::EPSILON {
        return None;
    }
    let sxy: f64 = xs.iter().zip(ys).map(|(x, y)| (x - mean_x) * (y - mean_y)).sum();
    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    (slope.is_finite() && intercept.is_finite()).then_some((slope, intercept))
}

/// R² of `predicted` against the original `ys`.
fn r_squared(ys: &[f64], predicted: &[f64]) -> f64 {
    let mean_y = ys.iter().mean();
    let ss_tot: f64 = ys.iter().map(|y| (y - mean_y).powi(2)).sum();
    let ss_res: f64 = ys.iter().zip(predicted).map(|(y, p)| (y - p).powi(2)).sum();
    if !ss_res.is_finite() {
        return f64::NEG_INFINITY;
    }
    if ss_tot <= f64::EPSILON {
        return if ss_res <= f64::EPSILON { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

fn linear_candidate(xs: &[f64], ys: &[f64]) -> Option<Fit> {
    let (a, b) = ols(xs, ys)?;
    let predicted: Vec<f64> = xs.iter().map(|x| a * x + b).collect();
    Some(Fit::Linear {
        a,
        b,
        r2: r_squared(ys, &predicted),
    })
}

fn log_candidate(xs: &[f64], ys: &[f64]) -> Option<Fit> {
    let lx: Vec<f64> = xs.iter().map(|x| x.max(LOG_X_EPSILON).ln()).collect();
    let (a, b) = ols(&lx, ys)?;
    let predicted: Vec<f64> = lx.iter().map(|l| a * l + b).collect();
    Some(Fit::Log {
        a,
        b,
        r2: r_squared(ys, &predicted),
    })
}

fn exp_candidate(xs: &[f64], ys: &[f64]) -> Option<Fit> {
    if ys.iter().any(|y| *y <= 0.0) {
        return None;
    }
    let ly: Vec<f64> = ys.iter().map(|y| y.ln()).collect();
    let (b, ln_a) = ols(xs, &ly)?;
    let a = ln_a.exp();
    if !a.is_finite() {
        return None;
    }
    let predicted: Vec<f64> = xs.iter().map(|x| a * (b * x).exp()).collect();
    Some(Fit::Exp {
        a,
        b,
        r2: r_squared(ys, &predicted),
    })
}

/// Fit with the default acceptance threshold.
pub fn fit(points: &[(f64, f64)]) -> Fit {
    fit_with_threshold(points, DEFAULT_ACCEPT_R2)
}

/// Pick the best of linear, log and exp by R².
///
/// Never fails: fewer than 3 usable points, or no candidate reaching
/// `accept_r2`, yields a piecewise table over the sorted, deduplicated points.
pub fn fit_with_threshold(points: &[(f64, f64)], accept_r2: f64) -> Fit {
    let clean: Vec<(f64, f64)> = points
        .iter()
        .copied()
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .collect();

    if clean.len() < 3 {
        return Fit::Piecewise {
            points: sorted_unique(&clean),
            r2: 0.0,
        };
    }

    let xs: Vec<f64> = clean.iter().map(|p| p.0).collect();
    let ys: Vec<f64> = clean.iter().map(|p| p.1).collect();

    let candidates = [
        linear_candidate(&xs, &ys),
        log_candidate(&xs, &ys),
        exp_candidate(&xs, &ys),
    ];

    let mut best: Option<Fit> = None;
    for candidate in candidates.into_iter().flatten() {
        if !candidate.r2().is_finite() {
            continue;
        }
        match &best {
            Some(current) if candidate.r2() <= current.r2() + TIE_MARGIN => {}
            _ => best = Some(candidate),
        }
    }

    match best {
        Some(model) if model.r2() >= accept_r2 => model,
        other => Fit::Piecewise {
            points: sorted_unique(&clean),
            r2: other.map(|m| m.r2()).unwrap_or(0.0),
        },
    }
}
