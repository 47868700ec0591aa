//! Score bounds shared by every scorer
//!
//! All 0-100 sub-scores and the composite recovery score pass through these
//! helpers so the "integer in [0, 100]" guarantee lives in one place.

/// Lower bound of every score
pub const SCORE_MIN: f64 = 0.0;

/// Upper bound of every score
pub const SCORE_MAX: f64 = 100.0;

/// Clamp `x` into `[lo, hi]`; NaN collapses to `lo`
pub fn clamp(lo: f64, hi: f64, x: f64) -> f64 {
    if x.is_nan() {
        return lo;
    }
    x.max(lo).min(hi)
}

/// Clamp into the 0-100 score range without rounding
pub fn clamp_score(x: f64) -> f64 {
    clamp(SCORE_MIN, SCORE_MAX, x)
}

/// Round and clamp into an integer 0-100 score
pub fn to_score(x: f64) -> u8 {
    clamp_score(x).round() as u8
}
