//! Minimum-similarity thresholds expressed as cosine-distance bounds.

use tracing::trace;

use crate::error::{Result, VectorError};

/// Relative slack applied when comparing a computed distance against a bound.
///
/// Distances are computed in `f64` from `f32` inputs, so a candidate that
/// sits exactly on the threshold can land slightly above it. The slack
/// scales with the bound, so a bound of zero stays exact.
pub const DISTANCE_TOLERANCE: f64 = 1e-5;

/// Upper bound on cosine distance; candidates at the bound are admitted.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DistanceBound(f64);

impl DistanceBound {
    /// The nominal bound, `1 - min_similarity`.
    pub fn max_distance(&self) -> f64 {
        self.0
    }

    /// The value a backend should compare against with `<=`.
    pub fn inclusive_limit(&self) -> f64 {
        self.0 * (1.0 + DISTANCE_TOLERANCE)
    }

    /// Whether `distance` falls within the bound.
    ///
    /// The cutoff tolerates rounding error proportional to the bound
    /// ([`DISTANCE_TOLERANCE`]). `min_similarity = 1.0` admits only
    /// candidates at distance exactly zero.
    pub fn admits(&self, distance: f64) -> bool {
        distance <= self.inclusive_limit()
    }
}

/// Translate a minimum cosine similarity into a distance bound.
///
/// `0.0` means "no threshold" and yields `None`. Values outside `[0, 1]`
/// (including NaN) are rejected.
pub fn to_distance_bound(min_similarity: f32) -> Result<Option<DistanceBound>> {
    if !(0.0..=1.0).contains(&min_similarity) {
        return Err(VectorError::InvalidSimilarity(min_similarity));
    }
    if min_similarity == 0.0 {
        return Ok(None);
    }
    let bound = 1.0 - f64::from(min_similarity);
    trace!(min_similarity, bound, "Translated similarity threshold");
    Ok(Some(DistanceBound(bound)))
}
