//! Distance constants and the statistics-maintaining evaluation wrappers.
//!
//! User metrics implement [`LocalObject::metric_distance`] only; every
//! evaluation goes through the wrappers here so that precomputed-distance
//! filters are consulted first and the counters stay accurate without any
//! cooperation from the metric itself.
//!
//! [`LocalObject::metric_distance`]: crate::object::LocalObject::metric_distance

use serde::{Deserialize, Serialize};

use crate::errors::ObjectError;
use crate::filter::FilterKind;
use crate::object::LocalObject;

/// Sentinel for a distance that has not been computed.
pub const UNKNOWN_DISTANCE: f32 = f32::NEG_INFINITY;

/// Plays the role of "no threshold" in threshold-relaxed evaluation.
pub const MAX_DISTANCE: f32 = f32::MAX;

/// Smallest possible distance, the default lower bound.
pub const MIN_DISTANCE: f32 = 0.0;

/// Returns false for the [`UNKNOWN_DISTANCE`] sentinel.
pub fn is_known(distance: f32) -> bool {
    distance != UNKNOWN_DISTANCE
}

/// Distance-evaluation counters scoped to one operation.
///
/// Merged explicitly across thread boundaries at join points rather than
/// accumulated through thread-locals.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistanceStats {
    pub computations: u64,
    pub lower_bounds: u64,
    pub upper_bounds: u64,
    pub savings: u64,
}

impl DistanceStats {
    pub fn merge(&mut self, other: &DistanceStats) {
        self.computations += other.computations;
        self.lower_bounds += other.lower_bounds;
        self.upper_bounds += other.upper_bounds;
        self.savings += other.savings;
    }

    /// Objects touched by evaluation, whether computed or filtered out.
    pub fn accessed_objects(&self) -> u64 {
        self.computations + self.savings
    }
}

/// Full distance between two objects, without a threshold.
pub fn distance(
    a: &dyn LocalObject,
    b: &dyn LocalObject,
    stats: &mut DistanceStats,
) -> Result<f32, ObjectError> {
    distance_with_threshold(a, b, MAX_DISTANCE, stats)
}

/// Threshold-relaxed distance.
///
/// Returns the true distance when it is at most `threshold`, otherwise any
/// value above it. A direct precomputed lookup on `a`'s filter chain answers
/// without invoking the metric at all.
#[tracing::instrument(skip_all)]
pub fn distance_with_threshold(
    a: &dyn LocalObject,
    b: &dyn LocalObject,
    threshold: f32,
    stats: &mut DistanceStats,
) -> Result<f32, ObjectError> {
    if let Some(precomputed) = a.header().filters().precomputed_to(b.header().id()) {
        stats.savings += 1;
        return Ok(precomputed);
    }
    stats.computations += 1;
    a.metric_distance(b, threshold)
}

/// As [`distance_with_threshold`], but the computed value is recorded into
/// the filter of the given kind on `a`, creating the filter when absent.
#[tracing::instrument(skip_all)]
pub fn distance_store_precomputed(
    a: &mut dyn LocalObject,
    b: &dyn LocalObject,
    kind: FilterKind,
    threshold: f32,
    stats: &mut DistanceStats,
) -> Result<f32, ObjectError> {
    let computed = distance_with_threshold(a, b, threshold, stats)?;
    a.header_mut()
        .filters_mut()
        .ensure(kind)
        .record(b.header().id(), computed);
    Ok(computed)
}

/// Lower bound on the distance; `accuracy` is an opaque precision selector.
pub fn distance_lower_bound(
    a: &dyn LocalObject,
    b: &dyn LocalObject,
    accuracy: i32,
    stats: &mut DistanceStats,
) -> f32 {
    stats.lower_bounds += 1;
    a.distance_lower_bound(b, accuracy)
}

/// Upper bound on the distance; `accuracy` is an opaque precision selector.
pub fn distance_upper_bound(
    a: &dyn LocalObject,
    b: &dyn LocalObject,
    accuracy: i32,
    stats: &mut DistanceStats,
) -> f32 {
    stats.upper_bounds += 1;
    a.distance_upper_bound(b, accuracy)
}

/// Distance scaled into `[0, 1]` by the type's maximal distance.
pub fn normalized_distance(
    a: &dyn LocalObject,
    b: &dyn LocalObject,
    threshold: f32,
    stats: &mut DistanceStats,
) -> Result<f32, ObjectError> {
    let max = a.max_distance();
    // The MAX_DISTANCE sentinel means the type advertises no maximum.
    if !max.is_finite() || max >= MAX_DISTANCE || max <= 0.0 {
        return Err(ObjectError::InvalidOperation(
            "object type advertises no finite maximal distance",
        ));
    }
    let scaled_threshold = if threshold >= MAX_DISTANCE {
        MAX_DISTANCE
    } else {
        threshold * max
    };
    Ok(distance_with_threshold(a, b, scaled_threshold, stats)? / max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterKind;
    use crate::vector::FloatVector;
    use pretty_assertions::assert_eq;

    #[test]
    fn stored_distances_are_reused_as_savings() {
        let mut stats = DistanceStats::default();
        let mut query = FloatVector::new(vec![0.0, 0.0]);
        let pivot = FloatVector::new(vec![3.0, 4.0]);

        let computed = distance_store_precomputed(
            &mut query,
            &pivot,
            FilterKind::PivotMap,
            MAX_DISTANCE,
            &mut stats,
        )
        .unwrap();
        assert_eq!(computed, 7.0);
        assert_eq!(stats.computations, 1);

        // The second evaluation answers from the pivot-map filter.
        let looked_up = distance(&query, &pivot, &mut stats).unwrap();
        assert_eq!(looked_up, 7.0);
        assert_eq!(stats.computations, 1);
        assert_eq!(stats.savings, 1);
        assert_eq!(stats.accessed_objects(), 2);
    }

    #[test]
    fn bound_wrappers_count_their_calls() {
        let mut stats = DistanceStats::default();
        let a = FloatVector::new(vec![0.0]);
        let b = FloatVector::new(vec![1.0]);
        assert_eq!(distance_lower_bound(&a, &b, 0, &mut stats), MIN_DISTANCE);
        assert_eq!(distance_upper_bound(&a, &b, 0, &mut stats), MAX_DISTANCE);
        assert_eq!(stats.lower_bounds, 1);
        assert_eq!(stats.upper_bounds, 1);
    }

    #[test]
    fn normalization_requires_a_finite_maximum() {
        let mut stats = DistanceStats::default();
        let a = FloatVector::new(vec![0.0]);
        let b = FloatVector::new(vec![1.0]);
        assert!(matches!(
            normalized_distance(&a, &b, 0.5, &mut stats),
            Err(ObjectError::InvalidOperation(_))
        ));
    }
}
