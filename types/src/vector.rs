//! Dense float-vector descriptor under the city-block metric.

use std::any::Any;
use std::hash::{Hash, Hasher};
use std::io::Write;

use crate::errors::ObjectError;
use crate::object::{LocalObject, ObjectHeader};

pub const FLOAT_VECTOR_TAG: &str = "FloatVector";

/// A vector of `f32` components compared by the L1 (city-block) distance.
///
/// Text form is a single line `v <dim> <x0> <x1> …`.
#[derive(Debug, Default)]
pub struct FloatVector {
    header: ObjectHeader,
    data: Vec<f32>,
}

impl FloatVector {
    pub fn new(data: Vec<f32>) -> Self {
        Self {
            header: ObjectHeader::new(),
            data,
        }
    }

    pub fn with_locator(locator: impl Into<String>, data: Vec<f32>) -> Self {
        Self {
            header: ObjectHeader::with_key(crate::key::ObjectKey::basic(locator)),
            data,
        }
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn dimension(&self) -> usize {
        self.data.len()
    }

    /// City-block distance with threshold short-circuiting: once the partial
    /// sum exceeds the threshold the remaining components cannot bring it
    /// back down, so the partial sum itself is a valid relaxed answer.
    fn city_block(&self, other: &FloatVector, threshold: f32) -> f32 {
        let mut sum = 0.0f32;
        for (&a, &b) in self.data.iter().zip(&other.data) {
            sum += (a - b).abs();
            if sum > threshold {
                return sum;
            }
        }
        sum
    }

    /// Parses the `v <dim> <components…>` data line.
    pub fn parse_data_line(line: &str) -> Result<FloatVector, ObjectError> {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("v") => {}
            other => {
                return Err(ObjectError::InvalidArgument(format!(
                    "expected vector data line, found {other:?}"
                )));
            }
        }
        let dimension: usize = tokens
            .next()
            .ok_or_else(|| ObjectError::InvalidArgument("missing vector dimension".to_owned()))?
            .parse()
            .map_err(|_| ObjectError::InvalidArgument("bad vector dimension".to_owned()))?;
        let data = tokens
            .map(|token| {
                token.parse::<f32>().map_err(|_| {
                    ObjectError::InvalidArgument(format!("bad vector component {token:?}"))
                })
            })
            .collect::<Result<Vec<f32>, ObjectError>>()?;
        if data.len() != dimension {
            return Err(ObjectError::InvalidArgument(format!(
                "vector declares {dimension} components but carries {}",
                data.len()
            )));
        }
        Ok(FloatVector::new(data))
    }
}

impl LocalObject for FloatVector {
    fn header(&self) -> &ObjectHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut ObjectHeader {
        &mut self.header
    }

    fn type_tag(&self) -> &'static str {
        FLOAT_VECTOR_TAG
    }

    fn metric_distance(
        &self,
        other: &dyn LocalObject,
        threshold: f32,
    ) -> Result<f32, ObjectError> {
        let Some(other) = other.downcast_ref::<FloatVector>() else {
            return Err(ObjectError::ClassMismatch {
                left: FLOAT_VECTOR_TAG,
                right: other.type_tag(),
            });
        };
        if self.dimension() != other.dimension() {
            return Err(ObjectError::InvalidArgument(format!(
                "vector dimensions differ: {} vs {}",
                self.dimension(),
                other.dimension()
            )));
        }
        Ok(self.city_block(other, threshold))
    }

    fn data_equals(&self, other: &dyn LocalObject) -> bool {
        other
            .downcast_ref::<FloatVector>()
            .is_some_and(|other| self.data == other.data)
    }

    fn data_hash(&self) -> u64 {
        let mut hasher = ahash::AHasher::default();
        for component in &self.data {
            component.to_bits().hash(&mut hasher);
        }
        hasher.finish()
    }

    fn write_data(&self, writer: &mut dyn Write) -> Result<(), ObjectError> {
        write!(writer, "v {}", self.dimension())?;
        for component in &self.data {
            write!(writer, " {component}")?;
        }
        writeln!(writer)?;
        Ok(())
    }

    fn clone_object(&self, clone_filters: bool) -> Result<Box<dyn LocalObject>, ObjectError> {
        Ok(Box::new(FloatVector {
            header: self.header.clone_for(clone_filters)?,
            data: self.data.clone(),
        }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::{DistanceStats, MAX_DISTANCE, distance, distance_with_threshold};
    use pretty_assertions::assert_eq;

    #[test]
    fn distance_to_self_is_zero() {
        let vector = FloatVector::new(vec![0.5, -1.0, 2.0]);
        let mut stats = DistanceStats::default();
        assert_eq!(distance(&vector, &vector, &mut stats).unwrap(), 0.0);
        assert_eq!(stats.computations, 1);
    }

    #[test]
    fn city_block_matches_the_expected_sum() {
        let a = FloatVector::new(vec![0.0, 0.0]);
        let b = FloatVector::new(vec![3.0, 4.0]);
        let mut stats = DistanceStats::default();
        assert_eq!(distance(&a, &b, &mut stats).unwrap(), 7.0);
    }

    #[test]
    fn threshold_relaxation_keeps_the_contract() {
        let a = FloatVector::new(vec![0.0; 64]);
        let b = FloatVector::new(vec![1.0; 64]);
        let mut stats = DistanceStats::default();

        let exact = distance_with_threshold(&a, &b, MAX_DISTANCE, &mut stats).unwrap();
        assert_eq!(exact, 64.0);

        // Below the true distance the value only has to stay above the
        // threshold; at or above it the exact distance must come back.
        let relaxed = distance_with_threshold(&a, &b, 10.0, &mut stats).unwrap();
        assert!(relaxed > 10.0);
        let tight = distance_with_threshold(&a, &b, 64.0, &mut stats).unwrap();
        assert_eq!(tight, 64.0);
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let a = FloatVector::new(vec![1.0]);
        let b = FloatVector::new(vec![1.0, 2.0]);
        let mut stats = DistanceStats::default();
        assert!(distance(&a, &b, &mut stats).is_err());
    }

    #[test]
    fn data_line_round_trip() {
        let vector = FloatVector::new(vec![1.0, 2.5, -3.0]);
        let mut buffer = Vec::new();
        vector.write_data(&mut buffer).unwrap();
        let line = String::from_utf8(buffer).unwrap();
        assert_eq!(line, "v 3 1 2.5 -3\n");

        let parsed = FloatVector::parse_data_line(line.trim_end()).unwrap();
        assert!(parsed.data_equals(&vector));
    }

    #[test]
    fn declared_dimension_must_match() {
        assert!(FloatVector::parse_data_line("v 3 1.0 2.0").is_err());
        assert!(FloatVector::parse_data_line("w 1 1.0").is_err());
    }

    #[test]
    fn clone_is_independent() {
        let original = FloatVector::with_locator("u/5", vec![1.0, 2.0]);
        let clone = original.clone_object(true).unwrap();
        assert!(clone.data_equals(&original));
        assert_ne!(clone.header().id(), original.header().id());
        assert_eq!(clone.header().locator(), Some("u/5"));
    }
}
