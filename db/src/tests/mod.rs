mod scenario_tests;

use std::any::Any;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use metrisch_types::errors::ObjectError;
use metrisch_types::object::{LocalObject, ObjectHeader};
use metrisch_types::vector::FloatVector;

use crate::operation::RankedAnswer;

pub fn vector(locator: &str, components: &[f32]) -> Arc<dyn LocalObject> {
    Arc::new(FloatVector::with_locator(locator, components.to_vec()))
}

/// ⟨locator, distance⟩ pairs of a ranked answer, for compact assertions.
pub fn answer_summary(answer: &RankedAnswer) -> Vec<(String, f32)> {
    answer
        .entries()
        .iter()
        .map(|entry| {
            (
                entry.object.locator().unwrap_or_default().to_owned(),
                entry.distance,
            )
        })
        .collect()
}

/// Float vector whose metric sleeps a bit per evaluation, slowing a scan
/// down enough for cancellation tests to interleave reliably.
#[derive(Debug)]
pub struct SlowVector {
    inner: FloatVector,
    delay: Duration,
}

impl SlowVector {
    pub fn new(locator: &str, components: &[f32], delay: Duration) -> Self {
        Self {
            inner: FloatVector::with_locator(locator, components.to_vec()),
            delay,
        }
    }
}

impl LocalObject for SlowVector {
    fn header(&self) -> &ObjectHeader {
        self.inner.header()
    }

    fn header_mut(&mut self) -> &mut ObjectHeader {
        self.inner.header_mut()
    }

    fn type_tag(&self) -> &'static str {
        "SlowVector"
    }

    fn metric_distance(
        &self,
        other: &dyn LocalObject,
        threshold: f32,
    ) -> Result<f32, ObjectError> {
        std::thread::sleep(self.delay);
        let other = other
            .downcast_ref::<SlowVector>()
            .ok_or(ObjectError::ClassMismatch {
                left: "SlowVector",
                right: "unknown",
            })?;
        self.inner.metric_distance(&other.inner, threshold)
    }

    fn data_equals(&self, other: &dyn LocalObject) -> bool {
        other
            .downcast_ref::<SlowVector>()
            .is_some_and(|other| self.inner.data_equals(&other.inner))
    }

    fn data_hash(&self) -> u64 {
        self.inner.data_hash()
    }

    fn write_data(&self, writer: &mut dyn Write) -> Result<(), ObjectError> {
        self.inner.write_data(writer)
    }

    fn clone_object(&self, clone_filters: bool) -> Result<Box<dyn LocalObject>, ObjectError> {
        let mut clone = SlowVector {
            inner: FloatVector::new(self.inner.data().to_vec()),
            delay: self.delay,
        };
        *clone.header_mut() = self.header().clone_for(clone_filters)?;
        Ok(Box::new(clone))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
