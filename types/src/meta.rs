//! Composite objects aggregating several named descriptors.

use std::any::Any;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::distance::{DistanceStats, UNKNOWN_DISTANCE, distance_with_threshold, is_known};
use crate::errors::ObjectError;
use crate::key::ObjectKey;
use crate::object::{LocalObject, ObjectHeader};

pub const META_OBJECT_TAG: &str = "MetaObject";
pub const AGGREGATE_META_OBJECT_TAG: &str = "AggregateMetaObject";
pub const PARAMETRIC_META_OBJECT_TAG: &str = "ParametricMetaObject";

/// Aggregation applied to the per-descriptor sub-distance array.
///
/// Entries holding the unknown-distance sentinel are skipped; an array with
/// no known entry aggregates to the sentinel itself.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum Aggregation {
    Sum,
    Max,
    Min,
    Avg,
}

impl Aggregation {
    pub fn evaluate(&self, distances: &[f32]) -> f32 {
        let mut known = distances.iter().copied().filter(|&d| is_known(d)).peekable();
        if known.peek().is_none() {
            return UNKNOWN_DISTANCE;
        }
        match self {
            Aggregation::Sum => known.sum(),
            Aggregation::Max => known.fold(f32::MIN, f32::max),
            Aggregation::Min => known.fold(f32::MAX, f32::min),
            Aggregation::Avg => {
                let (sum, count) = known.fold((0.0f32, 0u32), |(sum, count), d| {
                    (sum + d, count + 1)
                });
                sum / count as f32
            }
        }
    }
}

/// A local object holding a finite map from symbolic name to sub-object.
///
/// All sub-objects share the parent's key. The default metric is the
/// locator-hash-difference placeholder, meaningful only for locator-based
/// routing; ranking callers use [`AggregateMetaObject`].
#[derive(Debug)]
pub struct MetaObject {
    header: ObjectHeader,
    objects: BTreeMap<String, Arc<dyn LocalObject>>,
}

impl MetaObject {
    pub fn new(
        key: Option<ObjectKey>,
        objects: Vec<(String, Box<dyn LocalObject>)>,
    ) -> Self {
        let header = match key {
            Some(key) => ObjectHeader::with_key(key),
            None => ObjectHeader::new(),
        };
        let shared_key = header.key().cloned();
        let objects = objects
            .into_iter()
            .map(|(name, mut object)| {
                object.header_mut().set_key(shared_key.clone());
                (name, Arc::from(object))
            })
            .collect();
        Self { header, objects }
    }

    pub fn get_object(&self, name: &str) -> Option<&Arc<dyn LocalObject>> {
        self.objects.get(name)
    }

    pub fn object_names(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(String::as_str)
    }

    pub fn objects(&self) -> impl Iterator<Item = &Arc<dyn LocalObject>> {
        self.objects.values()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn contains_object(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    /// Per-descriptor distances against another composite, in this object's
    /// name order. A name missing on either side yields the sentinel.
    pub fn sub_distances(
        &self,
        other: &MetaObject,
        threshold: f32,
        stats: &mut DistanceStats,
    ) -> Result<Vec<f32>, ObjectError> {
        let mut distances = Vec::with_capacity(self.objects.len());
        for (name, mine) in &self.objects {
            match other.get_object(name) {
                Some(theirs) => distances.push(distance_with_threshold(
                    mine.as_ref(),
                    theirs.as_ref(),
                    threshold,
                    stats,
                )?),
                None => distances.push(UNKNOWN_DISTANCE),
            }
        }
        Ok(distances)
    }

    fn locator_hash(&self) -> u32 {
        let mut hasher = ahash::AHasher::default();
        self.header.locator().unwrap_or_default().hash(&mut hasher);
        hasher.finish() as u32
    }

    fn write_header_line(&self, writer: &mut dyn Write) -> Result<(), ObjectError> {
        write!(writer, "{}", self.header.locator().unwrap_or_default())?;
        for (name, object) in &self.objects {
            write!(writer, ";{name};{}", object.type_tag())?;
        }
        writeln!(writer)?;
        Ok(())
    }

    fn write_sub_objects(&self, writer: &mut dyn Write) -> Result<(), ObjectError> {
        for object in self.objects.values() {
            object.write_data(writer)?;
        }
        Ok(())
    }

    fn clone_parts(
        &self,
        clone_filters: bool,
    ) -> Result<(ObjectHeader, BTreeMap<String, Arc<dyn LocalObject>>), ObjectError> {
        let header = self.header.clone_for(clone_filters)?;
        let objects = self
            .objects
            .iter()
            .map(|(name, object)| {
                object
                    .clone_object(clone_filters)
                    .map(|clone| (name.clone(), Arc::from(clone)))
            })
            .collect::<Result<BTreeMap<_, _>, ObjectError>>()?;
        Ok((header, objects))
    }

    fn composite_data_equals(&self, other: &MetaObject) -> bool {
        self.objects.len() == other.objects.len()
            && self.objects.iter().all(|(name, mine)| {
                other
                    .get_object(name)
                    .is_some_and(|theirs| mine.data_equals(theirs.as_ref()))
            })
    }

    fn composite_data_hash(&self) -> u64 {
        let mut hasher = ahash::AHasher::default();
        for (name, object) in &self.objects {
            name.hash(&mut hasher);
            object.data_hash().hash(&mut hasher);
        }
        hasher.finish()
    }
}

impl LocalObject for MetaObject {
    fn header(&self) -> &ObjectHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut ObjectHeader {
        &mut self.header
    }

    fn type_tag(&self) -> &'static str {
        META_OBJECT_TAG
    }

    /// Placeholder distance: the absolute difference of locator hashes.
    /// Not a metric; kept for locator-based retrieval only.
    fn metric_distance(
        &self,
        other: &dyn LocalObject,
        _threshold: f32,
    ) -> Result<f32, ObjectError> {
        let Some(other) = other.downcast_ref::<MetaObject>() else {
            return Err(ObjectError::ClassMismatch {
                left: META_OBJECT_TAG,
                right: other.type_tag(),
            });
        };
        let difference = i64::from(self.locator_hash()) - i64::from(other.locator_hash());
        Ok(difference.unsigned_abs() as f32)
    }

    fn data_equals(&self, other: &dyn LocalObject) -> bool {
        other
            .downcast_ref::<MetaObject>()
            .is_some_and(|other| self.composite_data_equals(other))
    }

    fn data_hash(&self) -> u64 {
        self.composite_data_hash()
    }

    fn write_data(&self, writer: &mut dyn Write) -> Result<(), ObjectError> {
        self.write_header_line(writer)?;
        self.write_sub_objects(writer)
    }

    fn clone_object(&self, clone_filters: bool) -> Result<Box<dyn LocalObject>, ObjectError> {
        let (header, objects) = self.clone_parts(clone_filters)?;
        Ok(Box::new(MetaObject { header, objects }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Meta object whose distance aggregates the per-descriptor distances.
#[derive(Debug)]
pub struct AggregateMetaObject {
    meta: MetaObject,
    aggregation: Aggregation,
}

impl AggregateMetaObject {
    pub fn new(meta: MetaObject, aggregation: Aggregation) -> Self {
        Self { meta, aggregation }
    }

    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    pub fn meta(&self) -> &MetaObject {
        &self.meta
    }
}

impl LocalObject for AggregateMetaObject {
    fn header(&self) -> &ObjectHeader {
        self.meta.header()
    }

    fn header_mut(&mut self) -> &mut ObjectHeader {
        self.meta.header_mut()
    }

    fn type_tag(&self) -> &'static str {
        AGGREGATE_META_OBJECT_TAG
    }

    fn metric_distance(
        &self,
        other: &dyn LocalObject,
        threshold: f32,
    ) -> Result<f32, ObjectError> {
        let Some(other) = other.downcast_ref::<AggregateMetaObject>() else {
            return Err(ObjectError::ClassMismatch {
                left: AGGREGATE_META_OBJECT_TAG,
                right: other.type_tag(),
            });
        };
        // Sub-distance statistics stay local to the composite evaluation;
        // the outer wrapper already counts this call as one computation.
        let mut stats = DistanceStats::default();
        let distances = self
            .meta
            .sub_distances(&other.meta, threshold, &mut stats)?;
        Ok(self.aggregation.evaluate(&distances))
    }

    fn data_equals(&self, other: &dyn LocalObject) -> bool {
        other
            .downcast_ref::<AggregateMetaObject>()
            .is_some_and(|other| {
                self.aggregation == other.aggregation
                    && self.meta.composite_data_equals(&other.meta)
            })
    }

    fn data_hash(&self) -> u64 {
        self.meta.composite_data_hash()
    }

    fn write_data(&self, writer: &mut dyn Write) -> Result<(), ObjectError> {
        writeln!(writer, "{}", self.aggregation)?;
        self.meta.write_data(writer)
    }

    fn clone_object(&self, clone_filters: bool) -> Result<Box<dyn LocalObject>, ObjectError> {
        let (header, objects) = self.meta.clone_parts(clone_filters)?;
        Ok(Box::new(AggregateMetaObject {
            meta: MetaObject { header, objects },
            aggregation: self.aggregation,
        }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Meta object carrying an additional string-keyed parameter map.
#[derive(Debug)]
pub struct ParametricMetaObject {
    meta: MetaObject,
    parameters: BTreeMap<String, serde_json::Value>,
}

impl ParametricMetaObject {
    pub fn new(meta: MetaObject, parameters: BTreeMap<String, serde_json::Value>) -> Self {
        Self { meta, parameters }
    }

    pub fn parameter(&self, name: &str) -> Option<&serde_json::Value> {
        self.parameters.get(name)
    }

    pub fn parameters(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.parameters
    }

    pub fn meta(&self) -> &MetaObject {
        &self.meta
    }
}

impl LocalObject for ParametricMetaObject {
    fn header(&self) -> &ObjectHeader {
        self.meta.header()
    }

    fn header_mut(&mut self) -> &mut ObjectHeader {
        self.meta.header_mut()
    }

    fn type_tag(&self) -> &'static str {
        PARAMETRIC_META_OBJECT_TAG
    }

    fn metric_distance(
        &self,
        other: &dyn LocalObject,
        threshold: f32,
    ) -> Result<f32, ObjectError> {
        let Some(other) = other.downcast_ref::<ParametricMetaObject>() else {
            return Err(ObjectError::ClassMismatch {
                left: PARAMETRIC_META_OBJECT_TAG,
                right: other.type_tag(),
            });
        };
        self.meta.metric_distance(&other.meta, threshold)
    }

    fn data_equals(&self, other: &dyn LocalObject) -> bool {
        other
            .downcast_ref::<ParametricMetaObject>()
            .is_some_and(|other| {
                self.parameters == other.parameters
                    && self.meta.composite_data_equals(&other.meta)
            })
    }

    fn data_hash(&self) -> u64 {
        self.meta.composite_data_hash()
    }

    fn write_data(&self, writer: &mut dyn Write) -> Result<(), ObjectError> {
        let parameters = serde_json::to_string(&self.parameters)
            .map_err(|e| ObjectError::InvalidArgument(e.to_string()))?;
        writeln!(writer, "{parameters}")?;
        self.meta.write_data(writer)
    }

    fn clone_object(&self, clone_filters: bool) -> Result<Box<dyn LocalObject>, ObjectError> {
        let (header, objects) = self.meta.clone_parts(clone_filters)?;
        Ok(Box::new(ParametricMetaObject {
            meta: MetaObject { header, objects },
            parameters: self.parameters.clone(),
        }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::{MAX_DISTANCE, distance};
    use crate::vector::FloatVector;
    use pretty_assertions::assert_eq;

    fn composite(
        locator: &str,
        descriptors: &[(&str, &[f32])],
        aggregation: Aggregation,
    ) -> AggregateMetaObject {
        let objects = descriptors
            .iter()
            .map(|(name, components)| {
                (
                    (*name).to_owned(),
                    Box::new(FloatVector::new(components.to_vec())) as Box<dyn LocalObject>,
                )
            })
            .collect();
        AggregateMetaObject::new(
            MetaObject::new(Some(ObjectKey::basic(locator)), objects),
            aggregation,
        )
    }

    #[test]
    fn sub_objects_share_the_parent_key() {
        let object = composite("m/1", &[("color", &[0.0]), ("shape", &[1.0])], Aggregation::Sum);
        for sub in object.meta().objects() {
            assert_eq!(sub.header().locator(), Some("m/1"));
        }
        assert_eq!(object.meta().object_count(), 2);
        assert!(object.meta().contains_object("color"));
        assert!(!object.meta().contains_object("texture"));
    }

    #[test]
    fn sum_aggregation_adds_sub_distances() {
        let a = composite(
            "A",
            &[("color", &[0.0, 0.0]), ("shape", &[3.0, 0.0])],
            Aggregation::Sum,
        );
        let b = composite(
            "B",
            &[("color", &[1.0, 0.0]), ("shape", &[0.0, 4.0])],
            Aggregation::Sum,
        );
        let mut stats = DistanceStats::default();
        assert_eq!(distance(&a, &b, &mut stats).unwrap(), 6.0);
    }

    #[test]
    fn aggregation_functions_evaluate_known_entries() {
        let distances = [1.0, 5.0, UNKNOWN_DISTANCE, 2.0];
        assert_eq!(Aggregation::Sum.evaluate(&distances), 8.0);
        assert_eq!(Aggregation::Max.evaluate(&distances), 5.0);
        assert_eq!(Aggregation::Min.evaluate(&distances), 1.0);
        assert_eq!(Aggregation::Avg.evaluate(&distances), 8.0 / 3.0);
        assert_eq!(
            Aggregation::Sum.evaluate(&[UNKNOWN_DISTANCE]),
            UNKNOWN_DISTANCE
        );
    }

    #[test]
    fn missing_descriptors_yield_the_sentinel() {
        let a = composite("A", &[("color", &[0.0]), ("shape", &[1.0])], Aggregation::Sum);
        let b = composite("B", &[("color", &[2.0])], Aggregation::Sum);
        let mut stats = DistanceStats::default();
        let distances = a
            .meta()
            .sub_distances(b.meta(), MAX_DISTANCE, &mut stats)
            .unwrap();
        assert_eq!(distances, vec![2.0, UNKNOWN_DISTANCE]);
    }

    #[test]
    fn placeholder_distance_is_zero_between_equal_locators() {
        let objects = |loc: &str| MetaObject::new(Some(ObjectKey::basic(loc)), Vec::new());
        let a = objects("same");
        let b = objects("same");
        let mut stats = DistanceStats::default();
        assert_eq!(distance(&a, &b, &mut stats).unwrap(), 0.0);
    }

    #[test]
    fn parametric_clone_carries_parameters() {
        let meta = MetaObject::new(Some(ObjectKey::basic("p/1")), Vec::new());
        let parameters =
            BTreeMap::from([("weight".to_owned(), serde_json::json!(0.75))]);
        let object = ParametricMetaObject::new(meta, parameters);
        let clone = object.clone_object(false).unwrap();
        let clone = clone.downcast_ref::<ParametricMetaObject>().unwrap();
        assert_eq!(clone.parameter("weight"), Some(&serde_json::json!(0.75)));
        assert!(clone.data_equals(&object));
    }
}
