//! Object iterators, multi-provider chaining and matcher partitioning.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;

use ahash::AHashSet;
use metrisch_types::id::UniqueId;
use metrisch_types::object::LocalObject;
use thiserror::Error;

/// Checked rejections a backing store may raise when an iterator deletes
/// through it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreReject {
    #[error("removal would drop the store below its minimal occupation")]
    OccupationLow,
    #[error("the storage filter rejected the removal")]
    FilterReject,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IterError {
    #[error("iterator has no current object")]
    NoCurrent,
    #[error("iterator does not support removal")]
    RemovalUnsupported,
    #[error(transparent)]
    Rejected(#[from] StoreReject),
}

/// Iterator over abstract objects with search-by finders.
///
/// Finders consume the iterator until a match or the end; the matched
/// object stays current, so a following [`remove_current`] deletes it.
///
/// [`remove_current`]: ObjectIterator::remove_current
pub trait ObjectIterator {
    fn next_object(&mut self) -> Option<Arc<dyn LocalObject>>;

    fn current(&self) -> Option<&Arc<dyn LocalObject>>;

    fn has_next(&mut self) -> bool;

    /// Deletes the current object from the backing store, when there is one
    /// and the store permits it.
    fn remove_current(&mut self) -> Result<(), IterError> {
        Err(IterError::RemovalUnsupported)
    }

    fn by_id(&mut self, id: UniqueId) -> Option<Arc<dyn LocalObject>> {
        while let Some(object) = self.next_object() {
            if object.header().id() == id {
                return Some(object);
            }
        }
        None
    }

    fn by_data(&mut self, sample: &dyn LocalObject) -> Option<Arc<dyn LocalObject>> {
        while let Some(object) = self.next_object() {
            if object.data_equals(sample) {
                return Some(object);
            }
        }
        None
    }

    fn by_locator(&mut self, locator: &str) -> Option<Arc<dyn LocalObject>> {
        while let Some(object) = self.next_object() {
            if object.header().locator() == Some(locator) {
                return Some(object);
            }
        }
        None
    }

    /// First object whose locator is in the set; on `remove_found` the
    /// matched locator is taken out of the set.
    fn by_any_locator(
        &mut self,
        locators: &mut AHashSet<String>,
        remove_found: bool,
    ) -> Option<Arc<dyn LocalObject>> {
        while let Some(object) = self.next_object() {
            let Some(locator) = object.header().locator() else {
                continue;
            };
            if locators.contains(locator) {
                if remove_found {
                    locators.remove(locator);
                }
                return Some(object);
            }
        }
        None
    }
}

/// Iterator over a snapshot of shared objects.
#[derive(Debug, Default)]
pub struct VecObjectIterator {
    objects: VecDeque<Arc<dyn LocalObject>>,
    current: Option<Arc<dyn LocalObject>>,
}

impl VecObjectIterator {
    pub fn new(objects: Vec<Arc<dyn LocalObject>>) -> Self {
        Self {
            objects: objects.into(),
            current: None,
        }
    }
}

impl ObjectIterator for VecObjectIterator {
    fn next_object(&mut self) -> Option<Arc<dyn LocalObject>> {
        self.current = self.objects.pop_front();
        self.current.clone()
    }

    fn current(&self) -> Option<&Arc<dyn LocalObject>> {
        self.current.as_ref()
    }

    fn has_next(&mut self) -> bool {
        !self.objects.is_empty()
    }
}

/// Sequences several providers in insertion order, advancing to the next
/// source only when the current one is exhausted.
#[derive(Default)]
pub struct ObjectProvidersIterator {
    providers: VecDeque<Box<dyn ObjectIterator + Send>>,
    current: Option<Arc<dyn LocalObject>>,
}

impl ObjectProvidersIterator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_provider(&mut self, provider: Box<dyn ObjectIterator + Send>) {
        self.providers.push_back(provider);
    }
}

impl ObjectIterator for ObjectProvidersIterator {
    fn next_object(&mut self) -> Option<Arc<dyn LocalObject>> {
        while let Some(front) = self.providers.front_mut() {
            if let Some(object) = front.next_object() {
                self.current = Some(Arc::clone(&object));
                return Some(object);
            }
            self.providers.pop_front();
        }
        self.current = None;
        None
    }

    fn current(&self) -> Option<&Arc<dyn LocalObject>> {
        self.current.as_ref()
    }

    fn has_next(&mut self) -> bool {
        while let Some(front) = self.providers.front_mut() {
            if front.has_next() {
                return true;
            }
            self.providers.pop_front();
        }
        false
    }

    fn remove_current(&mut self) -> Result<(), IterError> {
        self.providers
            .front_mut()
            .ok_or(IterError::NoCurrent)?
            .remove_current()
    }
}

/// Assigns an integer part id to every object.
pub trait ObjectMatcher {
    fn match_part(&self, object: &dyn LocalObject) -> i32;
}

impl<F: Fn(&dyn LocalObject) -> i32> ObjectMatcher for F {
    fn match_part(&self, object: &dyn LocalObject) -> i32 {
        self(object)
    }
}

/// Objects partitioned by the part id their matcher assigned.
#[derive(Debug, Default)]
pub struct MatchingObjectList {
    parts: BTreeMap<i32, Vec<Arc<dyn LocalObject>>>,
}

impl MatchingObjectList {
    pub fn part(&self, id: i32) -> &[Arc<dyn LocalObject>] {
        self.parts.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn part_ids(&self) -> impl Iterator<Item = i32> + '_ {
        self.parts.keys().copied()
    }

    pub fn total_count(&self) -> usize {
        self.parts.values().map(Vec::len).sum()
    }
}

/// Traverses the iterator, partitioning every object by its part id and
/// deleting the objects of the listed parts through the iterator. Store
/// rejections are translated to the caller as they occur.
pub fn matching_partition(
    iterator: &mut dyn ObjectIterator,
    matcher: &dyn ObjectMatcher,
    remove_parts: &[i32],
) -> Result<MatchingObjectList, IterError> {
    let mut list = MatchingObjectList::default();
    while let Some(object) = iterator.next_object() {
        let part = matcher.match_part(object.as_ref());
        if remove_parts.contains(&part) {
            iterator.remove_current()?;
        }
        list.parts.entry(part).or_default().push(object);
    }
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrisch_types::vector::FloatVector;
    use pretty_assertions::assert_eq;

    fn vector(locator: &str, components: &[f32]) -> Arc<dyn LocalObject> {
        Arc::new(FloatVector::with_locator(locator, components.to_vec()))
    }

    fn sample() -> Vec<Arc<dyn LocalObject>> {
        vec![
            vector("u/1", &[1.0]),
            vector("u/2", &[2.0]),
            vector("u/3", &[3.0]),
        ]
    }

    #[test]
    fn finders_consume_until_a_match() {
        let objects = sample();
        let wanted = objects[1].header().id();

        let mut iterator = VecObjectIterator::new(objects);
        let found = iterator.by_id(wanted).unwrap();
        assert_eq!(found.header().locator(), Some("u/2"));
        // The iterator moved past the match; only u/3 remains.
        assert!(iterator.has_next());
        assert_eq!(
            iterator.next_object().unwrap().header().locator(),
            Some("u/3")
        );
    }

    #[test]
    fn by_locator_and_by_data_find_their_objects() {
        let mut iterator = VecObjectIterator::new(sample());
        assert!(iterator.by_locator("u/3").is_some());
        assert!(iterator.by_locator("u/3").is_none());

        let mut iterator = VecObjectIterator::new(sample());
        let probe = FloatVector::new(vec![2.0]);
        let found = iterator.by_data(&probe).unwrap();
        assert_eq!(found.header().locator(), Some("u/2"));
    }

    #[test]
    fn by_any_locator_can_consume_the_set() {
        let mut iterator = VecObjectIterator::new(sample());
        let mut locators: AHashSet<String> =
            ["u/2".to_owned(), "u/3".to_owned()].into_iter().collect();

        let first = iterator.by_any_locator(&mut locators, true).unwrap();
        assert_eq!(first.header().locator(), Some("u/2"));
        assert_eq!(locators.len(), 1);

        let second = iterator.by_any_locator(&mut locators, true).unwrap();
        assert_eq!(second.header().locator(), Some("u/3"));
        assert!(locators.is_empty());
    }

    #[test]
    fn providers_chain_in_insertion_order() {
        let mut providers = ObjectProvidersIterator::new();
        providers.add_provider(Box::new(VecObjectIterator::new(vec![vector(
            "a/1",
            &[1.0],
        )])));
        providers.add_provider(Box::new(VecObjectIterator::new(vec![
            vector("b/1", &[2.0]),
            vector("b/2", &[3.0]),
        ])));

        let order: Vec<String> = std::iter::from_fn(|| providers.next_object())
            .map(|object| object.header().locator().unwrap_or_default().to_owned())
            .collect();
        assert_eq!(order, vec!["a/1", "b/1", "b/2"]);
        assert!(!providers.has_next());
    }

    #[test]
    fn matcher_partitions_by_part_id() {
        let matcher = |object: &dyn LocalObject| -> i32 {
            let vector = object.downcast_ref::<FloatVector>().unwrap();
            (vector.data()[0] as i32) % 2
        };
        let mut iterator = VecObjectIterator::new(sample());
        let list = matching_partition(&mut iterator, &matcher, &[]).unwrap();
        assert_eq!(list.part(0).len(), 1);
        assert_eq!(list.part(1).len(), 2);
        assert_eq!(list.total_count(), 3);
    }

    #[test]
    fn store_rejections_are_translated() {
        /// Iterator over a store that refuses every removal.
        struct RejectingIterator(VecObjectIterator);

        impl ObjectIterator for RejectingIterator {
            fn next_object(&mut self) -> Option<Arc<dyn LocalObject>> {
                self.0.next_object()
            }

            fn current(&self) -> Option<&Arc<dyn LocalObject>> {
                self.0.current()
            }

            fn has_next(&mut self) -> bool {
                self.0.has_next()
            }

            fn remove_current(&mut self) -> Result<(), IterError> {
                Err(StoreReject::OccupationLow.into())
            }
        }

        let matcher = |_: &dyn LocalObject| -> i32 { 1 };
        let mut iterator = RejectingIterator(VecObjectIterator::new(sample()));
        let result = matching_partition(&mut iterator, &matcher, &[1]);
        assert_eq!(
            result.unwrap_err(),
            IterError::Rejected(StoreReject::OccupationLow)
        );
    }
}
