//! Ranked answer collection for range and k-NN queries.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use metrisch_types::distance::MAX_DISTANCE;
use metrisch_types::id::UniqueId;
use metrisch_types::object::{LocalObject, RemoteObjectRef};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Payload stored per answer entry, controlled by [`AnswerType`] to bound
/// the bandwidth an answer costs in transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerType {
    /// Full objects including filters and supplemental data.
    FullData,
    /// Object clones stripped of filters and supplemental data.
    DataCleared,
    /// Identity-and-locator handles only.
    RemoteObjects,
    /// Bare identifiers.
    Identifiers,
}

/// One ranked object in whatever form the answer type prescribes.
#[derive(Debug, Clone)]
pub enum AnswerObject {
    Full(Arc<dyn LocalObject>),
    Remote(RemoteObjectRef),
    Identifier(UniqueId),
}

impl AnswerObject {
    pub fn id(&self) -> UniqueId {
        match self {
            AnswerObject::Full(object) => object.header().id(),
            AnswerObject::Remote(reference) => reference.id(),
            AnswerObject::Identifier(id) => *id,
        }
    }

    pub fn locator(&self) -> Option<&str> {
        match self {
            AnswerObject::Full(object) => object.header().locator(),
            AnswerObject::Remote(reference) => reference.locator(),
            AnswerObject::Identifier(_) => None,
        }
    }
}

/// A distance-object pair of a ranked answer.
#[derive(Debug, Clone)]
pub struct RankedEntry {
    pub distance: f32,
    pub object: AnswerObject,
}

impl RankedEntry {
    /// Ranking order: distance first, object identity breaks ties.
    fn ranking_cmp(&self, other: &RankedEntry) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.object.id().compare(&other.object.id()))
    }
}

/// Wrapper giving entries the total order the sorted set needs.
#[derive(Debug, Clone)]
struct OrderedEntry(RankedEntry);

impl PartialEq for OrderedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.ranking_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for OrderedEntry {}

impl PartialOrd for OrderedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.ranking_cmp(&other.0)
    }
}

/// Ordered collection of ⟨distance, object⟩ pairs bounded by capacity k.
///
/// Insertion is serialized by an internal lock, so concurrent evaluators may
/// offer candidates through a shared reference.
#[derive(Debug)]
pub struct RankedAnswer {
    entries: Mutex<BTreeSet<OrderedEntry>>,
    capacity: usize,
    answer_type: AnswerType,
}

impl RankedAnswer {
    /// Bounded answer for k-NN queries.
    pub fn bounded(capacity: NonZeroUsize, answer_type: AnswerType) -> Self {
        Self {
            entries: Mutex::new(BTreeSet::new()),
            capacity: capacity.get(),
            answer_type,
        }
    }

    /// Unbounded answer for range queries.
    pub fn unbounded(answer_type: AnswerType) -> Self {
        Self {
            entries: Mutex::new(BTreeSet::new()),
            capacity: usize::MAX,
            answer_type,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn answer_type(&self) -> AnswerType {
        self.answer_type
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Distance of the current k-th entry, or "no threshold" while the
    /// answer still has room. Monotonically non-increasing over a run.
    pub fn threshold(&self) -> f32 {
        let entries = self.entries.lock();
        if entries.len() < self.capacity {
            MAX_DISTANCE
        } else {
            entries
                .iter()
                .next_back()
                .map(|entry| entry.0.distance)
                .unwrap_or(MAX_DISTANCE)
        }
    }

    /// Offers an object, converting it into the configured payload form.
    /// Returns whether the answer kept it.
    pub fn add(&self, object: &Arc<dyn LocalObject>, distance: f32) -> bool {
        self.add_entry(RankedEntry {
            distance,
            object: self.convert(object),
        })
    }

    /// Offers an already converted entry, as produced by a foreign answer.
    pub fn add_entry(&self, entry: RankedEntry) -> bool {
        let mut entries = self.entries.lock();
        if entries.len() < self.capacity {
            entries.insert(OrderedEntry(entry));
            return true;
        }
        let Some(last) = entries.iter().next_back() else {
            return false;
        };
        if entry.ranking_cmp(&last.0) == Ordering::Less {
            entries.insert(OrderedEntry(entry));
            while entries.len() > self.capacity {
                entries.pop_last();
            }
            return true;
        }
        false
    }

    fn convert(&self, object: &Arc<dyn LocalObject>) -> AnswerObject {
        match self.answer_type {
            AnswerType::FullData => AnswerObject::Full(Arc::clone(object)),
            AnswerType::DataCleared => match object.clone_object(false) {
                Ok(mut clone) => {
                    clone.header_mut().clear_surplus_data();
                    AnswerObject::Full(Arc::from(clone))
                }
                // Data-only clones cannot fail on filters; fall back to the
                // handle when a type still refuses.
                Err(_) => AnswerObject::Remote(object.as_ref().remote_ref()),
            },
            AnswerType::RemoteObjects => AnswerObject::Remote(object.as_ref().remote_ref()),
            AnswerType::Identifiers => AnswerObject::Identifier(object.header().id()),
        }
    }

    /// Snapshot of the entries in ranking order.
    pub fn entries(&self) -> Vec<RankedEntry> {
        self.entries
            .lock()
            .iter()
            .map(|entry| entry.0.clone())
            .collect()
    }

    pub fn first(&self) -> Option<RankedEntry> {
        self.entries.lock().iter().next().map(|entry| entry.0.clone())
    }

    /// Merges a foreign answer, respecting this answer's capacity.
    pub fn merge_from(&self, other: &RankedAnswer) {
        for entry in other.entries() {
            self.add_entry(entry);
        }
    }

    /// Re-shapes stored payloads down to the transport form of the answer
    /// type, dropping filters and supplemental data of full objects.
    pub fn clear_surplus_data(&self) {
        let mut entries = self.entries.lock();
        let reduced: BTreeSet<OrderedEntry> = entries
            .iter()
            .map(|entry| {
                let object = match (&entry.0.object, self.answer_type) {
                    (AnswerObject::Full(object), AnswerType::FullData | AnswerType::DataCleared) => {
                        match object.clone_object(false) {
                            Ok(mut clone) => {
                                clone.header_mut().clear_surplus_data();
                                AnswerObject::Full(Arc::from(clone))
                            }
                            Err(_) => AnswerObject::Remote(object.as_ref().remote_ref()),
                        }
                    }
                    (AnswerObject::Full(object), AnswerType::RemoteObjects) => {
                        AnswerObject::Remote(object.as_ref().remote_ref())
                    }
                    (AnswerObject::Full(object), AnswerType::Identifiers) => {
                        AnswerObject::Identifier(object.header().id())
                    }
                    (other, _) => other.clone(),
                };
                OrderedEntry(RankedEntry {
                    distance: entry.0.distance,
                    object,
                })
            })
            .collect();
        *entries = reduced;
    }
}

impl Clone for RankedAnswer {
    fn clone(&self) -> Self {
        Self {
            entries: Mutex::new(self.entries.lock().clone()),
            capacity: self.capacity,
            answer_type: self.answer_type,
        }
    }
}
