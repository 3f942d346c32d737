//! Precomputed-distance filters.
//!
//! Each object may own a chain of filters caching distances to reference
//! objects (pivots). The triangle inequality turns those cached values into
//! cheap exclude/include decisions that avoid evaluating the full metric.

use std::fmt::Write as _;
use std::sync::Arc;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::distance::{DistanceStats, UNKNOWN_DISTANCE, distance, is_known};
use crate::errors::ObjectError;
use crate::id::UniqueId;
use crate::object::LocalObject;

/// Discriminant of a concrete filter node; a chain holds at most one node
/// per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    FixedArray,
    PerforatedArray,
    PivotMap,
}

/// Dense vector of distances positionally aligned with a shared,
/// caller-maintained pivot list.
///
/// The perforated kind admits [`UNKNOWN_DISTANCE`] holes and skips them
/// during comparisons.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedArrayFilter {
    distances: Vec<f32>,
    perforated: bool,
}

impl FixedArrayFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn perforated() -> Self {
        Self {
            distances: Vec::new(),
            perforated: true,
        }
    }

    pub fn from_distances(distances: Vec<f32>) -> Self {
        Self {
            distances,
            perforated: false,
        }
    }

    pub fn is_perforated(&self) -> bool {
        self.perforated
    }

    pub fn distances(&self) -> &[f32] {
        &self.distances
    }

    pub fn len(&self) -> usize {
        self.distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }

    pub fn append(&mut self, distance: f32) {
        self.distances.push(distance);
    }

    /// Measures `object` against every pivot in order and appends the
    /// results, keeping the positional correspondence with the shared
    /// pivot list.
    pub fn append_distances<'a, I>(
        &mut self,
        object: &dyn LocalObject,
        pivots: I,
        stats: &mut DistanceStats,
    ) -> Result<(), ObjectError>
    where
        I: IntoIterator<Item = &'a Arc<dyn LocalObject>>,
    {
        for pivot in pivots {
            let measured = distance(object, pivot.as_ref(), stats)?;
            self.distances.push(measured);
        }
        Ok(())
    }

    pub fn insert_at(&mut self, index: usize, distance: f32) -> Result<(), ObjectError> {
        if index > self.distances.len() {
            return Err(out_of_bounds(index, self.distances.len()));
        }
        self.distances.insert(index, distance);
        Ok(())
    }

    pub fn set_at(&mut self, index: usize, distance: f32) -> Result<(), ObjectError> {
        match self.distances.get_mut(index) {
            Some(slot) => {
                *slot = distance;
                Ok(())
            }
            None => Err(out_of_bounds(index, self.distances.len())),
        }
    }

    pub fn remove_at(&mut self, index: usize) -> Result<f32, ObjectError> {
        if index >= self.distances.len() {
            return Err(out_of_bounds(index, self.distances.len()));
        }
        Ok(self.distances.remove(index))
    }

    pub fn truncate(&mut self, len: usize) {
        self.distances.truncate(len);
    }

    pub fn reset(&mut self) {
        self.distances.clear();
    }

    /// True when some shared pivot proves, via the triangle inequality, that
    /// the distance between the owners exceeds `radius`.
    pub fn exclude(&self, other: &FixedArrayFilter, radius: f32) -> bool {
        self.distances
            .iter()
            .zip(&other.distances)
            .any(|(&a, &b)| {
                if self.perforated && (!is_known(a) || !is_known(b)) {
                    return false;
                }
                (a - b).abs() > radius
            })
    }

    /// True when some shared pivot proves the distance is at most `radius`.
    pub fn include(&self, other: &FixedArrayFilter, radius: f32) -> bool {
        self.distances
            .iter()
            .zip(&other.distances)
            .any(|(&a, &b)| {
                if self.perforated && (!is_known(a) || !is_known(b)) {
                    return false;
                }
                a + b <= radius
            })
    }

    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for (index, distance) in self.distances.iter().enumerate() {
            if index > 0 {
                text.push(' ');
            }
            let _ = write!(text, "{distance}");
        }
        text
    }

    pub fn parse_text(text: &str, perforated: bool) -> Result<FixedArrayFilter, ObjectError> {
        let distances = text
            .split_whitespace()
            .map(|token| {
                token.parse::<f32>().map_err(|_| {
                    ObjectError::InvalidArgument(format!("bad filter distance {token:?}"))
                })
            })
            .collect::<Result<Vec<f32>, ObjectError>>()?;
        Ok(FixedArrayFilter {
            distances,
            perforated,
        })
    }
}

fn out_of_bounds(index: usize, len: usize) -> ObjectError {
    ObjectError::InvalidArgument(format!("filter index {index} out of bounds for length {len}"))
}

/// Mapping from pivot-object identity to the cached distance.
///
/// Its referenced pivots have no stable textual form, so the filter rejects
/// text serialization; it also rejects cloning.
#[derive(Debug, Default)]
pub struct PivotMapFilter {
    distances: AHashMap<UniqueId, f32>,
}

impl PivotMapFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pivot: UniqueId, distance: f32) {
        self.distances.insert(pivot, distance);
    }

    pub fn get(&self, pivot: UniqueId) -> Option<f32> {
        self.distances.get(&pivot).copied()
    }

    pub fn len(&self) -> usize {
        self.distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }

    // The inequalities apply only on pivots present on both sides.

    pub fn exclude(&self, other: &PivotMapFilter, radius: f32) -> bool {
        self.distances.iter().any(|(pivot, &a)| {
            other
                .distances
                .get(pivot)
                .is_some_and(|&b| (a - b).abs() > radius)
        })
    }

    pub fn include(&self, other: &PivotMapFilter, radius: f32) -> bool {
        self.distances.iter().any(|(pivot, &a)| {
            other
                .distances
                .get(pivot)
                .is_some_and(|&b| a + b <= radius)
        })
    }
}

/// A node of an object's filter chain.
#[derive(Debug)]
pub enum PrecomputedFilter {
    Fixed(FixedArrayFilter),
    Pivot(PivotMapFilter),
}

impl PrecomputedFilter {
    pub fn kind(&self) -> FilterKind {
        match self {
            PrecomputedFilter::Fixed(filter) if filter.is_perforated() => {
                FilterKind::PerforatedArray
            }
            PrecomputedFilter::Fixed(_) => FilterKind::FixedArray,
            PrecomputedFilter::Pivot(_) => FilterKind::PivotMap,
        }
    }

    /// Wire tag used in the `#filter` comment line.
    pub fn type_tag(&self) -> &'static str {
        match self.kind() {
            FilterKind::FixedArray => "FixedArrayFilter",
            FilterKind::PerforatedArray => "PerforatedArrayFilter",
            FilterKind::PivotMap => "PivotMapFilter",
        }
    }

    fn empty_of_kind(kind: FilterKind) -> PrecomputedFilter {
        match kind {
            FilterKind::FixedArray => PrecomputedFilter::Fixed(FixedArrayFilter::new()),
            FilterKind::PerforatedArray => PrecomputedFilter::Fixed(FixedArrayFilter::perforated()),
            FilterKind::PivotMap => PrecomputedFilter::Pivot(PivotMapFilter::new()),
        }
    }

    /// Whether the node can answer a distance directly by pivot identity.
    pub fn is_getter_supported(&self) -> bool {
        matches!(self, PrecomputedFilter::Pivot(_))
    }

    /// Direct lookup of the cached distance to the given object.
    pub fn precomputed_to(&self, id: UniqueId) -> f32 {
        match self {
            PrecomputedFilter::Pivot(filter) => filter.get(id).unwrap_or(UNKNOWN_DISTANCE),
            PrecomputedFilter::Fixed(_) => UNKNOWN_DISTANCE,
        }
    }

    /// Records a freshly computed distance into the node.
    pub fn record(&mut self, pivot: UniqueId, distance: f32) {
        match self {
            PrecomputedFilter::Fixed(filter) => filter.append(distance),
            PrecomputedFilter::Pivot(filter) => filter.insert(pivot, distance),
        }
    }

    /// Exclusion test against a node of the same kind; kind mismatch cannot
    /// decide and answers false.
    pub fn exclude(&self, other: &PrecomputedFilter, radius: f32) -> bool {
        match (self, other) {
            (PrecomputedFilter::Fixed(a), PrecomputedFilter::Fixed(b))
                if a.is_perforated() == b.is_perforated() =>
            {
                a.exclude(b, radius)
            }
            (PrecomputedFilter::Pivot(a), PrecomputedFilter::Pivot(b)) => a.exclude(b, radius),
            _ => false,
        }
    }

    pub fn include(&self, other: &PrecomputedFilter, radius: f32) -> bool {
        match (self, other) {
            (PrecomputedFilter::Fixed(a), PrecomputedFilter::Fixed(b))
                if a.is_perforated() == b.is_perforated() =>
            {
                a.include(b, radius)
            }
            (PrecomputedFilter::Pivot(a), PrecomputedFilter::Pivot(b)) => a.include(b, radius),
            _ => false,
        }
    }

    pub fn try_clone(&self) -> Result<PrecomputedFilter, ObjectError> {
        match self {
            PrecomputedFilter::Fixed(filter) => Ok(PrecomputedFilter::Fixed(filter.clone())),
            PrecomputedFilter::Pivot(_) => Err(ObjectError::CloneUnsupported(self.type_tag())),
        }
    }

    pub fn to_text(&self) -> Result<String, ObjectError> {
        match self {
            PrecomputedFilter::Fixed(filter) => Ok(filter.to_text()),
            PrecomputedFilter::Pivot(_) => Err(ObjectError::TextUnsupported(self.type_tag())),
        }
    }

    /// Parses the text form of the filter named by `type_tag`.
    pub fn parse(type_tag: &str, text: &str) -> Result<PrecomputedFilter, ObjectError> {
        match type_tag {
            "FixedArrayFilter" => Ok(PrecomputedFilter::Fixed(FixedArrayFilter::parse_text(
                text, false,
            )?)),
            "PerforatedArrayFilter" => Ok(PrecomputedFilter::Fixed(FixedArrayFilter::parse_text(
                text, true,
            )?)),
            "PivotMapFilter" => Err(ObjectError::TextUnsupported("PivotMapFilter")),
            other => Err(ObjectError::UnknownType(other.to_owned())),
        }
    }
}

/// Outcome of [`FilterChain::attach`].
#[derive(Debug)]
pub enum Attach {
    /// The filter joined the chain.
    Inserted,
    /// A node of the same kind was already present; the incoming filter is
    /// handed back untouched.
    Kept(PrecomputedFilter),
    /// The incoming filter replaced the node of the same kind, which is
    /// returned.
    Replaced(PrecomputedFilter),
}

/// Chain of precomputed-distance filters owned by one object.
///
/// Owned by value and never shared between objects; an attached filter must
/// be a fresh, unlinked value, which ownership enforces.
#[derive(Debug, Default)]
pub struct FilterChain {
    nodes: SmallVec<[PrecomputedFilter; 2]>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PrecomputedFilter> {
        self.nodes.iter()
    }

    pub fn get(&self, kind: FilterKind) -> Option<&PrecomputedFilter> {
        self.nodes.iter().find(|node| node.kind() == kind)
    }

    pub fn get_mut(&mut self, kind: FilterKind) -> Option<&mut PrecomputedFilter> {
        self.nodes.iter_mut().find(|node| node.kind() == kind)
    }

    /// Returns the node of the given kind, creating an empty one when absent.
    pub fn ensure(&mut self, kind: FilterKind) -> &mut PrecomputedFilter {
        if let Some(position) = self.nodes.iter().position(|node| node.kind() == kind) {
            return &mut self.nodes[position];
        }
        self.nodes.push(PrecomputedFilter::empty_of_kind(kind));
        let last = self.nodes.len() - 1;
        &mut self.nodes[last]
    }

    /// Attaches a filter, keeping at most one node per kind.
    pub fn attach(&mut self, filter: PrecomputedFilter, replace: bool) -> Attach {
        match self.nodes.iter().position(|node| node.kind() == filter.kind()) {
            None => {
                self.nodes.push(filter);
                Attach::Inserted
            }
            Some(_) if !replace => Attach::Kept(filter),
            Some(position) => {
                Attach::Replaced(std::mem::replace(&mut self.nodes[position], filter))
            }
        }
    }

    pub fn detach(&mut self, kind: FilterKind) -> Option<PrecomputedFilter> {
        let position = self.nodes.iter().position(|node| node.kind() == kind)?;
        Some(self.nodes.remove(position))
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Lockstep exclusion walk over two chains.
    ///
    /// Both chains advance together while the node kinds match; the first
    /// mismatch stops the walk, which then cannot decide.
    pub fn exclude(&self, other: &FilterChain, radius: f32) -> bool {
        for (mine, theirs) in self.nodes.iter().zip(&other.nodes) {
            if mine.kind() != theirs.kind() {
                return false;
            }
            if mine.exclude(theirs, radius) {
                return true;
            }
        }
        false
    }

    /// Lockstep inclusion walk, same traversal rules as [`Self::exclude`].
    pub fn include(&self, other: &FilterChain, radius: f32) -> bool {
        for (mine, theirs) in self.nodes.iter().zip(&other.nodes) {
            if mine.kind() != theirs.kind() {
                return false;
            }
            if mine.include(theirs, radius) {
                return true;
            }
        }
        false
    }

    /// First getter-supporting node holding a cached distance to `id` wins.
    pub fn precomputed_to(&self, id: UniqueId) -> Option<f32> {
        self.nodes
            .iter()
            .filter(|node| node.is_getter_supported())
            .map(|node| node.precomputed_to(id))
            .find(|&distance| is_known(distance))
    }

    pub fn try_clone(&self) -> Result<FilterChain, ObjectError> {
        let nodes = self
            .nodes
            .iter()
            .map(PrecomputedFilter::try_clone)
            .collect::<Result<SmallVec<_>, ObjectError>>()?;
        Ok(FilterChain { nodes })
    }
}
