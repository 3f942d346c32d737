//! The object hierarchy: identity-bearing headers, the local-object
//! contract, and data-less remote handles.

use std::any::Any;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::sync::Arc;

use crate::errors::ObjectError;
use crate::filter::FilterChain;
use crate::id::UniqueId;
use crate::key::ObjectKey;

/// Opaque supplemental slot carried by an object until
/// [`ObjectHeader::clear_surplus_data`] drops it.
pub type Supplemental = Arc<dyn Any + Send + Sync>;

/// Identity, key, filter chain and supplemental slot shared by every local
/// object.
#[derive(Debug, Default)]
pub struct ObjectHeader {
    id: UniqueId,
    key: Option<ObjectKey>,
    filters: FilterChain,
    supplemental: Option<Supplemental>,
}

impl ObjectHeader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(key: ObjectKey) -> Self {
        Self {
            key: Some(key),
            ..Self::default()
        }
    }

    pub fn id(&self) -> UniqueId {
        self.id
    }

    pub fn key(&self) -> Option<&ObjectKey> {
        self.key.as_ref()
    }

    pub fn set_key(&mut self, key: Option<ObjectKey>) {
        self.key = key;
    }

    pub fn locator(&self) -> Option<&str> {
        self.key.as_ref().and_then(ObjectKey::locator)
    }

    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    pub fn filters_mut(&mut self) -> &mut FilterChain {
        &mut self.filters
    }

    pub fn supplemental(&self) -> Option<&Supplemental> {
        self.supplemental.as_ref()
    }

    pub fn set_supplemental(&mut self, supplemental: Option<Supplemental>) {
        self.supplemental = supplemental;
    }

    /// Header for an explicit clone: fresh identity, same key, optionally a
    /// cloned filter chain, supplemental slot shared.
    pub fn clone_for(&self, clone_filters: bool) -> Result<ObjectHeader, ObjectError> {
        Ok(ObjectHeader {
            id: UniqueId::new(),
            key: self.key.clone(),
            filters: if clone_filters {
                self.filters.try_clone()?
            } else {
                FilterChain::new()
            },
            supplemental: self.supplemental.clone(),
        })
    }

    /// Strips everything an index does not need before transmission: the
    /// supplemental slot, all filters, and typed-key discriminants.
    pub fn clear_surplus_data(&mut self) {
        self.supplemental = None;
        self.filters.clear();
        self.key = self.key.as_ref().map(ObjectKey::collapse);
    }
}

/// Contract of an object that carries actual data and a metric over it.
///
/// The raw metric is threshold-relaxed: when the true distance exceeds
/// `threshold`, any value above the threshold may be returned instead, which
/// lets implementations short-circuit partial computations. Evaluation goes
/// through the wrappers in [`crate::distance`], never through this method
/// directly.
pub trait LocalObject: Debug + Send + Sync {
    fn header(&self) -> &ObjectHeader;

    fn header_mut(&mut self) -> &mut ObjectHeader;

    /// Wire tag under which the factory registry constructs this type.
    fn type_tag(&self) -> &'static str;

    fn metric_distance(
        &self,
        other: &dyn LocalObject,
        threshold: f32,
    ) -> Result<f32, ObjectError>;

    /// Maximal possible distance of this metric, when the type has one.
    fn max_distance(&self) -> f32 {
        crate::distance::MAX_DISTANCE
    }

    fn distance_lower_bound(&self, _other: &dyn LocalObject, _accuracy: i32) -> f32 {
        crate::distance::MIN_DISTANCE
    }

    fn distance_upper_bound(&self, _other: &dyn LocalObject, _accuracy: i32) -> f32 {
        crate::distance::MAX_DISTANCE
    }

    /// Content equality, independent of identity.
    fn data_equals(&self, other: &dyn LocalObject) -> bool;

    /// Content hash consistent with [`Self::data_equals`].
    fn data_hash(&self) -> u64;

    /// Writes the data lines of the text form, keys and filters excluded.
    fn write_data(&self, writer: &mut dyn Write) -> Result<(), ObjectError>;

    /// Deep copy with a fresh identity; the filter chain is copied only on
    /// request and may refuse (pivot-map filters do not clone).
    fn clone_object(&self, clone_filters: bool) -> Result<Box<dyn LocalObject>, ObjectError>;

    fn as_any(&self) -> &dyn Any;
}

impl dyn LocalObject + '_ {
    pub fn id(&self) -> UniqueId {
        self.header().id()
    }

    pub fn locator(&self) -> Option<&str> {
        self.header().locator()
    }

    pub fn downcast_ref<T: LocalObject + 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Data-less handle preserving identity and key.
    pub fn remote_ref(&self) -> RemoteObjectRef {
        RemoteObjectRef {
            id: self.header().id(),
            key: self.header().key().cloned(),
        }
    }
}

/// Wrapper keying an object by content instead of identity, for hash
/// containers.
#[derive(Debug, Clone)]
pub struct DataEqualObject(pub Arc<dyn LocalObject>);

impl PartialEq for DataEqualObject {
    fn eq(&self, other: &Self) -> bool {
        self.0.data_equals(other.0.as_ref())
    }
}

impl Eq for DataEqualObject {}

impl Hash for DataEqualObject {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.data_hash());
    }
}

/// Identity-and-locator handle of an object living elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteObjectRef {
    id: UniqueId,
    key: Option<ObjectKey>,
}

impl RemoteObjectRef {
    pub fn new(id: UniqueId, key: Option<ObjectKey>) -> Self {
        Self { id, key }
    }

    pub fn id(&self) -> UniqueId {
        self.id
    }

    pub fn key(&self) -> Option<&ObjectKey> {
        self.key.as_ref()
    }

    pub fn locator(&self) -> Option<&str> {
        self.key.as_ref().and_then(ObjectKey::locator)
    }

    /// Retrieves the full object from the backing repository.
    pub fn resolve(
        &self,
        repository: &dyn ObjectRepository,
    ) -> Result<Box<dyn LocalObject>, ObjectError> {
        repository.fetch(self)
    }
}

/// External storage collaborator able to resolve remote handles.
pub trait ObjectRepository: Send + Sync {
    fn fetch(&self, reference: &RemoteObjectRef) -> Result<Box<dyn LocalObject>, ObjectError>;
}

/// An abstract object: either the data itself or a handle to it.
#[derive(Debug, Clone)]
pub enum ObjectHandle {
    Local(Arc<dyn LocalObject>),
    Remote(RemoteObjectRef),
}

impl ObjectHandle {
    pub fn id(&self) -> UniqueId {
        match self {
            ObjectHandle::Local(object) => object.header().id(),
            ObjectHandle::Remote(reference) => reference.id(),
        }
    }

    pub fn locator(&self) -> Option<&str> {
        match self {
            ObjectHandle::Local(object) => object.header().locator(),
            ObjectHandle::Remote(reference) => reference.locator(),
        }
    }

    /// Drops the data, keeping identity and key.
    pub fn to_remote(&self) -> ObjectHandle {
        match self {
            ObjectHandle::Local(object) => ObjectHandle::Remote(object.as_ref().remote_ref()),
            ObjectHandle::Remote(reference) => ObjectHandle::Remote(reference.clone()),
        }
    }

    /// Materializes the data, retrieving through the repository if needed.
    pub fn to_local(
        &self,
        repository: &dyn ObjectRepository,
    ) -> Result<Arc<dyn LocalObject>, ObjectError> {
        match self {
            ObjectHandle::Local(object) => Ok(Arc::clone(object)),
            ObjectHandle::Remote(reference) => Ok(Arc::from(reference.resolve(repository)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FixedArrayFilter, PrecomputedFilter};
    use crate::vector::FloatVector;
    use pretty_assertions::assert_eq;

    #[test]
    fn clear_surplus_data_collapses_typed_keys() {
        let mut header = ObjectHeader::with_key(ObjectKey::int(7, "u/3"));
        header
            .filters_mut()
            .attach(PrecomputedFilter::Fixed(FixedArrayFilter::new()), false);
        header.set_supplemental(Some(Arc::new(42u32)));

        header.clear_surplus_data();
        assert_eq!(header.key(), Some(&ObjectKey::basic("u/3")));
        assert!(header.filters().is_empty());
        assert!(header.supplemental().is_none());
    }

    #[test]
    fn remote_ref_preserves_identity_and_key() {
        let vector = FloatVector::with_locator("u/1", vec![1.0, 2.0]);
        let object: &dyn LocalObject = &vector;
        let remote = object.remote_ref();
        assert_eq!(remote.id(), vector.header().id());
        assert_eq!(remote.locator(), Some("u/1"));
    }

    #[test]
    fn remote_handles_resolve_through_the_repository() {
        struct SingleObjectRepository(Arc<dyn LocalObject>);

        impl ObjectRepository for SingleObjectRepository {
            fn fetch(
                &self,
                reference: &RemoteObjectRef,
            ) -> Result<Box<dyn LocalObject>, ObjectError> {
                if self.0.header().id() == reference.id() {
                    self.0.clone_object(true)
                } else {
                    Err(ObjectError::InvalidArgument(format!(
                        "no object {}",
                        reference.id()
                    )))
                }
            }
        }

        let stored: Arc<dyn LocalObject> =
            Arc::new(FloatVector::with_locator("u/4", vec![1.0, 2.0]));
        let repository = SingleObjectRepository(Arc::clone(&stored));

        let handle = ObjectHandle::Local(Arc::clone(&stored)).to_remote();
        assert_eq!(handle.locator(), Some("u/4"));
        let resolved = handle.to_local(&repository).unwrap();
        assert!(resolved.data_equals(stored.as_ref()));

        let stranger: Arc<dyn LocalObject> = Arc::new(FloatVector::new(vec![9.0]));
        let missing = ObjectHandle::Local(stranger).to_remote();
        assert!(missing.to_local(&repository).is_err());
    }

    #[test]
    fn data_equal_wrapper_ignores_identity() {
        let a: Arc<dyn LocalObject> = Arc::new(FloatVector::new(vec![1.0, 2.0]));
        let b: Arc<dyn LocalObject> = Arc::new(FloatVector::new(vec![1.0, 2.0]));
        assert_ne!(a.header().id(), b.header().id());
        assert_eq!(DataEqualObject(Arc::clone(&a)), DataEqualObject(b));

        let c: Arc<dyn LocalObject> = Arc::new(FloatVector::new(vec![3.0, 2.0]));
        assert_ne!(DataEqualObject(a), DataEqualObject(c));
    }
}
