//! Identity-keyed object references.
//!
//! The engine never compares tracked objects with `PartialEq`, only with
//! pointer identity, exactly like a Java debugger compares `Object`
//! references. `ObjectRef` stands in for "any object reachable through a
//! tracked field or container"; `IdentityKey` wraps one so it can live as
//! a map/multiset key whose equality and hash are both identity-based.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A reference to an arbitrary tracked object (a container, an element, or
/// a map entry wrapper). Reference-counted so the engine can hold onto it
/// independently of the target program's own references.
pub type ObjectRef = Arc<dyn Any + Send + Sync>;

/// Wraps an [`ObjectRef`] so equality and hashing use object identity
/// (pointer equality) instead of `Any`'s lack of any `PartialEq`.
///
/// The identity hash is computed once at construction and cached rather
/// than recomputed per lookup.
#[derive(Clone)]
pub struct IdentityKey {
    object: ObjectRef,
    identity_hash: u64,
}

impl IdentityKey {
    /// Wraps `object`. The identity hash is the address of the underlying
    /// allocation, which is stable for the lifetime of this `Arc` clone
    /// group since `Arc` never moves its heap allocation.
    pub fn new(object: ObjectRef) -> Self {
        let identity_hash = Self::address_of(&object) as u64;
        IdentityKey {
            object,
            identity_hash,
        }
    }

    /// The raw data pointer of the wrapped object, used as its identity.
    fn address_of(object: &ObjectRef) -> *const () {
        Arc::as_ptr(object) as *const ()
    }

    /// The precomputed identity hash, exposed so composite keys (like
    /// `MapEntryKey`) can combine it without re-deriving a pointer.
    pub fn identity_hash(&self) -> u64 {
        self.identity_hash
    }

    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    /// Downcasts the wrapped object to a concrete type, if it is one.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.object.downcast_ref::<T>()
    }
}

impl PartialEq for IdentityKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.object, &other.object)
    }
}
impl Eq for IdentityKey {}

impl Hash for IdentityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.identity_hash);
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityKey(0x{:x})", self.identity_hash)
    }
}

/// A map-entry wrapper's identity key, used when a container is a `Map`
/// and each logical entry is tracked as a single unit for multiset
/// construction.
///
/// Hashes both the key's and the value's identity, XORing the value's hash
/// against a fixed salt first so that an entry whose key and value happen
/// to be identical objects doesn't cancel out to the same hash a plain
/// key-only hash would produce.
#[derive(Clone)]
pub struct MapEntryKey {
    pub key: IdentityKey,
    pub value: IdentityKey,
}

/// Arbitrary odd constant used only to decorrelate the value's identity
/// hash from the key's before combining them.
const VALUE_SALT: u64 = 0x9E37_79B9_7F4A_7C15;

impl MapEntryKey {
    pub fn new(key: ObjectRef, value: ObjectRef) -> Self {
        MapEntryKey {
            key: IdentityKey::new(key),
            value: IdentityKey::new(value),
        }
    }

    pub fn combined_identity_hash(&self) -> u64 {
        self.key.identity_hash() ^ (self.value.identity_hash() ^ VALUE_SALT)
    }
}

impl PartialEq for MapEntryKey {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.value == other.value
    }
}
impl Eq for MapEntryKey {}

impl Hash for MapEntryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.combined_identity_hash());
    }
}

impl fmt::Debug for MapEntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapEntryKey")
            .field("key", &self.key)
            .field("value", &self.value)
            .finish()
    }
}
