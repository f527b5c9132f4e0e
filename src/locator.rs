//! Field locators: the identity of a single tracked field slot.

use std::fmt;
use std::hash::{Hash, Hasher};

use string_cache::DefaultAtom;

use crate::identity::IdentityKey;

/// The identity of a tracked field instance: declaring class, field name,
/// and (for instance fields) the owning object. A `None` owner means a
/// static field.
#[derive(Clone)]
pub struct FieldLocator {
    pub declaring_class: DefaultAtom,
    pub field_name: DefaultAtom,
    pub owner: Option<IdentityKey>,
}

impl FieldLocator {
    pub fn instance(declaring_class: &str, field_name: &str, owner: IdentityKey) -> Self {
        FieldLocator {
            declaring_class: DefaultAtom::from(declaring_class),
            field_name: DefaultAtom::from(field_name),
            owner: Some(owner),
        }
    }

    pub fn static_field(declaring_class: &str, field_name: &str) -> Self {
        FieldLocator {
            declaring_class: DefaultAtom::from(declaring_class),
            field_name: DefaultAtom::from(field_name),
            owner: None,
        }
    }

    pub fn is_static(&self) -> bool {
        self.owner.is_none()
    }

    /// The class+field half of this locator, with the owning object
    /// dropped. `HistoryStore` tracks whether tracking is *enabled* at
    /// this granularity: `enable-tracking` and `clear-history` take only a
    /// class and a field name, no owning object, while each owner's
    /// modifications are still recorded under its own full `FieldLocator`.
    pub fn key(&self) -> FieldKey {
        FieldKey {
            declaring_class: self.declaring_class.clone(),
            field_name: self.field_name.clone(),
        }
    }
}

/// The class+field half of a [`FieldLocator`], used as the granularity at
/// which tracking is enabled/disabled and cleared.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct FieldKey {
    pub declaring_class: DefaultAtom,
    pub field_name: DefaultAtom,
}

impl FieldKey {
    pub fn new(declaring_class: &str, field_name: &str) -> Self {
        FieldKey {
            declaring_class: DefaultAtom::from(declaring_class),
            field_name: DefaultAtom::from(field_name),
        }
    }
}

impl PartialEq for FieldLocator {
    fn eq(&self, other: &Self) -> bool {
        self.declaring_class == other.declaring_class
            && self.field_name == other.field_name
            && match (&self.owner, &other.owner) {
                (Some(a), Some(b)) => a == b,
                (None, None) => true,
                _ => false,
            }
    }
}
impl Eq for FieldLocator {}

impl Hash for FieldLocator {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.declaring_class.hash(state);
        self.field_name.hash(state);
        match &self.owner {
            Some(owner) => state.write_u64(owner.identity_hash()),
            None => state.write_u64(0),
        }
    }
}

impl fmt::Debug for FieldLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}@{}",
            self.declaring_class,
            self.field_name,
            match &self.owner {
                Some(owner) => format!("0x{:x}", owner.identity_hash()),
                None => "static".to_owned(),
            }
        )
    }
}

impl fmt::Display for FieldLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
