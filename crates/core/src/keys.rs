//! Index key model
//!
//! Keys identify index instances inside a catalog:
//! - [`CatalogIndexKey`]: the single catalog index of a scope
//! - [`EntityIndexKey`]: one entity index of a collection (type + scope +
//!   optional discriminator)
//! - [`ReferenceKey`] / [`RepresentativeReferenceKey`]: discriminators of
//!   reduced indices
//! - [`AttributeKey`]: attribute name with optional locale, keys sub-indices
//!
//! All keys are totally ordered, hashable and serde round-trippable, and
//! render to a stable display string.

use crate::error::{Error, Result};
use crate::types::{AttributeValue, Locale, Scope};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Key of the catalog-wide index; exactly one exists per scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CatalogIndexKey {
    /// Scope of the catalog index
    pub scope: Scope,
}

impl CatalogIndexKey {
    /// Create the key for the given scope
    pub fn new(scope: Scope) -> Self {
        Self { scope }
    }
}

impl fmt::Display for CatalogIndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CATALOG:{}", self.scope)
    }
}

/// Kind of an entity index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityIndexType {
    /// Full index of an entity collection (index of last resort)
    Global,
    /// Index of referenced entity primary keys for one reference name
    ReferencedEntityType,
    /// Reduced index of entities referencing one particular entity
    ReferencedEntity,
    /// Reduced index of entities placed under one hierarchy node
    ReferencedHierarchyNode,
}

impl EntityIndexType {
    /// Stable upper-case name used in display strings
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityIndexType::Global => "GLOBAL",
            EntityIndexType::ReferencedEntityType => "REFERENCED_ENTITY_TYPE",
            EntityIndexType::ReferencedEntity => "REFERENCED_ENTITY",
            EntityIndexType::ReferencedHierarchyNode => "REFERENCED_HIERARCHY_NODE",
        }
    }
}

impl fmt::Display for EntityIndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to one entity through a named reference
///
/// `internal_primary_key` is the identifier the owning entity assigned to the
/// reference; it is absent for references not yet stored ("unknown"). It does
/// not take part in equality, hashing or ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceKey {
    /// Reference name
    pub reference_name: String,
    /// Primary key of the referenced entity
    pub primary_key: u32,
    /// Internal id of the reference, if known
    pub internal_primary_key: Option<i32>,
}

impl ReferenceKey {
    /// Create a key whose internal id is not known
    pub fn new(reference_name: impl Into<String>, primary_key: u32) -> Self {
        Self {
            reference_name: reference_name.into(),
            primary_key,
            internal_primary_key: None,
        }
    }

    /// Create a key with a known internal id
    pub fn with_internal_key(
        reference_name: impl Into<String>,
        primary_key: u32,
        internal_primary_key: i32,
    ) -> Self {
        Self {
            reference_name: reference_name.into(),
            primary_key,
            internal_primary_key: Some(internal_primary_key),
        }
    }

    /// Whether the internal id of the reference is not known
    pub fn is_unknown(&self) -> bool {
        self.internal_primary_key.is_none()
    }
}

impl PartialEq for ReferenceKey {
    fn eq(&self, other: &Self) -> bool {
        self.reference_name == other.reference_name && self.primary_key == other.primary_key
    }
}

impl Eq for ReferenceKey {}

impl Hash for ReferenceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.reference_name.hash(state);
        self.primary_key.hash(state);
    }
}

impl PartialOrd for ReferenceKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReferenceKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.reference_name
            .cmp(&other.reference_name)
            .then(self.primary_key.cmp(&other.primary_key))
    }
}

impl fmt::Display for ReferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reference_name, self.primary_key)
    }
}

/// Reference key extended with a snapshot of representative attribute values
///
/// Several reduced indices may exist for the same referenced entity when the
/// reference carries representative attributes; the values tell them apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepresentativeReferenceKey {
    /// Underlying reference
    pub reference_key: ReferenceKey,
    /// Values of the representative attributes, in schema order
    pub representative_values: Vec<AttributeValue>,
}

impl RepresentativeReferenceKey {
    /// Create a representative key
    pub fn new(reference_key: ReferenceKey, representative_values: Vec<AttributeValue>) -> Self {
        Self {
            reference_key,
            representative_values,
        }
    }

    /// Reference name of the underlying reference
    pub fn reference_name(&self) -> &str {
        &self.reference_key.reference_name
    }

    /// Primary key of the referenced entity
    pub fn primary_key(&self) -> u32 {
        self.reference_key.primary_key
    }

    /// Compare two keys, failing when the representative arrays differ in length
    ///
    /// Keys sharing reference name and primary key must come from the same
    /// reference schema and therefore carry the same number of values.
    pub fn try_cmp(&self, other: &Self) -> Result<Ordering> {
        let by_reference = self.reference_key.cmp(&other.reference_key);
        if by_reference != Ordering::Equal {
            return Ok(by_reference);
        }
        if self.representative_values.len() != other.representative_values.len() {
            return Err(Error::internal(format!(
                "Representative attribute values of `{}` differ in length: {} vs {}",
                self.reference_key,
                self.representative_values.len(),
                other.representative_values.len()
            )));
        }
        Ok(self.cmp_values(other))
    }

    fn cmp_values(&self, other: &Self) -> Ordering {
        self.representative_values
            .iter()
            .zip(other.representative_values.iter())
            .map(|(a, b)| a.cmp(b))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for RepresentativeReferenceKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RepresentativeReferenceKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // length only breaks ties that try_cmp reports as errors
        self.reference_key
            .cmp(&other.reference_key)
            .then_with(|| self.cmp_values(other))
            .then_with(|| {
                self.representative_values
                    .len()
                    .cmp(&other.representative_values.len())
            })
    }
}

impl fmt::Display for RepresentativeReferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.reference_key)?;
        fmt::Display::fmt(
            &AttributeValue::Array(self.representative_values.clone()),
            f,
        )
    }
}

/// Distinguishes several entity indices of the same type and scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IndexDiscriminator {
    /// Reference name (referenced entity type indices)
    ReferenceName(String),
    /// Referenced entity (reduced indices)
    Reference(ReferenceKey),
    /// Referenced entity with representative attributes (reduced indices)
    Representative(RepresentativeReferenceKey),
    /// Hierarchy node primary key (hierarchy-reduced indices)
    HierarchyNode(u32),
}

impl IndexDiscriminator {
    /// Reference name the discriminator is tied to, if any
    pub fn reference_name(&self) -> Option<&str> {
        match self {
            IndexDiscriminator::ReferenceName(name) => Some(name),
            IndexDiscriminator::Reference(key) => Some(&key.reference_name),
            IndexDiscriminator::Representative(key) => Some(key.reference_name()),
            IndexDiscriminator::HierarchyNode(_) => None,
        }
    }
}

impl fmt::Display for IndexDiscriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexDiscriminator::ReferenceName(name) => f.write_str(name),
            IndexDiscriminator::Reference(key) => write!(f, "{}", key),
            IndexDiscriminator::Representative(key) => write!(f, "{}", key),
            IndexDiscriminator::HierarchyNode(pk) => write!(f, "node {}", pk),
        }
    }
}

/// Key of an entity index
///
/// Ordered by scope, then type, then discriminator (absent first).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityIndexKey {
    /// Scope of the index
    pub scope: Scope,
    /// Kind of the index
    pub index_type: EntityIndexType,
    /// Distinguishes indices sharing type and scope
    pub discriminator: Option<IndexDiscriminator>,
}

impl EntityIndexKey {
    /// Create a key
    pub fn new(
        index_type: EntityIndexType,
        scope: Scope,
        discriminator: Option<IndexDiscriminator>,
    ) -> Self {
        Self {
            scope,
            index_type,
            discriminator,
        }
    }

    /// Key of the global index of a scope
    pub fn global(scope: Scope) -> Self {
        Self::new(EntityIndexType::Global, scope, None)
    }

    /// Key of the referenced entity type index of a reference
    pub fn referenced_entity_type(scope: Scope, reference_name: impl Into<String>) -> Self {
        Self::new(
            EntityIndexType::ReferencedEntityType,
            scope,
            Some(IndexDiscriminator::ReferenceName(reference_name.into())),
        )
    }

    /// Key of the reduced index of one referenced entity
    pub fn referenced_entity(scope: Scope, reference_key: ReferenceKey) -> Self {
        Self::new(
            EntityIndexType::ReferencedEntity,
            scope,
            Some(IndexDiscriminator::Reference(reference_key)),
        )
    }

    /// Key of the reduced index of one referenced entity and representative values
    pub fn representative(scope: Scope, key: RepresentativeReferenceKey) -> Self {
        Self::new(
            EntityIndexType::ReferencedEntity,
            scope,
            Some(IndexDiscriminator::Representative(key)),
        )
    }

    /// Key of the reduced index of one hierarchy node
    pub fn hierarchy_node(scope: Scope, node_primary_key: u32) -> Self {
        Self::new(
            EntityIndexType::ReferencedHierarchyNode,
            scope,
            Some(IndexDiscriminator::HierarchyNode(node_primary_key)),
        )
    }

    /// Reference name addressed by the discriminator, if any
    pub fn reference_name(&self) -> Option<&str> {
        self.discriminator
            .as_ref()
            .and_then(IndexDiscriminator::reference_name)
    }
}

impl fmt::Display for EntityIndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.index_type)?;
        if let Some(discriminator) = &self.discriminator {
            write!(f, ":{}", discriminator)?;
        }
        Ok(())
    }
}

/// Attribute name with the locale of its localized variant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttributeKey {
    /// Attribute name
    pub attribute_name: String,
    /// Locale for localized attributes
    pub locale: Option<Locale>,
}

impl AttributeKey {
    /// Key of a non-localized attribute
    pub fn new(attribute_name: impl Into<String>) -> Self {
        Self {
            attribute_name: attribute_name.into(),
            locale: None,
        }
    }

    /// Key of a localized attribute
    pub fn localized(attribute_name: impl Into<String>, locale: Locale) -> Self {
        Self {
            attribute_name: attribute_name.into(),
            locale: Some(locale),
        }
    }

    /// Key with an optional locale
    pub fn with_locale(attribute_name: impl Into<String>, locale: Option<&Locale>) -> Self {
        Self {
            attribute_name: attribute_name.into(),
            locale: locale.cloned(),
        }
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.locale {
            Some(locale) => write!(f, "{}:{}", self.attribute_name, locale),
            None => f.write_str(&self.attribute_name),
        }
    }
}
