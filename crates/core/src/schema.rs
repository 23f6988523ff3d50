//! Read-only schema contracts consulted by the indices
//!
//! Indices never mutate schema. They only ask:
//! - which locales an entity allows, and whether new ones may be added
//! - whether an attribute is localized and how it is unique
//! - how a reference is indexed and which attributes/compounds it declares

use crate::error::{Error, Result};
use crate::types::Locale;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Implicit schema changes permitted while indexing data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EvolutionMode {
    /// Locales not listed in the schema may be added on the fly
    AddingLocales,
    /// Attributes not listed in the schema may be added on the fly
    AddingAttributes,
    /// References not listed in the schema may be added on the fly
    AddingReferences,
}

/// Uniqueness of an attribute within its entity collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AttributeUniquenessType {
    /// Values may repeat
    #[default]
    NotUnique,
    /// Values are unique within the collection
    UniqueWithinCollection,
    /// Values are unique within the collection and locale
    UniqueWithinCollectionLocale,
}

/// Uniqueness of an attribute across all collections of a catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GlobalAttributeUniquenessType {
    /// Not globally unique
    #[default]
    NotUnique,
    /// Values are unique within the whole catalog
    UniqueWithinCatalog,
    /// Values are unique within the whole catalog and locale
    UniqueWithinCatalogLocale,
}

/// How a reference is indexed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReferenceIndexType {
    /// Not indexed at all
    #[default]
    None,
    /// Reduced indices hold the reference's own attributes only
    ForFiltering,
    /// Reduced indices also mirror entity attributes and prices
    ForFilteringAndPartitioning,
}

/// Attribute definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSchema {
    /// Attribute name
    pub name: String,
    /// Whether values differ per locale
    pub localized: bool,
    /// Uniqueness within the collection
    pub uniqueness: AttributeUniquenessType,
    /// Uniqueness across the catalog
    pub global_uniqueness: GlobalAttributeUniquenessType,
    /// Whether a filter index is maintained
    pub filterable: bool,
    /// Whether a sort index is maintained
    pub sortable: bool,
}

impl AttributeSchema {
    /// Plain, non-localized, non-unique attribute
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            localized: false,
            uniqueness: AttributeUniquenessType::NotUnique,
            global_uniqueness: GlobalAttributeUniquenessType::NotUnique,
            filterable: false,
            sortable: false,
        }
    }

    /// Mark the attribute as localized
    pub fn localized(mut self) -> Self {
        self.localized = true;
        self
    }

    /// Set collection uniqueness
    pub fn unique(mut self, uniqueness: AttributeUniquenessType) -> Self {
        self.uniqueness = uniqueness;
        self
    }

    /// Set catalog uniqueness
    pub fn unique_globally(mut self, uniqueness: GlobalAttributeUniquenessType) -> Self {
        self.global_uniqueness = uniqueness;
        self
    }

    /// Mark the attribute as filterable
    pub fn filterable(mut self) -> Self {
        self.filterable = true;
        self
    }

    /// Mark the attribute as sortable
    pub fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }

    /// Whether collection uniqueness is scoped per locale
    pub fn is_unique_within_locale(&self) -> bool {
        self.uniqueness == AttributeUniquenessType::UniqueWithinCollectionLocale
    }

    /// Whether catalog uniqueness is scoped per locale
    pub fn is_unique_globally_within_locale(&self) -> bool {
        self.global_uniqueness == GlobalAttributeUniquenessType::UniqueWithinCatalogLocale
    }

    /// Whether the attribute is unique across the catalog
    pub fn is_unique_globally(&self) -> bool {
        self.global_uniqueness != GlobalAttributeUniquenessType::NotUnique
    }
}

/// Sortable compound of several attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortableAttributeCompoundSchema {
    /// Compound name
    pub name: String,
    /// Attributes forming the compound, in sort priority order
    pub attributes: Vec<String>,
}

impl SortableAttributeCompoundSchema {
    /// Create a compound definition
    pub fn new(name: impl Into<String>, attributes: Vec<String>) -> Self {
        Self {
            name: name.into(),
            attributes,
        }
    }
}

/// Reference definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceSchema {
    /// Reference name
    pub name: String,
    /// Type of the referenced entity
    pub referenced_entity_type: String,
    /// Indexing level
    pub index_type: ReferenceIndexType,
    /// Attributes declared on the reference itself
    pub attributes: BTreeMap<String, AttributeSchema>,
    /// Sortable compounds declared on the reference itself
    pub compounds: BTreeMap<String, SortableAttributeCompoundSchema>,
}

impl ReferenceSchema {
    /// Create a reference definition
    pub fn new(
        name: impl Into<String>,
        referenced_entity_type: impl Into<String>,
        index_type: ReferenceIndexType,
    ) -> Self {
        Self {
            name: name.into(),
            referenced_entity_type: referenced_entity_type.into(),
            index_type,
            attributes: BTreeMap::new(),
            compounds: BTreeMap::new(),
        }
    }

    /// Declare an attribute on the reference
    pub fn with_attribute(mut self, attribute: AttributeSchema) -> Self {
        self.attributes.insert(attribute.name.clone(), attribute);
        self
    }

    /// Declare a sortable compound on the reference
    pub fn with_compound(mut self, compound: SortableAttributeCompoundSchema) -> Self {
        self.compounds.insert(compound.name.clone(), compound);
        self
    }

    /// Whether the reference is indexed at all
    pub fn is_indexed(&self) -> bool {
        self.index_type != ReferenceIndexType::None
    }

    /// Whether reduced indices of this reference mirror entity data
    pub fn is_partitioning(&self) -> bool {
        self.index_type == ReferenceIndexType::ForFilteringAndPartitioning
    }

    /// Whether the reference declares the attribute
    pub fn declares_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Whether the reference declares the compound
    pub fn declares_compound(&self, name: &str) -> bool {
        self.compounds.contains_key(name)
    }
}

/// Entity collection definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Entity type name
    pub name: String,
    /// Locales allowed for localized data
    pub locales: BTreeSet<Locale>,
    /// Implicit evolution permitted during indexing
    pub evolution_modes: BTreeSet<EvolutionMode>,
    /// Entity attributes
    pub attributes: BTreeMap<String, AttributeSchema>,
    /// Entity sortable compounds
    pub compounds: BTreeMap<String, SortableAttributeCompoundSchema>,
    /// References to other entities
    pub references: BTreeMap<String, ReferenceSchema>,
}

impl EntitySchema {
    /// Create an empty schema
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locales: BTreeSet::new(),
            evolution_modes: BTreeSet::new(),
            attributes: BTreeMap::new(),
            compounds: BTreeMap::new(),
            references: BTreeMap::new(),
        }
    }

    /// Allow a locale
    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locales.insert(locale);
        self
    }

    /// Permit an implicit evolution
    pub fn with_evolution_mode(mut self, mode: EvolutionMode) -> Self {
        self.evolution_modes.insert(mode);
        self
    }

    /// Declare an attribute
    pub fn with_attribute(mut self, attribute: AttributeSchema) -> Self {
        self.attributes.insert(attribute.name.clone(), attribute);
        self
    }

    /// Declare a sortable compound
    pub fn with_compound(mut self, compound: SortableAttributeCompoundSchema) -> Self {
        self.compounds.insert(compound.name.clone(), compound);
        self
    }

    /// Declare a reference
    pub fn with_reference(mut self, reference: ReferenceSchema) -> Self {
        self.references.insert(reference.name.clone(), reference);
        self
    }

    /// Whether data in `locale` may be indexed
    pub fn is_locale_allowed(&self, locale: &Locale) -> bool {
        self.locales.contains(locale)
            || self.evolution_modes.contains(&EvolutionMode::AddingLocales)
    }

    /// Attribute definition by name
    pub fn attribute(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.get(name)
    }

    /// Reference definition by name
    pub fn reference(&self, name: &str) -> Option<&ReferenceSchema> {
        self.references.get(name)
    }

    /// Reference definition by name, failing when it does not exist
    pub fn reference_or_err(&self, name: &str) -> Result<&ReferenceSchema> {
        self.references.get(name).ok_or_else(|| {
            Error::schema(format!(
                "Reference `{}` is not defined in schema of `{}`",
                name, self.name
            ))
        })
    }
}
