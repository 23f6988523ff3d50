//! Entity indices
//!
//! An [`EntityIndex`] keeps, for one entity collection and scope, the set of
//! indexed primary keys, their per-locale subsets and the attribute,
//! hierarchy, facet and price sub-indices. The [`EntityIndexKind`] decides
//! which of the three flavours the index is:
//! - global: every entity of the collection, owns prices
//! - reduced: entities related to one referenced entity or hierarchy node
//! - referenced type: reduced index primary keys of one reference
//!
//! ## Generations
//!
//! Committed generations are immutable. Writes go through a
//! [`LayerMaintainer`]; committing it through the producer contract yields
//! the next generation, whose `version` grows only when the index itself
//! was dirty.

mod attributes;
mod handle;
mod kind;
mod prices;
mod referenced;

pub use handle::EntityIndexHandle;
pub use kind::EntityIndexKind;

use crate::attachment::{CatalogAttachment, CatalogRef, CatalogState};
use crate::attribute::{AttributeIndex, AttributeIndexStorageKey};
use crate::facet::FacetIndex;
use crate::formula::Formula;
use crate::hierarchy::HierarchyIndex;
use crate::index::Index;
use crate::price::PriceIndexKey;
use crate::storage::{EntityIndexPart, StoragePart};
use roaring::RoaringBitmap;
use std::collections::BTreeSet;
use std::sync::Arc;
use strata_index_concurrency::{
    LayerMaintainer, TransactionalBitmap, TransactionalBoolean, TransactionalLayerProducer,
    TransactionalMap,
};
use strata_index_core::{
    EntityIndexKey, EntityIndexType, EntitySchema, Error, Locale, ProducerId, Result, Scope,
};

/// Header state captured when a generation is created
///
/// The header part is written whenever the current state differs from it,
/// even if the dirty flag is clear: sub-indices appear and disappear
/// without touching the flag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct CapturedState {
    hierarchy_empty: bool,
    internal_price_id_sequence: Option<u32>,
    attribute_keys: BTreeSet<AttributeIndexStorageKey>,
    price_keys: BTreeSet<PriceIndexKey>,
    facet_references: BTreeSet<String>,
}

/// Index of one entity collection in one scope
#[derive(Debug, Clone)]
pub struct EntityIndex {
    id: ProducerId,
    primary_key: u32,
    index_key: EntityIndexKey,
    entity_type: String,
    version: u64,
    dirty: TransactionalBoolean,
    entity_ids: TransactionalBitmap,
    entity_ids_by_locale: TransactionalMap<Locale, TransactionalBitmap>,
    attribute_index: AttributeIndex,
    hierarchy_index: HierarchyIndex,
    facet_index: FacetIndex,
    kind: EntityIndexKind,
    original: Arc<CapturedState>,
    attachment: CatalogAttachment,
    catalog_state: Option<CatalogState>,
}

impl EntityIndex {
    /// Create the empty global index of `entity_type`
    pub fn global(primary_key: u32, entity_type: impl Into<String>, scope: Scope) -> Self {
        Self::assemble(
            primary_key,
            EntityIndexKey::global(scope),
            entity_type.into(),
            1,
            EntityIndexKind::global(),
        )
    }

    /// Create an empty reduced index
    ///
    /// `index_key` must address a referenced entity or a hierarchy node.
    pub fn reduced(
        primary_key: u32,
        entity_type: impl Into<String>,
        index_key: EntityIndexKey,
    ) -> Result<Self> {
        match index_key.index_type {
            EntityIndexType::ReferencedEntity | EntityIndexType::ReferencedHierarchyNode => {
                Ok(Self::assemble(
                    primary_key,
                    index_key,
                    entity_type.into(),
                    1,
                    EntityIndexKind::reduced(),
                ))
            }
            other => Err(Error::internal(format!(
                "Reduced index cannot be keyed by {} index key `{}`",
                other, index_key
            ))),
        }
    }

    /// Create an empty referenced entity type index for `reference_name`
    pub fn referenced_type(
        primary_key: u32,
        entity_type: impl Into<String>,
        scope: Scope,
        reference_name: impl Into<String>,
    ) -> Self {
        Self::assemble(
            primary_key,
            EntityIndexKey::referenced_entity_type(scope, reference_name),
            entity_type.into(),
            1,
            EntityIndexKind::referenced_type(),
        )
    }

    /// Restore an index from its persisted header and loaded sub-indices
    ///
    /// The loaded state becomes the captured original state.
    pub fn restore(
        entity_type: impl Into<String>,
        header: EntityIndexPart,
        attribute_index: AttributeIndex,
        hierarchy_index: HierarchyIndex,
        facet_index: FacetIndex,
        kind: EntityIndexKind,
    ) -> Self {
        let entity_ids_by_locale = header
            .entity_ids_by_locale
            .into_iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(locale, ids)| {
                let ids = TransactionalBitmap::from_bitmap(ids.into_iter().collect());
                (locale, ids)
            })
            .collect();
        EntityIndex {
            id: ProducerId::next(),
            primary_key: header.primary_key,
            index_key: header.index_key,
            entity_type: entity_type.into(),
            version: header.version,
            dirty: TransactionalBoolean::new(),
            entity_ids: TransactionalBitmap::from_bitmap(header.entity_ids.into_iter().collect()),
            entity_ids_by_locale: TransactionalMap::from_map(entity_ids_by_locale),
            attribute_index,
            hierarchy_index,
            facet_index,
            kind,
            original: Arc::default(),
            attachment: CatalogAttachment::new(),
            catalog_state: None,
        }
        .with_captured_state()
    }

    fn assemble(
        primary_key: u32,
        index_key: EntityIndexKey,
        entity_type: String,
        version: u64,
        kind: EntityIndexKind,
    ) -> Self {
        EntityIndex {
            id: ProducerId::next(),
            primary_key,
            index_key,
            attribute_index: AttributeIndex::new(entity_type.as_str()),
            entity_type,
            version,
            dirty: TransactionalBoolean::new(),
            entity_ids: TransactionalBitmap::new(),
            entity_ids_by_locale: TransactionalMap::new(),
            hierarchy_index: HierarchyIndex::new(),
            facet_index: FacetIndex::new(),
            kind,
            original: Arc::default(),
            attachment: CatalogAttachment::new(),
            catalog_state: None,
        }
        .with_captured_state()
    }

    fn with_captured_state(mut self) -> Self {
        self.original = Arc::new(self.capture(None));
        self
    }

    fn capture(&self, tx: Option<&LayerMaintainer>) -> CapturedState {
        CapturedState {
            hierarchy_empty: self.hierarchy_index.is_empty(tx),
            internal_price_id_sequence: self.kind.internal_price_id_sequence(tx),
            attribute_keys: self.attribute_index.storage_keys(tx, &self.index_key),
            price_keys: self.kind.price_index_keys(tx),
            facet_references: self.facet_index.referenced_entities(tx),
        }
    }

    /// Identity of this generation
    pub fn id(&self) -> ProducerId {
        self.id
    }

    /// Stable primary key of the index
    pub fn primary_key(&self) -> u32 {
        self.primary_key
    }

    /// Entity type the index belongs to
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Version of this generation
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Flavour-specific state
    pub fn kind(&self) -> &EntityIndexKind {
        &self.kind
    }

    /// Attribute sub-indices
    pub fn attribute_index(&self) -> &AttributeIndex {
        &self.attribute_index
    }

    /// Hierarchy sub-index
    pub fn hierarchy_index(&self) -> &HierarchyIndex {
        &self.hierarchy_index
    }

    /// Facet sub-index
    pub fn facet_index(&self) -> &FacetIndex {
        &self.facet_index
    }

    fn ensure_not_referenced_type(&self, operation: &str) -> Result<()> {
        if matches!(self.kind, EntityIndexKind::ReferencedType { .. }) {
            return Err(Error::internal(format!(
                "Referenced type index `{}` does not support `{}`, use the reference aware variant",
                self.index_key, operation
            )));
        }
        Ok(())
    }

    /// Register an entity primary key; `false` when already present
    pub fn insert_primary_key_if_missing(
        &self,
        tx: &mut LayerMaintainer,
        primary_key: u32,
    ) -> Result<bool> {
        self.ensure_not_referenced_type("insert_primary_key_if_missing")?;
        self.add_primary_key(tx, primary_key)
    }

    /// Unregister an entity primary key; `false` when absent
    pub fn remove_primary_key(&self, tx: &mut LayerMaintainer, primary_key: u32) -> Result<bool> {
        self.ensure_not_referenced_type("remove_primary_key")?;
        self.drop_primary_key(tx, primary_key)
    }

    fn add_primary_key(&self, tx: &mut LayerMaintainer, primary_key: u32) -> Result<bool> {
        let added = self.entity_ids.add(tx, primary_key)?;
        if added {
            self.dirty.set_true(tx)?;
        }
        Ok(added)
    }

    fn drop_primary_key(&self, tx: &mut LayerMaintainer, primary_key: u32) -> Result<bool> {
        let removed = self.entity_ids.remove(tx, primary_key)?;
        if removed {
            self.dirty.set_true(tx)?;
        }
        Ok(removed)
    }

    /// Whether `primary_key` is registered
    pub fn is_primary_key_known(&self, tx: Option<&LayerMaintainer>, primary_key: u32) -> bool {
        self.entity_ids.contains(tx, primary_key)
    }

    /// Every registered primary key
    pub fn get_all_primary_keys(&self, tx: Option<&LayerMaintainer>) -> Arc<RoaringBitmap> {
        self.entity_ids.snapshot(tx)
    }

    /// Every registered primary key as a formula
    pub fn get_all_primary_keys_formula(&self, tx: Option<&LayerMaintainer>) -> Formula {
        Formula::constant(self.entity_ids.snapshot(tx))
    }

    /// Record that `primary_key` has data in `locale`
    ///
    /// The locale must be allowed by `schema` (or the schema must allow
    /// adding locales) and the primary key must already be registered.
    pub fn upsert_language(
        &self,
        tx: &mut LayerMaintainer,
        locale: &Locale,
        primary_key: u32,
        schema: &EntitySchema,
    ) -> Result<bool> {
        if !schema.is_locale_allowed(locale) {
            return Err(Error::schema(format!(
                "Locale `{}` is not allowed by the schema of `{}`",
                locale, schema.name
            )));
        }
        if !self.entity_ids.contains(Some(&*tx), primary_key) {
            return Err(Error::internal(format!(
                "Entity {} must be registered in index `{}` before its locale `{}`",
                primary_key, self.index_key, locale
            )));
        }
        let ids = self
            .entity_ids_by_locale
            .compute_if_absent(tx, locale, TransactionalBitmap::new)?;
        let added = ids.add(tx, primary_key)?;
        if added {
            self.dirty.set_true(tx)?;
        }
        Ok(added)
    }

    /// Record that `primary_key` no longer has data in `locale`
    ///
    /// Reduced indices tolerate removing a locale that was never indexed
    /// and answer `false`; other flavours fail.
    pub fn remove_language(
        &self,
        tx: &mut LayerMaintainer,
        locale: &Locale,
        primary_key: u32,
    ) -> Result<bool> {
        let ids = self.entity_ids_by_locale.get_for_update(tx, locale);
        let indexed = ids
            .as_ref()
            .map_or(false, |ids| ids.contains(Some(&*tx), primary_key));
        let Some(ids) = ids.filter(|_| indexed) else {
            if matches!(self.kind, EntityIndexKind::Reduced { .. }) {
                return Ok(false);
            }
            return Err(Error::internal(format!(
                "Entity {} has unexpectedly no data indexed for locale `{}` in index `{}`",
                primary_key, locale, self.index_key
            )));
        };
        ids.remove(tx, primary_key)?;
        if ids.is_empty(Some(&*tx)) {
            self.entity_ids_by_locale.remove(tx, locale)?;
            ids.remove_layer(tx);
        }
        self.dirty.set_true(tx)?;
        Ok(true)
    }

    /// Entities with data in `locale`
    pub fn get_records_with_language_formula(
        &self,
        tx: Option<&LayerMaintainer>,
        locale: &Locale,
    ) -> Formula {
        self.entity_ids_by_locale
            .get(tx, locale)
            .map_or(Formula::Empty, |ids| Formula::locale(locale.clone(), ids.snapshot(tx)))
    }

    /// Locales some entity has data in
    pub fn languages(&self, tx: Option<&LayerMaintainer>) -> BTreeSet<Locale> {
        self.entity_ids_by_locale.keys(tx).cloned().collect()
    }

    /// Place hierarchy node `node` under `parent`
    pub fn add_node(&self, tx: &mut LayerMaintainer, node: u32, parent: Option<u32>) -> Result<()> {
        self.ensure_hierarchy_allowed()?;
        self.hierarchy_index.add_node(tx, node, parent)
    }

    /// Remove hierarchy node `node`, returning its former parent
    pub fn remove_node(&self, tx: &mut LayerMaintainer, node: u32) -> Result<Option<u32>> {
        self.ensure_hierarchy_allowed()?;
        self.hierarchy_index.remove_node(tx, node)
    }

    fn ensure_hierarchy_allowed(&self) -> Result<()> {
        if matches!(self.kind, EntityIndexKind::Reduced { .. }) {
            return Err(Error::internal(format!(
                "Reduced index `{}` cannot hold hierarchy nodes",
                self.index_key
            )));
        }
        Ok(())
    }

    /// Register `entity_pk` under facet `facet_pk` of `reference_name`
    pub fn add_facet(
        &self,
        tx: &mut LayerMaintainer,
        reference_name: &str,
        facet_pk: u32,
        entity_pk: u32,
    ) -> Result<bool> {
        self.facet_index.add_facet(tx, reference_name, facet_pk, entity_pk)
    }

    /// Unregister `entity_pk` from facet `facet_pk` of `reference_name`
    pub fn remove_facet(
        &self,
        tx: &mut LayerMaintainer,
        reference_name: &str,
        facet_pk: u32,
        entity_pk: u32,
    ) -> Result<()> {
        self.facet_index.remove_facet(tx, reference_name, facet_pk, entity_pk)
    }

    /// Whether the index holds no data and may be dropped
    ///
    /// Locales are not consulted: their bitmaps are subsets of the primary
    /// keys.
    pub fn is_empty(&self, tx: Option<&LayerMaintainer>) -> bool {
        self.entity_ids.is_empty(tx)
            && self.attribute_index.is_empty(tx)
            && self.hierarchy_index.is_empty(tx)
            && self.facet_index.is_empty(tx)
            && self.kind.is_empty(tx)
    }

    /// Version the next generation will carry
    fn next_version(&self, tx: Option<&LayerMaintainer>) -> u64 {
        if self.dirty.is_true(tx) {
            self.version + 1
        } else {
            self.version
        }
    }

    fn header_part(&self, tx: Option<&LayerMaintainer>, state: CapturedState) -> StoragePart {
        let mut entity_ids_by_locale: Vec<_> = self
            .entity_ids_by_locale
            .iter(tx)
            .map(|(locale, ids)| (locale.clone(), ids.to_vec(tx)))
            .collect();
        entity_ids_by_locale.sort_by(|a, b| a.0.cmp(&b.0));
        StoragePart::EntityIndex(EntityIndexPart {
            primary_key: self.primary_key,
            version: self.next_version(tx),
            index_key: self.index_key.clone(),
            entity_ids: self.entity_ids.to_vec(tx),
            entity_ids_by_locale: entity_ids_by_locale.into_iter().collect(),
            attribute_index_keys: state.attribute_keys,
            internal_price_id_sequence: state.internal_price_id_sequence,
            price_index_keys: state.price_keys,
            has_hierarchy: !state.hierarchy_empty,
            facet_referenced_entities: state.facet_references,
        })
    }

    /// Attach the index to the catalog instance owning it
    pub fn attach_to_catalog(&self, entity_type: Option<&str>, catalog: CatalogRef) -> Result<()> {
        self.attachment.attach(entity_type, catalog)
    }

    /// Catalog the index is attached to
    pub fn catalog(&self) -> Option<&CatalogRef> {
        self.attachment.catalog()
    }

    /// State of the catalog this copy was created for
    pub fn catalog_state(&self) -> Option<CatalogState> {
        self.catalog_state
    }

    /// Unattached copy sharing all data, for a new catalog instance
    pub fn create_copy_for_new_catalog_attachment(&self, state: CatalogState) -> Self {
        EntityIndex {
            id: ProducerId::next(),
            attachment: CatalogAttachment::new(),
            catalog_state: Some(state),
            ..self.clone()
        }
    }
}

impl Index for EntityIndex {
    type Key = EntityIndexKey;

    fn index_key(&self) -> &EntityIndexKey {
        &self.index_key
    }

    fn get_modified_storage_parts(
        &self,
        tx: Option<&LayerMaintainer>,
        sink: &mut Vec<StoragePart>,
    ) {
        let current = self.capture(tx);
        if self.dirty.is_true(tx) || current != *self.original {
            sink.push(self.header_part(tx, current));
        }
        sink.extend(self.hierarchy_index.storage_part(tx, self.primary_key));
        self.attribute_index
            .get_modified_storage_parts(tx, self.primary_key, sink);
        self.facet_index
            .get_modified_storage_parts(tx, self.primary_key, sink);
        self.kind.get_modified_storage_parts(tx, self.primary_key, sink);
    }

    fn reset_dirty(&self, tx: &mut LayerMaintainer) -> Result<()> {
        self.dirty.reset(tx)?;
        self.hierarchy_index.reset_dirty(tx)?;
        self.attribute_index.reset_dirty(tx)?;
        self.facet_index.reset_dirty(tx)?;
        self.kind.reset_dirty(tx)
    }
}

impl TransactionalLayerProducer for EntityIndex {
    type Layer = ();

    fn id(&self) -> ProducerId {
        self.id
    }

    fn create_layer(&self) {}

    fn merge_committed(
        &self,
        _layer: Option<()>,
        maintainer: &mut LayerMaintainer,
    ) -> Result<Self> {
        if !self.is_modified_in(maintainer) {
            return Ok(self.clone());
        }
        let version = self.next_version(Some(&*maintainer));
        self.dirty.remove_layer(maintainer);
        let merged = EntityIndex {
            id: ProducerId::next(),
            primary_key: self.primary_key,
            index_key: self.index_key.clone(),
            entity_type: self.entity_type.clone(),
            version,
            dirty: TransactionalBoolean::new(),
            entity_ids: maintainer.merge(&self.entity_ids)?,
            entity_ids_by_locale: maintainer.merge(&self.entity_ids_by_locale)?,
            attribute_index: maintainer.merge(&self.attribute_index)?,
            hierarchy_index: maintainer.merge(&self.hierarchy_index)?,
            facet_index: maintainer.merge(&self.facet_index)?,
            kind: self.kind.merge(maintainer)?,
            original: Arc::default(),
            attachment: self.attachment.clone(),
            catalog_state: self.catalog_state,
        };
        Ok(merged.with_captured_state())
    }

    fn remove_layer(&self, maintainer: &mut LayerMaintainer) {
        self.dirty.remove_layer(maintainer);
        self.entity_ids.remove_layer(maintainer);
        self.entity_ids_by_locale.remove_layer(maintainer);
        self.attribute_index.remove_layer(maintainer);
        self.hierarchy_index.remove_layer(maintainer);
        self.facet_index.remove_layer(maintainer);
        self.kind.remove_layer(maintainer);
    }

    fn is_modified_in(&self, maintainer: &LayerMaintainer) -> bool {
        self.dirty.is_modified_in(maintainer)
            || self.entity_ids.is_modified_in(maintainer)
            || self.entity_ids_by_locale.is_modified_in(maintainer)
            || self.attribute_index.is_modified_in(maintainer)
            || self.hierarchy_index.is_modified_in(maintainer)
            || self.facet_index.is_modified_in(maintainer)
            || self.kind.is_modified_in(maintainer)
    }
}
