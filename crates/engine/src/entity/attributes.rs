//! Attribute mutations of entity indices

use super::{EntityIndex, EntityIndexKind};
use crate::attribute::AttributeCardinalityIndex;
use std::collections::BTreeSet;
use strata_index_concurrency::{LayerMaintainer, TransactionalLayerProducer};
use strata_index_core::{
    AttributeKey, AttributeSchema, AttributeValue, EntitySchema, Error, Locale, Result,
    SortableAttributeCompoundSchema,
};

/// What a partitioning check is about
enum Guarded<'a> {
    Attribute(&'a str),
    Compound(&'a str),
}

impl EntityIndex {
    /// Locales accepted for attribute data, including `locale` itself when
    /// the schema lets locales be added on the fly
    fn allowed_locales(schema: &EntitySchema, locale: Option<&Locale>) -> BTreeSet<Locale> {
        let mut allowed = schema.locales.clone();
        if let Some(locale) = locale.filter(|it| schema.is_locale_allowed(it)) {
            allowed.insert(locale.clone());
        }
        allowed
    }

    /// Reduced indices of non-partitioning references only mirror the
    /// attributes declared on the reference
    fn assert_partitioning_index(&self, schema: &EntitySchema, guarded: Guarded<'_>) -> Result<()> {
        if !matches!(self.kind, EntityIndexKind::Reduced { .. }) {
            return Ok(());
        }
        let Some(reference_name) = self.index_key.reference_name() else {
            return Ok(());
        };
        let reference = schema.reference_or_err(reference_name)?;
        let (declared, what, name) = match guarded {
            Guarded::Attribute(name) => (reference.declares_attribute(name), "attribute", name),
            Guarded::Compound(name) => (reference.declares_compound(name), "compound", name),
        };
        if declared || reference.is_partitioning() {
            return Ok(());
        }
        Err(Error::internal(format!(
            "Reduced index `{}` of non-partitioning reference `{}` cannot hold entity {} `{}`",
            self.index_key, reference_name, what, name
        )))
    }

    /// Register a unique attribute value of `record_id`
    pub fn insert_unique_attribute(
        &self,
        tx: &mut LayerMaintainer,
        schema: &EntitySchema,
        attribute: &AttributeSchema,
        locale: Option<&Locale>,
        value: &AttributeValue,
        record_id: u32,
    ) -> Result<()> {
        self.assert_partitioning_index(schema, Guarded::Attribute(&attribute.name))?;
        let allowed = Self::allowed_locales(schema, locale);
        self.attribute_index
            .insert_unique_attribute(tx, attribute, &allowed, locale, value, record_id)
    }

    /// Release a unique attribute value of `record_id`
    pub fn remove_unique_attribute(
        &self,
        tx: &mut LayerMaintainer,
        schema: &EntitySchema,
        attribute: &AttributeSchema,
        locale: Option<&Locale>,
        value: &AttributeValue,
        record_id: u32,
    ) -> Result<()> {
        self.assert_partitioning_index(schema, Guarded::Attribute(&attribute.name))?;
        let allowed = Self::allowed_locales(schema, locale);
        self.attribute_index
            .remove_unique_attribute(tx, attribute, &allowed, locale, value, record_id)
    }

    /// Index a filterable attribute value of `record_id`
    ///
    /// Referenced type indices count contributions per element and only
    /// index the elements seen for the first time.
    pub fn insert_filter_attribute(
        &self,
        tx: &mut LayerMaintainer,
        schema: &EntitySchema,
        attribute: &AttributeSchema,
        locale: Option<&Locale>,
        value: &AttributeValue,
        record_id: u32,
    ) -> Result<()> {
        self.assert_partitioning_index(schema, Guarded::Attribute(&attribute.name))?;
        let allowed = Self::allowed_locales(schema, locale);
        match &self.kind {
            EntityIndexKind::ReferencedType {
                attribute_cardinalities,
                ..
            } => {
                let key = crate::attribute::attribute_key(attribute, &allowed, locale)?;
                let cardinalities = attribute_cardinalities.compute_if_absent(tx, &key, || {
                    AttributeCardinalityIndex::new(key.clone())
                })?;
                let first_seen = cardinalities.add_record(tx, record_id, value)?;
                self.attribute_index.add_delta_filter_attribute(
                    tx,
                    attribute,
                    &allowed,
                    locale,
                    &first_seen,
                    record_id,
                )
            }
            _ => self
                .attribute_index
                .insert_filter_attribute(tx, attribute, &allowed, locale, value, record_id),
        }
    }

    /// Unindex a filterable attribute value of `record_id`
    pub fn remove_filter_attribute(
        &self,
        tx: &mut LayerMaintainer,
        schema: &EntitySchema,
        attribute: &AttributeSchema,
        locale: Option<&Locale>,
        value: &AttributeValue,
        record_id: u32,
    ) -> Result<()> {
        self.assert_partitioning_index(schema, Guarded::Attribute(&attribute.name))?;
        let allowed = Self::allowed_locales(schema, locale);
        match &self.kind {
            EntityIndexKind::ReferencedType {
                attribute_cardinalities,
                ..
            } => {
                let key = crate::attribute::attribute_key(attribute, &allowed, locale)?;
                let cardinalities = attribute_cardinalities
                    .get_for_update(tx, &key)
                    .ok_or_else(|| missing_cardinality(&key, record_id))?;
                let last_seen = cardinalities.remove_record(tx, record_id, value)?;
                if cardinalities.is_empty(Some(&*tx)) {
                    attribute_cardinalities.remove(tx, &key)?;
                    cardinalities.remove_layer(tx);
                }
                self.attribute_index.remove_delta_filter_attribute(
                    tx,
                    attribute,
                    &allowed,
                    locale,
                    &last_seen,
                    record_id,
                )
            }
            _ => self
                .attribute_index
                .remove_filter_attribute(tx, attribute, &allowed, locale, value, record_id),
        }
    }

    /// Index `record_id` under the elements added to an array attribute
    pub fn add_delta_filter_attribute(
        &self,
        tx: &mut LayerMaintainer,
        schema: &EntitySchema,
        attribute: &AttributeSchema,
        locale: Option<&Locale>,
        delta: &[AttributeValue],
        record_id: u32,
    ) -> Result<()> {
        if matches!(self.kind, EntityIndexKind::ReferencedType { .. }) {
            let value = AttributeValue::Array(delta.to_vec());
            return self.insert_filter_attribute(tx, schema, attribute, locale, &value, record_id);
        }
        self.assert_partitioning_index(schema, Guarded::Attribute(&attribute.name))?;
        let allowed = Self::allowed_locales(schema, locale);
        self.attribute_index
            .add_delta_filter_attribute(tx, attribute, &allowed, locale, delta, record_id)
    }

    /// Unindex `record_id` from the elements removed from an array attribute
    pub fn remove_delta_filter_attribute(
        &self,
        tx: &mut LayerMaintainer,
        schema: &EntitySchema,
        attribute: &AttributeSchema,
        locale: Option<&Locale>,
        delta: &[AttributeValue],
        record_id: u32,
    ) -> Result<()> {
        if matches!(self.kind, EntityIndexKind::ReferencedType { .. }) {
            let value = AttributeValue::Array(delta.to_vec());
            return self.remove_filter_attribute(tx, schema, attribute, locale, &value, record_id);
        }
        self.assert_partitioning_index(schema, Guarded::Attribute(&attribute.name))?;
        let allowed = Self::allowed_locales(schema, locale);
        self.attribute_index
            .remove_delta_filter_attribute(tx, attribute, &allowed, locale, delta, record_id)
    }

    /// Register the sortable value of `record_id`
    ///
    /// Referenced type indices do not sort and ignore the call.
    pub fn insert_sort_attribute(
        &self,
        tx: &mut LayerMaintainer,
        schema: &EntitySchema,
        attribute: &AttributeSchema,
        locale: Option<&Locale>,
        value: &AttributeValue,
        record_id: u32,
    ) -> Result<()> {
        if matches!(self.kind, EntityIndexKind::ReferencedType { .. }) {
            return Ok(());
        }
        self.assert_partitioning_index(schema, Guarded::Attribute(&attribute.name))?;
        let allowed = Self::allowed_locales(schema, locale);
        self.attribute_index
            .insert_sort_attribute(tx, attribute, &allowed, locale, value, record_id)
    }

    /// Unregister the sortable value of `record_id`
    pub fn remove_sort_attribute(
        &self,
        tx: &mut LayerMaintainer,
        schema: &EntitySchema,
        attribute: &AttributeSchema,
        locale: Option<&Locale>,
        value: &AttributeValue,
        record_id: u32,
    ) -> Result<()> {
        if matches!(self.kind, EntityIndexKind::ReferencedType { .. }) {
            return Ok(());
        }
        self.assert_partitioning_index(schema, Guarded::Attribute(&attribute.name))?;
        let allowed = Self::allowed_locales(schema, locale);
        self.attribute_index
            .remove_sort_attribute(tx, attribute, &allowed, locale, value, record_id)
    }

    /// Register the compound tuple of `record_id`
    pub fn insert_sort_attribute_compound(
        &self,
        tx: &mut LayerMaintainer,
        schema: &EntitySchema,
        compound: &SortableAttributeCompoundSchema,
        locale: Option<&Locale>,
        values: Vec<AttributeValue>,
        record_id: u32,
    ) -> Result<()> {
        if matches!(self.kind, EntityIndexKind::ReferencedType { .. }) {
            return Ok(());
        }
        self.assert_partitioning_index(schema, Guarded::Compound(&compound.name))?;
        self.attribute_index
            .insert_sort_attribute_compound(tx, compound, locale, values, record_id)
    }

    /// Unregister the compound tuple of `record_id`
    pub fn remove_sort_attribute_compound(
        &self,
        tx: &mut LayerMaintainer,
        schema: &EntitySchema,
        compound: &SortableAttributeCompoundSchema,
        locale: Option<&Locale>,
        values: Vec<AttributeValue>,
        record_id: u32,
    ) -> Result<()> {
        if matches!(self.kind, EntityIndexKind::ReferencedType { .. }) {
            return Ok(());
        }
        self.assert_partitioning_index(schema, Guarded::Compound(&compound.name))?;
        self.attribute_index
            .remove_sort_attribute_compound(tx, compound, locale, values, record_id)
    }

    /// Contribution count of `value` to reduced index `record_id`
    ///
    /// Always zero outside referenced type indices.
    pub fn attribute_cardinality(
        &self,
        tx: Option<&LayerMaintainer>,
        attribute: &AttributeKey,
        value: &AttributeValue,
        record_id: u32,
    ) -> u32 {
        match &self.kind {
            EntityIndexKind::ReferencedType {
                attribute_cardinalities,
                ..
            } => attribute_cardinalities
                .get(tx, attribute)
                .map_or(0, |it| it.cardinality(tx, value, record_id)),
            _ => 0,
        }
    }
}

fn missing_cardinality(attribute: &AttributeKey, record_id: u32) -> Error {
    Error::internal(format!(
        "No cardinality of attribute `{}` is recorded for index {}",
        attribute, record_id
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_index_core::{
        AttributeUniquenessType, EntityIndexKey, ReferenceIndexType, ReferenceKey, ReferenceSchema,
        Scope,
    };

    fn schema(index_type: ReferenceIndexType) -> EntitySchema {
        EntitySchema::new("product")
            .with_locale(Locale::new("en-US"))
            .with_reference(
                ReferenceSchema::new("brand", "brand", index_type)
                    .with_attribute(AttributeSchema::new("priority").filterable()),
            )
    }

    fn brand_index() -> EntityIndex {
        EntityIndex::reduced(
            2,
            "product",
            EntityIndexKey::referenced_entity(Scope::Live, ReferenceKey::new("brand", 1)),
        )
        .unwrap()
    }

    #[test]
    fn test_partitioning_guard_leaves_filter_untouched() {
        let index = brand_index();
        let schema = schema(ReferenceIndexType::ForFiltering);
        let code = AttributeSchema::new("code").filterable();
        let mut tx = LayerMaintainer::new(1);

        let err = index
            .insert_filter_attribute(&mut tx, &schema, &code, None, &AttributeValue::from("A"), 1)
            .unwrap_err();
        assert!(matches!(err, Error::InternalConsistency(_)));
        assert!(index
            .attribute_index()
            .get_filter_index(Some(&tx), &AttributeKey::new("code"))
            .is_none());
        assert_eq!(tx.pending_layers(), 0);

        let priority = AttributeSchema::new("priority").filterable();
        index
            .insert_filter_attribute(&mut tx, &schema, &priority, None, &AttributeValue::Int(3), 1)
            .unwrap();
        assert!(index
            .attribute_index()
            .get_filter_index(Some(&tx), &AttributeKey::new("priority"))
            .is_some());
    }

    #[test]
    fn test_partitioning_reference_accepts_entity_attributes() {
        let index = brand_index();
        let schema = schema(ReferenceIndexType::ForFilteringAndPartitioning);
        let code =
            AttributeSchema::new("code").unique(AttributeUniquenessType::UniqueWithinCollection);
        let mut tx = LayerMaintainer::new(1);
        index
            .insert_unique_attribute(&mut tx, &schema, &code, None, &AttributeValue::from("A"), 1)
            .unwrap();
        index
            .remove_unique_attribute(&mut tx, &schema, &code, None, &AttributeValue::from("A"), 1)
            .unwrap();
        assert!(index.attribute_index().is_empty(Some(&tx)));
    }

    #[test]
    fn test_referenced_type_counts_filter_contributions() {
        let index = EntityIndex::referenced_type(3, "product", Scope::Live, "brand");
        let schema = schema(ReferenceIndexType::ForFiltering);
        let tag = AttributeSchema::new("tag").filterable();
        let key = AttributeKey::new("tag");
        let red = AttributeValue::from("red");
        let mut tx = LayerMaintainer::new(1);

        let both = AttributeValue::Array(vec![red.clone(), AttributeValue::from("blue")]);
        index.insert_filter_attribute(&mut tx, &schema, &tag, None, &both, 7).unwrap();
        index.insert_filter_attribute(&mut tx, &schema, &tag, None, &red, 7).unwrap();
        assert_eq!(index.attribute_cardinality(Some(&tx), &key, &red, 7), 2);

        index.remove_filter_attribute(&mut tx, &schema, &tag, None, &both, 7).unwrap();
        let filter = index
            .attribute_index()
            .get_filter_index(Some(&tx), &key)
            .unwrap();
        assert_eq!(filter.get_records_formula(Some(&tx), &red).len(), 1);
        assert!(filter
            .get_records_formula(Some(&tx), &AttributeValue::from("blue"))
            .is_empty());

        index.remove_filter_attribute(&mut tx, &schema, &tag, None, &red, 7).unwrap();
        assert!(index.is_empty(Some(&tx)));
    }

    #[test]
    fn test_referenced_type_ignores_sorting() {
        let index = EntityIndex::referenced_type(3, "product", Scope::Live, "brand");
        let schema = schema(ReferenceIndexType::ForFiltering);
        let priority = AttributeSchema::new("priority").sortable();
        let mut tx = LayerMaintainer::new(1);
        index
            .insert_sort_attribute(&mut tx, &schema, &priority, None, &AttributeValue::Int(1), 1)
            .unwrap();
        assert_eq!(tx.pending_layers(), 0);
    }

    #[test]
    fn test_localized_attribute_accepts_evolving_locale() {
        let index = EntityIndex::global(1, "product", Scope::Live);
        let schema = schema(ReferenceIndexType::ForFiltering)
            .with_evolution_mode(strata_index_core::EvolutionMode::AddingLocales);
        let name = AttributeSchema::new("name").localized().filterable();
        let de = Locale::new("de-DE");
        let mut tx = LayerMaintainer::new(1);
        index
            .insert_filter_attribute(
                &mut tx,
                &schema,
                &name,
                Some(&de),
                &AttributeValue::from("Hut"),
                1,
            )
            .unwrap();
        assert!(index
            .attribute_index()
            .get_filter_index(Some(&tx), &AttributeKey::localized("name", de))
            .is_some());
    }
}
