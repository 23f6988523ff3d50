//! Attachment of an index to the catalog instance that owns it

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fmt;
use strata_index_core::{Error, Result};

/// Lifecycle phase of a catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CatalogState {
    /// Bulk loading without transactions
    WarmingUp,
    /// Serving transactions
    Alive,
}

/// Identity of the catalog instance an index belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CatalogRef {
    /// Catalog name
    pub name: String,
    /// Catalog version the instance was created for
    pub version: u64,
}

impl CatalogRef {
    /// Create a catalog reference
    pub fn new(name: impl Into<String>, version: u64) -> Self {
        CatalogRef {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for CatalogRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

#[derive(Debug, Clone)]
struct Attached {
    entity_type: Option<String>,
    catalog: CatalogRef,
}

/// Write-once link from an index to its catalog
#[derive(Debug, Clone, Default)]
pub struct CatalogAttachment {
    cell: OnceCell<Attached>,
}

impl CatalogAttachment {
    /// Unattached link
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach to `catalog`; fails when already attached
    pub fn attach(&self, entity_type: Option<&str>, catalog: CatalogRef) -> Result<()> {
        let attached = Attached {
            entity_type: entity_type.map(str::to_owned),
            catalog,
        };
        self.cell.set(attached).map_err(|rejected| {
            let current = self
                .cell
                .get()
                .map(|it| it.catalog.to_string())
                .unwrap_or_default();
            Error::internal(format!(
                "Index is already attached to catalog {}, cannot attach it to {}",
                current, rejected.catalog
            ))
        })
    }

    /// Catalog the index is attached to
    pub fn catalog(&self) -> Option<&CatalogRef> {
        self.cell.get().map(|it| &it.catalog)
    }

    /// Entity type supplied at attachment
    pub fn entity_type(&self) -> Option<&str> {
        self.cell.get().and_then(|it| it.entity_type.as_deref())
    }

    /// Whether the index is attached
    pub fn is_attached(&self) -> bool {
        self.cell.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_once() {
        let attachment = CatalogAttachment::new();
        assert!(!attachment.is_attached());
        attachment
            .attach(Some("product"), CatalogRef::new("shop", 1))
            .unwrap();
        assert_eq!(attachment.catalog(), Some(&CatalogRef::new("shop", 1)));
        assert_eq!(attachment.entity_type(), Some("product"));

        let err = attachment
            .attach(Some("product"), CatalogRef::new("shop", 2))
            .unwrap_err();
        assert!(matches!(err, Error::InternalConsistency(_)));
        assert_eq!(attachment.catalog().map(|c| c.version), Some(1));
    }
}
