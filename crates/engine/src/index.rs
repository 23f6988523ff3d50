//! Contract shared by every top-level index

use crate::storage::StoragePart;
use strata_index_concurrency::LayerMaintainer;
use strata_index_core::Result;

/// Top-level index identified by a key and persisted as storage parts
pub trait Index {
    /// Key identifying the index
    type Key;

    /// Key of this index
    fn index_key(&self) -> &Self::Key;

    /// Append every part that changed since the last flush to `sink`
    ///
    /// Pass the writing transaction to include its uncommitted changes.
    fn get_modified_storage_parts(&self, tx: Option<&LayerMaintainer>, sink: &mut Vec<StoragePart>);

    /// Clear the dirty flags once the parts were flushed
    fn reset_dirty(&self, tx: &mut LayerMaintainer) -> Result<()>;
}
