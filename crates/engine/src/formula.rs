//! Read-only bitmap views handed to query evaluation

use roaring::RoaringBitmap;
use std::fmt;
use std::sync::Arc;
use strata_index_core::Locale;

/// Lazily evaluated set of record ids
///
/// Formulas never expose mutable state: they hold a snapshot of the bitmap
/// they were created from.
#[derive(Debug, Clone, PartialEq)]
pub enum Formula {
    /// No records
    Empty,
    /// Fixed set of records
    Constant(Arc<RoaringBitmap>),
    /// Records having localized data in `locale`
    Locale {
        /// Locale the records were indexed for
        locale: Locale,
        /// Matching records
        records: Arc<RoaringBitmap>,
    },
}

impl Formula {
    /// Constant formula, or [`Formula::Empty`] for an empty bitmap
    pub fn constant(records: Arc<RoaringBitmap>) -> Self {
        if records.is_empty() {
            Formula::Empty
        } else {
            Formula::Constant(records)
        }
    }

    /// Locale formula, or [`Formula::Empty`] for an empty bitmap
    pub fn locale(locale: Locale, records: Arc<RoaringBitmap>) -> Self {
        if records.is_empty() {
            Formula::Empty
        } else {
            Formula::Locale { locale, records }
        }
    }

    /// Evaluate the formula
    pub fn compute(&self) -> Arc<RoaringBitmap> {
        match self {
            Formula::Empty => Arc::new(RoaringBitmap::new()),
            Formula::Constant(records) | Formula::Locale { records, .. } => Arc::clone(records),
        }
    }

    /// Whether the formula yields no record
    pub fn is_empty(&self) -> bool {
        match self {
            Formula::Empty => true,
            Formula::Constant(records) | Formula::Locale { records, .. } => records.is_empty(),
        }
    }

    /// Number of records the formula yields
    pub fn len(&self) -> u64 {
        match self {
            Formula::Empty => 0,
            Formula::Constant(records) | Formula::Locale { records, .. } => records.len(),
        }
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Formula::Empty => write!(f, "EMPTY"),
            Formula::Constant(records) => write!(f, "CONSTANT({} records)", records.len()),
            Formula::Locale { locale, records } => {
                write!(f, "LOCALE({}: {} records)", locale, records.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_bitmap_yields_sentinel() {
        assert_eq!(Formula::constant(Arc::new(RoaringBitmap::new())), Formula::Empty);
        assert_eq!(
            Formula::locale(Locale::new("en-US"), Arc::new(RoaringBitmap::new())),
            Formula::Empty
        );
        assert!(Formula::Empty.compute().is_empty());
    }

    #[test]
    fn test_compute_shares_snapshot() {
        let records: Arc<RoaringBitmap> = Arc::new([1u32, 5, 9].into_iter().collect());
        let formula = Formula::constant(Arc::clone(&records));
        assert!(Arc::ptr_eq(&formula.compute(), &records));
        assert_eq!(formula.len(), 3);
        assert_eq!(formula.to_string(), "CONSTANT(3 records)");
    }
}
