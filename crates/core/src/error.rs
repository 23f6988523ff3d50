//! Error types for the indexing engine
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Errors fall into two groups:
//! - validation errors (uniqueness, schema) that are raised before any
//!   transactional layer is touched and are recoverable by the caller
//! - premise violations (`InternalConsistency`) that signal a programming
//!   defect; they abort the enclosing transaction

use crate::types::{AttributeValue, Scope};
use thiserror::Error;

/// Result type alias for indexing operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the indexing engine
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A unique attribute value is already claimed by another record
    #[error(
        "Unique constraint violation: attribute `{attribute}` value `{value}` is already used by \
         `{existing_entity_type}` record {existing_record_id}, cannot assign it to \
         `{new_entity_type}` record {new_record_id}"
    )]
    UniqueValueViolation {
        /// Attribute name
        attribute: String,
        /// Conflicting value
        value: AttributeValue,
        /// Entity type of the record owning the value
        existing_entity_type: String,
        /// Primary key of the record owning the value
        existing_record_id: u32,
        /// Entity type of the record trying to claim the value
        new_entity_type: String,
        /// Primary key of the record trying to claim the value
        new_record_id: u32,
    },

    /// Locale or attribute not permitted by the current schema
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    /// A query path addresses a reference whose index is not available
    #[error("Reference `{reference}` of entity `{entity_type}` is not indexed in scope {scope}")]
    ReferenceNotIndexed {
        /// Reference name
        reference: String,
        /// Entity type owning the reference
        entity_type: String,
        /// Scope of the missing index
        scope: Scope,
    },

    /// The entity type has no loaded index (placeholder handle)
    #[error("Entity type `{entity_type}` is not managed by this catalog")]
    EntityNotManaged {
        /// Entity type
        entity_type: String,
    },

    /// Internal consistency failure (premise violation)
    #[error("Internal consistency failure: {0}")]
    InternalConsistency(String),

    /// Operation invoked on a transaction in the wrong state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Shorthand for [`Error::InternalConsistency`]
    pub fn internal(message: impl Into<String>) -> Self {
        Error::InternalConsistency(message.into())
    }

    /// Shorthand for [`Error::SchemaViolation`]
    pub fn schema(message: impl Into<String>) -> Self {
        Error::SchemaViolation(message.into())
    }

    /// Whether the caller may recover from this error (reject the write and go on)
    ///
    /// Internal consistency failures are never recoverable: they mean the
    /// indices are already in an unexpected state.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::UniqueValueViolation { .. } | Error::SchemaViolation(_)
        )
    }
}

/// Fails with an internal consistency error unless `condition` holds
///
/// The message closure is only evaluated on failure.
pub fn ensure<F>(condition: bool, message: F) -> Result<()>
where
    F: FnOnce() -> String,
{
    if condition {
        Ok(())
    } else {
        Err(Error::InternalConsistency(message()))
    }
}
