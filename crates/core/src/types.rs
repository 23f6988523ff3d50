//! Core value types for the indexing engine
//!
//! This module defines the foundational types:
//! - Scope: Live vs archived data partition
//! - Locale: Language tag for localized data
//! - AttributeValue: Indexable attribute value (scalar or array)

use serde::{Deserialize, Serialize};
use std::fmt;

/// Data partition an index belongs to
///
/// Every index exists once per scope. Live data is queried by default,
/// archived data only on demand.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub enum Scope {
    /// Regular, queryable data
    #[default]
    Live,
    /// Archived data kept for explicit lookups
    Archived,
}

impl Scope {
    /// All scopes in their natural order
    pub const ALL: [Scope; 2] = [Scope::Live, Scope::Archived];

    /// Stable upper-case name used in display strings
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Live => "LIVE",
            Scope::Archived => "ARCHIVED",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Language tag (e.g. `en-US`) identifying localized data
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Locale(String);

impl Locale {
    /// Create a locale from its language tag
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// The language tag
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Locale {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

/// Indexable attribute value
///
/// Values are totally ordered so that they can key sorted structures and
/// take part in index discriminators. Arrays are indexed element-wise: a
/// filter index registers the record under each element separately.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttributeValue {
    /// Boolean value
    Bool(bool),
    /// Signed integer value
    Int(i64),
    /// Text value
    Text(String),
    /// Array of values, indexed per element
    Array(Vec<AttributeValue>),
}

impl AttributeValue {
    /// Create a text value
    pub fn text(value: impl Into<String>) -> Self {
        AttributeValue::Text(value.into())
    }

    /// Whether the value is an array
    pub fn is_array(&self) -> bool {
        matches!(self, AttributeValue::Array(_))
    }

    /// The indexed elements of the value
    ///
    /// A scalar yields itself, an array yields its items.
    pub fn elements(&self) -> &[AttributeValue] {
        match self {
            AttributeValue::Array(items) => items,
            scalar => std::slice::from_ref(scalar),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Bool(v) => write!(f, "{}", v),
            AttributeValue::Int(v) => write!(f, "{}", v),
            AttributeValue::Text(v) => write!(f, "{:?}", v),
            AttributeValue::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::Text(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::Text(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_order_and_display() {
        assert!(Scope::Live < Scope::Archived);
        assert_eq!(Scope::Live.to_string(), "LIVE");
        assert_eq!(Scope::Archived.to_string(), "ARCHIVED");
        assert_eq!(Scope::default(), Scope::Live);
    }

    #[test]
    fn test_locale() {
        let locale = Locale::from("en-US");
        assert_eq!(locale.as_str(), "en-US");
        assert_eq!(locale.to_string(), "en-US");
    }

    #[test]
    fn test_elements_of_scalar_and_array() {
        let scalar = AttributeValue::Int(5);
        assert_eq!(scalar.elements(), &[AttributeValue::Int(5)]);

        let array = AttributeValue::Array(vec![1.into(), 2.into()]);
        assert!(array.is_array());
        assert_eq!(array.elements().len(), 2);
    }

    #[test]
    fn test_value_display() {
        let value = AttributeValue::Array(vec![AttributeValue::Int(1), AttributeValue::text("x")]);
        assert_eq!(value.to_string(), "[1, \"x\"]");
        assert_eq!(AttributeValue::Bool(true).to_string(), "true");
    }

    #[test]
    fn test_value_ordering_is_total() {
        let mut values = vec![
            AttributeValue::text("b"),
            AttributeValue::Int(3),
            AttributeValue::text("a"),
            AttributeValue::Int(-1),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                AttributeValue::Int(-1),
                AttributeValue::Int(3),
                AttributeValue::text("a"),
                AttributeValue::text("b"),
            ]
        );
    }
}
