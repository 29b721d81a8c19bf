//! # Store Error Types Module
//!
//! This module defines the error types returned by pricing and persistence
//! operations. Matching misses are not errors and do not appear here.

use crate::model::Category;

/// Markup table cannot price a category
#[derive(Debug, Clone, PartialEq)]
pub enum PricingError {
    /// The table has no multiplier for the category
    MissingMultiplier(Category),
    /// The multiplier is zero or negative
    InvalidMultiplier {
        category: Category,
        value: rust_decimal::Decimal,
    },
}

impl std::fmt::Display for PricingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PricingError::MissingMultiplier(category) => {
                write!(f, "no markup multiplier configured for category '{category}'")
            }
            PricingError::InvalidMultiplier { category, value } => write!(
                f,
                "markup multiplier for category '{category}' must be positive, got {value}"
            ),
        }
    }
}

impl std::error::Error for PricingError {}

/// Failure of a coordinator or repository operation
#[derive(Debug)]
pub enum StoreError {
    /// Input rejected before reaching storage
    Validation(String),
    /// No entity with the given identifier
    NotFound { collection: &'static str, id: String },
    /// Markup configuration cannot be used for pricing
    Configuration(String),
    /// Backing store failed; the original cause is kept
    Adapter {
        operation: String,
        source: anyhow::Error,
    },
}

impl StoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        StoreError::Validation(msg.into())
    }

    pub fn not_found(collection: &'static str, id: &str) -> Self {
        StoreError::NotFound {
            collection,
            id: id.to_string(),
        }
    }

    pub fn adapter(operation: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        StoreError::Adapter {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// Whether retrying the same call later could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Adapter { .. })
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Validation(msg) => write!(f, "Validation error: {msg}"),
            StoreError::NotFound { collection, id } => {
                write!(f, "Not found: no {collection} entry with id '{id}'")
            }
            StoreError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            StoreError::Adapter { operation, source } => {
                write!(f, "Store error during {operation}: {source}")
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Adapter { source, .. } => Some(&**source),
            _ => None,
        }
    }
}

impl From<PricingError> for StoreError {
    fn from(err: PricingError) -> Self {
        StoreError::Configuration(err.to_string())
    }
}
