//! Top-level failure taxonomy.
//!
//! Provider and store errors live next to their traits; this type is what
//! core operations return once those are classified.

use thiserror::Error;

use crate::adapters::ProviderError;
use crate::domain::BriefError;
use crate::store::StoreError;

/// Why a core operation did not succeed
#[derive(Debug, Error)]
pub enum Failure {
    /// A generator returned no usable output, failed, timed out or was cancelled
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A store write or read was rejected
    #[error(transparent)]
    Persistence(#[from] StoreError),

    /// A referenced story, scenario or image does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Malformed input
    #[error("Invalid request: {0}")]
    Validation(String),
}

impl Failure {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Short machine-readable name of the failure class
    pub fn kind(&self) -> &'static str {
        match self {
            Failure::Provider(_) => "provider_failure",
            Failure::Persistence(_) => "persistence_failure",
            Failure::NotFound { .. } => "not_found",
            Failure::Validation(_) => "validation_failure",
        }
    }
}

impl From<BriefError> for Failure {
    fn from(e: BriefError) -> Self {
        Self::Validation(e.to_string())
    }
}
