//! Errors from domain operations

use stixgraph_core::{ConfigError, EntityType};
use stixgraph_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    /// A referenced entity does not exist or is of another kind
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityType, id: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),
}

impl DomainError {
    pub fn not_found(kind: EntityType, id: &str) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}
