//! Entity store abstraction
//!
//! The graph store is an external collaborator. Everything the domain layer
//! needs from it goes through [`EntityStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use stixgraph_core::{
    Connection, EntityCategory, EntityRef, EntityType, NewEntity, PagingArgs, StixEntity,
};

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid store response: {0}")]
    Decode(String),

    #[error("Store error: {0}")]
    Backend(String),
}

/// A directed relationship between two entities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    pub relation_type: String,
    pub from_id: String,
    pub to_id: String,
    pub created_at: DateTime<Utc>,
}

/// Relationships of one type leaving an entity, restricted to a target type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationQuery {
    pub from_id: String,
    pub from_type: EntityType,
    pub relation_type: String,
    pub to_type: EntityType,
}

/// A matched relationship together with the entity it points to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRow {
    pub node: StixEntity,
    pub relation: Relation,
}

/// Capabilities consumed from the graph store
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Persist a new entity under a category tag
    async fn create_entity(
        &self,
        payload: NewEntity,
        category: EntityCategory,
    ) -> Result<StixEntity, StoreError>;

    async fn load_entity_by_id(&self, id: &str) -> Result<Option<StixEntity>, StoreError>;

    async fn load_entity_by_stix_id(&self, stix_id: &str)
        -> Result<Option<StixEntity>, StoreError>;

    /// One page of entities of the given types
    async fn list_entities(
        &self,
        types: &[EntityType],
        search_fields: &[&str],
        args: &PagingArgs,
    ) -> Result<Connection<StixEntity>, StoreError>;

    /// Fails with [`StoreError::NotFound`] when the entity does not exist
    async fn delete_entity_by_id(&self, id: &str) -> Result<(), StoreError>;

    async fn create_relation(
        &self,
        from_id: &str,
        to_id: &str,
        relation_type: &str,
    ) -> Result<Relation, StoreError>;

    async fn find_with_connected_relations(
        &self,
        query: &RelationQuery,
    ) -> Result<Vec<RelationRow>, StoreError>;
}

/// Thread-safe reference to an entity store
pub type SharedStore = Arc<dyn EntityStore>;

/// Load an entity by either kind of id
pub async fn find_entity(
    store: &dyn EntityStore,
    id: &str,
) -> Result<Option<StixEntity>, StoreError> {
    match EntityRef::parse(id) {
        EntityRef::Stix(stix_id) => store.load_entity_by_stix_id(stix_id).await,
        EntityRef::Internal(internal_id) => store.load_entity_by_id(internal_id).await,
    }
}
