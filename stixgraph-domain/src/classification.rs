//! Classification resolution
//!
//! Resolves marking-definition and kill-chain-phase ids to their records.
//! Lookups for a list run concurrently; any id that does not resolve to an
//! entity of the expected kind fails the whole list.

use futures::future::try_join_all;
use tracing::debug;

use stixgraph_core::{
    EntityCategory, EntityType, KillChainPhase, MarkingDefinition, NewEntity, NewKillChainPhase,
    NewMarkingDefinition, StixEntity, ValidityConfig,
};
use stixgraph_store::{find_entity, SharedStore, StoreError};

use crate::DomainError;

#[derive(Clone)]
pub struct ClassificationResolver {
    store: SharedStore,
}

impl ClassificationResolver {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn find_marking_definition_by_id(
        &self,
        id: &str,
    ) -> Result<MarkingDefinition, DomainError> {
        find_entity(self.store.as_ref(), id)
            .await?
            .and_then(StixEntity::into_marking_definition)
            .ok_or_else(|| DomainError::not_found(EntityType::MarkingDefinition, id))
    }

    pub async fn find_kill_chain_phase_by_id(
        &self,
        id: &str,
    ) -> Result<KillChainPhase, DomainError> {
        find_entity(self.store.as_ref(), id)
            .await?
            .and_then(StixEntity::into_kill_chain_phase)
            .ok_or_else(|| DomainError::not_found(EntityType::KillChainPhase, id))
    }

    pub async fn resolve_marking_definitions(
        &self,
        ids: &[String],
    ) -> Result<Vec<MarkingDefinition>, DomainError> {
        let resolved =
            try_join_all(ids.iter().map(|id| self.find_marking_definition_by_id(id))).await?;
        debug!("Resolved {} marking definitions", resolved.len());
        Ok(resolved)
    }

    pub async fn resolve_kill_chain_phases(
        &self,
        ids: &[String],
    ) -> Result<Vec<KillChainPhase>, DomainError> {
        let resolved =
            try_join_all(ids.iter().map(|id| self.find_kill_chain_phase_by_id(id))).await?;
        debug!("Resolved {} kill chain phases", resolved.len());
        Ok(resolved)
    }

    pub async fn add_marking_definition(
        &self,
        input: NewMarkingDefinition,
    ) -> Result<MarkingDefinition, DomainError> {
        let created = self
            .store
            .create_entity(NewEntity::MarkingDefinition(input), EntityCategory::StixDomain)
            .await?;
        created.into_marking_definition().ok_or_else(|| {
            StoreError::Decode("store returned a non marking-definition entity".to_string()).into()
        })
    }

    pub async fn add_kill_chain_phase(
        &self,
        input: NewKillChainPhase,
    ) -> Result<KillChainPhase, DomainError> {
        let created = self
            .store
            .create_entity(NewEntity::KillChainPhase(input), EntityCategory::StixDomain)
            .await?;
        created.into_kill_chain_phase().ok_or_else(|| {
            StoreError::Decode("store returned a non kill-chain-phase entity".to_string()).into()
        })
    }
}

/// The most restrictive marking
///
/// Highest `level` wins; equal levels fall back to the lexicographically
/// smallest `definition`, so the choice never depends on resolution order.
pub fn highest_marking(markings: &[MarkingDefinition]) -> Option<&MarkingDefinition> {
    markings.iter().min_by(|a, b| {
        b.level
            .cmp(&a.level)
            .then_with(|| a.definition.cmp(&b.definition))
    })
}

/// Whether any phase counts as delivery under the config
pub fn has_delivery_phase(config: &ValidityConfig, phases: &[KillChainPhase]) -> bool {
    phases.iter().any(|p| config.is_delivery_phase(&p.phase_name))
}
