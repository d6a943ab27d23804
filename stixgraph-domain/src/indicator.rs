//! Indicator service
//!
//! Creation fills in the defaults the store expects (score, validity
//! window), persists the indicator, optionally cascades its observables and
//! finally announces it.

use std::sync::Arc;
use tracing::{debug, info};

use stixgraph_core::{
    build_pagination, is_stix_id, system_clock, Connection, EntityCategory, EntityType, Indicator,
    IndicatorInput, NewEntity, Observable, PagingArgs, Principal, SharedClock, StixEntity,
    ValidityConfig,
};
use stixgraph_store::{
    find_entity, BusTopic, EntityEvent, RelationQuery, SharedNotifier, SharedStore, StoreError,
};

use crate::{
    CascadeReport, ClassificationResolver, DomainError, NoCheckpoint, ObservableCascade,
    RetirementConfig, RetirementPump, RetirementReport, SharedCheckpoint, SharedExtractor,
    StixPatternExtractor, ValidityCalculator, ValidityRequest, ValidityWindow, OBSERVABLE_REFS,
};

/// Fields free-text search on indicators looks at
pub const INDICATOR_SEARCH_FIELDS: &[&str] = &["name", "alias"];

/// Collaborators and settings of an [`IndicatorService`]
#[derive(Clone)]
pub struct ServiceConfig {
    pub validity: Arc<ValidityConfig>,
    pub clock: SharedClock,
    pub extractor: SharedExtractor,
    pub retirement: RetirementConfig,
    pub checkpoint: SharedCheckpoint,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            validity: Arc::new(ValidityConfig::default()),
            clock: system_clock(),
            extractor: Arc::new(StixPatternExtractor),
            retirement: RetirementConfig::default(),
            checkpoint: Arc::new(NoCheckpoint),
        }
    }
}

impl ServiceConfig {
    pub fn with_validity(mut self, validity: ValidityConfig) -> Self {
        self.validity = Arc::new(validity);
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retirement(mut self, retirement: RetirementConfig) -> Self {
        self.retirement = retirement;
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: SharedCheckpoint) -> Self {
        self.checkpoint = checkpoint;
        self
    }
}

/// A created indicator and, when requested, its observable cascade
#[derive(Debug, Clone, serde::Serialize)]
pub struct IndicatorCreation {
    pub indicator: Indicator,
    pub observables: Option<CascadeReport>,
}

pub struct IndicatorService {
    store: SharedStore,
    notifier: SharedNotifier,
    clock: SharedClock,
    validity: ValidityCalculator,
    cascade: ObservableCascade,
    retirement: RetirementPump,
}

impl IndicatorService {
    pub fn new(store: SharedStore, notifier: SharedNotifier, config: ServiceConfig) -> Self {
        let resolver = ClassificationResolver::new(store.clone());
        Self {
            validity: ValidityCalculator::new(resolver, config.validity, config.clock.clone()),
            cascade: ObservableCascade::new(store.clone(), notifier.clone(), config.extractor)
                .with_clock(config.clock.clone()),
            retirement: RetirementPump::new(store.clone(), config.retirement, config.checkpoint),
            clock: config.clock,
            store,
            notifier,
        }
    }

    /// Validity window an input would receive, without persisting anything
    pub async fn compute_validity(
        &self,
        input: &IndicatorInput,
    ) -> Result<ValidityWindow, DomainError> {
        let valid_from = input.valid_from.unwrap_or_else(|| self.clock.now());
        self.validity
            .compute_window(&ValidityRequest::from(input).with_valid_from(valid_from))
            .await
    }

    pub async fn add_indicator(
        &self,
        principal: Option<&Principal>,
        input: IndicatorInput,
        create_observables: bool,
    ) -> Result<IndicatorCreation, DomainError> {
        let valid_from = input.valid_from.unwrap_or_else(|| self.clock.now());
        let valid_until = match input.valid_until {
            Some(valid_until) if valid_until <= valid_from => {
                return Err(DomainError::InvalidInput(format!(
                    "valid_until {valid_until} is not after valid_from {valid_from}"
                )));
            }
            Some(valid_until) => valid_until,
            None => {
                self.validity
                    .compute_valid_until(&ValidityRequest::from(&input).with_valid_from(valid_from))
                    .await?
            }
        };

        let payload = input.into_new_indicator(valid_from, valid_until);
        let indicator = self
            .store
            .create_entity(
                NewEntity::Indicator(payload.clone()),
                EntityCategory::StixDomainEntity,
            )
            .await?
            .into_indicator()
            .ok_or_else(|| {
                StoreError::Decode("store returned a non indicator entity".to_string())
            })?;
        info!(
            "Created indicator {} '{}' valid until {}",
            indicator.id, indicator.name, indicator.valid_until
        );

        let observables = if create_observables {
            Some(self.cascade.run(&indicator, &payload).await)
        } else {
            None
        };

        self.notifier
            .notify(EntityEvent::new(
                BusTopic::StixDomainEntityAdded,
                StixEntity::Indicator(indicator.clone()),
                principal.cloned(),
                self.clock.now(),
            ))
            .await;

        Ok(IndicatorCreation {
            indicator,
            observables,
        })
    }

    /// Look up an indicator by STIX id or internal id
    pub async fn find_by_id(&self, id: &str) -> Result<Indicator, DomainError> {
        find_entity(self.store.as_ref(), id)
            .await?
            .and_then(StixEntity::into_indicator)
            .ok_or_else(|| DomainError::not_found(EntityType::Indicator, id))
    }

    pub async fn find_all(&self, args: &PagingArgs) -> Result<Connection<Indicator>, DomainError> {
        let page = self
            .store
            .list_entities(&[EntityType::Indicator], INDICATOR_SEARCH_FIELDS, args)
            .await?;
        Ok(page.filter_map(StixEntity::into_indicator))
    }

    /// Observables linked to an indicator, on a single page
    pub async fn observable_refs(
        &self,
        indicator_id: &str,
    ) -> Result<Connection<Observable>, DomainError> {
        let from_id = if is_stix_id(indicator_id) {
            match self.store.load_entity_by_stix_id(indicator_id).await? {
                Some(entity) => entity.id().to_string(),
                None => {
                    debug!("No indicator with stix id {}", indicator_id);
                    return Ok(Connection::empty());
                }
            }
        } else {
            indicator_id.to_string()
        };

        let rows = self
            .store
            .find_with_connected_relations(&RelationQuery {
                from_id,
                from_type: EntityType::Indicator,
                relation_type: OBSERVABLE_REFS.to_string(),
                to_type: EntityType::StixObservable,
            })
            .await?;

        let observables: Vec<Observable> = rows
            .into_iter()
            .filter_map(|row| row.node.into_observable())
            .collect();
        let count = observables.len();
        Ok(build_pagination(0, 0, observables, count))
    }

    /// Delete every indicator
    pub async fn clear(&self) -> Result<RetirementReport, DomainError> {
        self.retirement.clear().await
    }
}
