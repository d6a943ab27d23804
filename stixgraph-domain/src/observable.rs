//! Observable cascade
//!
//! After an indicator is stored, every concrete observable its pattern names
//! is created alongside it, linked with an `observable_refs` relation and
//! announced on the bus. Each observable is handled independently: one
//! failure never affects the others or the indicator itself.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use stixgraph_core::{
    extract_observables, system_clock, EntityCategory, Indicator, NewEntity, NewIndicator,
    NewObservable, Observable, ObservableDescriptor, Principal, SharedClock, StixEntity,
};
use stixgraph_store::{BusTopic, EntityEvent, SharedNotifier, SharedStore, StoreError};

use crate::DomainError;

/// Relation type linking an indicator to its observables
pub const OBSERVABLE_REFS: &str = "observable_refs";

/// Turns a detection pattern into observable descriptors
pub trait PatternExtractor: Send + Sync {
    fn extract(&self, pattern: &str) -> Vec<ObservableDescriptor>;
}

/// Thread-safe reference to a pattern extractor
pub type SharedExtractor = Arc<dyn PatternExtractor>;

/// Extractor for STIX comparison expressions
#[derive(Debug, Clone, Copy, Default)]
pub struct StixPatternExtractor;

impl PatternExtractor for StixPatternExtractor {
    fn extract(&self, pattern: &str) -> Vec<ObservableDescriptor> {
        extract_observables(pattern)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ObservableFailure {
    pub descriptor: ObservableDescriptor,
    pub error: String,
}

/// Outcome of one cascade run
#[derive(Debug, Clone, Default, Serialize)]
pub struct CascadeReport {
    /// Descriptors found in the pattern
    pub extracted: usize,
    pub created: Vec<Observable>,
    pub failures: Vec<ObservableFailure>,
}

impl CascadeReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn summary(&self) -> String {
        format!("{}/{} observables created", self.created.len(), self.extracted)
    }
}

#[derive(Clone)]
pub struct ObservableCascade {
    store: SharedStore,
    notifier: SharedNotifier,
    extractor: SharedExtractor,
    clock: SharedClock,
}

impl ObservableCascade {
    pub fn new(store: SharedStore, notifier: SharedNotifier, extractor: SharedExtractor) -> Self {
        Self {
            store,
            notifier,
            extractor,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn extract(&self, pattern: &str) -> Vec<ObservableDescriptor> {
        self.extractor.extract(pattern)
    }

    /// Create a standalone observable and announce it
    pub async fn add_stix_observable(
        &self,
        principal: Option<&Principal>,
        input: NewObservable,
    ) -> Result<Observable, DomainError> {
        let observable = self.create(input).await?;
        self.announce(&observable, principal.cloned()).await;
        Ok(observable)
    }

    /// Create every observable named by the indicator's pattern
    pub async fn run(&self, indicator: &Indicator, payload: &NewIndicator) -> CascadeReport {
        let descriptors = self.extractor.extract(&indicator.indicator_pattern);
        if descriptors.is_empty() {
            debug!("No observables in pattern of {}", indicator.id);
            return CascadeReport::default();
        }

        let outcomes = join_all(descriptors.iter().map(|descriptor| {
            self.create_linked(&indicator.id, payload.derive_observable(descriptor))
        }))
        .await;

        let mut report = CascadeReport {
            extracted: descriptors.len(),
            ..Default::default()
        };
        for (descriptor, outcome) in descriptors.into_iter().zip(outcomes) {
            match outcome {
                Ok(observable) => report.created.push(observable),
                Err(e) => {
                    warn!(
                        "Observable {} '{}' for {} failed: {}",
                        descriptor.observable_type, descriptor.value, indicator.id, e
                    );
                    report.failures.push(ObservableFailure {
                        descriptor,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!("Indicator {}: {}", indicator.id, report.summary());
        report
    }

    async fn create_linked(
        &self,
        indicator_id: &str,
        input: NewObservable,
    ) -> Result<Observable, DomainError> {
        let observable = self.create(input).await?;
        self.store
            .create_relation(indicator_id, &observable.id, OBSERVABLE_REFS)
            .await?;
        self.announce(&observable, None).await;
        Ok(observable)
    }

    async fn create(&self, input: NewObservable) -> Result<Observable, DomainError> {
        let created = self
            .store
            .create_entity(NewEntity::Observable(input), EntityCategory::StixObservable)
            .await?;
        created.into_observable().ok_or_else(|| {
            StoreError::Decode("store returned a non observable entity".to_string()).into()
        })
    }

    async fn announce(&self, observable: &Observable, principal: Option<Principal>) {
        self.notifier
            .notify(EntityEvent::new(
                BusTopic::StixObservableAdded,
                StixEntity::Observable(observable.clone()),
                principal,
                self.clock.now(),
            ))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_indicator, t0, RecordingStore};
    use stixgraph_core::{EntityType, FixedClock, IndicatorInput};
    use stixgraph_store::{BroadcastNotifier, EntityStore};

    fn payload(pattern: &str) -> NewIndicator {
        let mut input = IndicatorInput::new("c2", pattern);
        input.description = Some("beacon".to_string());
        input.marking_definitions = vec!["marking-1".to_string()];
        input.created_by_ref = Some("identity-1".to_string());
        input.pattern_type = Some("stix".to_string());
        input.score = Some(80);
        input.into_new_indicator(t0(), t0() + chrono::Duration::days(30))
    }

    async fn indicator_in(store: &RecordingStore, pattern: &str) -> Indicator {
        store
            .inner
            .create_entity(
                NewEntity::Indicator(payload(pattern)),
                EntityCategory::StixDomainEntity,
            )
            .await
            .unwrap()
            .into_indicator()
            .unwrap()
    }

    const TWO: &str = "[ipv4-addr:value = '198.51.100.7'] OR [domain-name:value = 'evil.test']";

    #[tokio::test]
    async fn test_two_descriptors_create_two_observables() {
        let store = Arc::new(RecordingStore::new());
        let notifier = Arc::new(BroadcastNotifier::new(16));
        let mut rx = notifier.subscribe();
        let cascade = ObservableCascade::new(
            store.clone(),
            notifier.clone(),
            Arc::new(StixPatternExtractor),
        );

        let indicator = indicator_in(&store, TWO).await;
        let report = cascade.run(&indicator, &payload(TWO)).await;

        assert!(report.is_complete());
        assert_eq!(report.summary(), "2/2 observables created");

        let created = store.created_of(EntityType::StixObservable);
        assert_eq!(created.len(), 2);
        for entity in &created {
            let json = serde_json::to_value(entity).unwrap();
            let body = &json["payload"];
            assert_eq!(body["description"], "beacon");
            assert_eq!(body["created_by_ref"], "identity-1");
            let indicator_only = [
                "score",
                "valid_from",
                "valid_until",
                "pattern_type",
                "indicator_pattern",
            ];
            for field in indicator_only {
                assert!(body.get(field).is_none(), "{field} leaked into observable");
            }
        }

        let refs: Vec<_> = store
            .inner
            .relations()
            .into_iter()
            .filter(|r| r.relation_type == OBSERVABLE_REFS && r.from_id == indicator.id)
            .collect();
        assert_eq!(refs.len(), 2);

        for _ in 0..2 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.topic, BusTopic::StixObservableAdded);
            assert!(event.principal.is_none());
        }
    }

    #[tokio::test]
    async fn test_one_failure_is_isolated() {
        let store = Arc::new(RecordingStore::failing_observables(&["evil.test"]));
        let cascade = ObservableCascade::new(
            store.clone(),
            Arc::new(BroadcastNotifier::default()),
            Arc::new(StixPatternExtractor),
        );

        let indicator = indicator_in(&store, TWO).await;
        let report = cascade.run(&indicator, &payload(TWO)).await;

        assert_eq!(report.extracted, 2);
        assert_eq!(report.created.len(), 1);
        assert_eq!(report.created[0].observable_value, "198.51.100.7");
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].descriptor.value, "evil.test");
        assert_eq!(report.summary(), "1/2 observables created");
        assert_eq!(store.inner.count(EntityType::Indicator), 1);
    }

    #[tokio::test]
    async fn test_pattern_without_observables() {
        let store = Arc::new(RecordingStore::new());
        let cascade = ObservableCascade::new(
            store.clone(),
            Arc::new(BroadcastNotifier::default()),
            Arc::new(StixPatternExtractor),
        );

        let mut indicator = sample_indicator("ind-1");
        indicator.indicator_pattern = "[process:pid != 4]".to_string();
        let report = cascade.run(&indicator, &payload("[process:pid != 4]")).await;
        assert_eq!(report.extracted, 0);
        assert!(store.created_of(EntityType::StixObservable).is_empty());
    }

    #[tokio::test]
    async fn test_add_stix_observable_carries_principal() {
        let store = Arc::new(RecordingStore::new());
        let notifier = Arc::new(BroadcastNotifier::new(4));
        let mut rx = notifier.subscribe();
        let cascade =
            ObservableCascade::new(store, notifier.clone(), Arc::new(StixPatternExtractor))
                .with_clock(Arc::new(FixedClock(t0())));

        let principal = Principal::new("u-7", "analyst");
        let observable = cascade
            .add_stix_observable(
                Some(&principal),
                NewObservable {
                    observable_type: "Mutex".to_string(),
                    observable_value: "Global\\evil".to_string(),
                    description: None,
                    marking_definitions: Vec::new(),
                    created_by_ref: None,
                },
            )
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.entity.id(), observable.id);
        assert_eq!(event.principal, Some(principal));
        assert_eq!(event.emitted_at, t0());
    }
}
