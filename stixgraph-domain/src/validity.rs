//! Validity window computation
//!
//! `valid_until` is the base instant plus a TTL in whole days, where the TTL
//! depends on the most restrictive marking, whether any kill-chain phase is
//! a delivery phase, and the indicator's main observable type.

use chrono::{DateTime, Days, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use stixgraph_core::{IndicatorInput, SharedClock, TtlKey, ValidityConfig};

use crate::classification::{has_delivery_phase, highest_marking};
use crate::{ClassificationResolver, DomainError};

/// Inputs the validity window depends on
#[derive(Debug, Clone, Default)]
pub struct ValidityRequest<'a> {
    pub valid_from: Option<DateTime<Utc>>,
    pub marking_definitions: &'a [String],
    pub kill_chain_phases: &'a [String],
    pub main_observable_type: Option<&'a str>,
}

impl<'a> From<&'a IndicatorInput> for ValidityRequest<'a> {
    fn from(input: &'a IndicatorInput) -> Self {
        Self {
            valid_from: input.valid_from,
            marking_definitions: &input.marking_definitions,
            kill_chain_phases: &input.kill_chain_phases,
            main_observable_type: input.main_observable_type.as_deref(),
        }
    }
}

impl ValidityRequest<'_> {
    pub fn with_valid_from(mut self, valid_from: DateTime<Utc>) -> Self {
        self.valid_from = Some(valid_from);
        self
    }
}

/// A computed validity window and how it was derived
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidityWindow {
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub ttl_days: u32,
    /// `<label>-<flag>` key the TTL was looked up with
    pub ttl_key: String,
    /// Table the TTL came from
    pub table: String,
}

#[derive(Clone)]
pub struct ValidityCalculator {
    resolver: ClassificationResolver,
    config: Arc<ValidityConfig>,
    clock: SharedClock,
}

impl ValidityCalculator {
    pub fn new(
        resolver: ClassificationResolver,
        config: Arc<ValidityConfig>,
        clock: SharedClock,
    ) -> Self {
        Self {
            resolver,
            config,
            clock,
        }
    }

    /// Lookup key for a request; resolution failures propagate
    pub async fn ttl_key(&self, request: &ValidityRequest<'_>) -> Result<TtlKey, DomainError> {
        let marking_label = async {
            if request.marking_definitions.is_empty() {
                return Ok(self.config.default_marking.clone());
            }
            let markings = self
                .resolver
                .resolve_marking_definitions(request.marking_definitions)
                .await?;
            Ok::<_, DomainError>(
                highest_marking(&markings)
                    .map(|m| m.definition.clone())
                    .unwrap_or_else(|| self.config.default_marking.clone()),
            )
        };

        let delivery = async {
            if request.kill_chain_phases.is_empty() {
                return Ok(false);
            }
            let phases = self
                .resolver
                .resolve_kill_chain_phases(request.kill_chain_phases)
                .await?;
            Ok::<_, DomainError>(has_delivery_phase(&self.config, &phases))
        };

        let (marking_label, delivery) = futures::try_join!(marking_label, delivery)?;
        Ok(TtlKey {
            marking_label,
            delivery,
        })
    }

    pub async fn compute_window(
        &self,
        request: &ValidityRequest<'_>,
    ) -> Result<ValidityWindow, DomainError> {
        let valid_from = request.valid_from.unwrap_or_else(|| self.clock.now());
        let key = self.ttl_key(request).await?;
        let selection = self.config.ttl_days(&key, request.main_observable_type)?;

        let valid_until = valid_from
            .checked_add_days(Days::new(u64::from(selection.days)))
            .ok_or_else(|| {
                DomainError::InvalidInput(format!(
                    "valid_from {} + {} days is out of range",
                    valid_from, selection.days
                ))
            })?;

        debug!(
            "Validity {} -> {} ({} days, key {}, table {})",
            valid_from, valid_until, selection.days, key, selection.table
        );

        Ok(ValidityWindow {
            valid_from,
            valid_until,
            ttl_days: selection.days,
            ttl_key: key.to_string(),
            table: selection.table,
        })
    }

    pub async fn compute_valid_until(
        &self,
        request: &ValidityRequest<'_>,
    ) -> Result<DateTime<Utc>, DomainError> {
        Ok(self.compute_window(request).await?.valid_until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{t0, RecordingStore};
    use stixgraph_core::{ConfigError, FixedClock};

    fn calculator(store: Arc<RecordingStore>) -> ValidityCalculator {
        ValidityCalculator::new(
            ClassificationResolver::new(store),
            Arc::new(ValidityConfig::default()),
            Arc::new(FixedClock(t0())),
        )
    }

    #[tokio::test]
    async fn test_no_classification_uses_white_no() {
        let calc = calculator(Arc::new(RecordingStore::new()));
        let window = calc.compute_window(&ValidityRequest::default()).await.unwrap();

        assert_eq!(window.ttl_key, "TLP:WHITE-no");
        assert_eq!(window.table, "default");
        assert_eq!(window.ttl_days, 30);
        assert_eq!(window.valid_from, t0());
        assert_eq!(window.valid_until, t0() + chrono::Duration::days(30));
    }

    #[tokio::test]
    async fn test_highest_level_marking_is_used() {
        let store = Arc::new(RecordingStore::new());
        let markings = vec![
            store.marking("TLP:GREEN", 10).await,
            store.marking("TLP:AMBER", 50).await,
            store.marking("TLP:WHITE", 30).await,
        ];
        let calc = calculator(store);

        let request = ValidityRequest {
            marking_definitions: &markings,
            ..Default::default()
        };
        let window = calc.compute_window(&request).await.unwrap();
        assert_eq!(window.ttl_key, "TLP:AMBER-no");
        assert_eq!(window.ttl_days, 60);
    }

    #[tokio::test]
    async fn test_initial_access_sets_delivery_in_any_position() {
        let store = Arc::new(RecordingStore::new());
        let access = store.phase("initial-access").await;
        let persistence = store.phase("persistence").await;
        let calc = calculator(store);

        for phases in [
            vec![access.clone(), persistence.clone()],
            vec![persistence.clone(), access.clone()],
        ] {
            let request = ValidityRequest {
                kill_chain_phases: &phases,
                ..Default::default()
            };
            let window = calc.compute_window(&request).await.unwrap();
            assert_eq!(window.ttl_key, "TLP:WHITE-yes");
            assert_eq!(window.ttl_days, 7);
        }
    }

    #[tokio::test]
    async fn test_file_type_overrides_default_table() {
        let store = Arc::new(RecordingStore::new());
        let red = vec![store.marking("TLP:RED", 4).await];
        let execution = vec![store.phase("execution").await];
        let calc = calculator(store);

        let mut request = ValidityRequest {
            marking_definitions: &red,
            kill_chain_phases: &execution,
            main_observable_type: Some("file"),
            valid_from: None,
        };
        let window = calc.compute_window(&request).await.unwrap();
        assert_eq!((window.table.as_str(), window.ttl_days), ("file", 365));

        request.main_observable_type = Some("ipv4-addr");
        let window = calc.compute_window(&request).await.unwrap();
        assert_eq!((window.table.as_str(), window.ttl_days), ("default", 120));
    }

    #[tokio::test]
    async fn test_explicit_valid_from_is_the_base() {
        let calc = calculator(Arc::new(RecordingStore::new()));
        let base = t0() - chrono::Duration::days(100);
        let until = calc
            .compute_valid_until(&ValidityRequest::default().with_valid_from(base))
            .await
            .unwrap();
        assert_eq!(until, base + chrono::Duration::days(30));
    }

    #[tokio::test]
    async fn test_unknown_marking_label_is_a_configuration_error() {
        let store = Arc::new(RecordingStore::new());
        let pap = vec![store.marking("PAP:AMBER", 3).await];
        let calc = calculator(store);

        let request = ValidityRequest {
            marking_definitions: &pap,
            ..Default::default()
        };
        let err = calc.compute_window(&request).await.unwrap_err();
        assert!(matches!(
            err,
            DomainError::Configuration(ConfigError::UnknownTtlKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_unresolvable_marking_aborts() {
        let calc = calculator(Arc::new(RecordingStore::new()));
        let ids = vec!["missing".to_string()];
        let request = ValidityRequest {
            marking_definitions: &ids,
            ..Default::default()
        };
        assert!(matches!(
            calc.compute_window(&request).await,
            Err(DomainError::NotFound { .. })
        ));
    }
}
