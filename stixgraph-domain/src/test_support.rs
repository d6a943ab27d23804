//! Store fakes shared by the domain tests

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

use stixgraph_core::{
    Connection, Edge, EntityCategory, EntityType, FixedClock, Indicator, NewEntity,
    NewKillChainPhase, NewMarkingDefinition, PageInfo, PagingArgs, StixEntity,
};
use stixgraph_store::{
    EntityStore, InMemoryStore, Relation, RelationQuery, RelationRow, StoreError,
};

pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap()
}

pub(crate) fn sample_indicator(id: &str) -> Indicator {
    Indicator {
        id: id.to_string(),
        stix_id_key: None,
        name: id.to_string(),
        description: None,
        alias: Vec::new(),
        indicator_pattern: "[ipv4-addr:value = '10.0.0.1']".to_string(),
        pattern_type: Some("stix".to_string()),
        score: 50,
        valid_from: t0(),
        valid_until: t0() + chrono::Duration::days(30),
        marking_definitions: Vec::new(),
        kill_chain_phases: Vec::new(),
        created_by_ref: None,
        created: None,
        modified: None,
        created_at: t0(),
        updated_at: t0(),
    }
}

/// In-memory store that records every creation call
pub(crate) struct RecordingStore {
    pub inner: InMemoryStore,
    created: Mutex<Vec<NewEntity>>,
    fail_observables: HashSet<String>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::failing_observables(&[])
    }

    /// Observable creations for these values fail
    pub fn failing_observables(values: &[&str]) -> Self {
        Self {
            inner: InMemoryStore::with_clock(Arc::new(FixedClock(t0()))),
            created: Mutex::new(Vec::new()),
            fail_observables: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn created_of(&self, entity_type: EntityType) -> Vec<NewEntity> {
        self.created
            .lock()
            .iter()
            .filter(|p| p.entity_type() == entity_type)
            .cloned()
            .collect()
    }

    pub async fn marking(&self, definition: &str, level: i64) -> String {
        let entity = self
            .inner
            .create_entity(
                NewEntity::MarkingDefinition(NewMarkingDefinition {
                    stix_id_key: None,
                    definition_type: "TLP".to_string(),
                    definition: definition.to_string(),
                    level,
                }),
                EntityCategory::StixDomain,
            )
            .await
            .unwrap();
        entity.id().to_string()
    }

    pub async fn phase(&self, phase_name: &str) -> String {
        let entity = self
            .inner
            .create_entity(
                NewEntity::KillChainPhase(NewKillChainPhase {
                    stix_id_key: None,
                    kill_chain_name: "mitre-attack".to_string(),
                    phase_name: phase_name.to_string(),
                    phase_order: 0,
                }),
                EntityCategory::StixDomain,
            )
            .await
            .unwrap();
        entity.id().to_string()
    }
}

#[async_trait]
impl EntityStore for RecordingStore {
    async fn create_entity(
        &self,
        payload: NewEntity,
        category: EntityCategory,
    ) -> Result<StixEntity, StoreError> {
        self.created.lock().push(payload.clone());
        if let NewEntity::Observable(obs) = &payload {
            if self.fail_observables.contains(&obs.observable_value) {
                return Err(StoreError::Backend(format!(
                    "rejected {}",
                    obs.observable_value
                )));
            }
        }
        self.inner.create_entity(payload, category).await
    }

    async fn load_entity_by_id(&self, id: &str) -> Result<Option<StixEntity>, StoreError> {
        self.inner.load_entity_by_id(id).await
    }

    async fn load_entity_by_stix_id(
        &self,
        stix_id: &str,
    ) -> Result<Option<StixEntity>, StoreError> {
        self.inner.load_entity_by_stix_id(stix_id).await
    }

    async fn list_entities(
        &self,
        types: &[EntityType],
        search_fields: &[&str],
        args: &PagingArgs,
    ) -> Result<Connection<StixEntity>, StoreError> {
        self.inner.list_entities(types, search_fields, args).await
    }

    async fn delete_entity_by_id(&self, id: &str) -> Result<(), StoreError> {
        self.inner.delete_entity_by_id(id).await
    }

    async fn create_relation(
        &self,
        from_id: &str,
        to_id: &str,
        relation_type: &str,
    ) -> Result<Relation, StoreError> {
        self.inner.create_relation(from_id, to_id, relation_type).await
    }

    async fn find_with_connected_relations(
        &self,
        query: &RelationQuery,
    ) -> Result<Vec<RelationRow>, StoreError> {
        self.inner.find_with_connected_relations(query).await
    }
}

/// Store serving a fixed sequence of indicator pages
///
/// Page `i` holds indicators `ind-{i}-{j}`; edge cursors are `{i}:{j}`.
pub(crate) struct PagedStore {
    page_sizes: Vec<usize>,
    pub list_calls: Mutex<Vec<PagingArgs>>,
    pub deleted: Mutex<Vec<String>>,
    fail_delete: Option<String>,
    missing: HashSet<String>,
}

impl PagedStore {
    pub fn new(page_sizes: &[usize]) -> Self {
        Self {
            page_sizes: page_sizes.to_vec(),
            list_calls: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            fail_delete: None,
            missing: HashSet::new(),
        }
    }

    /// Deleting this id fails with a backend error
    pub fn fail_delete(mut self, id: &str) -> Self {
        self.fail_delete = Some(id.to_string());
        self
    }

    /// Deleting this id reports it as already gone
    pub fn missing(mut self, id: &str) -> Self {
        self.missing.insert(id.to_string());
        self
    }

    fn page_index(after: Option<&str>) -> usize {
        after
            .and_then(|c| c.split_once(':'))
            .and_then(|(page, _)| page.parse::<usize>().ok())
            .map_or(0, |page| page + 1)
    }
}

fn unsupported() -> StoreError {
    StoreError::Backend("unsupported by PagedStore".to_string())
}

#[async_trait]
impl EntityStore for PagedStore {
    async fn create_entity(
        &self,
        _payload: NewEntity,
        _category: EntityCategory,
    ) -> Result<StixEntity, StoreError> {
        Err(unsupported())
    }

    async fn load_entity_by_id(&self, _id: &str) -> Result<Option<StixEntity>, StoreError> {
        Err(unsupported())
    }

    async fn load_entity_by_stix_id(
        &self,
        _stix_id: &str,
    ) -> Result<Option<StixEntity>, StoreError> {
        Err(unsupported())
    }

    async fn list_entities(
        &self,
        _types: &[EntityType],
        _search_fields: &[&str],
        args: &PagingArgs,
    ) -> Result<Connection<StixEntity>, StoreError> {
        self.list_calls.lock().push(args.clone());

        let page = Self::page_index(args.after.as_deref());
        let size = self.page_sizes.get(page).copied().unwrap_or(0);
        let edges = (0..size)
            .map(|j| Edge {
                node: StixEntity::Indicator(sample_indicator(&format!("ind-{page}-{j}"))),
                cursor: format!("{page}:{j}"),
            })
            .collect();

        Ok(Connection {
            edges,
            page_info: PageInfo {
                has_next_page: page + 1 < self.page_sizes.len(),
                global_count: self.page_sizes.iter().sum(),
                ..Default::default()
            },
        })
    }

    async fn delete_entity_by_id(&self, id: &str) -> Result<(), StoreError> {
        if self.fail_delete.as_deref() == Some(id) {
            return Err(StoreError::Backend(format!("cannot delete {id}")));
        }
        if self.missing.contains(id) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        self.deleted.lock().push(id.to_string());
        Ok(())
    }

    async fn create_relation(
        &self,
        _from_id: &str,
        _to_id: &str,
        _relation_type: &str,
    ) -> Result<Relation, StoreError> {
        Err(unsupported())
    }

    async fn find_with_connected_relations(
        &self,
        _query: &RelationQuery,
    ) -> Result<Vec<RelationRow>, StoreError> {
        Err(unsupported())
    }
}
