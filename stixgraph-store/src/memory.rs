//! In-process entity store
//!
//! Keeps entities in memory with the same contract as a remote store:
//! STIX id uniqueness, cursor paging in creation order, relation rows, and
//! removal of dangling relations when an entity is deleted.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use stixgraph_core::{
    new_internal_id, new_stix_id, system_clock, Connection, Edge, EntityCategory, EntityType,
    Indicator, KillChainPhase, MarkingDefinition, NewEntity, Observable, OrderBy, PageInfo,
    PagingArgs, SharedClock, StixEntity,
};

use crate::{EntityStore, Relation, RelationQuery, RelationRow, StoreError};

struct Record {
    entity: StixEntity,
    category: EntityCategory,
    /// Insertion sequence, breaks ties between equal timestamps
    seq: u64,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, Record>,
    stix_index: HashMap<String, String>,
    relations: Vec<Relation>,
    next_seq: u64,
}

/// Entity store backed by process memory
pub struct InMemoryStore {
    inner: RwLock<Inner>,
    clock: SharedClock,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    /// Store stamping `created_at` from the given clock
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of stored entities of one type
    pub fn count(&self, entity_type: EntityType) -> usize {
        self.inner
            .read()
            .records
            .values()
            .filter(|r| r.entity.entity_type() == entity_type)
            .count()
    }

    pub fn category_of(&self, id: &str) -> Option<EntityCategory> {
        self.inner.read().records.get(id).map(|r| r.category)
    }

    pub fn relations(&self) -> Vec<Relation> {
        self.inner.read().relations.clone()
    }

    fn materialize(
        payload: NewEntity,
        id: String,
        stix_id: String,
        now: DateTime<Utc>,
    ) -> StixEntity {
        match payload {
            NewEntity::Indicator(p) => StixEntity::Indicator(Indicator {
                id,
                stix_id_key: Some(stix_id),
                name: p.name,
                description: p.description,
                alias: p.alias,
                indicator_pattern: p.indicator_pattern,
                pattern_type: p.pattern_type,
                score: p.score,
                valid_from: p.valid_from,
                valid_until: p.valid_until,
                marking_definitions: p.marking_definitions,
                kill_chain_phases: p.kill_chain_phases,
                created_by_ref: p.created_by_ref,
                created: p.created,
                modified: p.modified,
                created_at: now,
                updated_at: now,
            }),
            NewEntity::Observable(p) => StixEntity::Observable(Observable {
                id,
                stix_id_key: Some(stix_id),
                observable_type: p.observable_type,
                observable_value: p.observable_value,
                description: p.description,
                marking_definitions: p.marking_definitions,
                created_by_ref: p.created_by_ref,
                created_at: now,
            }),
            NewEntity::MarkingDefinition(p) => StixEntity::MarkingDefinition(MarkingDefinition {
                id,
                stix_id_key: Some(stix_id),
                definition_type: p.definition_type,
                definition: p.definition,
                level: p.level,
                created_at: now,
            }),
            NewEntity::KillChainPhase(p) => StixEntity::KillChainPhase(KillChainPhase {
                id,
                stix_id_key: Some(stix_id),
                kill_chain_name: p.kill_chain_name,
                phase_name: p.phase_name,
                phase_order: p.phase_order,
                created_at: now,
            }),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn requested_stix_id(payload: &NewEntity) -> Option<&str> {
    match payload {
        NewEntity::Indicator(p) => p.stix_id_key.as_deref(),
        NewEntity::MarkingDefinition(p) => p.stix_id_key.as_deref(),
        NewEntity::KillChainPhase(p) => p.stix_id_key.as_deref(),
        NewEntity::Observable(_) => None,
    }
}

fn sort_name(entity: &StixEntity) -> String {
    match entity {
        StixEntity::Indicator(e) => e.name.to_lowercase(),
        StixEntity::Observable(e) => e.observable_value.to_lowercase(),
        StixEntity::MarkingDefinition(e) => e.definition.to_lowercase(),
        StixEntity::KillChainPhase(e) => e.phase_name.to_lowercase(),
    }
}

type SortKey = (String, u64);

fn sort_key(record: &Record, order_by: OrderBy) -> SortKey {
    let primary = match order_by {
        OrderBy::CreatedAt => record
            .entity
            .created_at()
            .to_rfc3339_opts(SecondsFormat::Nanos, true),
        OrderBy::Name => sort_name(&record.entity),
    };
    (primary, record.seq)
}

fn encode_cursor(key: &SortKey) -> String {
    format!("{}|{:020}", key.0, key.1)
}

fn decode_cursor(cursor: &str) -> Result<SortKey, StoreError> {
    cursor
        .rsplit_once('|')
        .and_then(|(primary, seq)| seq.parse().ok().map(|seq| (primary.to_string(), seq)))
        .ok_or_else(|| StoreError::Backend(format!("Invalid cursor: {cursor}")))
}

fn matches_search(entity: &StixEntity, search_fields: &[&str], search: Option<&str>) -> bool {
    let Some(search) = search.filter(|s| !s.is_empty()) else {
        return true;
    };
    let needle = search.to_lowercase();
    search_fields.iter().any(|field| {
        entity
            .search_values(field)
            .iter()
            .any(|value| value.to_lowercase().contains(&needle))
    })
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn create_entity(
        &self,
        payload: NewEntity,
        category: EntityCategory,
    ) -> Result<StixEntity, StoreError> {
        let now = self.clock.now();
        let mut inner = self.inner.write();

        let entity_type = payload.entity_type();
        let stix_id = match requested_stix_id(&payload) {
            Some(requested) => {
                if inner.stix_index.contains_key(requested) {
                    return Err(StoreError::Constraint(format!(
                        "{entity_type} with stix id {requested} already exists"
                    )));
                }
                requested.to_string()
            }
            None => new_stix_id(entity_type),
        };

        let id = new_internal_id();
        let entity = Self::materialize(payload, id.clone(), stix_id.clone(), now);
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.stix_index.insert(stix_id, id.clone());
        inner.records.insert(
            id.clone(),
            Record {
                entity: entity.clone(),
                category,
                seq,
            },
        );

        debug!("Created {} {}", entity_type, id);
        Ok(entity)
    }

    async fn load_entity_by_id(&self, id: &str) -> Result<Option<StixEntity>, StoreError> {
        Ok(self.inner.read().records.get(id).map(|r| r.entity.clone()))
    }

    async fn load_entity_by_stix_id(
        &self,
        stix_id: &str,
    ) -> Result<Option<StixEntity>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .stix_index
            .get(stix_id)
            .and_then(|id| inner.records.get(id))
            .map(|r| r.entity.clone()))
    }

    async fn list_entities(
        &self,
        types: &[EntityType],
        search_fields: &[&str],
        args: &PagingArgs,
    ) -> Result<Connection<StixEntity>, StoreError> {
        let after = args.after.as_deref().map(decode_cursor).transpose()?;
        let inner = self.inner.read();

        let mut matched: Vec<(SortKey, &StixEntity)> = inner
            .records
            .values()
            .filter(|r| types.contains(&r.entity.entity_type()))
            .filter(|r| matches_search(&r.entity, search_fields, args.search.as_deref()))
            .map(|r| (sort_key(r, args.order_by), &r.entity))
            .collect();
        matched.sort_by(|a, b| a.0.cmp(&b.0));
        if !args.order_asc {
            matched.reverse();
        }

        let global_count = matched.len();
        let skipped = match &after {
            Some(cursor) => matched
                .iter()
                .take_while(|(key, _)| {
                    if args.order_asc {
                        key <= cursor
                    } else {
                        key >= cursor
                    }
                })
                .count(),
            None => 0,
        };

        let edges: Vec<Edge<StixEntity>> = matched
            .iter()
            .skip(skipped)
            .take(args.first)
            .map(|(key, entity)| Edge {
                node: (*entity).clone(),
                cursor: encode_cursor(key),
            })
            .collect();

        let has_next_page = skipped + edges.len() < global_count;
        Ok(Connection {
            page_info: PageInfo {
                start_cursor: edges.first().map(|e| e.cursor.clone()),
                end_cursor: edges.last().map(|e| e.cursor.clone()),
                has_next_page,
                has_previous_page: skipped > 0,
                global_count,
            },
            edges,
        })
    }

    async fn delete_entity_by_id(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let record = inner
            .records
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if let Some(stix_id) = record.entity.stix_id() {
            inner.stix_index.remove(stix_id);
        }
        inner.relations.retain(|r| r.from_id != id && r.to_id != id);

        debug!("Deleted {} {}", record.entity.entity_type(), id);
        Ok(())
    }

    async fn create_relation(
        &self,
        from_id: &str,
        to_id: &str,
        relation_type: &str,
    ) -> Result<Relation, StoreError> {
        let now = self.clock.now();
        let mut inner = self.inner.write();

        for id in [from_id, to_id] {
            if !inner.records.contains_key(id) {
                return Err(StoreError::NotFound(id.to_string()));
            }
        }

        let relation = Relation {
            id: new_internal_id(),
            relation_type: relation_type.to_string(),
            from_id: from_id.to_string(),
            to_id: to_id.to_string(),
            created_at: now,
        };
        inner.relations.push(relation.clone());
        Ok(relation)
    }

    async fn find_with_connected_relations(
        &self,
        query: &RelationQuery,
    ) -> Result<Vec<RelationRow>, StoreError> {
        let inner = self.inner.read();

        let from_matches = inner
            .records
            .get(&query.from_id)
            .is_some_and(|r| r.entity.entity_type() == query.from_type);
        if !from_matches {
            return Ok(Vec::new());
        }

        Ok(inner
            .relations
            .iter()
            .filter(|r| r.from_id == query.from_id && r.relation_type == query.relation_type)
            .filter_map(|r| {
                inner
                    .records
                    .get(&r.to_id)
                    .filter(|to| to.entity.entity_type() == query.to_type)
                    .map(|to| RelationRow {
                        node: to.entity.clone(),
                        relation: r.clone(),
                    })
            })
            .collect())
    }
}
