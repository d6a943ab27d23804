//! Entities stored in the threat-intelligence graph
//!
//! Each entity kind has its own creation request type. Requests carry only
//! the fields that kind persists, so deriving one request from another is
//! an explicit mapping rather than field removal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::DEFAULT_SCORE;

/// Entity type names as understood by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    #[serde(rename = "Indicator")]
    Indicator,
    #[serde(rename = "Stix-Observable")]
    StixObservable,
    #[serde(rename = "Marking-Definition")]
    MarkingDefinition,
    #[serde(rename = "Kill-Chain-Phase")]
    KillChainPhase,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Indicator => "Indicator",
            EntityType::StixObservable => "Stix-Observable",
            EntityType::MarkingDefinition => "Marking-Definition",
            EntityType::KillChainPhase => "Kill-Chain-Phase",
        }
    }

    /// Prefix used when minting STIX ids for this type
    pub fn stix_prefix(&self) -> &'static str {
        match self {
            EntityType::Indicator => "indicator",
            EntityType::StixObservable => "observable",
            EntityType::MarkingDefinition => "marking-definition",
            EntityType::KillChainPhase => "kill-chain-phase",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category tag attached to an entity at creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityCategory {
    #[serde(rename = "Stix-Domain-Entity")]
    StixDomainEntity,
    #[serde(rename = "Stix-Observable")]
    StixObservable,
    #[serde(rename = "Stix-Domain")]
    StixDomain,
}

impl EntityCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityCategory::StixDomainEntity => "Stix-Domain-Entity",
            EntityCategory::StixObservable => "Stix-Observable",
            EntityCategory::StixDomain => "Stix-Domain",
        }
    }
}

/// A detection indicator with a bounded validity window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    /// Internal store id
    pub id: String,
    /// External STIX id (`indicator--<uuid>`)
    pub stix_id_key: Option<String>,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub alias: Vec<String>,
    /// Detection pattern observables are derived from
    pub indicator_pattern: String,
    pub pattern_type: Option<String>,
    pub score: i64,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    #[serde(default)]
    pub marking_definitions: Vec<String>,
    #[serde(default)]
    pub kill_chain_phases: Vec<String>,
    pub created_by_ref: Option<String>,
    /// Source-side creation time
    pub created: Option<DateTime<Utc>>,
    /// Source-side modification time
    pub modified: Option<DateTime<Utc>>,
    /// Store-side creation time (paging order)
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A classification label gating how long an indicator stays valid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkingDefinition {
    pub id: String,
    pub stix_id_key: Option<String>,
    /// Scheme name, e.g. `TLP`
    pub definition_type: String,
    /// Label, e.g. `TLP:AMBER`
    pub definition: String,
    /// Higher is more restrictive
    pub level: i64,
    pub created_at: DateTime<Utc>,
}

/// A stage of an attack lifecycle model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillChainPhase {
    pub id: String,
    pub stix_id_key: Option<String>,
    pub kill_chain_name: String,
    pub phase_name: String,
    pub phase_order: i64,
    pub created_at: DateTime<Utc>,
}

/// A concrete artifact derived from an indicator pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observable {
    pub id: String,
    pub stix_id_key: Option<String>,
    /// Observable type, e.g. `IPv4-Addr` or `File-SHA256`
    pub observable_type: String,
    pub observable_value: String,
    pub description: Option<String>,
    #[serde(default)]
    pub marking_definitions: Vec<String>,
    pub created_by_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Any entity the store can hand back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity_type")]
pub enum StixEntity {
    #[serde(rename = "Indicator")]
    Indicator(Indicator),
    #[serde(rename = "Stix-Observable")]
    Observable(Observable),
    #[serde(rename = "Marking-Definition")]
    MarkingDefinition(MarkingDefinition),
    #[serde(rename = "Kill-Chain-Phase")]
    KillChainPhase(KillChainPhase),
}

impl StixEntity {
    pub fn id(&self) -> &str {
        match self {
            StixEntity::Indicator(e) => &e.id,
            StixEntity::Observable(e) => &e.id,
            StixEntity::MarkingDefinition(e) => &e.id,
            StixEntity::KillChainPhase(e) => &e.id,
        }
    }

    pub fn stix_id(&self) -> Option<&str> {
        match self {
            StixEntity::Indicator(e) => e.stix_id_key.as_deref(),
            StixEntity::Observable(e) => e.stix_id_key.as_deref(),
            StixEntity::MarkingDefinition(e) => e.stix_id_key.as_deref(),
            StixEntity::KillChainPhase(e) => e.stix_id_key.as_deref(),
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            StixEntity::Indicator(_) => EntityType::Indicator,
            StixEntity::Observable(_) => EntityType::StixObservable,
            StixEntity::MarkingDefinition(_) => EntityType::MarkingDefinition,
            StixEntity::KillChainPhase(_) => EntityType::KillChainPhase,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            StixEntity::Indicator(e) => e.created_at,
            StixEntity::Observable(e) => e.created_at,
            StixEntity::MarkingDefinition(e) => e.created_at,
            StixEntity::KillChainPhase(e) => e.created_at,
        }
    }

    /// Value of a searchable text field, if this entity has it
    pub fn search_values(&self, field: &str) -> Vec<&str> {
        match (self, field) {
            (StixEntity::Indicator(e), "name") => vec![e.name.as_str()],
            (StixEntity::Indicator(e), "alias") => e.alias.iter().map(String::as_str).collect(),
            (StixEntity::Observable(e), "observable_value") => vec![e.observable_value.as_str()],
            (StixEntity::MarkingDefinition(e), "definition") => vec![e.definition.as_str()],
            (StixEntity::KillChainPhase(e), "phase_name") => vec![e.phase_name.as_str()],
            _ => Vec::new(),
        }
    }

    pub fn into_indicator(self) -> Option<Indicator> {
        match self {
            StixEntity::Indicator(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_observable(self) -> Option<Observable> {
        match self {
            StixEntity::Observable(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_marking_definition(self) -> Option<MarkingDefinition> {
        match self {
            StixEntity::MarkingDefinition(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_kill_chain_phase(self) -> Option<KillChainPhase> {
        match self {
            StixEntity::KillChainPhase(e) => Some(e),
            _ => None,
        }
    }
}

/// Raw indicator creation input as submitted by a caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorInput {
    #[serde(default)]
    pub stix_id_key: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub alias: Vec<String>,
    pub indicator_pattern: String,
    #[serde(default)]
    pub pattern_type: Option<String>,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    /// Hint selecting a validity table; never persisted
    #[serde(default)]
    pub main_observable_type: Option<String>,
    #[serde(default)]
    pub marking_definitions: Vec<String>,
    #[serde(default)]
    pub kill_chain_phases: Vec<String>,
    #[serde(default)]
    pub created_by_ref: Option<String>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
}

impl IndicatorInput {
    pub fn new(name: &str, indicator_pattern: &str) -> Self {
        Self {
            name: name.to_string(),
            indicator_pattern: indicator_pattern.to_string(),
            ..Default::default()
        }
    }

    /// Score to persist: absent or zero falls back to the default
    pub fn effective_score(&self) -> i64 {
        match self.score {
            Some(score) if score != 0 => score,
            _ => DEFAULT_SCORE,
        }
    }

    /// Persisted payload once the validity window is known
    pub fn into_new_indicator(
        self,
        valid_from: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    ) -> NewIndicator {
        let score = self.effective_score();
        NewIndicator {
            stix_id_key: self.stix_id_key,
            name: self.name,
            description: self.description,
            alias: self.alias,
            indicator_pattern: self.indicator_pattern,
            pattern_type: self.pattern_type,
            score,
            valid_from,
            valid_until,
            marking_definitions: self.marking_definitions,
            kill_chain_phases: self.kill_chain_phases,
            created_by_ref: self.created_by_ref,
            created: self.created,
            modified: self.modified,
        }
    }
}

/// Indicator payload handed to the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewIndicator {
    pub stix_id_key: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub alias: Vec<String>,
    pub indicator_pattern: String,
    pub pattern_type: Option<String>,
    pub score: i64,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub marking_definitions: Vec<String>,
    pub kill_chain_phases: Vec<String>,
    pub created_by_ref: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

impl NewIndicator {
    /// Observable payload sharing this indicator's provenance and markings
    pub fn derive_observable(&self, descriptor: &ObservableDescriptor) -> NewObservable {
        NewObservable {
            observable_type: descriptor.observable_type.clone(),
            observable_value: descriptor.value.clone(),
            description: self.description.clone(),
            marking_definitions: self.marking_definitions.clone(),
            created_by_ref: self.created_by_ref.clone(),
        }
    }
}

/// Observable payload handed to the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewObservable {
    pub observable_type: String,
    pub observable_value: String,
    pub description: Option<String>,
    pub marking_definitions: Vec<String>,
    pub created_by_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMarkingDefinition {
    pub stix_id_key: Option<String>,
    pub definition_type: String,
    pub definition: String,
    pub level: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewKillChainPhase {
    pub stix_id_key: Option<String>,
    pub kill_chain_name: String,
    pub phase_name: String,
    pub phase_order: i64,
}

/// Typed creation request for any entity kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity_type", content = "payload")]
pub enum NewEntity {
    #[serde(rename = "Indicator")]
    Indicator(NewIndicator),
    #[serde(rename = "Stix-Observable")]
    Observable(NewObservable),
    #[serde(rename = "Marking-Definition")]
    MarkingDefinition(NewMarkingDefinition),
    #[serde(rename = "Kill-Chain-Phase")]
    KillChainPhase(NewKillChainPhase),
}

impl NewEntity {
    pub fn entity_type(&self) -> EntityType {
        match self {
            NewEntity::Indicator(_) => EntityType::Indicator,
            NewEntity::Observable(_) => EntityType::StixObservable,
            NewEntity::MarkingDefinition(_) => EntityType::MarkingDefinition,
            NewEntity::KillChainPhase(_) => EntityType::KillChainPhase,
        }
    }
}

/// An observable as extracted from a detection pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObservableDescriptor {
    pub observable_type: String,
    pub value: String,
}

impl ObservableDescriptor {
    pub fn new(observable_type: &str, value: &str) -> Self {
        Self {
            observable_type: observable_type.to_string(),
            value: value.to_string(),
        }
    }
}

/// Principal on whose behalf a change is made
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub name: String,
}

impl Principal {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
        }
    }
}
