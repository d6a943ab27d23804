//! Entity identifiers
//!
//! Two id spaces coexist: internal store ids and external STIX ids of the
//! form `<type>--<36-char token>`.

use regex::Regex;
use std::sync::LazyLock;
use uuid::Uuid;

use crate::EntityType;

static STIX_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z-]+--[\w-]{36}$").unwrap());

/// An id routed to the lookup that understands it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRef<'a> {
    /// External `type--token` id
    Stix(&'a str),
    /// Anything else
    Internal(&'a str),
}

impl<'a> EntityRef<'a> {
    pub fn parse(id: &'a str) -> Self {
        if is_stix_id(id) {
            EntityRef::Stix(id)
        } else {
            EntityRef::Internal(id)
        }
    }

    pub fn as_str(&self) -> &'a str {
        match self {
            EntityRef::Stix(id) | EntityRef::Internal(id) => id,
        }
    }
}

/// Whether `id` is an external STIX id
pub fn is_stix_id(id: &str) -> bool {
    STIX_ID_REGEX.is_match(id)
}

/// Mint a fresh internal id
pub fn new_internal_id() -> String {
    Uuid::new_v4().to_string()
}

/// Mint a fresh STIX id for an entity type
pub fn new_stix_id(entity_type: EntityType) -> String {
    format!("{}--{}", entity_type.stix_prefix(), Uuid::new_v4())
}
