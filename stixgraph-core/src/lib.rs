//! stixgraph core - domain model for the indicator lifecycle engine
//!
//! This crate provides the foundational primitives:
//! - Typed entities and per-kind creation requests
//! - STIX / internal identifier routing
//! - Relay-style cursor paging types
//! - Validity (TTL) tables and their configuration
//! - Observable extraction from STIX patterns

pub mod clock;
pub mod entities;
pub mod ids;
pub mod paging;
pub mod patterns;
pub mod validity;

pub use clock::*;
pub use entities::*;
pub use ids::*;
pub use paging::*;
pub use patterns::*;
pub use validity::*;

/// Score given to indicators created without one
pub const DEFAULT_SCORE: i64 = 50;

/// Page size used by listings and bulk retirement
pub const DEFAULT_PAGE_SIZE: usize = 200;
