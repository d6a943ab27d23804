//! stixgraph domain - indicator lifecycle
//!
//! Operations layered over an [`stixgraph_store::EntityStore`]:
//! - **Classification**: resolves marking definitions and kill-chain phases
//! - **Validity**: computes `valid_until` from classification and TTL tables
//! - **Indicators**: creation with defaults, lookup, listing
//! - **Observables**: cascade of observables extracted from a pattern
//! - **Retirement**: paged bulk deletion with a resumable cursor

pub mod classification;
pub mod error;
pub mod indicator;
pub mod observable;
pub mod retirement;
pub mod validity;

#[cfg(test)]
mod test_support;

pub use classification::*;
pub use error::*;
pub use indicator::*;
pub use observable::*;
pub use retirement::*;
pub use validity::*;
