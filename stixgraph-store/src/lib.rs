//! stixgraph store layer
//!
//! Provides access to the graph entity store:
//! - The [`EntityStore`] capability set the domain layer consumes
//! - An in-memory store with cursor paging
//! - An HTTP client for a remote store, bounded by a request timeout
//! - Change-event notifiers

pub mod events;
pub mod http;
pub mod memory;
pub mod store;

pub use events::*;
pub use http::*;
pub use memory::*;
pub use store::*;
