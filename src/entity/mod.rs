//! Venue resolution subsystem.
//!
//! Fetches a location-aware, deduplicated page of venues (or a single venue)
//! through an ordered fallback chain, normalizes whatever row shape the
//! backend returns, and ranks by straight-line distance.

pub mod chain;
pub mod feed;
pub mod normalize;
pub mod resolver;
pub mod rest;
pub mod store;
pub mod types;

pub use chain::{ChainSettings, FallbackChain};
pub use feed::{location_feed, LocationPublisher, LocationSource};
pub use normalize::{normalize, normalize_payload, NormalizeError, SourceShape};
pub use resolver::{DetailView, EntityResolver, ListView, ViewState};
pub use rest::RestStore;
pub use store::{EntityStore, MemoryStore, StoreError, TableQuery};
pub use types::{EntityRecord, FallbackOutcome, Lookup, RankedResult, ResolveError, Tier};
