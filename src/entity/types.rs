//! Core types for the entity resolver.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use super::store::StoreError;
use crate::geo::GeoPoint;

/// The canonical venue shape every downstream step works on.
///
/// `coordinates` holds both halves of the lat/lng pair or neither.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(flatten)]
    pub coordinates: Option<GeoPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An entity plus its distance from the reference location, when known.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedResult {
    #[serde(flatten)]
    pub record: EntityRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

impl RankedResult {
    pub fn unranked(record: EntityRecord) -> Self {
        Self { record, distance_km: None }
    }

    pub fn at_distance(record: EntityRecord, km: f64) -> Self {
        Self { record, distance_km: Some(km) }
    }
}

/// One retrieval strategy in the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// The aggregating search service.
    Service,
    /// A direct read against the canonical table.
    Table,
    /// Identifier retried as a human-readable slug.
    Slug,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service => write!(f, "service"),
            Self::Table => write!(f, "table"),
            Self::Slug => write!(f, "slug"),
        }
    }
}

/// A single tier that errored. Recorded, never surfaced on its own.
#[derive(Debug)]
pub struct TierFailure {
    pub tier: Tier,
    pub error: StoreError,
}

impl fmt::Display for TierFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} tier: {}", self.tier, self.error)
    }
}

/// Result of running the whole chain.
#[derive(Debug)]
pub enum FallbackOutcome {
    /// First tier that produced at least one usable record.
    Success {
        tier: Tier,
        records: Vec<EntityRecord>,
        /// Rows from that tier dropped by normalization.
        rejected: usize,
        /// False when the tier returned a whole candidate batch that still
        /// has to be ranked and cut down to the requested page.
        paged: bool,
    },
    /// No tier produced records and at least one answered without error.
    Empty { failures: Vec<TierFailure> },
    /// Every tier errored.
    Failure(Vec<TierFailure>),
}

/// Outcome of a by-identifier lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(EntityRecord),
    NotFound,
}

impl Lookup {
    pub fn found(self) -> Option<EntityRecord> {
        match self {
            Self::Found(record) => Some(record),
            Self::NotFound => None,
        }
    }
}

/// Errors surfaced by the resolver.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("could not retrieve entities: all {} lookup tiers failed", .failures.len())]
    ResolutionFailed { failures: Vec<TierFailure> },
    #[error("request was superseded by a newer one")]
    Superseded,
    #[error("request was cancelled")]
    Cancelled,
}

impl ResolveError {
    /// Only whole-chain retrieval failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ResolutionFailed { .. })
    }
}
