//! The fallback chain: an ordered list of retrieval strategies run by one
//! runner that stops at the first tier yielding usable records.
//!
//! List flow:  aggregating service → direct table page (or, with an origin,
//!             the newest `scan_limit` rows so ranking sees every candidate)
//! By-id flow: table by primary key → table by slug
//!
//! A tier that errors is logged and skipped. The chain reports `Failure` only
//! when every tier errored, and `Empty` when no tier produced records but at
//! least one answered cleanly.

use std::sync::Arc;
use tracing::{debug, warn};

use super::normalize::{normalize_payload, SourceShape};
use super::store::{EntityStore, StoreError, TableQuery};
use super::types::{FallbackOutcome, ResolveError, Tier, TierFailure};
use crate::geo::Location;

/// Where the chain reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSettings {
    /// Canonical venue table.
    pub table: String,
    /// Column holding the human-readable identifier.
    pub slug_field: String,
    /// Column the direct table page is ordered by (newest first).
    pub order_by: Option<String>,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            table: "mosques".into(),
            slug_field: "slug".into(),
            order_by: Some("created_at".into()),
        }
    }
}

/// Lets the owner of a request stop the chain between tiers.
pub trait Interrupt: Send + Sync {
    fn check(&self) -> Result<(), ResolveError>;
}

/// An interrupt that never fires.
pub struct Uninterrupted;

impl Interrupt for Uninterrupted {
    fn check(&self) -> Result<(), ResolveError> {
        Ok(())
    }
}

/// One retrieval attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy<'a> {
    Service {
        page: u32,
        page_size: u32,
        location: Option<&'a Location>,
    },
    Table(TableQuery),
    Slug(TableQuery),
}

impl Strategy<'_> {
    pub fn tier(&self) -> Tier {
        match self {
            Self::Service { .. } => Tier::Service,
            Self::Table(_) => Tier::Table,
            Self::Slug(_) => Tier::Slug,
        }
    }

    /// The service merges venues with business listings, so its rows use the
    /// alternate layout.
    pub fn shape(&self) -> SourceShape {
        match self {
            Self::Service { .. } => SourceShape::Alternate,
            Self::Table(_) | Self::Slug(_) => SourceShape::Primary,
        }
    }

    /// Whether the rows come back already cut to the requested page.
    pub fn is_paged(&self) -> bool {
        match self {
            Self::Service { .. } | Self::Slug(_) => true,
            Self::Table(query) => query.offset.is_some() || !query.eq.is_empty(),
        }
    }

    async fn fetch(
        &self,
        store: &dyn EntityStore,
        table: &str,
    ) -> Result<serde_json::Value, StoreError> {
        match self {
            Self::Service {
                page,
                page_size,
                location,
            } => store.query_aggregating_service(*page, *page_size, *location).await,
            Self::Table(query) | Self::Slug(query) => store.query_table(table, query).await,
        }
    }
}

/// Runs strategies strictly in order, one at a time.
#[derive(Clone)]
pub struct FallbackChain {
    store: Arc<dyn EntityStore>,
    settings: ChainSettings,
}

impl FallbackChain {
    pub fn new(store: Arc<dyn EntityStore>, settings: ChainSettings) -> Self {
        Self { store, settings }
    }

    /// Strategies for one page of the listing.
    ///
    /// Without an origin the table tier reads just the requested page. With
    /// one it reads up to `scan_limit` rows from the start, and the caller
    /// ranks the batch before cutting the page out of it.
    pub fn list_strategies<'a>(
        &self,
        page: u32,
        page_size: u32,
        location: Option<&'a Location>,
        scan_limit: usize,
    ) -> Vec<Strategy<'a>> {
        let size = page_size as usize;
        let mut direct = match location {
            Some(_) => TableQuery::new().limit(scan_limit.max(1)),
            None => TableQuery::new()
                .limit(size)
                .offset((page.saturating_sub(1) as usize).saturating_mul(size)),
        };
        if let Some(field) = &self.settings.order_by {
            direct = direct.order_by(field.clone(), true);
        }
        vec![
            Strategy::Service {
                page,
                page_size,
                location,
            },
            Strategy::Table(direct),
        ]
    }

    /// Strategies for a single identifier: primary key first, then slug.
    pub fn by_id_strategies(&self, identifier: &str) -> Vec<Strategy<'static>> {
        vec![
            Strategy::Table(TableQuery::new().eq("id", identifier).limit(1)),
            Strategy::Slug(
                TableQuery::new()
                    .eq(self.settings.slug_field.clone(), identifier)
                    .limit(1),
            ),
        ]
    }

    pub async fn resolve_list(
        &self,
        page: u32,
        page_size: u32,
        location: Option<&Location>,
        scan_limit: usize,
        interrupt: &dyn Interrupt,
    ) -> Result<FallbackOutcome, ResolveError> {
        let strategies = self.list_strategies(page, page_size, location, scan_limit);
        self.run(strategies, interrupt).await
    }

    pub async fn resolve_by_id(
        &self,
        identifier: &str,
        interrupt: &dyn Interrupt,
    ) -> Result<FallbackOutcome, ResolveError> {
        self.run(self.by_id_strategies(identifier), interrupt).await
    }

    /// Try each strategy in turn. Only the interrupt can end the run early
    /// with an error; store errors are folded into the outcome.
    pub async fn run(
        &self,
        strategies: Vec<Strategy<'_>>,
        interrupt: &dyn Interrupt,
    ) -> Result<FallbackOutcome, ResolveError> {
        let mut failures = Vec::new();
        let mut answered = false;

        for strategy in strategies {
            interrupt.check()?;
            let tier = strategy.tier();
            debug!(%tier, "trying tier");

            let fetched = strategy.fetch(self.store.as_ref(), &self.settings.table).await;
            interrupt.check()?;

            match fetched {
                Ok(payload) => {
                    let batch = normalize_payload(payload, strategy.shape());
                    if batch.rejected > 0 || batch.duplicates > 0 {
                        debug!(
                            %tier,
                            rejected = batch.rejected,
                            duplicates = batch.duplicates,
                            "rows dropped during normalization"
                        );
                    }
                    if !batch.records.is_empty() {
                        debug!(%tier, count = batch.records.len(), "tier succeeded");
                        return Ok(FallbackOutcome::Success {
                            tier,
                            records: batch.records,
                            rejected: batch.rejected,
                            paged: strategy.is_paged(),
                        });
                    }
                    debug!(%tier, "tier returned no records");
                    answered = true;
                }
                Err(error) => {
                    warn!(%tier, %error, "tier failed, falling back");
                    failures.push(TierFailure { tier, error });
                }
            }
        }

        if answered {
            Ok(FallbackOutcome::Empty { failures })
        } else {
            Ok(FallbackOutcome::Failure(failures))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::store::{Fault, MemoryStore, StoreCall};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chain(store: MemoryStore) -> (FallbackChain, Arc<MemoryStore>) {
        let store = Arc::new(store);
        (FallbackChain::new(store.clone(), ChainSettings::default()), store)
    }

    fn mosques() -> Vec<serde_json::Value> {
        vec![
            json!({
                "id": 1, "slug": "al-noor", "name": "Al Noor",
                "created_at": "2024-01-01T00:00:00Z"
            }),
            json!({
                "id": 2, "slug": "grand-mosque", "name": "Grand Mosque",
                "created_at": "2024-02-01T00:00:00Z"
            }),
        ]
    }

    fn tiers(calls: &[StoreCall]) -> Vec<&'static str> {
        calls
            .iter()
            .map(|c| match c {
                StoreCall::Service { .. } => "service",
                StoreCall::Table { query, .. } if query.eq.iter().any(|(f, _)| f == "slug") => {
                    "slug"
                }
                StoreCall::Table { .. } => "table",
            })
            .collect()
    }

    #[tokio::test]
    async fn test_service_success_skips_table() {
        let (chain, store) = chain(
            MemoryStore::new()
                .with_service_payload(json!([{"id": "s1", "business_name": "Service Hit"}]))
                .with_table("mosques", mosques()),
        );
        let outcome = chain.resolve_list(1, 10, None, 200, &Uninterrupted).await.unwrap();
        match outcome {
            FallbackOutcome::Success { tier, records, .. } => {
                assert_eq!(tier, Tier::Service);
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].name, "Service Hit");
            }
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(tiers(&store.calls()), vec!["service"]);
    }

    #[tokio::test]
    async fn test_service_failure_falls_back_to_table() {
        let (chain, store) = chain(
            MemoryStore::new().with_fault(Fault::Service).with_table("mosques", mosques()),
        );
        let outcome = chain.resolve_list(1, 10, None, 200, &Uninterrupted).await.unwrap();
        let FallbackOutcome::Success { tier, records, .. } = outcome else {
            panic!("expected success");
        };
        assert_eq!(tier, Tier::Table);
        // Newest first.
        assert_eq!(records[0].id, "2");
        assert_eq!(tiers(&store.calls()), vec!["service", "table"]);
    }

    #[tokio::test]
    async fn test_table_page_query_shape() {
        let (chain, _) = chain(MemoryStore::new());
        let strategies = chain.list_strategies(3, 20, None, 200);
        assert_eq!(
            strategies[1],
            Strategy::Table(TableQuery::new().limit(20).offset(40).order_by("created_at", true))
        );
        assert!(strategies[1].is_paged());
    }

    #[tokio::test]
    async fn test_located_table_read_scans_whole_batch() {
        let (chain, _) = chain(MemoryStore::new());
        let origin = Location::new(-31.95, 115.86);
        let strategies = chain.list_strategies(3, 20, Some(&origin), 150);
        assert_eq!(
            strategies[1],
            Strategy::Table(TableQuery::new().limit(150).order_by("created_at", true))
        );
        assert!(!strategies[1].is_paged());
        assert!(strategies[0].is_paged());
    }

    #[tokio::test]
    async fn test_all_empty_is_empty() {
        let (chain, _) = chain(MemoryStore::new().with_table("mosques", vec![]));
        let outcome = chain.resolve_list(1, 10, None, 200, &Uninterrupted).await.unwrap();
        assert!(matches!(outcome, FallbackOutcome::Empty { ref failures } if failures.is_empty()));
    }

    #[tokio::test]
    async fn test_all_failed_is_failure() {
        let (chain, _) =
            chain(MemoryStore::new().with_fault(Fault::Service).with_fault(Fault::Table));
        let outcome = chain.resolve_list(1, 10, None, 200, &Uninterrupted).await.unwrap();
        let FallbackOutcome::Failure(failures) = outcome else {
            panic!("expected failure");
        };
        let failed: Vec<Tier> = failures.iter().map(|f| f.tier).collect();
        assert_eq!(failed, vec![Tier::Service, Tier::Table]);
    }

    #[tokio::test]
    async fn test_mixed_failure_and_empty_is_empty() {
        let (chain, _) = chain(
            MemoryStore::new().with_fault(Fault::Service).with_table("mosques", vec![]),
        );
        let outcome = chain.resolve_list(1, 10, None, 200, &Uninterrupted).await.unwrap();
        assert!(matches!(outcome, FallbackOutcome::Empty { ref failures } if failures.len() == 1));
    }

    #[tokio::test]
    async fn test_rows_without_ids_count_as_empty_tier() {
        let (chain, store) = chain(
            MemoryStore::new()
                .with_service_payload(json!([{"business_name": "No Id"}]))
                .with_table("mosques", mosques()),
        );
        let outcome = chain.resolve_list(1, 10, None, 200, &Uninterrupted).await.unwrap();
        assert!(matches!(outcome, FallbackOutcome::Success { tier: Tier::Table, .. }));
        assert_eq!(tiers(&store.calls()), vec!["service", "table"]);
    }

    #[tokio::test]
    async fn test_by_id_falls_back_to_slug() {
        let (chain, store) = chain(MemoryStore::new().with_table("mosques", mosques()));
        let outcome = chain.resolve_by_id("grand-mosque", &Uninterrupted).await.unwrap();
        let FallbackOutcome::Success { tier, records, .. } = outcome else {
            panic!("expected success");
        };
        assert_eq!(tier, Tier::Slug);
        assert_eq!(records[0].id, "2");
        assert_eq!(tiers(&store.calls()), vec!["table", "slug"]);
    }

    #[tokio::test]
    async fn test_by_id_primary_key_hit_skips_slug() {
        let (chain, store) = chain(MemoryStore::new().with_table("mosques", mosques()));
        let outcome = chain.resolve_by_id("1", &Uninterrupted).await.unwrap();
        assert!(matches!(outcome, FallbackOutcome::Success { tier: Tier::Table, .. }));
        assert_eq!(tiers(&store.calls()), vec!["table"]);
    }

    #[tokio::test]
    async fn test_by_id_primary_key_error_still_tries_slug() {
        let (chain, _) = chain(
            MemoryStore::new()
                .with_fault(Fault::TableFilter("id".into()))
                .with_table("mosques", mosques()),
        );
        let outcome = chain.resolve_by_id("al-noor", &Uninterrupted).await.unwrap();
        assert!(matches!(outcome, FallbackOutcome::Success { tier: Tier::Slug, .. }));
    }

    struct TripAfter {
        allowed: usize,
        seen: AtomicUsize,
    }

    impl Interrupt for TripAfter {
        fn check(&self) -> Result<(), ResolveError> {
            if self.seen.fetch_add(1, Ordering::SeqCst) >= self.allowed {
                Err(ResolveError::Cancelled)
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_interrupt_stops_further_tiers() {
        let (chain, store) = chain(
            MemoryStore::new().with_fault(Fault::Service).with_table("mosques", mosques()),
        );
        // Allows the pre-service check only; trips right after the service call.
        let interrupt = TripAfter { allowed: 1, seen: AtomicUsize::new(0) };
        let result = chain.resolve_list(1, 10, None, 200, &interrupt).await;
        assert!(matches!(result, Err(ResolveError::Cancelled)));
        assert_eq!(tiers(&store.calls()), vec!["service"]);
    }
}
