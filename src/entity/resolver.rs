//! Entity resolver: fallback chain + normalization + proximity ranking.
//!
//! [`EntityResolver`] exposes the two stateless operations. [`ListView`] and
//! [`DetailView`] wrap it for a single call site, tracking the
//! `Idle → Fetching → Resolved | NotFound | Failed` state and discarding any
//! outcome that belongs to a superseded or cancelled request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

use super::chain::{ChainSettings, FallbackChain, Interrupt, Uninterrupted};
use super::feed::LocationSource;
use super::store::EntityStore;
use super::types::{EntityRecord, FallbackOutcome, Lookup, RankedResult, ResolveError};
use crate::geo::{self, Location};

/// Default bound on list results, whatever page size is asked for.
pub const DEFAULT_RESULT_CAP: usize = 200;

pub struct EntityResolver {
    chain: FallbackChain,
    result_cap: usize,
}

impl EntityResolver {
    pub fn new(store: Arc<dyn EntityStore>, settings: ChainSettings) -> Self {
        Self {
            chain: FallbackChain::new(store, settings),
            result_cap: DEFAULT_RESULT_CAP,
        }
    }

    /// Override the list result bound. Zero is treated as one.
    pub fn with_result_cap(mut self, cap: usize) -> Self {
        self.result_cap = cap.max(1);
        self
    }

    /// One page of entities, ranked by distance from `location` when given.
    ///
    /// An empty listing is `Ok(vec![])`; only a chain where every tier failed
    /// is an error.
    pub async fn get_list(
        &self,
        page: u32,
        page_size: u32,
        location: Option<&Location>,
    ) -> Result<Vec<RankedResult>, ResolveError> {
        self.list_with(page, page_size, location, &Uninterrupted).await
    }

    /// A single entity by primary key or slug.
    pub async fn get_by_id(&self, identifier: &str) -> Result<Lookup, ResolveError> {
        self.by_id_with(identifier, &Uninterrupted).await
    }

    async fn list_with(
        &self,
        page: u32,
        page_size: u32,
        location: Option<&Location>,
        interrupt: &dyn Interrupt,
    ) -> Result<Vec<RankedResult>, ResolveError> {
        validate_page(page, page_size)?;
        if let Some(loc) = location {
            if !loc.is_valid() {
                return Err(ResolveError::Validation(format!(
                    "location ({}, {}) is out of range",
                    loc.lat, loc.lng
                )));
            }
        }

        let outcome = self
            .chain
            .resolve_list(page, page_size, location, self.result_cap, interrupt)
            .await?;
        match outcome {
            FallbackOutcome::Success {
                tier,
                records,
                rejected,
                paged,
            } => {
                let size = page_size as usize;
                let mut ranked = geo::rank(records, location);
                ranked.truncate(self.result_cap);
                let ranked: Vec<RankedResult> = if paged {
                    ranked.into_iter().take(size).collect()
                } else {
                    let skip = (page as usize - 1).saturating_mul(size);
                    ranked.into_iter().skip(skip).take(size).collect()
                };
                info!(
                    %tier,
                    page,
                    returned = ranked.len(),
                    rejected,
                    ranked_by_distance = location.is_some(),
                    "list resolved"
                );
                Ok(ranked)
            }
            FallbackOutcome::Empty { failures } => {
                info!(page, failed_tiers = failures.len(), "list resolved empty");
                Ok(Vec::new())
            }
            FallbackOutcome::Failure(failures) => Err(ResolveError::ResolutionFailed { failures }),
        }
    }

    async fn by_id_with(
        &self,
        identifier: &str,
        interrupt: &dyn Interrupt,
    ) -> Result<Lookup, ResolveError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(ResolveError::Validation("identifier must not be empty".into()));
        }

        match self.chain.resolve_by_id(identifier, interrupt).await? {
            FallbackOutcome::Success { tier, records, .. } => {
                info!(%tier, identifier, "entity resolved");
                Ok(records.into_iter().next().map_or(Lookup::NotFound, Lookup::Found))
            }
            FallbackOutcome::Empty { .. } => {
                info!(identifier, "entity not found");
                Ok(Lookup::NotFound)
            }
            FallbackOutcome::Failure(failures) => Err(ResolveError::ResolutionFailed { failures }),
        }
    }
}

fn validate_page(page: u32, page_size: u32) -> Result<(), ResolveError> {
    if page < 1 {
        return Err(ResolveError::Validation(format!("page must be >= 1, got {}", page)));
    }
    if page_size == 0 {
        return Err(ResolveError::Validation("page_size must be > 0".into()));
    }
    Ok(())
}

// ─── Call-site state ─────────────────────────────────────────────

/// State of one call site.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewState<T> {
    Idle,
    Fetching,
    Resolved(T),
    NotFound,
    Failed { message: String, retryable: bool },
}

impl<T> ViewState<T> {
    fn from_error(err: &ResolveError) -> Self {
        Self::Failed {
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

/// Generation bookkeeping for a call site. Every transition happens under
/// the state lock, so a stale request can never observe itself as current.
struct CallSite<T> {
    latest: AtomicU64,
    cancelled_through: AtomicU64,
    state: Mutex<ViewState<T>>,
}

impl<T: Clone> CallSite<T> {
    fn new() -> Self {
        Self {
            latest: AtomicU64::new(0),
            cancelled_through: AtomicU64::new(0),
            state: Mutex::new(ViewState::Idle),
        }
    }

    fn begin(self: &Arc<Self>) -> Ticket<T> {
        let mut state = self.lock();
        let generation = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        *state = ViewState::Fetching;
        Ticket {
            generation,
            site: Arc::clone(self),
        }
    }

    /// Apply `next` only if `generation` is still the live request.
    fn settle(&self, generation: u64, next: ViewState<T>) -> Result<ViewState<T>, ResolveError> {
        let mut state = self.lock();
        self.verdict(generation)?;
        *state = next.clone();
        Ok(next)
    }

    fn verdict(&self, generation: u64) -> Result<(), ResolveError> {
        if self.cancelled_through.load(Ordering::SeqCst) >= generation {
            Err(ResolveError::Cancelled)
        } else if self.latest.load(Ordering::SeqCst) != generation {
            Err(ResolveError::Superseded)
        } else {
            Ok(())
        }
    }

    fn cancel(&self) {
        let mut state = self.lock();
        self.cancelled_through
            .store(self.latest.load(Ordering::SeqCst), Ordering::SeqCst);
        if matches!(*state, ViewState::Fetching) {
            *state = ViewState::Idle;
        }
    }

    fn snapshot(&self) -> ViewState<T> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ViewState<T>> {
        // A poisoned lock only means a panicking reader; the state is still whole.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle for one in-flight request.
struct Ticket<T> {
    generation: u64,
    site: Arc<CallSite<T>>,
}

impl<T: Clone + Send> Interrupt for Ticket<T> {
    fn check(&self) -> Result<(), ResolveError> {
        self.site.verdict(self.generation)
    }
}

/// A list call site. Clones share state, so a newer `load` from any clone
/// supersedes older ones.
#[derive(Clone)]
pub struct ListView {
    resolver: Arc<EntityResolver>,
    site: Arc<CallSite<Vec<RankedResult>>>,
}

impl ListView {
    pub fn new(resolver: Arc<EntityResolver>) -> Self {
        Self {
            resolver,
            site: Arc::new(CallSite::new()),
        }
    }

    /// Resolve a page and apply it to this call site.
    ///
    /// Returns the applied state, or `Superseded`/`Cancelled` when a newer
    /// request or a `cancel` got there first. An empty listing settles as
    /// `Resolved(vec![])`.
    pub async fn load(
        &self,
        page: u32,
        page_size: u32,
        location: Option<Location>,
    ) -> Result<ViewState<Vec<RankedResult>>, ResolveError> {
        let ticket = self.site.begin();
        let next = match self
            .resolver
            .list_with(page, page_size, location.as_ref(), &ticket)
            .await
        {
            Ok(results) => ViewState::Resolved(results),
            Err(err @ (ResolveError::Superseded | ResolveError::Cancelled)) => return Err(err),
            Err(err) => ViewState::from_error(&err),
        };
        self.site.settle(ticket.generation, next)
    }

    /// Keep this call site in step with a location feed: resolve now, and
    /// again every time the reading changes, abandoning any in-flight load.
    /// Returns once the feed closes and the last load has settled.
    pub async fn follow(&self, page: u32, page_size: u32, mut source: LocationSource) {
        loop {
            let location = source.current();
            let load = self.load(page, page_size, location);
            tokio::pin!(load);

            tokio::select! {
                _ = &mut load => {}
                changed = source.changed() => {
                    match changed {
                        Ok(()) => continue,
                        Err(_) => {
                            let _ = load.await;
                            return;
                        }
                    }
                }
            }

            if source.changed().await.is_err() {
                return;
            }
        }
    }

    /// Stop the in-flight request; its outcome will not be applied.
    pub fn cancel(&self) {
        self.site.cancel();
    }

    pub fn state(&self) -> ViewState<Vec<RankedResult>> {
        self.site.snapshot()
    }
}

/// A single-entity call site.
#[derive(Clone)]
pub struct DetailView {
    resolver: Arc<EntityResolver>,
    site: Arc<CallSite<EntityRecord>>,
}

impl DetailView {
    pub fn new(resolver: Arc<EntityResolver>) -> Self {
        Self {
            resolver,
            site: Arc::new(CallSite::new()),
        }
    }

    pub async fn load(&self, identifier: &str) -> Result<ViewState<EntityRecord>, ResolveError> {
        let ticket = self.site.begin();
        let next = match self.resolver.by_id_with(identifier, &ticket).await {
            Ok(Lookup::Found(record)) => ViewState::Resolved(record),
            Ok(Lookup::NotFound) => ViewState::NotFound,
            Err(err @ (ResolveError::Superseded | ResolveError::Cancelled)) => return Err(err),
            Err(err) => ViewState::from_error(&err),
        };
        self.site.settle(ticket.generation, next)
    }

    pub fn cancel(&self) {
        self.site.cancel();
    }

    pub fn state(&self) -> ViewState<EntityRecord> {
        self.site.snapshot()
    }
}
