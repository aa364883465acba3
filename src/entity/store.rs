//! The persistent-store seam.
//!
//! The resolver only ever reads through [`EntityStore`]. Payloads come back as
//! raw JSON so the normalizer owns every shape decision.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

use crate::geo::Location;

/// Errors from a single store call.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("network error: {0}")]
    Network(String),
    #[error("store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid store response: {0}")]
    InvalidResponse(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Sort instruction for a table read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

/// Filters for a direct table read. Equality filters keep insertion order so
/// the generated query is reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableQuery {
    pub eq: Vec<(String, String)>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl TableQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.eq.push((field.into(), value.into()));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            descending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Read-only access to the hosted backend.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Direct read against a table.
    async fn query_table(&self, table: &str, query: &TableQuery) -> Result<Value, StoreError>;

    /// The backend's own cross-source, location-aware search.
    async fn query_aggregating_service(
        &self,
        page: u32,
        page_size: u32,
        location: Option<&Location>,
    ) -> Result<Value, StoreError>;
}

// ─── In-memory store ─────────────────────────────────────────────

/// A store call as seen by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Service { page: u32, page_size: u32, located: bool },
    Table { table: String, query: TableQuery },
}

/// Faults a [`MemoryStore`] can be told to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Every aggregating-service call fails.
    Service,
    /// Every table read fails.
    Table,
    /// Table reads filtering on this field fail.
    TableFilter(String),
}

#[derive(Deserialize)]
struct Fixture {
    #[serde(default)]
    tables: HashMap<String, Vec<Value>>,
    #[serde(default)]
    service: Option<Value>,
}

/// In-memory rows with injectable faults and a call log.
///
/// Backs the tests and the CLI's offline `--fixture` mode.
#[derive(Default)]
pub struct MemoryStore {
    tables: HashMap<String, Vec<Value>>,
    service: Option<Value>,
    faults: Vec<Fault>,
    latency: Option<Duration>,
    calls: Mutex<Vec<StoreCall>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load tables and an optional canned service payload from a JSON file:
    /// `{ "tables": { "mosques": [...] }, "service": [...] }`.
    pub fn from_fixture(path: &Path) -> Result<Self, StoreError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", path.display(), e)))?;
        let fixture: Fixture =
            serde_json::from_str(&data).map_err(|e| StoreError::InvalidResponse(e.to_string()))?;
        Ok(Self {
            tables: fixture.tables,
            service: fixture.service,
            ..Self::default()
        })
    }

    pub fn with_table(mut self, table: &str, rows: Vec<Value>) -> Self {
        self.tables.insert(table.to_string(), rows);
        self
    }

    /// Payload the aggregating service returns, sliced by page when it is an array.
    pub fn with_service_payload(mut self, payload: Value) -> Self {
        self.service = Some(payload);
        self
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }

    /// Sleep this long inside every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: StoreCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn query_table(&self, table: &str, query: &TableQuery) -> Result<Value, StoreError> {
        self.record(StoreCall::Table {
            table: table.to_string(),
            query: query.clone(),
        });
        self.pause().await;

        let filtered_fault = self.faults.iter().any(|f| match f {
            Fault::Table => true,
            Fault::TableFilter(field) => query.eq.iter().any(|(name, _)| name == field),
            Fault::Service => false,
        });
        if filtered_fault {
            return Err(StoreError::Unavailable(format!("table '{}' is unreachable", table)));
        }

        let rows = self
            .tables
            .get(table)
            .ok_or_else(|| StoreError::Status {
                status: 404,
                body: format!("relation '{}' does not exist", table),
            })?;

        let mut matched: Vec<Value> = rows
            .iter()
            .filter(|row| {
                query
                    .eq
                    .iter()
                    .all(|(field, value)| row.get(field).is_some_and(|v| value_matches(v, value)))
            })
            .cloned()
            .collect();

        if let Some(order) = &query.order_by {
            matched.sort_by(|a, b| {
                compare_values(a.get(&order.field), b.get(&order.field), order.descending)
            });
        }

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(Value::Array(matched.into_iter().skip(offset).take(limit).collect()))
    }

    async fn query_aggregating_service(
        &self,
        page: u32,
        page_size: u32,
        location: Option<&Location>,
    ) -> Result<Value, StoreError> {
        self.record(StoreCall::Service {
            page,
            page_size,
            located: location.is_some(),
        });
        self.pause().await;

        if self.faults.contains(&Fault::Service) {
            return Err(StoreError::Network("aggregating service timed out".into()));
        }

        match &self.service {
            Some(Value::Array(rows)) => {
                let start = (page.saturating_sub(1) as usize).saturating_mul(page_size as usize);
                Ok(Value::Array(
                    rows.iter().skip(start).take(page_size as usize).cloned().collect(),
                ))
            }
            Some(other) => Ok(other.clone()),
            None => Ok(Value::Array(Vec::new())),
        }
    }
}

fn value_matches(v: &Value, expected: &str) -> bool {
    match v {
        Value::String(s) => s == expected,
        Value::Number(n) => n.to_string() == expected,
        Value::Bool(b) => b.to_string() == expected,
        _ => false,
    }
}

/// Nulls always sort last regardless of direction.
fn compare_values(a: Option<&Value>, b: Option<&Value>, descending: bool) -> Ordering {
    let ord = match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => return Ordering::Equal,
        (None | Some(Value::Null), _) => return Ordering::Greater,
        (_, None | Some(Value::Null)) => return Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => Ordering::Equal,
    };
    if descending { ord.reverse() } else { ord }
}
