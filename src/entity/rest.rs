//! HTTP store for a PostgREST-compatible hosted backend.
//!
//! Table reads: `GET {base}/rest/v1/{table}?select=*&field=eq.value&order=..`
//! Service:     `POST {base}/rest/v1/rpc/{function}` with a JSON body.
//!
//! `ureq` is blocking, so every call runs on the blocking pool.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use super::store::{EntityStore, StoreError, TableQuery};
use crate::geo::Location;

const USER_AGENT: &str = concat!("masjid-finder/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct RestStore {
    base_url: String,
    api_key: Option<String>,
    service_fn: String,
    agent: ureq::Agent,
}

impl RestStore {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        service_fn: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            service_fn: service_fn.into(),
            agent,
        }
    }

    /// The full URL for a table read.
    pub fn table_url(&self, table: &str, query: &TableQuery) -> String {
        let mut url = format!("{}/rest/v1/{}?select=*", self.base_url, urlencod(table));
        for (field, value) in &query.eq {
            url.push_str(&format!("&{}=eq.{}", urlencod(field), urlencod(value)));
        }
        if let Some(order) = &query.order_by {
            let dir = if order.descending { "desc" } else { "asc" };
            url.push_str(&format!("&order={}.{}.nullslast", urlencod(&order.field), dir));
        }
        if let Some(limit) = query.limit {
            url.push_str(&format!("&limit={}", limit));
        }
        if let Some(offset) = query.offset {
            url.push_str(&format!("&offset={}", offset));
        }
        url
    }

    pub fn service_url(&self) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, urlencod(&self.service_fn))
    }

    fn authorize(&self, request: ureq::Request) -> ureq::Request {
        match &self.api_key {
            Some(key) => request
                .set("apikey", key)
                .set("Authorization", &format!("Bearer {}", key)),
            None => request,
        }
    }
}

/// Body sent to the aggregating service.
pub fn service_body(page: u32, page_size: u32, location: Option<&Location>) -> Value {
    json!({
        "page": page,
        "page_size": page_size,
        "lat": location.map(|l| l.lat),
        "lng": location.map(|l| l.lng),
        "city": location.and_then(|l| l.city.clone()),
        "state": location.and_then(|l| l.state.clone()),
        "country": location.and_then(|l| l.country.clone()),
    })
}

#[async_trait]
impl EntityStore for RestStore {
    async fn query_table(&self, table: &str, query: &TableQuery) -> Result<Value, StoreError> {
        let request = self
            .authorize(self.agent.get(&self.table_url(table, query)))
            .set("Accept", "application/json");
        blocking(move || into_json(request.call())).await
    }

    async fn query_aggregating_service(
        &self,
        page: u32,
        page_size: u32,
        location: Option<&Location>,
    ) -> Result<Value, StoreError> {
        let request = self.authorize(self.agent.post(&self.service_url()));
        let body = service_body(page, page_size, location);
        blocking(move || into_json(request.send_json(body))).await
    }
}

async fn blocking<F>(call: F) -> Result<Value, StoreError>
where
    F: FnOnce() -> Result<Value, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| StoreError::Network(format!("request task failed: {}", e)))?
}

fn into_json(result: Result<ureq::Response, ureq::Error>) -> Result<Value, StoreError> {
    match result {
        Ok(response) => response
            .into_json::<Value>()
            .map_err(|e| StoreError::InvalidResponse(e.to_string())),
        Err(ureq::Error::Status(status, response)) => Err(StoreError::Status {
            status,
            body: response.into_string().unwrap_or_default(),
        }),
        Err(ureq::Error::Transport(transport)) => Err(StoreError::Network(transport.to_string())),
    }
}

// ─── URL encoding ───────────────────────────────────────────────

fn urlencod(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            _ if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' || c == '~' => {
                c.to_string()
            }
            _ => {
                let mut buf = [0u8; 4];
                c.encode_utf8(&mut buf)
                    .bytes()
                    .map(|b| format!("%{:02X}", b))
                    .collect()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RestStore {
        RestStore::new(
            "https://db.example.org/",
            Some("anon".into()),
            "search_mosques",
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_table_url_by_slug() {
        let query = TableQuery::new().eq("slug", "grand-mosque").limit(1);
        let url = store().table_url("mosques", &query);
        assert_eq!(
            url,
            "https://db.example.org/rest/v1/mosques?select=*&slug=eq.grand-mosque&limit=1"
        );
    }

    #[test]
    fn test_table_url_page() {
        let query = TableQuery::new().order_by("created_at", true).limit(20).offset(40);
        let url = store().table_url("mosques", &query);
        assert_eq!(
            url,
            "https://db.example.org/rest/v1/mosques\
             ?select=*&order=created_at.desc.nullslast&limit=20&offset=40"
        );
    }

    #[test]
    fn test_service_url() {
        assert_eq!(store().service_url(), "https://db.example.org/rest/v1/rpc/search_mosques");
    }

    #[test]
    fn test_service_body_without_location() {
        let body = service_body(2, 10, None);
        assert_eq!(body["page"], 2);
        assert!(body["lat"].is_null());
    }

    #[test]
    fn test_service_body_with_location() {
        let mut loc = Location::new(-31.95, 115.86);
        loc.city = Some("Perth".into());
        let body = service_body(1, 10, Some(&loc));
        assert_eq!(body["lng"], 115.86);
        assert_eq!(body["city"], "Perth");
    }

    #[test]
    fn test_urlencod() {
        assert_eq!(urlencod("masjid al-aqsa"), "masjid%20al-aqsa");
        assert_eq!(urlencod("a&b=c"), "a%26b%3Dc");
        assert_eq!(urlencod("jāmiʿ"), "j%C4%81mi%CA%BF");
    }
}
