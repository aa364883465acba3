//! HTTP surface over the resolver.

mod handlers;
mod state;

use axum::http::{header, HeaderValue};
use axum::routing::get;
use axum::Router;
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::entity::EntityResolver;

pub fn build_router(resolver: Arc<EntityResolver>) -> Router {
    let state = Arc::new(AppState { resolver });

    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/entities", get(handlers::list_entities))
        .route("/api/entities/{identifier}", get(handlers::get_entity))
        // Results depend on the caller's live location.
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start(resolver: Arc<EntityResolver>, addr: SocketAddr) -> std::io::Result<()> {
    let app = build_router(resolver);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(%addr, "masjid finder listening");
    axum::serve(listener, app).await
}
