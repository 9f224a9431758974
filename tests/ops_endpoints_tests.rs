mod support;

use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use dataset_register::store::GraphStore;
use dataset_register::{AppState, RegisterConfig, ops_router};
use http_body_util::BodyExt;
use serde_json::Value;
use support::{CATALOG_URL, StaticPages, minimal_dataset, register, test_config};
use tower::ServiceExt;

async fn get(router: axum::Router, uri: &str) -> Result<(StatusCode, Vec<u8>)> {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty())?)
        .await?;
    let status = response.status();
    let body = response.into_body().collect().await?.to_bytes().to_vec();
    Ok((status, body))
}

#[tokio::test]
async fn liveness_reports_version() -> Result<()> {
    let state = Arc::new(register(StaticPages::new()).await?);
    let (status, body) = get(ops_router(state), "/health").await?;
    let json: Value = serde_json::from_slice(&body)?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    Ok(())
}

#[tokio::test]
async fn ready_when_store_is_reachable() -> Result<()> {
    let state = Arc::new(register(StaticPages::new()).await?);
    let (status, body) = get(ops_router(state), "/ready").await?;
    let json: Value = serde_json::from_slice(&body)?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ready"], true);
    assert_eq!(json["status"], "healthy");
    assert!(json.get("not_ready").is_none());
    Ok(())
}

#[tokio::test]
async fn empty_allow_list_degrades_but_stays_ready() -> Result<()> {
    let config = RegisterConfig {
        allowed_domains: Vec::new(),
        ..test_config()
    };
    let state = Arc::new(
        AppState::with_client(Arc::new(config), GraphStore::in_memory()?, StaticPages::new()).await?,
    );
    let (status, body) = get(ops_router(state), "/health/components").await?;
    let json: Value = serde_json::from_slice(&body)?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["components"]["allow_list"]["status"], "degraded");
    assert_eq!(json["components"]["graph_store"]["status"], "healthy");
    Ok(())
}

#[tokio::test]
async fn component_details_include_registry_counts() -> Result<()> {
    let pages = StaticPages::new();
    pages.serve_turtle(CATALOG_URL, &minimal_dataset("https://example.org/dataset/1"));
    let state = Arc::new(register(pages).await?);
    state.registry().ingest(CATALOG_URL).await?;

    let (_, body) = get(ops_router(state), "/health/components").await?;
    let json: Value = serde_json::from_slice(&body)?;
    assert_eq!(json["components"]["graph_store"]["details"]["records"], 1);
    assert_eq!(json["components"]["graph_store"]["details"]["persistent"], false);
    assert_eq!(json["components"]["allow_list"]["details"]["domains"], 1);
    Ok(())
}

#[tokio::test]
async fn metrics_are_exposed_in_text_format() -> Result<()> {
    let pages = StaticPages::new();
    pages.serve_turtle(CATALOG_URL, &minimal_dataset("https://example.org/dataset/1"));
    let state = Arc::new(register(pages).await?);
    state.registry().ingest(CATALOG_URL).await?;

    let (status, body) = get(ops_router(state), "/metrics").await?;
    let text = String::from_utf8(body)?;

    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("register_ingestions_total"));
    assert!(text.contains("register_validations_total"));
    assert!(text.contains("register_crawl_pass_duration_seconds"));
    Ok(())
}
