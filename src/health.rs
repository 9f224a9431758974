use crate::state::AppState;
use crate::store::{AllowedDomainStore, RegistrationStore};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Health status for a component or the overall system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Serving, but some requests will be refused or delayed
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// The worse of the two.
    pub fn combine(self, other: Self) -> Self {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ComponentHealth {
    fn build(
        component: impl Into<String>,
        status: HealthStatus,
        error: Option<String>,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self {
            component: component.into(),
            status,
            error,
            timestamp: Utc::now().timestamp(),
            details,
        }
    }

    pub fn healthy(component: impl Into<String>) -> Self {
        Self::build(component, HealthStatus::Healthy, None, None)
    }

    pub fn healthy_with_details(component: impl Into<String>, details: serde_json::Value) -> Self {
        Self::build(component, HealthStatus::Healthy, None, Some(details))
    }

    pub fn degraded(component: impl Into<String>, error: impl Into<String>) -> Self {
        Self::build(component, HealthStatus::Degraded, Some(error.into()), None)
    }

    pub fn unhealthy(component: impl Into<String>, error: impl Into<String>) -> Self {
        Self::build(component, HealthStatus::Unhealthy, Some(error.into()), None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: i64,
    pub version: String,
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        let status = self.status.status_code();
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub status: HealthStatus,
    pub timestamp: i64,
    /// Components that are unhealthy
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_ready: Vec<String>,
}

impl IntoResponse for ReadinessResponse {
    fn into_response(self) -> Response {
        let status = if self.ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealthResponse {
    pub status: HealthStatus,
    pub timestamp: i64,
    pub components: HashMap<String, ComponentHealth>,
}

impl IntoResponse for ComponentHealthResponse {
    fn into_response(self) -> Response {
        let status = self.status.status_code();
        (status, Json(self)).into_response()
    }
}

/// Probes the graph store, the allow-list and the crawl backlog.
#[derive(Clone)]
pub struct HealthChecker {
    state: Arc<AppState>,
}

impl HealthChecker {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Healthy whenever the process can answer.
    pub fn liveness(&self) -> HealthResponse {
        HealthResponse {
            status: HealthStatus::Healthy,
            timestamp: Utc::now().timestamp(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let components = self.check_all_components().await;
        let status = overall(&components);
        let mut not_ready: Vec<String> = components
            .iter()
            .filter(|(_, health)| health.status == HealthStatus::Unhealthy)
            .map(|(name, _)| name.clone())
            .collect();
        not_ready.sort();

        ReadinessResponse {
            ready: status != HealthStatus::Unhealthy,
            status,
            timestamp: Utc::now().timestamp(),
            not_ready,
        }
    }

    pub async fn components(&self) -> ComponentHealthResponse {
        let components = self.check_all_components().await;
        ComponentHealthResponse {
            status: overall(&components),
            timestamp: Utc::now().timestamp(),
            components,
        }
    }

    async fn check_all_components(&self) -> HashMap<String, ComponentHealth> {
        let mut components = HashMap::new();
        components.insert("graph_store".to_string(), self.check_graph_store().await);
        components.insert("allow_list".to_string(), self.check_allow_list().await);
        components.insert("crawler".to_string(), self.check_crawl_backlog().await);
        components
    }

    async fn check_graph_store(&self) -> ComponentHealth {
        if let Err(e) = self.state.store().ping().await {
            return ComponentHealth::unhealthy("graph_store", format!("store unreachable: {e}"));
        }
        let persistent = self.state.config().store_dir.is_some();
        match self.state.stats().await {
            Ok(stats) => ComponentHealth::healthy_with_details(
                "graph_store",
                serde_json::json!({
                    "persistent": persistent,
                    "records": stats.records,
                    "publishers": stats.publishers,
                }),
            ),
            Err(e) => ComponentHealth::degraded("graph_store", format!("stats unavailable: {e}")),
        }
    }

    /// An empty allow-list rejects every ingestion.
    async fn check_allow_list(&self) -> ComponentHealth {
        match AllowedDomainStore::count(self.state.store()).await {
            Ok(0) => ComponentHealth::degraded("allow_list", "no allowed domains, every ingestion is rejected"),
            Ok(domains) => ComponentHealth::healthy_with_details(
                "allow_list",
                serde_json::json!({ "domains": domains }),
            ),
            Err(e) => ComponentHealth::unhealthy("allow_list", format!("allow-list unreadable: {e}")),
        }
    }

    /// Registrations overdue by more than one crawl interval past their ttl.
    async fn check_crawl_backlog(&self) -> ComponentHealth {
        let config = self.state.config();
        let details = serde_json::json!({
            "interval_secs": config.crawl_interval.as_secs(),
            "ttl_secs": config.crawl_ttl.as_secs(),
        });
        let Ok(overdue) = chrono::Duration::from_std(config.crawl_ttl + config.crawl_interval) else {
            return ComponentHealth::healthy_with_details("crawler", details);
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(overdue) else {
            return ComponentHealth::healthy_with_details("crawler", details);
        };

        match self.state.store().find_read_before(cutoff).await {
            Ok(backlog) if backlog.is_empty() => ComponentHealth::healthy_with_details("crawler", details),
            Ok(backlog) => ComponentHealth {
                details: Some(details),
                ..ComponentHealth::degraded(
                    "crawler",
                    format!("{} registrations overdue for a crawl", backlog.len()),
                )
            },
            Err(e) => ComponentHealth::unhealthy("crawler", format!("registrations unreadable: {e}")),
        }
    }
}

fn overall(components: &HashMap<String, ComponentHealth>) -> HealthStatus {
    components
        .values()
        .fold(HealthStatus::Healthy, |status, health| status.combine(health.status))
}

pub async fn liveness_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    checker.liveness()
}

pub async fn readiness_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    checker.readiness().await
}

pub async fn components_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    checker.components().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_status_combine() {
        assert_eq!(
            HealthStatus::Healthy.combine(HealthStatus::Healthy),
            HealthStatus::Healthy
        );
        assert_eq!(
            HealthStatus::Healthy.combine(HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Degraded.combine(HealthStatus::Unhealthy),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn health_status_codes() {
        assert_eq!(HealthStatus::Degraded.status_code(), StatusCode::OK);
        assert_eq!(
            HealthStatus::Unhealthy.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn overall_is_worst_component() {
        let mut components = HashMap::new();
        components.insert("a".to_string(), ComponentHealth::healthy("a"));
        components.insert("b".to_string(), ComponentHealth::degraded("b", "slow"));
        assert_eq!(overall(&components), HealthStatus::Degraded);
        components.insert("c".to_string(), ComponentHealth::unhealthy("c", "down"));
        assert_eq!(overall(&components), HealthStatus::Unhealthy);
    }
}
