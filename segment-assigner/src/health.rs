use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

/// Health of the process, combined from every registered component.
///
/// The process is healthy only when at least one component is registered
/// and every component reported healthy before its deadline ran out. Use
/// one registry per endpoint: liveness and readiness answer different
/// questions.
#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentStatus {
    /// Registered but has not reported yet.
    Starting,
    /// Must report again before this time.
    HealthyUntil(OffsetDateTime),
    Unhealthy,
    /// Missed its `HealthyUntil` deadline.
    Stalled,
}

#[derive(Debug, Default)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::SERVICE_UNAVAILABLE, body),
        }
        .into_response()
    }
}

/// Reporting side of one registered component.
#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
}

impl HealthHandle {
    /// Healthy until `deadline` from now.
    pub fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc() + self.deadline,
        ));
    }

    pub fn report_status(&self, status: ComponentStatus) {
        self.components
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.component.clone(), status);
    }
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Arc::default(),
        }
    }

    /// Add a component in `Starting`. It has to report healthy at least
    /// every `deadline` to keep the registry healthy.
    pub fn register(&self, component: impl Into<String>, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component: component.into(),
            deadline,
            components: Arc::clone(&self.components),
        };
        handle.report_status(ComponentStatus::Starting);
        handle
    }

    pub fn get_status(&self) -> HealthStatus {
        let components = self
            .components
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let now = OffsetDateTime::now_utc();

        let mut status = HealthStatus {
            healthy: !components.is_empty(),
            components: HashMap::with_capacity(components.len()),
        };
        for (name, component) in components.iter() {
            let component = match component {
                ComponentStatus::HealthyUntil(until) if *until > now => component.clone(),
                ComponentStatus::HealthyUntil(_) => ComponentStatus::Stalled,
                other => other.clone(),
            };
            status.healthy &= matches!(component, ComponentStatus::HealthyUntil(_));
            status.components.insert(name.clone(), component);
        }

        if !status.healthy {
            tracing::warn!(registry = %self.name, components = ?status.components, "health check failed");
        }
        status
    }
}

/// Report `handle` healthy every `interval` until `cancel` fires.
pub async fn report_until_cancelled(
    handle: HealthHandle,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        handle.report_healthy();
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const BUCKETS: &[f64] = &[
        0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)?
        .install_recorder()
}

/// `/_liveness`, `/_readiness` and `/metrics`.
pub fn router(
    liveness: HealthRegistry,
    readiness: HealthRegistry,
    metrics: PrometheusHandle,
) -> Router {
    Router::new()
        .route("/_liveness", get(move || async move { liveness.get_status() }))
        .route("/_readiness", get(move || async move { readiness.get_status() }))
        .route(
            "/metrics",
            get(move || std::future::ready(metrics.render())),
        )
}
