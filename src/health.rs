//! Health check endpoints for Kubernetes/container orchestration.
//!
//! # Endpoints
//!
//! - `/health` - Liveness probe: Returns 200 if the server is running
//! - `/ready` - Readiness probe: Returns 200 unless the gateway is draining
//!
//! # Example
//!
//! ```rust,no_run
//! use grpc_rest_gateway::Gateway;
//!
//! # fn example(descriptor_set: Vec<u8>) -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = Gateway::builder()
//!     .with_descriptor_set_bytes(&descriptor_set)
//!     .with_grpc_endpoint("http://127.0.0.1:50051")
//!     .enable_health_checks()  // Adds /health and /ready endpoints
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::instance::InstanceManager;
use crate::shutdown::ShutdownCoordinator;

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall health status
    pub status: HealthStatus,
    /// Optional message with details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Individual component checks
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub checks: Vec<ComponentHealth>,
}

/// Health status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Operational, with a warning
    Degraded,
    Unhealthy,
}

/// Individual component health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentHealth {
    fn new(name: &str, status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: Some(message.into()),
        }
    }
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: None,
            checks: Vec::new(),
        }
    }

    pub fn healthy_with_message(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: Some(message.into()),
            checks: Vec::new(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            checks: Vec::new(),
        }
    }

    /// Add a component check, downgrading the overall status if needed
    pub fn with_check(mut self, check: ComponentHealth) -> Self {
        match (&self.status, check.status) {
            (HealthStatus::Healthy, HealthStatus::Unhealthy)
            | (HealthStatus::Degraded, HealthStatus::Unhealthy) => {
                self.status = HealthStatus::Unhealthy;
            }
            (HealthStatus::Healthy, HealthStatus::Degraded) => {
                self.status = HealthStatus::Degraded;
            }
            _ => {}
        }
        self.checks.push(check);
        self
    }
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        let status_code = match self.status {
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status_code, Json(self)).into_response()
    }
}

/// Shared state for the readiness handler
#[derive(Clone)]
pub struct HealthState {
    /// Number of operations exposed over REST
    pub operations: usize,
    /// Backing endpoint, when the gateway dials one itself
    pub backend_endpoint: Option<String>,
    pub instances: Option<InstanceManager>,
    pub shutdown: Option<ShutdownCoordinator>,
    /// Optional custom health check function
    pub custom_check: Option<Arc<dyn Fn() -> HealthResponse + Send + Sync>>,
}

impl HealthState {
    pub fn new(operations: usize) -> Self {
        Self {
            operations,
            backend_endpoint: None,
            instances: None,
            shutdown: None,
            custom_check: None,
        }
    }

    pub fn with_backend_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.backend_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_instances(mut self, instances: InstanceManager) -> Self {
        self.instances = Some(instances);
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownCoordinator) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Add a custom health check
    pub fn with_custom_check<F>(mut self, check: F) -> Self
    where
        F: Fn() -> HealthResponse + Send + Sync + 'static,
    {
        self.custom_check = Some(Arc::new(check));
        self
    }
}

/// Liveness probe handler - `/health`
pub async fn health_handler() -> HealthResponse {
    HealthResponse::healthy_with_message("Gateway is running")
}

/// Readiness probe handler - `/ready`
///
/// Does not dial the backend; a lazily connected channel reports nothing
/// useful until the first call.
pub async fn readiness_handler(State(state): State<Arc<HealthState>>) -> HealthResponse {
    let mut response = HealthResponse::healthy();

    response = response.with_check(if state.operations == 0 {
        ComponentHealth::new("operations", HealthStatus::Degraded, "No operations exposed")
    } else {
        ComponentHealth::new(
            "operations",
            HealthStatus::Healthy,
            format!("{} operations exposed", state.operations),
        )
    });

    if let Some(endpoint) = &state.backend_endpoint {
        response = response.with_check(ComponentHealth::new(
            "grpc_backend",
            HealthStatus::Healthy,
            format!("Calls go to {}", endpoint),
        ));
    }

    if let Some(instances) = &state.instances {
        response = response.with_check(ComponentHealth::new(
            "instances",
            HealthStatus::Healthy,
            format!("{} instances held", instances.len()),
        ));
    }

    if let Some(shutdown) = &state.shutdown {
        if shutdown.is_shutting_down() {
            response = response.with_check(ComponentHealth::new(
                "shutdown",
                HealthStatus::Unhealthy,
                format!("Draining, {} calls in flight", shutdown.active_count()),
            ));
        }
    }

    if let Some(custom_check) = &state.custom_check {
        for check in custom_check().checks {
            response = response.with_check(check);
        }
    }

    response
}
