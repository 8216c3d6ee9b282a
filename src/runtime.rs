//! Runtime support for the REST gateway - binds the route table to axum.

use crate::error::{Error, Result};
use crate::health::{health_handler, readiness_handler, HealthState};
use crate::instance::InstanceManager;
use crate::metrics::GatewayMetrics;
use crate::openapi::HttpMethod;
use crate::routes::{RestModel, RouteBinding, RouteKind};
use crate::streaming::{parse_ndjson, NdjsonStream, NDJSON_CONTENT_TYPE};
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, MethodFilter, MethodRouter},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared state of all generated routes
struct RestState {
    instances: InstanceManager,
}

/// Body of `PATCH .../instances/{id}`
#[derive(Debug, Deserialize)]
struct InstanceWritable {
    started: bool,
}

/// ServeMux - main gateway handler
///
/// Owns the REST model and the instance manager and turns every route
/// entry into an axum route. Convert it with [`ServeMux::into_router`].
pub struct ServeMux {
    model: Arc<RestModel>,
    instances: InstanceManager,
    health: Option<HealthState>,
    metrics_enabled: bool,
}

impl ServeMux {
    pub fn new(model: RestModel, instances: InstanceManager) -> Self {
        Self {
            model: Arc::new(model),
            instances,
            health: None,
            metrics_enabled: false,
        }
    }

    /// Enable `/health` and `/ready`
    pub fn enable_health_checks(&mut self, state: HealthState) {
        self.health = Some(state);
    }

    /// Enable `/metrics`
    pub fn enable_metrics(&mut self) {
        self.metrics_enabled = true;
    }

    pub fn model(&self) -> &RestModel {
        &self.model
    }

    pub fn instances(&self) -> &InstanceManager {
        &self.instances
    }

    /// Convert to Axum router
    pub fn into_router(self) -> Router {
        let state = Arc::new(RestState {
            instances: self.instances.clone(),
        });

        let mut router: Router<Arc<RestState>> = Router::new();
        for (path, entries) in self.model.routes.by_path() {
            let mut method_router: MethodRouter<Arc<RestState>> = MethodRouter::new();
            for entry in entries {
                let binding = entry.binding.clone();
                let handler = move |State(state): State<Arc<RestState>>,
                                    params: Option<Path<HashMap<String, String>>>,
                                    Query(query): Query<HashMap<String, String>>,
                                    body: Bytes| {
                    let binding = binding.clone();
                    async move {
                        let id = params.and_then(|Path(mut p)| p.remove("id"));
                        dispatch(&state, &binding, id, &query, body)
                            .unwrap_or_else(IntoResponse::into_response)
                    }
                };
                method_router = method_router.on(method_filter(entry.method), handler);
            }
            router = router.route(&axum_path(path), method_router);
        }

        let document = Arc::new(self.model.document.clone());
        let mut router = router.with_state(state).route(
            "/swagger.json",
            get(move || {
                let document = document.clone();
                async move { Json(document.as_ref().clone()) }
            }),
        );

        if let Some(health) = self.health {
            router = router
                .route("/health", get(health_handler))
                .route("/ready", get(readiness_handler).with_state(Arc::new(health)));
        }

        if self.metrics_enabled {
            router = router.route("/metrics", get(metrics_handler));
        }

        router.layer(TraceLayer::new_for_http())
    }
}

/// Route templates use `{id}`, axum 0.7 uses `:id`
fn axum_path(template: &str) -> String {
    template.replace("{id}", ":id")
}

fn method_filter(method: HttpMethod) -> MethodFilter {
    match method {
        HttpMethod::GET => MethodFilter::GET,
        HttpMethod::POST => MethodFilter::POST,
        HttpMethod::PUT => MethodFilter::PUT,
        HttpMethod::PATCH => MethodFilter::PATCH,
        HttpMethod::DELETE => MethodFilter::DELETE,
    }
}

fn dispatch(
    state: &RestState,
    binding: &RouteBinding,
    id: Option<String>,
    query: &HashMap<String, String>,
    body: Bytes,
) -> Result<Response> {
    match (binding.kind, id) {
        (RouteKind::CreateInstance, _) => create(state, binding, query, body),
        (_, Some(id)) => instance_route(state, binding, id, query, body),
        (_, None) => Err(Error::Internal(
            "route is missing its {id} segment".to_string(),
        )),
    }
}

fn create(
    state: &RestState,
    binding: &RouteBinding,
    query: &HashMap<String, String>,
    body: Bytes,
) -> Result<Response> {
    let operation = &binding.operation;
    let start = query_flag(query, "start", true)?;
    let payload = parse_json_body(&body)?;
    let instance = state.instances.create(operation.clone(), payload, start)?;
    let location = HeaderValue::from_str(&operation.instance_path(&instance.id))
        .map_err(|e| Error::Internal(format!("invalid Content-Location: {e}")))?;
    Ok((
        StatusCode::ACCEPTED,
        [(header::CONTENT_LOCATION, location)],
        Json(instance),
    )
        .into_response())
}

fn instance_route(
    state: &RestState,
    binding: &RouteBinding,
    id: String,
    query: &HashMap<String, String>,
    body: Bytes,
) -> Result<Response> {
    let instances = &state.instances;
    // an id from another operation is not addressable under this path
    if instances.operation_of(&id)?.path != binding.operation.path {
        return Err(Error::InstanceNotFound(id));
    }

    let response = match binding.kind {
        RouteKind::CreateInstance => {
            return Err(Error::Internal("create route addressed an instance".to_string()))
        }
        RouteKind::GetInstance => {
            let exclude = query_flag(query, "excludeOutput", false)?;
            Json(instances.get(&id, !exclude)?).into_response()
        }
        RouteKind::PatchInstance => {
            let patch: InstanceWritable = serde_json::from_slice(&body)
                .map_err(|e| Error::InvalidRequest(format!("invalid instance update: {e}")))?;
            instances.patch_started(&id, patch.started)?;
            StatusCode::OK.into_response()
        }
        RouteKind::DeleteInstance => Json(instances.delete(&id)?).into_response(),
        RouteKind::PutInputField => {
            let field = binding_field(binding)?;
            let value = parse_json_body(&body)?.ok_or_else(|| {
                Error::InvalidRequest(format!("missing value for field '{}'", field))
            })?;
            instances.update_field(&id, field, value)?;
            StatusCode::OK.into_response()
        }
        RouteKind::GetOutputField => {
            Json(instances.get_field(&id, binding_field(binding)?)?).into_response()
        }
        RouteKind::GetOutput => Json(instances.get_output(&id)?).into_response(),
        RouteKind::PostInputStream => {
            let items = parse_ndjson(&body)?;
            let end = query_flag(query, "end", false)?;
            if !items.is_empty() || !end {
                instances.append_input(&id, items)?;
            }
            if end {
                instances.start(&id)?;
            }
            StatusCode::OK.into_response()
        }
        RouteKind::GetOutputStream | RouteKind::GetBiStream => {
            ndjson_response(instances.follow_output(&id)?)
        }
        RouteKind::PostBiStream => {
            let items = parse_ndjson(&body)?;
            if !items.is_empty() {
                instances.append_input(&id, items)?;
            }
            instances.start(&id)?;
            ndjson_response(instances.follow_output(&id)?)
        }
    };
    Ok(response)
}

fn binding_field(binding: &RouteBinding) -> Result<&str> {
    binding
        .field
        .as_ref()
        .map(|f| f.name.as_str())
        .ok_or_else(|| Error::Internal("field route without a field".to_string()))
}

/// Empty body means no payload
fn parse_json_body(body: &Bytes) -> Result<Option<Value>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| Error::InvalidRequest(format!("malformed JSON body: {e}")))
}

fn query_flag(query: &HashMap<String, String>, name: &str, default: bool) -> Result<bool> {
    match query.get(name).map(String::as_str) {
        None | Some("") => Ok(default),
        Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        Some(other) => Err(Error::InvalidRequest(format!(
            "query parameter '{}' must be true or false, got '{}'",
            name, other
        ))),
    }
}

fn ndjson_response(lines: NdjsonStream) -> Response {
    (
        [(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)],
        Body::from_stream(lines),
    )
        .into_response()
}

/// Handler for Prometheus metrics endpoint
async fn metrics_handler() -> impl IntoResponse {
    let metrics = GatewayMetrics::global();
    let body = metrics.render();
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
}
