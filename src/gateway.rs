//! Gateway builder and main orchestration

use crate::backend::{GrpcBackend, RpcBackend};
use crate::config::GatewayConfig;
use crate::descriptor::SchemaSource;
use crate::error::{Error, Result};
use crate::health::HealthState;
use crate::instance::InstanceManager;
use crate::introspect::{SchemaIntrospector, DEFAULT_MAX_EXPANSION_DEPTH, MIN_EXPANSION_DEPTH};
use crate::openapi::SwaggerDocument;
use crate::routes::{RestModel, RouteConfig, RouteSynthesizer, RouteTable};
use crate::runtime::ServeMux;
use crate::shutdown::{run_with_graceful_shutdown, ShutdownConfig, ShutdownCoordinator};
use axum::Router;
use prost_reflect::DescriptorPool;
use std::path::Path;
use std::sync::Arc;

/// Main Gateway struct - entry point for the library
///
/// The `Gateway` holds the generated REST model, the instance manager and
/// the HTTP routes. It is created via the [`GatewayBuilder`].
///
/// # Example
///
/// ```rust,no_run
/// use grpc_rest_gateway::Gateway;
///
/// # async fn example(descriptor_set: Vec<u8>) -> Result<(), Box<dyn std::error::Error>> {
/// let gateway = Gateway::builder()
///     .with_descriptor_set_bytes(&descriptor_set)
///     .with_grpc_endpoint("http://127.0.0.1:50051")
///     .build()?;
///
/// println!("{}", gateway.document().to_json_pretty()?);
/// gateway.serve("0.0.0.0:8080").await?;
/// # Ok(())
/// # }
/// ```
pub struct Gateway {
    mux: ServeMux,
    shutdown: Option<ShutdownCoordinator>,
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    pub fn mux(&self) -> &ServeMux {
        &self.mux
    }

    /// Generated Swagger 2.0 document
    pub fn document(&self) -> &SwaggerDocument {
        &self.mux.model().document
    }

    pub fn routes(&self) -> &RouteTable {
        &self.mux.model().routes
    }

    pub fn instances(&self) -> &InstanceManager {
        self.mux.instances()
    }

    /// Shutdown coordinator, present when graceful shutdown is configured
    pub fn shutdown_coordinator(&self) -> Option<&ShutdownCoordinator> {
        self.shutdown.as_ref()
    }

    /// Convert gateway into Axum router
    pub fn into_router(self) -> Router {
        self.mux.into_router()
    }

    /// Bind `addr` and serve until shut down
    pub async fn serve(self, addr: impl Into<String>) -> Result<()> {
        let addr = addr.into();
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(
            address = %addr,
            routes = self.routes().len(),
            "Gateway server listening"
        );

        let shutdown = self.shutdown.clone();
        let app = self.into_router();
        match shutdown {
            Some(coordinator) => run_with_graceful_shutdown(listener, app, coordinator).await?,
            None => axum::serve(listener, app).await?,
        }
        Ok(())
    }
}

enum SchemaInput {
    Bytes(Vec<u8>),
    Pool(DescriptorPool),
    Source(SchemaSource),
}

/// Builder for creating a Gateway
///
/// A schema and a backend are required: either a descriptor set plus a
/// gRPC endpoint, or any schema source plus an [`RpcBackend`].
pub struct GatewayBuilder {
    schema: Option<SchemaInput>,
    backend: Option<Arc<dyn RpcBackend>>,
    grpc_endpoint: Option<String>,
    max_depth: usize,
    route_config: RouteConfig,
    health_checks_enabled: bool,
    metrics_enabled: bool,
    shutdown_config: Option<ShutdownConfig>,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            schema: None,
            backend: None,
            grpc_endpoint: None,
            max_depth: DEFAULT_MAX_EXPANSION_DEPTH,
            route_config: RouteConfig::default(),
            health_checks_enabled: false,
            metrics_enabled: false,
            shutdown_config: None,
        }
    }

    /// Provide an encoded protobuf `FileDescriptorSet`
    ///
    /// Produce one with `protoc --include_imports --descriptor_set_out=...`.
    pub fn with_descriptor_set_bytes(mut self, bytes: impl AsRef<[u8]>) -> Self {
        self.schema = Some(SchemaInput::Bytes(bytes.as_ref().to_vec()));
        self
    }

    /// Read the descriptor set from a file
    pub fn with_descriptor_set_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            Error::Schema(format!(
                "failed to read descriptor set {}: {e}",
                path.display()
            ))
        })?;
        self.schema = Some(SchemaInput::Bytes(bytes));
        Ok(self)
    }

    /// Use an already decoded descriptor pool
    pub fn with_descriptor_pool(mut self, pool: DescriptorPool) -> Self {
        self.schema = Some(SchemaInput::Pool(pool));
        self
    }

    /// Use a hand-built schema tree; requires [`Self::with_backend`]
    pub fn with_schema_source(mut self, source: SchemaSource) -> Self {
        self.schema = Some(SchemaInput::Source(source));
        self
    }

    /// Route backing calls through a custom client
    pub fn with_backend(mut self, backend: Arc<dyn RpcBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Call the backing service over gRPC at `endpoint`
    ///
    /// The channel connects lazily, so `build` must run inside a tokio runtime.
    pub fn with_grpc_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.grpc_endpoint = Some(endpoint.into());
        self
    }

    /// Nesting depth at which message expansion stops
    pub fn with_max_expansion_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Path layout and document metadata
    pub fn with_route_config(mut self, config: RouteConfig) -> Self {
        self.route_config = config;
        self
    }

    /// Include the service name in every path (default: true)
    pub fn segment_services(mut self, segment: bool) -> Self {
        self.route_config.segment_services = segment;
        self
    }

    /// Enable health check endpoints (`/health`, `/ready`)
    pub fn enable_health_checks(mut self) -> Self {
        self.health_checks_enabled = true;
        self
    }

    /// Enable the Prometheus endpoint (`/metrics`)
    pub fn enable_metrics(mut self) -> Self {
        self.metrics_enabled = true;
        self
    }

    /// Enable graceful shutdown with the specified configuration.
    ///
    /// When graceful shutdown is enabled, the server will:
    /// 1. Stop accepting new connections on SIGTERM/SIGINT
    /// 2. Wait for running backing calls to complete (up to timeout)
    /// 3. Exit
    pub fn with_graceful_shutdown(mut self, config: ShutdownConfig) -> Self {
        self.shutdown_config = Some(config);
        self
    }

    /// Apply a loaded configuration file
    ///
    /// The descriptor set path, when present, is read immediately.
    pub fn with_config(mut self, config: &GatewayConfig) -> Result<Self> {
        config.validate()?;
        if let Some(path) = &config.descriptor_set {
            self = self.with_descriptor_set_file(path)?;
        }
        if let Some(endpoint) = &config.backend.endpoint {
            self.grpc_endpoint = Some(endpoint.clone());
        }
        self.max_depth = config.introspection.max_depth;
        self.route_config = config.route_config();
        self.health_checks_enabled = config.health_checks;
        self.metrics_enabled = config.metrics;
        self.shutdown_config = Some(config.shutdown_config());
        Ok(self)
    }

    pub fn build(self) -> Result<Gateway> {
        if self.max_depth < MIN_EXPANSION_DEPTH {
            return Err(Error::Config(format!(
                "expansion depth {} is below the minimum ceiling of {}",
                self.max_depth, MIN_EXPANSION_DEPTH
            )));
        }
        let (source, pool) = match self.schema {
            Some(SchemaInput::Bytes(bytes)) => {
                let pool = DescriptorPool::decode(bytes.as_slice())
                    .map_err(|e| Error::Schema(format!("invalid descriptor set: {e}")))?;
                (SchemaSource::from_pool(&pool), Some(pool))
            }
            Some(SchemaInput::Pool(pool)) => (SchemaSource::from_pool(&pool), Some(pool)),
            Some(SchemaInput::Source(source)) => (source, None),
            None => {
                return Err(Error::Config(
                    "no schema configured, provide a descriptor set".to_string(),
                ))
            }
        };

        let schema = SchemaIntrospector::new()
            .with_max_depth(self.max_depth)
            .introspect(&source)?;
        let model: RestModel = RouteSynthesizer::new(self.route_config).synthesize(&schema)?;

        let backend: Arc<dyn RpcBackend> = match (self.backend, self.grpc_endpoint.as_ref()) {
            (Some(backend), _) => backend,
            (None, Some(endpoint)) => {
                let pool = pool.ok_or_else(|| {
                    Error::Config(
                        "a gRPC endpoint needs a descriptor set to encode messages".to_string(),
                    )
                })?;
                Arc::new(GrpcBackend::connect_lazy(endpoint.clone(), pool)?)
            }
            (None, None) => {
                return Err(Error::Config(
                    "no backend configured, set a gRPC endpoint or a backend".to_string(),
                ))
            }
        };

        let shutdown = self.shutdown_config.map(ShutdownCoordinator::new);
        let mut instances = InstanceManager::new(backend);
        if let Some(coordinator) = &shutdown {
            instances = instances.with_shutdown(coordinator.clone());
        }

        tracing::info!(
            services = schema.services.len(),
            operations = schema.operation_count(),
            routes = model.routes.len(),
            "REST model built"
        );

        let operations = schema.operation_count();
        let mut mux = ServeMux::new(model, instances.clone());
        if self.health_checks_enabled {
            let mut health = HealthState::new(operations).with_instances(instances);
            if let Some(endpoint) = self.grpc_endpoint {
                health = health.with_backend_endpoint(endpoint);
            }
            if let Some(coordinator) = &shutdown {
                health = health.with_shutdown(coordinator.clone());
            }
            mux.enable_health_checks(health);
        }
        if self.metrics_enabled {
            mux.enable_metrics();
        }

        Ok(Gateway { mux, shutdown })
    }

    /// Build and start the gateway server
    pub async fn serve(self, addr: impl Into<String>) -> Result<()> {
        self.build()?.serve(addr).await
    }

    /// Build and start the gateway server with explicit shutdown signal.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use grpc_rest_gateway::Gateway;
    /// use tokio::sync::oneshot;
    ///
    /// # async fn example(descriptor_set: Vec<u8>) -> Result<(), Box<dyn std::error::Error>> {
    /// let (tx, rx) = oneshot::channel::<()>();
    ///
    /// tokio::spawn(async move {
    ///     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
    ///     let _ = tx.send(());
    /// });
    ///
    /// Gateway::builder()
    ///     .with_descriptor_set_bytes(&descriptor_set)
    ///     .with_grpc_endpoint("http://127.0.0.1:50051")
    ///     .serve_with_shutdown("0.0.0.0:8080", async { let _ = rx.await; })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn serve_with_shutdown<F>(
        self,
        addr: impl Into<String>,
        shutdown_signal: F,
    ) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let gateway = self.build()?;
        let addr = addr.into();
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        tracing::info!(address = %addr, "Gateway server listening");

        let app = gateway.into_router();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await?;

        Ok(())
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}
