//! # grpc-rest-gateway
//!
//! A Rust gateway that exposes gRPC services as a REST API of pollable
//! operation instances, described by a generated Swagger 2.0 document.
//!
//! ## Features
//!
//! - **Schema introspection**: services, messages and enums read from a protobuf descriptor set
//! - **Route synthesis**: per-operation instance resources plus a Swagger 2.0 document
//! - **Instance lifecycle**: create, edit field by field, start, poll, read output, delete
//! - **Streaming**: request, response and bidirectional streams as newline-delimited JSON
//! - **Operations**: health checks, Prometheus metrics and graceful shutdown
//!
//! ## Main Components
//!
//! - [`Gateway`]: The main entry point for creating and running the gateway.
//! - [`GatewayBuilder`]: Configuration builder for the gateway.
//! - [`SchemaIntrospector`]: Expands the schema into per-service message tables.
//! - [`RouteSynthesizer`]: Builds the REST routes and the Swagger document.
//! - [`InstanceManager`]: Owns instances and drives backing calls.
//! - [`RpcBackend`]: The seam to the backing service; [`GrpcBackend`] speaks gRPC.
//!
//! ## Example
//!
//! ```rust,no_run
//! use grpc_rest_gateway::Gateway;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gateway = Gateway::builder()
//!         .with_descriptor_set_file("webshop.bin")?
//!         .with_grpc_endpoint("http://localhost:50051")
//!         .enable_health_checks()
//!         .enable_metrics()
//!         .build()?;
//!
//!     let app = gateway.into_router();
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod gateway;
pub mod health;
pub mod instance;
pub mod introspect;
pub mod metrics;
pub mod openapi;
pub mod routes;
pub mod runtime;
pub mod shutdown;
pub mod streaming;
pub mod type_mapper;
pub mod types;

pub use backend::{GrpcBackend, ResponseStream, RpcBackend};
pub use config::GatewayConfig;
pub use descriptor::SchemaSource;
pub use error::{Error, RestError, Result};
pub use gateway::{Gateway, GatewayBuilder};
pub use health::{ComponentHealth, HealthResponse, HealthState, HealthStatus};
pub use instance::{Instance, InstanceEnvelope, InstanceManager, InstanceState};
pub use introspect::{SchemaIntrospector, DEFAULT_MAX_EXPANSION_DEPTH};
pub use metrics::{BackendTimer, GatewayMetrics};
pub use openapi::{HttpMethod, SwaggerDocument};
pub use routes::{synthesize, RestModel, RouteBinding, RouteConfig, RouteKind, RouteSynthesizer, RouteTable};
pub use runtime::ServeMux;
pub use shutdown::{
    run_with_graceful_shutdown, signal_shutdown, RequestGuard, ShutdownConfig,
    ShutdownCoordinator, ShutdownState,
};
pub use streaming::{parse_ndjson, NDJSON_CONTENT_TYPE};
pub use types::{
    FieldDescriptor, FieldKind, IntrospectedSchema, MessageDescriptor, MessageTable,
    OperationDescriptor, ServiceModel, StreamClass,
};
