//! Gateway configuration file
//!
//! ```yaml
//! listen: 0.0.0.0:8080
//! descriptor_set: ./webshop.bin
//! backend:
//!   endpoint: http://127.0.0.1:50051
//! introspection:
//!   max_depth: 10
//! routes:
//!   segment_services: true
//!   title: Webshop
//! shutdown:
//!   timeout_secs: 30
//! ```
//!
//! Every key is optional; missing keys take the defaults below.

use crate::error::{Error, Result};
use crate::introspect::{DEFAULT_MAX_EXPANSION_DEPTH, MIN_EXPANSION_DEPTH};
use crate::routes::RouteConfig;
use crate::shutdown::ShutdownConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the HTTP server binds to
    pub listen: String,
    /// Protobuf `FileDescriptorSet` describing the backing services
    pub descriptor_set: Option<PathBuf>,
    pub backend: BackendConfig,
    pub introspection: IntrospectionConfig,
    pub routes: RoutesConfig,
    pub health_checks: bool,
    pub metrics: bool,
    /// `tracing_subscriber` filter directive, e.g. `info` or `grpc_rest_gateway=debug`
    pub log_level: String,
    pub shutdown: ShutdownSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            descriptor_set: None,
            backend: BackendConfig::default(),
            introspection: IntrospectionConfig::default(),
            routes: RoutesConfig::default(),
            health_checks: true,
            metrics: true,
            log_level: "info".to_string(),
            shutdown: ShutdownSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// gRPC endpoint, e.g. `http://127.0.0.1:50051`
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntrospectionConfig {
    /// Nesting depth at which message expansion stops
    pub max_depth: usize,
}

impl Default for IntrospectionConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_EXPANSION_DEPTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutesConfig {
    pub segment_services: bool,
    pub title: String,
    pub description: String,
    pub version: String,
}

impl Default for RoutesConfig {
    fn default() -> Self {
        let defaults = RouteConfig::default();
        Self {
            segment_services: defaults.segment_services,
            title: defaults.title,
            description: defaults.description,
            version: defaults.version,
        }
    }
}

impl From<&RoutesConfig> for RouteConfig {
    fn from(routes: &RoutesConfig) -> Self {
        RouteConfig {
            segment_services: routes.segment_services,
            title: routes.title.clone(),
            description: routes.description.clone(),
            version: routes.version.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownSettings {
    pub timeout_secs: u64,
    pub force_shutdown_delay_secs: u64,
    pub handle_signals: bool,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        let defaults = ShutdownConfig::default();
        Self {
            timeout_secs: defaults.timeout.as_secs(),
            force_shutdown_delay_secs: defaults.force_shutdown_delay.as_secs(),
            handle_signals: defaults.handle_signals,
        }
    }
}

impl From<&ShutdownSettings> for ShutdownConfig {
    fn from(settings: &ShutdownSettings) -> Self {
        ShutdownConfig {
            timeout: Duration::from_secs(settings.timeout_secs),
            handle_signals: settings.handle_signals,
            force_shutdown_delay: Duration::from_secs(settings.force_shutdown_delay_secs),
        }
    }
}

impl GatewayConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("invalid gateway config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.introspection.max_depth < MIN_EXPANSION_DEPTH {
            return Err(Error::Config(format!(
                "introspection.max_depth is {}, the expansion ceiling must be at least {}",
                self.introspection.max_depth, MIN_EXPANSION_DEPTH
            )));
        }
        if self.listen.trim().is_empty() {
            return Err(Error::Config("listen address is empty".to_string()));
        }
        Ok(())
    }

    pub fn route_config(&self) -> RouteConfig {
        RouteConfig::from(&self.routes)
    }

    pub fn shutdown_config(&self) -> ShutdownConfig {
        ShutdownConfig::from(&self.shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = GatewayConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(config.introspection.max_depth, DEFAULT_MAX_EXPANSION_DEPTH);
        assert_eq!(config.route_config(), RouteConfig::default());
        assert_eq!(config.shutdown_config(), ShutdownConfig::default());
    }

    #[test]
    fn test_partial_document() {
        let config = GatewayConfig::from_yaml_str(
            r#"
listen: 127.0.0.1:9000
descriptor_set: /tmp/shop.bin
backend:
  endpoint: http://127.0.0.1:50051
routes:
  segment_services: false
  title: Webshop
shutdown:
  timeout_secs: 5
  handle_signals: false
"#,
        )
        .unwrap();

        assert_eq!(config.listen, "127.0.0.1:9000");
        assert_eq!(config.descriptor_set, Some(PathBuf::from("/tmp/shop.bin")));
        assert_eq!(config.backend.endpoint.as_deref(), Some("http://127.0.0.1:50051"));

        let routes = config.route_config();
        assert!(!routes.segment_services);
        assert_eq!(routes.title, "Webshop");
        assert_eq!(routes.version, "1.0.0");

        let shutdown = config.shutdown_config();
        assert_eq!(shutdown.timeout, Duration::from_secs(5));
        assert!(!shutdown.handle_signals);
        assert_eq!(shutdown.force_shutdown_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_documents() {
        assert!(matches!(
            GatewayConfig::from_yaml_str("listen: [1, 2]"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            GatewayConfig::from_yaml_str("introspection:\n  max_depth: 0\n"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_depth_ceiling_too_low_for_top_level_messages() {
        let err = GatewayConfig::from_yaml_str("introspection:\n  max_depth: 1\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("at least 2"), "{err}");

        let config = GatewayConfig::from_yaml_str("introspection:\n  max_depth: 2\n").unwrap();
        assert_eq!(config.introspection.max_depth, MIN_EXPANSION_DEPTH);
    }

    #[test]
    fn test_missing_file() {
        let err = GatewayConfig::from_yaml_file("/definitely/not/here.yaml").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.yaml"));
    }
}
