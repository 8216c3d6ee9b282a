//! grpc-rest-gateway - command-line server
//!
//! Loads an optional YAML config, applies command-line overrides, then
//! serves the REST API until SIGTERM/SIGINT.

use anyhow::{bail, Context};
use clap::Parser;
use grpc_rest_gateway::{Gateway, GatewayConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "grpc-rest-gateway")]
#[command(about = "Expose gRPC services as a REST API of pollable instances", long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, short = 'c', env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides `listen`)
    #[arg(long, env = "GATEWAY_LISTEN")]
    listen: Option<String>,

    /// gRPC endpoint of the backing service (overrides `backend.endpoint`)
    #[arg(long, env = "GATEWAY_BACKEND")]
    backend: Option<String>,

    /// Protobuf descriptor set (overrides `descriptor_set`)
    #[arg(long)]
    descriptor_set: Option<PathBuf>,

    /// Print the Swagger document and exit
    #[arg(long)]
    print_swagger: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => GatewayConfig::from_yaml_file(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(backend) = args.backend {
        config.backend.endpoint = Some(backend);
    }
    if let Some(path) = args.descriptor_set {
        config.descriptor_set = Some(path);
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if config.descriptor_set.is_none() {
        bail!("no descriptor set given, use --descriptor-set or `descriptor_set` in the config");
    }
    if config.backend.endpoint.is_none() {
        bail!("no backend given, use --backend or `backend.endpoint` in the config");
    }

    let gateway = Gateway::builder()
        .with_config(&config)
        .context("applying configuration")?
        .build()
        .context("building REST model")?;

    if args.print_swagger {
        println!("{}", gateway.document().to_json_pretty()?);
        return Ok(());
    }

    gateway
        .serve(config.listen.clone())
        .await
        .context("serving REST API")?;
    Ok(())
}
