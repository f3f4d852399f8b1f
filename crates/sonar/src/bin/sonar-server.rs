//! Sonar server - entry point.
//!
//! Loads configuration (defaults, optional file, `.env`, `SONAR__*`
//! environment, then flags), initializes telemetry and serves every
//! configured transport until SIGINT or SIGTERM.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use sonar::config::{ConfigLoader, ENV_PREFIX};
use sonar::server::{ServerOverrides, SonarServer};
use sonar::telemetry::init_telemetry;
use sonar::transport::ShutdownSignal;

/// Ping/probe service over HTTP, gRPC and Thrift.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, value_name = "FILE", env = "SONAR_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP listen address; empty disables HTTP
    #[arg(long, value_name = "ADDR")]
    http_addr: Option<String>,

    /// gRPC listen address; empty disables gRPC
    #[arg(long, value_name = "ADDR")]
    grpc_addr: Option<String>,

    /// Thrift listen address; empty disables Thrift
    #[arg(long, value_name = "ADDR")]
    thrift_addr: Option<String>,

    /// Use the framed Thrift transport
    #[arg(long)]
    thrift_framed: bool,

    /// Probability that a ping fails on purpose (0.0 to 1.0)
    #[arg(long, value_name = "RATE")]
    failure_rate: Option<f64>,
}

impl Args {
    fn overrides(&self) -> ServerOverrides {
        ServerOverrides {
            http_addr: self.http_addr.clone(),
            grpc_addr: self.grpc_addr.clone(),
            thrift_addr: self.thrift_addr.clone(),
            thrift_framed: self.thrift_framed,
            failure_rate: self.failure_rate,
        }
    }
}

fn load_config(args: &Args) -> anyhow::Result<sonar::config::SonarConfig> {
    let mut loader = ConfigLoader::new().with_defaults();
    if let Some(path) = &args.config {
        loader = loader
            .with_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?;
    }
    let config = loader.with_dotenv().with_env_prefix(ENV_PREFIX).load()?;
    Ok(args.overrides().apply(config)?)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    // flushes spans on drop
    let _telemetry = match init_telemetry(config.telemetry_config()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(version = sonar::VERSION, "starting sonar-server");

    let server = match SonarServer::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "failed to start");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.serve(ShutdownSignal::with_os_signals()).await {
        tracing::error!(error = %e, "sonar-server exited with an error");
        return ExitCode::FAILURE;
    }

    tracing::info!("sonar-server stopped");
    ExitCode::SUCCESS
}
