//! Sonar command-line client.
//!
//! Calls one method on a Sonar server over the chosen transport and
//! prints the result.

use std::process::ExitCode;
use std::time::Duration;

use clap::{ArgGroup, Parser};
use sonar::client::{check_thrift_protocol, connect, Target};
use sonar::core::{CallContext, ProbeService, SonarResult};
use sonar::middleware::LogSink;
use sonar::transport::TransportMode;

/// Command-line client for a Sonar server.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
#[command(group(
    ArgGroup::new("target")
        .required(true)
        .args(["http_addr", "grpc_addr", "thrift_addr"])
))]
struct Args {
    /// HTTP address of the server
    #[arg(long, value_name = "ADDR")]
    http_addr: Option<String>,

    /// gRPC address of the server
    #[arg(long, value_name = "ADDR")]
    grpc_addr: Option<String>,

    /// Thrift address of the server
    #[arg(long, value_name = "ADDR")]
    thrift_addr: Option<String>,

    /// Thrift protocol (only binary is available)
    #[arg(long, default_value = "binary")]
    thrift_protocol: String,

    /// Thrift buffer size, 0 for unbuffered
    #[arg(long, default_value_t = 0)]
    thrift_buffer: usize,

    /// Use the framed Thrift transport
    #[arg(long)]
    thrift_framed: bool,

    /// Method to call
    #[arg(long, default_value = "ping")]
    method: String,

    /// Call timeout in seconds
    #[arg(long, value_name = "SECS", default_value = "10", value_parser = parse_timeout)]
    timeout: Duration,
}

impl Args {
    fn target(&self) -> SonarResult<Target> {
        if let Some(addr) = &self.http_addr {
            return Ok(Target::Http(addr.clone()));
        }
        if let Some(addr) = &self.grpc_addr {
            return Ok(Target::Grpc(addr.clone()));
        }
        check_thrift_protocol(&self.thrift_protocol)?;
        Ok(Target::Thrift {
            addr: self.thrift_addr.clone().unwrap_or_default(),
            mode: TransportMode::from_framed(self.thrift_framed),
            buffer_size: self.thrift_buffer,
        })
    }
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    let secs: f64 = value.parse().map_err(|e| format!("{e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{e}"))
}

async fn run(args: &Args) -> anyhow::Result<String> {
    let target = args.target()?;
    let client = connect(&target, Some(args.timeout), LogSink::discard())?;
    let ctx = CallContext::new().with_timeout(args.timeout);

    match args.method.as_str() {
        "ping" => Ok(client.ping(&ctx).await?),
        other => anyhow::bail!("invalid method {other:?}"),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(&args).await {
        Ok(payload) => {
            println!("ping = {payload}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
