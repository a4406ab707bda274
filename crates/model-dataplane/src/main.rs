// model-dataplane/src/main.rs

#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use dotenvy::dotenv;
#[cfg(feature = "cli")]
use model_dataplane::{config::Config, run_server};

/// Command-line overrides; anything unset falls back to the environment.
#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "model-dataplane", about = "Model serving dataplane (v1, v2, gRPC and OpenAI protocols)", version)]
struct Cli {
    /// REST port
    #[arg(long)]
    http_port: Option<u16>,
    /// gRPC port
    #[arg(long)]
    grpc_port: Option<u16>,
    /// Disable the gRPC server
    #[arg(long)]
    disable_grpc: bool,
    /// Worker processes, a number or "auto"
    #[arg(long)]
    workers: Option<String>,
    /// Name of the model registered at startup
    #[arg(long)]
    model_name: Option<String>,
    /// echo, echo-generative, remote or openai-proxy
    #[arg(long)]
    model_kind: Option<String>,
    /// Remote predictor host:port
    #[arg(long)]
    predictor_host: Option<String>,
    /// Upstream OpenAI-compatible base URL
    #[arg(long)]
    predictor_url: Option<String>,
    /// Log predict latency per request
    #[arg(long)]
    enable_latency_logging: bool,
}

#[cfg(feature = "cli")]
impl Cli {
    fn apply(self, cfg: &mut Config) -> anyhow::Result<()> {
        if let Some(port) = self.http_port {
            cfg.http_port = port;
        }
        if let Some(port) = self.grpc_port {
            cfg.grpc_port = port;
        }
        if self.disable_grpc {
            cfg.enable_grpc = false;
        }
        if let Some(workers) = self.workers {
            cfg.workers = Config::parse_workers(&workers)?;
        }
        if let Some(name) = self.model_name {
            cfg.model_name = name;
        }
        if let Some(kind) = self.model_kind {
            cfg.model_kind = kind.parse()?;
        }
        if self.predictor_host.is_some() {
            cfg.predictor_host = self.predictor_host;
        }
        if self.predictor_url.is_some() {
            cfg.predictor_url = self.predictor_url;
        }
        if self.enable_latency_logging {
            cfg.enable_latency_logging = true;
        }
        cfg.validate()
    }
}

#[cfg(feature = "cli")]
fn main() -> anyhow::Result<()> {
    dotenv().ok();
    // before config loading, so its log lines are kept
    model_dataplane::telemetry::init_tracing();
    let cli = Cli::parse();

    let mut cfg = Config::from_env()?;
    cli.apply(&mut cfg)?;

    run_server(cfg)
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
