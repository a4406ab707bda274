// model-dataplane/src/config.rs

use crate::model::remote::RemoteProtocol;
use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

/// Which model the worker builds at startup and for repository loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Echo,
    EchoGenerative,
    Remote,
    OpenAIProxy,
}

impl FromStr for ModelKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "echo" => Ok(Self::Echo),
            "echo-generative" => Ok(Self::EchoGenerative),
            "remote" => Ok(Self::Remote),
            "openai-proxy" => Ok(Self::OpenAIProxy),
            other => Err(anyhow::anyhow!(
                "unknown MODEL_KIND '{}' (expected echo, echo-generative, remote or openai-proxy)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_host: String,
    pub http_port: u16,
    pub grpc_port: u16,
    pub enable_grpc: bool,
    pub workers: usize,
    pub health_check_interval_seconds: u64,
    pub heartbeat_timeout_seconds: u64,
    pub timeout_graceful_shutdown: u64,
    pub request_timeout_seconds: u64,
    pub model_name: String,
    pub model_kind: ModelKind,
    pub predictor_host: Option<String>,
    pub predictor_protocol: RemoteProtocol,
    pub predictor_url: Option<String>,
    pub proxy_timeout_seconds: u64,
    pub models_dir: PathBuf,
    pub enable_latency_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_host: "0.0.0.0".to_string(),
            http_port: 8080,
            grpc_port: 8081,
            enable_grpc: true,
            workers: 1,
            health_check_interval_seconds: 5,
            heartbeat_timeout_seconds: 3,
            timeout_graceful_shutdown: 30,
            request_timeout_seconds: 600,
            model_name: "model".to_string(),
            model_kind: ModelKind::Echo,
            predictor_host: None,
            predictor_protocol: RemoteProtocol::V1,
            predictor_url: None,
            proxy_timeout_seconds: 30,
            models_dir: PathBuf::from("/mnt/models"),
            enable_latency_logging: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        let workers = Self::parse_workers(&env::var("WORKERS").unwrap_or_else(|_| "1".into()))?;

        let cfg = Self {
            http_host: env::var("HTTP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            http_port: env::var("HTTP_PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()
                .context("HTTP_PORT must be a port number")?,
            grpc_port: env::var("GRPC_PORT")
                .unwrap_or_else(|_| "8081".into())
                .parse()
                .context("GRPC_PORT must be a port number")?,
            enable_grpc: env::var("ENABLE_GRPC")
                .unwrap_or_else(|_| "true".into())
                .parse()
                .context("ENABLE_GRPC must be true or false")?,
            workers,
            health_check_interval_seconds: env::var("HEALTH_CHECK_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "5".into())
                .parse()?,
            heartbeat_timeout_seconds: env::var("HEARTBEAT_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "3".into())
                .parse()?,
            timeout_graceful_shutdown: env::var("TIMEOUT_GRACEFUL_SHUTDOWN")
                .unwrap_or_else(|_| "30".into())
                .parse()?,
            request_timeout_seconds: env::var("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "600".into())
                .parse()?,
            model_name: env::var("MODEL_NAME").unwrap_or_else(|_| "model".into()),
            model_kind: env::var("MODEL_KIND").unwrap_or_else(|_| "echo".into()).parse()?,
            predictor_host: env::var("PREDICTOR_HOST").ok().filter(|h| !h.is_empty()),
            predictor_protocol: env::var("PREDICTOR_PROTOCOL")
                .unwrap_or_else(|_| "v1".into())
                .parse()?,
            predictor_url: env::var("PREDICTOR_URL").ok().filter(|u| !u.is_empty()),
            proxy_timeout_seconds: env::var("PROXY_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "30".into())
                .parse()?,
            models_dir: PathBuf::from(env::var("MODELS_DIR").unwrap_or_else(|_| "/mnt/models".into())),
            enable_latency_logging: env::var("ENABLE_LATENCY_LOGGING")
                .unwrap_or_else(|_| "false".into())
                .parse()
                .context("ENABLE_LATENCY_LOGGING must be true or false")?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// `auto` means one worker per CPU core.
    pub fn parse_workers(value: &str) -> Result<usize> {
        let workers = if value.trim().eq_ignore_ascii_case("auto") {
            let cores = num_cpus::get();
            info!("Auto-detected CPU cores: {}", cores);
            cores
        } else {
            value
                .trim()
                .parse()
                .with_context(|| format!("WORKERS must be a number or 'auto', got '{}'", value))?
        };
        if workers == 0 {
            return Err(anyhow::anyhow!("WORKERS must be at least 1"));
        }
        Ok(workers)
    }

    pub fn validate(&self) -> Result<()> {
        match self.model_kind {
            ModelKind::Remote if self.predictor_host.is_none() => {
                Err(anyhow::anyhow!("MODEL_KIND=remote requires PREDICTOR_HOST"))
            }
            ModelKind::OpenAIProxy if self.predictor_url.is_none() => {
                Err(anyhow::anyhow!("MODEL_KIND=openai-proxy requires PREDICTOR_URL"))
            }
            _ if self.workers == 0 => Err(anyhow::anyhow!("WORKERS must be at least 1")),
            _ if self.enable_grpc && self.grpc_port == self.http_port && self.http_port != 0 => {
                Err(anyhow::anyhow!("HTTP_PORT and GRPC_PORT must differ"))
            }
            _ => Ok(()),
        }
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- HTTP: {}:{}", self.http_host, self.http_port);
        if self.enable_grpc {
            info!("- gRPC: {}:{}", self.http_host, self.grpc_port);
        } else {
            info!("- gRPC: disabled");
        }
        info!("- Workers: {}", self.workers);
        info!("- Health Check Interval: {}s", self.health_check_interval_seconds);
        info!("- Heartbeat Timeout: {}s", self.heartbeat_timeout_seconds);
        info!("- Graceful Shutdown Timeout: {}s", self.timeout_graceful_shutdown);
        info!("- Model: {} ({:?})", self.model_name, self.model_kind);
        if let Some(host) = &self.predictor_host {
            info!("- Predictor Host: {} ({:?})", host, self.predictor_protocol);
        }
        if let Some(url) = &self.predictor_url {
            info!("- Predictor URL: {}", url);
        }
        info!("- Models Dir: {}", self.models_dir.display());
    }

    pub fn http_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.http_host, self.http_port)
            .parse()
            .with_context(|| format!("invalid HTTP address {}:{}", self.http_host, self.http_port))
    }

    pub fn grpc_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.http_host, self.grpc_port)
            .parse()
            .with_context(|| format!("invalid gRPC address {}:{}", self.http_host, self.grpc_port))
    }
}
