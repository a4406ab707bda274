//! Server startup
//!
//! Binds the REST (and optionally gRPC) listeners once in the parent. With
//! one worker the parent serves them itself; with more, each forked worker
//! serves the inherited sockets and the parent only supervises.

use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    api::{self, openai_api, repository_api, v1_api, v2_api, AppState},
    config::{Config, ModelKind},
    dataplane::DataPlane,
    grpc::InferenceService,
    model::{echo::EchoModel, remote::RemoteModel, Model, ModelFactory, ModelRegistry, ModelRepository},
    openai::{generation::EchoTokenGenerator, GeneratedCompletionModel, OpenAIProxyModel},
    supervisor::{self, ProcessWorker, Supervisor, SupervisorConfig},
};

/// Builds a model of the configured kind under `name`.
pub fn build_model(cfg: &Config, name: &str) -> anyhow::Result<Arc<dyn Model>> {
    let model: Arc<dyn Model> = match cfg.model_kind {
        ModelKind::Echo => Arc::new(EchoModel::new(name)),
        ModelKind::EchoGenerative => Arc::new(GeneratedCompletionModel::new(name, Arc::new(EchoTokenGenerator))),
        ModelKind::Remote => {
            let host = cfg
                .predictor_host
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("PREDICTOR_HOST is required for remote models"))?;
            Arc::new(RemoteModel::new(
                name,
                host,
                cfg.predictor_protocol,
                Duration::from_secs(cfg.proxy_timeout_seconds),
            ))
        }
        ModelKind::OpenAIProxy => {
            let url = cfg
                .predictor_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("PREDICTOR_URL is required for openai-proxy models"))?;
            Arc::new(OpenAIProxyModel::new(name, url, Duration::from_secs(cfg.proxy_timeout_seconds)))
        }
    };
    Ok(model)
}

/// Registry with the startup model plus a repository over `MODELS_DIR`.
pub async fn build_dataplane(cfg: &Config) -> anyhow::Result<DataPlane> {
    let registry = Arc::new(ModelRegistry::new());

    let model = build_model(cfg, &cfg.model_name)?;
    match model.load().await {
        Ok(true) => info!("Model {} is ready", cfg.model_name),
        Ok(false) => warn!("Model {} did not become ready; v1 requests will retry the load", cfg.model_name),
        Err(e) => warn!("Model {} failed to load: {}", cfg.model_name, e),
    }
    registry.register(model);

    let factory_cfg = cfg.clone();
    let factory: Arc<dyn ModelFactory> = Arc::new(move |name: &str, _path: &Path| build_model(&factory_cfg, name));
    let repository = ModelRepository::new(cfg.models_dir.clone(), factory, registry.clone());

    Ok(DataPlane::new(registry)
        .with_repository(repository)
        .with_latency_logging(cfg.enable_latency_logging))
}

/// REST router for every binding.
pub fn build_router(dataplane: AppState, cfg: &Config) -> axum::Router {
    use axum::{
        routing::{get, post},
        Router,
    };
    use tower_http::{
        cors::{Any, CorsLayer},
        timeout::TimeoutLayer,
        trace::TraceLayer,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);

    Router::new()
        // v1
        .route("/", get(v1_api::live))
        .route("/v1/models", get(v1_api::list_models))
        .route("/v1/models/:model", get(v1_api::model_ready).post(v1_api::model_verb))
        // v2
        .route("/v2", get(v2_api::server_metadata))
        .route("/v2/health/live", get(v2_api::live))
        .route("/v2/health/ready", get(v2_api::ready))
        .route("/v2/models/:model", get(v2_api::model_metadata))
        .route("/v2/models/:model/ready", get(v2_api::model_ready))
        .route("/v2/models/:model/infer", post(v2_api::infer))
        .route("/v2/models/:model/explain", post(v2_api::explain))
        .route("/v2/repository/models/:model/load", post(repository_api::load))
        .route("/v2/repository/models/:model/unload", post(repository_api::unload))
        // OpenAI
        .route("/openai/v1/models", get(openai_api::list_models))
        .route("/openai/v1/completions", post(openai_api::completions))
        .route("/openai/v1/chat/completions", post(openai_api::chat_completions))
        .route("/openai/v1/embeddings", post(openai_api::embeddings))
        .route("/openai/v1/rerank", post(openai_api::rerank))
        .route("/metrics", get(crate::metrics::get_metrics))
        .fallback(api::not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(cfg.request_timeout_seconds)))
        .with_state(dataplane)
}

/// Registers SIGINT and SIGTERM listeners now and returns a future that
/// resolves on either. A signal that lands before the future is polled is
/// still seen.
fn shutdown_signal() -> anyhow::Result<impl std::future::Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("Received SIGINT, shutting down"),
            _ = terminate.recv() => info!("Received SIGTERM, shutting down"),
        }
    })
}

/// Serves REST (and gRPC when given) from already-bound listeners until a
/// shutdown signal arrives.
pub async fn serve(cfg: Config, http: TcpListener, grpc: Option<TcpListener>) -> anyhow::Result<()> {
    let shutdown = shutdown_signal()?;
    let dataplane = Arc::new(build_dataplane(&cfg).await?);
    let (stop_tx, stop_rx) = watch::channel(false);

    tokio::spawn(async move {
        shutdown.await;
        let _ = stop_tx.send(true);
    });

    let grpc_task = match grpc {
        Some(listener) => {
            let listener = tokio::net::TcpListener::from_std(listener)?;
            info!("gRPC server listening on {}", listener.local_addr()?);
            let incoming = tokio_stream::wrappers::TcpListenerStream::new(listener);
            let service = InferenceService::new(dataplane.clone()).into_server();
            let mut rx = stop_rx.clone();
            Some(tokio::spawn(async move {
                tonic::transport::Server::builder()
                    .add_service(service)
                    .serve_with_incoming_shutdown(incoming, async move {
                        let _ = rx.wait_for(|stop| *stop).await;
                    })
                    .await
            }))
        }
        None => None,
    };

    let listener = tokio::net::TcpListener::from_std(http)?;
    info!("HTTP server listening on {}", listener.local_addr()?);
    let app = build_router(dataplane.clone(), &cfg);
    let mut rx = stop_rx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = rx.wait_for(|stop| *stop).await;
        })
        .await?;

    if let Some(task) = grpc_task {
        task.await??;
    }

    for model in dataplane.registry().models() {
        model.stop().await;
    }
    info!("Worker {} stopped", std::process::id());
    Ok(())
}

/// Runs one worker on a current-thread runtime.
pub fn run_worker(cfg: Config, http: TcpListener, grpc: Option<TcpListener>) -> anyhow::Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(serve(cfg, http, grpc))
}

fn bind(addr: std::net::SocketAddr) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(addr).map_err(|e| anyhow::anyhow!("failed to bind {}: {}", addr, e))?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

pub fn run_server(cfg: Config) -> anyhow::Result<()> {
    crate::telemetry::init_tracing();
    crate::metrics::init_metrics();
    cfg.print_config();

    let http = bind(cfg.http_addr()?)?;
    let grpc = if cfg.enable_grpc {
        Some(bind(cfg.grpc_addr()?)?)
    } else {
        None
    };

    if cfg.workers <= 1 {
        return run_worker(cfg, http, grpc);
    }

    let stop = supervisor::install_stop_handler()?;
    let spawn = {
        let cfg = cfg.clone();
        move || -> anyhow::Result<ProcessWorker> {
            let http = http.try_clone()?;
            let grpc = grpc.as_ref().map(TcpListener::try_clone).transpose()?;
            let cfg = cfg.clone();
            ProcessWorker::spawn(move || run_worker(cfg, http, grpc))
        }
    };

    let mut supervisor = Supervisor::new(SupervisorConfig::from_config(&cfg), spawn);
    supervisor.start()?;
    supervisor.run(stop)?;
    info!("Shutdown requested");
    supervisor.terminate_all();
    info!("Server stopped");
    Ok(())
}
