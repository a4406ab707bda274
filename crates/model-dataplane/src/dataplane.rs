//! Protocol-agnostic request handling.
//!
//! Every call resolves the model by name, checks readiness, dispatches to
//! the capability and returns typed errors for the bindings to map.

use crate::error::{DataplaneError, Result};
use crate::model::{Headers, Model, ModelMetadata, ModelRegistry, ModelRepository, Payload, Prediction};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub const SERVER_NAME: &str = "model-dataplane";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How a binding treats a registered model that is not ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessPolicy {
    /// v1: give the model one `load()` attempt before failing.
    LazyLoad,
    /// v2 REST, gRPC and OpenAI: fail with `ModelNotReady` immediately.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerMetadata {
    pub name: String,
    pub version: String,
    pub extensions: Vec<String>,
}

pub struct DataPlane {
    registry: Arc<ModelRegistry>,
    repository: Option<ModelRepository>,
    enable_latency_logging: bool,
}

impl DataPlane {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            repository: None,
            enable_latency_logging: false,
        }
    }

    pub fn with_repository(mut self, repository: ModelRepository) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_latency_logging(mut self, enabled: bool) -> Self {
        self.enable_latency_logging = enabled;
        self
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub async fn get_model(&self, name: &str, policy: ReadinessPolicy) -> Result<Arc<dyn Model>> {
        let model = self
            .registry
            .get(name)
            .ok_or_else(|| DataplaneError::ModelNotFound(name.to_string()))?;
        if model.ready() {
            return Ok(model);
        }
        match policy {
            ReadinessPolicy::Strict => Err(DataplaneError::ModelNotReady(name.to_string())),
            ReadinessPolicy::LazyLoad => {
                debug!("Model {} not ready, attempting load", name);
                if model.load().await? && model.ready() {
                    Ok(model)
                } else {
                    Err(DataplaneError::ModelNotReady(name.to_string()))
                }
            }
        }
    }

    pub async fn infer(&self, name: &str, payload: Payload, headers: &Headers, policy: ReadinessPolicy) -> Result<Prediction> {
        let model = self.get_model(name, policy).await?;
        let predictor = model
            .as_predictor()
            .ok_or_else(|| DataplaneError::unsupported(name, "predict"))?;
        let start = Instant::now();
        let result = predictor.predict(payload, headers).await;
        self.record(name, "predict", start, headers);
        result
    }

    pub async fn explain(&self, name: &str, payload: Payload, headers: &Headers, policy: ReadinessPolicy) -> Result<Prediction> {
        let model = self.get_model(name, policy).await?;
        let explainer = model
            .as_explainer()
            .ok_or_else(|| DataplaneError::unsupported(name, "explain"))?;
        let start = Instant::now();
        let result = explainer.explain(payload, headers).await;
        self.record(name, "explain", start, headers);
        result
    }

    pub fn record(&self, name: &str, kind: &str, start: Instant, headers: &Headers) {
        let elapsed = start.elapsed();
        crate::metrics::observe_inference(name, kind, elapsed.as_secs_f64());
        if self.enable_latency_logging {
            info!(
                "requestId: {}, {}_ms: {:.3}",
                headers.get("x-request-id").map(String::as_str).unwrap_or("N.A."),
                kind,
                elapsed.as_secs_f64() * 1000.0
            );
        }
    }

    pub fn live(&self) -> serde_json::Value {
        serde_json::json!({ "status": "alive" })
    }

    /// Ready when every registered model reports healthy.
    pub async fn ready(&self) -> bool {
        for model in self.registry.models() {
            if !model.healthy().await {
                return false;
            }
        }
        true
    }

    pub async fn model_ready(&self, name: &str) -> Result<bool> {
        let model = self
            .registry
            .get(name)
            .ok_or_else(|| DataplaneError::ModelNotFound(name.to_string()))?;
        Ok(model.healthy().await)
    }

    pub fn metadata(&self) -> ServerMetadata {
        ServerMetadata {
            name: SERVER_NAME.to_string(),
            version: SERVER_VERSION.to_string(),
            extensions: vec!["model_repository_extension".to_string()],
        }
    }

    pub fn model_metadata(&self, name: &str) -> Result<ModelMetadata> {
        self.registry
            .get(name)
            .map(|model| model.metadata())
            .ok_or_else(|| DataplaneError::ModelNotFound(name.to_string()))
    }

    pub fn models(&self) -> Vec<String> {
        self.registry.list()
    }

    fn repository(&self) -> Result<&ModelRepository> {
        self.repository
            .as_ref()
            .ok_or_else(|| DataplaneError::Internal("model repository is not configured".to_string()))
    }

    pub async fn load_model(&self, name: &str) -> Result<()> {
        self.repository()?.load(name).await
    }

    pub async fn unload_model(&self, name: &str) -> Result<()> {
        self.repository()?.unload(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::echo::EchoModel;
    use crate::model::ReadyFlag;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts `load()` calls and only becomes ready when allowed to.
    struct CountingModel {
        loads: AtomicUsize,
        loadable: bool,
        ready: ReadyFlag,
    }

    impl CountingModel {
        fn new(loadable: bool) -> Self {
            Self {
                loads: AtomicUsize::new(0),
                loadable,
                ready: ReadyFlag::default(),
            }
        }
    }

    #[async_trait]
    impl Model for CountingModel {
        fn name(&self) -> &str {
            "counting"
        }

        fn ready(&self) -> bool {
            self.ready.get()
        }

        async fn load(&self) -> Result<bool> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.ready.set(self.loadable);
            Ok(self.loadable)
        }
    }

    fn dataplane_with(model: Arc<dyn Model>) -> DataPlane {
        let registry = Arc::new(ModelRegistry::new());
        registry.register(model);
        DataPlane::new(registry)
    }

    #[tokio::test]
    async fn test_missing_model_not_found() {
        let dp = DataPlane::new(Arc::new(ModelRegistry::new()));
        let err = dp
            .infer("nope", Payload::Json(json!({})), &Headers::new(), ReadinessPolicy::Strict)
            .await
            .unwrap_err();
        assert!(matches!(err, DataplaneError::ModelNotFound(_)));
    }

    #[tokio::test]
    async fn test_strict_policy_never_loads() {
        let model = Arc::new(CountingModel::new(true));
        let dp = dataplane_with(model.clone());
        let err = dp.get_model("counting", ReadinessPolicy::Strict).await.err().unwrap();
        assert!(matches!(err, DataplaneError::ModelNotReady(_)));
        assert_eq!(model.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_lazy_policy_loads_exactly_once() {
        let model = Arc::new(CountingModel::new(false));
        let dp = dataplane_with(model.clone());
        let err = dp.get_model("counting", ReadinessPolicy::LazyLoad).await.err().unwrap();
        assert!(matches!(err, DataplaneError::ModelNotReady(_)));
        assert_eq!(model.loads.load(Ordering::SeqCst), 1);

        let loadable = Arc::new(CountingModel::new(true));
        let dp = dataplane_with(loadable.clone());
        assert!(dp.get_model("counting", ReadinessPolicy::LazyLoad).await.is_ok());
        assert!(dp.get_model("counting", ReadinessPolicy::LazyLoad).await.is_ok());
        assert_eq!(loadable.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_capability() {
        let model = Arc::new(CountingModel::new(true));
        model.load().await.unwrap();
        let dp = dataplane_with(model);
        let err = dp
            .explain("counting", Payload::Json(json!({})), &Headers::new(), ReadinessPolicy::Strict)
            .await
            .unwrap_err();
        assert!(matches!(err, DataplaneError::UnsupportedCapability { .. }));
    }

    #[tokio::test]
    async fn test_infer_echo() {
        let model = Arc::new(EchoModel::new("echo"));
        model.load().await.unwrap();
        let dp = dataplane_with(model).with_latency_logging(true);
        let out = dp
            .infer("echo", Payload::Json(json!({"instances": [[1, 2]]})), &Headers::new(), ReadinessPolicy::Strict)
            .await
            .unwrap();
        assert!(matches!(out, Prediction::Json(v) if v == json!({"predictions": [[1, 2]]})));
        assert!(dp.ready().await);
        assert!(dp.model_ready("echo").await.unwrap());
        assert!(dp.model_ready("other").await.is_err());
    }

    #[tokio::test]
    async fn test_metadata() {
        let dp = dataplane_with(Arc::new(EchoModel::new("echo")));
        let meta = dp.metadata();
        assert_eq!(meta.extensions, vec!["model_repository_extension".to_string()]);
        assert_eq!(dp.model_metadata("echo").unwrap().name, "echo");
        assert!(dp.model_metadata("x").is_err());
        assert!(!dp.ready().await);
        assert!(matches!(dp.load_model("x").await, Err(DataplaneError::Internal(_))));
    }
}
