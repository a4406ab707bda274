use super::{validate_v1, Explainer, Headers, Model, Payload, Prediction, Predictor, ReadyFlag};
use crate::error::Result;
use crate::tensor::{InferRequest, InferResponse};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

/// Returns its inputs unchanged. Used as the default startup model.
pub struct EchoModel {
    name: String,
    ready: ReadyFlag,
}

impl EchoModel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ready: ReadyFlag::default(),
        }
    }

    fn echo(&self, payload: Payload, key: &str) -> Result<Prediction> {
        match payload {
            Payload::Json(body) => {
                validate_v1(&body)?;
                let values = body
                    .get("instances")
                    .or_else(|| body.get("inputs"))
                    .cloned()
                    .unwrap_or(Value::Array(Vec::new()));
                Ok(Prediction::Json(json!({ key: values })))
            }
            Payload::Infer(request) => Ok(Prediction::Infer(self.echo_tensors(request))),
        }
    }

    fn echo_tensors(&self, request: InferRequest) -> InferResponse {
        InferResponse {
            id: request.id,
            model_name: self.name.clone(),
            model_version: None,
            parameters: Default::default(),
            outputs: request.inputs,
        }
    }
}

#[async_trait]
impl Model for EchoModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn ready(&self) -> bool {
        self.ready.get()
    }

    async fn load(&self) -> Result<bool> {
        debug!("Loading echo model {}", self.name);
        self.ready.set(true);
        Ok(true)
    }

    async fn stop(&self) {
        self.ready.set(false);
    }

    fn as_predictor(&self) -> Option<&dyn Predictor> {
        Some(self)
    }

    fn as_explainer(&self) -> Option<&dyn Explainer> {
        Some(self)
    }
}

#[async_trait]
impl Predictor for EchoModel {
    async fn predict(&self, payload: Payload, _headers: &Headers) -> Result<Prediction> {
        self.echo(payload, "predictions")
    }
}

#[async_trait]
impl Explainer for EchoModel {
    async fn explain(&self, payload: Payload, _headers: &Headers) -> Result<Prediction> {
        self.echo(payload, "explanations")
    }
}
