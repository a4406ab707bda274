//! Model capability traits.
//!
//! A model is registered as `Arc<dyn Model>` and declares which capability
//! interfaces it implements through the `as_*` accessors. Bindings check
//! the accessor instead of probing for methods.

pub mod echo;
pub mod registry;
pub mod remote;
pub mod repository;

use crate::error::Result;
use crate::openai::{OpenAIEncoderModel, OpenAIGenerativeModel};
use crate::tensor::{InferRequest, InferResponse, TensorSpec};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

pub use registry::ModelRegistry;
pub use repository::{ModelFactory, ModelRepository};

/// Request headers forwarded to a model, keys lower-cased.
pub type Headers = HashMap<String, String>;

/// Body handed to `predict`/`explain`: v1 JSON or a decoded v2 request.
#[derive(Debug, Clone)]
pub enum Payload {
    Json(Value),
    Infer(InferRequest),
}

#[derive(Debug, Clone)]
pub enum Prediction {
    Json(Value),
    Infer(InferResponse),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelMetadata {
    pub name: String,
    pub versions: Vec<String>,
    pub platform: String,
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
}

impl ModelMetadata {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            versions: Vec::new(),
            platform: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

#[async_trait]
pub trait Model: Send + Sync {
    fn name(&self) -> &str;

    fn ready(&self) -> bool;

    /// Idempotent. Sets `ready` on success.
    async fn load(&self) -> Result<bool>;

    async fn stop(&self) {}

    /// Remote runtime host when requests are proxied rather than run here.
    fn predictor_host(&self) -> Option<&str> {
        None
    }

    async fn healthy(&self) -> bool {
        self.ready()
    }

    fn metadata(&self) -> ModelMetadata {
        ModelMetadata::named(self.name())
    }

    fn as_predictor(&self) -> Option<&dyn Predictor> {
        None
    }

    fn as_explainer(&self) -> Option<&dyn Explainer> {
        None
    }

    fn as_generative(&self) -> Option<&dyn OpenAIGenerativeModel> {
        None
    }

    fn as_encoder(&self) -> Option<&dyn OpenAIEncoderModel> {
        None
    }
}

#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, payload: Payload, headers: &Headers) -> Result<Prediction>;
}

#[async_trait]
pub trait Explainer: Send + Sync {
    async fn explain(&self, payload: Payload, headers: &Headers) -> Result<Prediction>;
}

/// Ready flag shared by the bundled models.
#[derive(Debug, Default)]
pub struct ReadyFlag(AtomicBool);

impl ReadyFlag {
    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, ready: bool) {
        self.0.store(ready, Ordering::Release);
    }
}

/// v1 payload check: `instances` or `inputs` must be a list when present.
pub fn validate_v1(body: &Value) -> Result<()> {
    use crate::error::DataplaneError;
    for key in ["instances", "inputs"] {
        if let Some(value) = body.get(key) {
            if !value.is_array() {
                return Err(DataplaneError::invalid_input(format!(
                    "Expected \"{}\" to be a list",
                    key
                )));
            }
        }
    }
    if !body.is_object() {
        return Err(DataplaneError::invalid_input(
            "Unrecognized request format: expected a JSON object",
        ));
    }
    Ok(())
}
