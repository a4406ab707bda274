//! Model that forwards predict/explain to a remote runtime over REST.

use super::{Explainer, Headers, Model, Payload, Prediction, Predictor, ReadyFlag};
use crate::error::{DataplaneError, Result, UpstreamError};
use crate::tensor::rest;
use async_trait::async_trait;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

const FORWARDED_HEADERS: [&str; 2] = ["x-request-id", "x-b3-traceid"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteProtocol {
    V1,
    V2,
}

impl FromStr for RemoteProtocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "v1" => Ok(Self::V1),
            "v2" => Ok(Self::V2),
            other => Err(anyhow::anyhow!("unknown predictor protocol '{}'", other)),
        }
    }
}

#[derive(Clone, Copy)]
enum Verb {
    Predict,
    Explain,
}

pub struct RemoteModel {
    name: String,
    host: String,
    protocol: RemoteProtocol,
    http_client: reqwest::Client,
    ready: ReadyFlag,
}

impl RemoteModel {
    pub fn new(name: &str, host: &str, protocol: RemoteProtocol, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            host: host.trim_end_matches('/').to_string(),
            protocol,
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            ready: ReadyFlag::default(),
        }
    }

    fn base_url(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            self.host.clone()
        } else {
            format!("http://{}", self.host)
        }
    }

    fn url(&self, protocol: RemoteProtocol, verb: Verb) -> String {
        match (protocol, verb) {
            (RemoteProtocol::V1, Verb::Predict) => format!("{}/v1/models/{}:predict", self.base_url(), self.name),
            (RemoteProtocol::V1, Verb::Explain) => format!("{}/v1/models/{}:explain", self.base_url(), self.name),
            (RemoteProtocol::V2, Verb::Predict) => format!("{}/v2/models/{}/infer", self.base_url(), self.name),
            (RemoteProtocol::V2, Verb::Explain) => format!("{}/v2/models/{}/explain", self.base_url(), self.name),
        }
    }

    async fn post(&self, url: &str, body: &Value, headers: &Headers) -> Result<Vec<u8>> {
        debug!("Forwarding request for {} to {}", self.name, url);
        let mut request = self.http_client.post(url).json(body);
        for key in FORWARDED_HEADERS {
            if let Some(value) = headers.get(key) {
                request = request.header(key, value);
            }
        }
        let response = request
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(&e))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::from_reqwest(&e))?;
        if !status.is_success() {
            return Err(UpstreamError::from_status(status.as_u16(), &String::from_utf8_lossy(&bytes)).into());
        }
        Ok(bytes.to_vec())
    }

    async fn forward(&self, payload: Payload, headers: &Headers, verb: Verb) -> Result<Prediction> {
        match payload {
            Payload::Json(body) => {
                let raw = self.post(&self.url(self.protocol, verb), &body, headers).await?;
                let value: Value = serde_json::from_slice(&raw).map_err(|e| {
                    DataplaneError::from(UpstreamError::InvalidResponse(e.to_string()))
                })?;
                Ok(Prediction::Json(value))
            }
            Payload::Infer(request) => {
                let body = serde_json::to_value(rest::encode_request(&request)?)?;
                let raw = self.post(&self.url(RemoteProtocol::V2, verb), &body, headers).await?;
                Ok(Prediction::Infer(rest::decode_response(&raw)?))
            }
        }
    }
}

#[async_trait]
impl Model for RemoteModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn ready(&self) -> bool {
        self.ready.get()
    }

    async fn load(&self) -> Result<bool> {
        self.ready.set(true);
        Ok(true)
    }

    async fn stop(&self) {
        self.ready.set(false);
    }

    fn predictor_host(&self) -> Option<&str> {
        Some(&self.host)
    }

    fn as_predictor(&self) -> Option<&dyn Predictor> {
        Some(self)
    }

    fn as_explainer(&self) -> Option<&dyn Explainer> {
        Some(self)
    }
}

#[async_trait]
impl Predictor for RemoteModel {
    async fn predict(&self, payload: Payload, headers: &Headers) -> Result<Prediction> {
        self.forward(payload, headers, Verb::Predict).await
    }
}

#[async_trait]
impl Explainer for RemoteModel {
    async fn explain(&self, payload: Payload, headers: &Headers) -> Result<Prediction> {
        self.forward(payload, headers, Verb::Explain).await
    }
}
