//! `inference.GRPCInferenceService` over the dataplane.

use crate::dataplane::{DataPlane, ReadinessPolicy};
use crate::error::{DataplaneError, UpstreamError};
use crate::model::{Headers, Payload, Prediction};
use crate::tensor::codec;
use std::sync::Arc;
use tonic::{metadata::MetadataMap, Request, Response, Status};
use tracing::{debug, error};

pub mod inference {
    tonic::include_proto!("inference");
}

use inference::grpc_inference_service_server::GrpcInferenceService;
pub use inference::grpc_inference_service_server::GrpcInferenceServiceServer;
use inference::{
    model_metadata_response::TensorMetadata, ModelInferRequest, ModelInferResponse, ModelMetadataRequest,
    ModelMetadataResponse, ModelReadyRequest, ModelReadyResponse, RepositoryModelLoadRequest,
    RepositoryModelLoadResponse, RepositoryModelUnloadRequest, RepositoryModelUnloadResponse,
    ServerLiveRequest, ServerLiveResponse, ServerMetadataRequest, ServerMetadataResponse, ServerReadyRequest,
    ServerReadyResponse,
};

/// Dataplane errors as gRPC status codes.
pub fn to_status(err: DataplaneError) -> Status {
    let message = err.to_string();
    match &err {
        DataplaneError::ModelNotFound(_) => Status::not_found(message),
        DataplaneError::ModelNotReady(_) => Status::unavailable(message),
        DataplaneError::UnsupportedCapability { .. } => Status::unimplemented(message),
        DataplaneError::InvalidInput(_) => Status::invalid_argument(message),
        DataplaneError::Upstream(UpstreamError::Timeout(_)) => Status::deadline_exceeded(message),
        DataplaneError::Upstream(UpstreamError::Request(_)) => Status::internal(message),
        DataplaneError::Upstream(_) => Status::unavailable(message),
        DataplaneError::Internal(_) => {
            error!("gRPC request failed: {}", message);
            Status::internal(message)
        }
    }
}

fn metadata_headers(metadata: &MetadataMap) -> Headers {
    metadata
        .clone()
        .into_headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_ascii_lowercase(), v.to_string())))
        .collect()
}

#[derive(Clone)]
pub struct InferenceService {
    dataplane: Arc<DataPlane>,
}

impl InferenceService {
    pub fn new(dataplane: Arc<DataPlane>) -> Self {
        Self { dataplane }
    }

    pub fn into_server(self) -> GrpcInferenceServiceServer<Self> {
        GrpcInferenceServiceServer::new(self)
    }
}

fn observe<T>(rpc: &str, result: Result<Response<T>, Status>) -> Result<Response<T>, Status> {
    let code = match &result {
        Ok(_) => "OK".to_string(),
        Err(status) => format!("{:?}", status.code()),
    };
    crate::metrics::inc_request(rpc, &code);
    result
}

#[tonic::async_trait]
impl GrpcInferenceService for InferenceService {
    async fn server_live(&self, _request: Request<ServerLiveRequest>) -> Result<Response<ServerLiveResponse>, Status> {
        observe("grpc.ServerLive", Ok(Response::new(ServerLiveResponse { live: true })))
    }

    async fn server_ready(&self, _request: Request<ServerReadyRequest>) -> Result<Response<ServerReadyResponse>, Status> {
        let ready = self.dataplane.ready().await;
        observe("grpc.ServerReady", Ok(Response::new(ServerReadyResponse { ready })))
    }

    async fn model_ready(&self, request: Request<ModelReadyRequest>) -> Result<Response<ModelReadyResponse>, Status> {
        let name = request.into_inner().name;
        let result = self
            .dataplane
            .model_ready(&name)
            .await
            .map(|ready| Response::new(ModelReadyResponse { ready }))
            .map_err(to_status);
        observe("grpc.ModelReady", result)
    }

    async fn server_metadata(
        &self,
        _request: Request<ServerMetadataRequest>,
    ) -> Result<Response<ServerMetadataResponse>, Status> {
        let meta = self.dataplane.metadata();
        observe(
            "grpc.ServerMetadata",
            Ok(Response::new(ServerMetadataResponse {
                name: meta.name,
                version: meta.version,
                extensions: meta.extensions,
            })),
        )
    }

    async fn model_metadata(
        &self,
        request: Request<ModelMetadataRequest>,
    ) -> Result<Response<ModelMetadataResponse>, Status> {
        let name = request.into_inner().name;
        let result = self
            .dataplane
            .model_metadata(&name)
            .map(|meta| {
                let tensors = |specs: Vec<crate::tensor::TensorSpec>| {
                    specs
                        .into_iter()
                        .map(|s| TensorMetadata {
                            name: s.name,
                            datatype: s.datatype,
                            shape: s.shape,
                        })
                        .collect()
                };
                Response::new(ModelMetadataResponse {
                    name: meta.name,
                    versions: meta.versions,
                    platform: meta.platform,
                    inputs: tensors(meta.inputs),
                    outputs: tensors(meta.outputs),
                })
            })
            .map_err(to_status);
        observe("grpc.ModelMetadata", result)
    }

    async fn model_infer(&self, request: Request<ModelInferRequest>) -> Result<Response<ModelInferResponse>, Status> {
        let headers = metadata_headers(request.metadata());
        let result = async {
            let request = codec::decode_infer_request(request.into_inner())?;
            let name = request.model_name.clone();
            let prefer_raw = request.prefer_raw;
            let request_id = request.id.clone();
            debug!("gRPC infer for {} (raw={})", name, prefer_raw);
            let prediction = self
                .dataplane
                .infer(&name, Payload::Infer(request), &headers, ReadinessPolicy::Strict)
                .await?;
            match prediction {
                Prediction::Infer(mut response) => {
                    if response.id.is_none() {
                        response.id = request_id;
                    }
                    Ok(Response::new(codec::encode_infer_response(response, prefer_raw)))
                }
                Prediction::Json(_) => Err(DataplaneError::Internal(format!(
                    "model {} returned a non-tensor response",
                    name
                ))),
            }
        }
        .await
        .map_err(to_status);
        observe("grpc.ModelInfer", result)
    }

    async fn repository_model_load(
        &self,
        request: Request<RepositoryModelLoadRequest>,
    ) -> Result<Response<RepositoryModelLoadResponse>, Status> {
        let model_name = request.into_inner().model_name;
        let result = self
            .dataplane
            .load_model(&model_name)
            .await
            .map(|()| {
                Response::new(RepositoryModelLoadResponse {
                    model_name: model_name.clone(),
                    is_loaded: true,
                })
            })
            .map_err(to_status);
        observe("grpc.RepositoryModelLoad", result)
    }

    async fn repository_model_unload(
        &self,
        request: Request<RepositoryModelUnloadRequest>,
    ) -> Result<Response<RepositoryModelUnloadResponse>, Status> {
        let model_name = request.into_inner().model_name;
        let result = self
            .dataplane
            .unload_model(&model_name)
            .await
            .map(|()| {
                Response::new(RepositoryModelUnloadResponse {
                    model_name: model_name.clone(),
                    is_unloaded: true,
                })
            })
            .map_err(to_status);
        observe("grpc.RepositoryModelUnload", result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::echo::EchoModel;
    use crate::model::{Model, ModelRegistry};
    use inference::{infer_parameter::ParameterChoice, model_infer_request::InferInputTensor, InferTensorContents};

    async fn service() -> InferenceService {
        let registry = Arc::new(ModelRegistry::new());
        let model = Arc::new(EchoModel::new("echo"));
        model.load().await.unwrap();
        registry.register(model);
        registry.register(Arc::new(EchoModel::new("cold")));
        InferenceService::new(Arc::new(DataPlane::new(registry)))
    }

    fn fp32_input(values: Vec<f32>) -> InferInputTensor {
        InferInputTensor {
            name: "x".into(),
            datatype: "FP32".into(),
            shape: vec![values.len() as i64],
            parameters: Default::default(),
            contents: Some(InferTensorContents {
                fp32_contents: values,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(to_status(DataplaneError::ModelNotFound("m".into())).code(), tonic::Code::NotFound);
        assert_eq!(to_status(DataplaneError::ModelNotReady("m".into())).code(), tonic::Code::Unavailable);
        assert_eq!(to_status(DataplaneError::unsupported("m", "explain")).code(), tonic::Code::Unimplemented);
        assert_eq!(to_status(DataplaneError::invalid_input("bad")).code(), tonic::Code::InvalidArgument);
        assert_eq!(
            to_status(UpstreamError::Timeout("slow".into()).into()).code(),
            tonic::Code::DeadlineExceeded
        );
    }

    #[tokio::test]
    async fn test_model_infer_structured() {
        let svc = service().await;
        let request = ModelInferRequest {
            model_name: "echo".into(),
            id: "req-1".into(),
            inputs: vec![fp32_input(vec![1.0, 2.0])],
            ..Default::default()
        };
        let reply = svc.model_infer(Request::new(request)).await.unwrap().into_inner();
        assert_eq!(reply.id, "req-1");
        assert!(reply.raw_output_contents.is_empty());
        let contents = reply.outputs[0].contents.as_ref().unwrap();
        assert_eq!(contents.fp32_contents, vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_model_infer_raw_is_mirrored() {
        let svc = service().await;
        let mut input = fp32_input(vec![]);
        input.shape = vec![2];
        input.contents = None;
        let raw: Vec<u8> = [1.5f32, -2.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let request = ModelInferRequest {
            model_name: "echo".into(),
            inputs: vec![input],
            raw_input_contents: vec![raw.clone()],
            ..Default::default()
        };
        let reply = svc.model_infer(Request::new(request)).await.unwrap().into_inner();
        assert_eq!(reply.raw_output_contents, vec![raw]);
        assert!(reply.outputs[0].contents.is_none());
        let size = reply.outputs[0].parameters.get("binary_data_size").unwrap();
        assert_eq!(size.parameter_choice, Some(ParameterChoice::Int64Param(8)));
    }

    #[tokio::test]
    async fn test_model_infer_errors() {
        let svc = service().await;
        let missing = ModelInferRequest {
            model_name: "nope".into(),
            ..Default::default()
        };
        let status = svc.model_infer(Request::new(missing)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);

        let cold = ModelInferRequest {
            model_name: "cold".into(),
            inputs: vec![fp32_input(vec![1.0])],
            ..Default::default()
        };
        let status = svc.model_infer(Request::new(cold)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }

    #[tokio::test]
    async fn test_health_and_metadata() {
        let svc = service().await;
        assert!(svc.server_live(Request::new(ServerLiveRequest {})).await.unwrap().into_inner().live);
        assert!(!svc.server_ready(Request::new(ServerReadyRequest {})).await.unwrap().into_inner().ready);
        let ready = svc
            .model_ready(Request::new(ModelReadyRequest { name: "echo".into(), version: String::new() }))
            .await
            .unwrap()
            .into_inner();
        assert!(ready.ready);
        let meta = svc
            .server_metadata(Request::new(ServerMetadataRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(meta.extensions, vec!["model_repository_extension".to_string()]);
        let status = svc
            .repository_model_load(Request::new(RepositoryModelLoadRequest {
                repository_name: String::new(),
                model_name: "x".into(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Internal);
    }
}
