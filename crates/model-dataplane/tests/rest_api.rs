mod common;

use axum::http::StatusCode;
use common::{get, post, post_json, router_with};
use model_dataplane::model::echo::EchoModel;
use model_dataplane::model::{Model, ModelFactory, ModelRegistry, ModelRepository};
use model_dataplane::{build_router, Config, DataPlane};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

async fn ready_echo(name: &str) -> Arc<dyn Model> {
    let model = Arc::new(EchoModel::new(name));
    model.load().await.unwrap();
    model
}

#[tokio::test]
async fn test_v1_predict_echoes_instances() {
    let (app, _) = router_with(vec![ready_echo("echo").await]);
    let reply = post_json(&app, "/v1/models/echo:predict", &json!({"instances": [[1, 2]]})).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.content_type(), "application/json; charset=UTF-8");
    assert_eq!(reply.json(), json!({"predictions": [[1, 2]]}));
}

#[tokio::test]
async fn test_v1_explain() {
    let (app, _) = router_with(vec![ready_echo("echo").await]);
    let reply = post_json(&app, "/v1/models/echo:explain", &json!({"inputs": [3]})).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json(), json!({"explanations": [3]}));
}

#[tokio::test]
async fn test_v1_bad_payloads() {
    let (app, _) = router_with(vec![ready_echo("echo").await]);

    let reply = post(&app, "/v1/models/echo:predict", "{not json").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(reply.json()["error"].as_str().unwrap().starts_with("Unrecognized request format"));

    let reply = post_json(&app, "/v1/models/echo:predict", &json!({"instances": 5})).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json(), json!({"error": "Expected \"instances\" to be a list"}));

    let reply = post_json(&app, "/v1/models/echo:train", &json!({"instances": []})).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_model_is_404() {
    let (app, _) = router_with(vec![]);
    let reply = post_json(&app, "/v1/models/missing:predict", &json!({"instances": []})).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.json(), json!({"error": "Model with name missing does not exist."}));

    let reply = get(&app, "/v2/models/missing").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_v2_strict_while_v1_lazy_loads() {
    let (app, _) = router_with(vec![Arc::new(EchoModel::new("cold"))]);
    let body = json!({
        "inputs": [{"name": "x", "shape": [1], "datatype": "INT32", "data": [7]}]
    });

    let reply = post_json(&app, "/v2/models/cold/infer", &body).await;
    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);

    let reply = get(&app, "/v2/models/cold/ready").await;
    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(reply.json(), json!({"name": "cold", "ready": false}));

    let reply = post_json(&app, "/v1/models/cold:predict", &json!({"instances": [1]})).await;
    assert_eq!(reply.status, StatusCode::OK);

    let reply = post_json(&app, "/v2/models/cold/infer", &body).await;
    assert_eq!(reply.status, StatusCode::OK);
}

#[tokio::test]
async fn test_v2_infer_flattens_nested_data() {
    let (app, _) = router_with(vec![ready_echo("echo").await]);
    let body = json!({
        "id": "req-42",
        "inputs": [{"name": "x", "shape": [2, 2], "datatype": "INT32", "data": [[1, 2], [3, 4]]}]
    });
    let reply = post_json(&app, "/v2/models/echo/infer", &body).await;
    assert_eq!(reply.status, StatusCode::OK);
    let out = reply.json();
    assert_eq!(out["id"], "req-42");
    assert_eq!(out["model_name"], "echo");
    assert_eq!(out["outputs"][0]["data"], json!([1, 2, 3, 4]));
    assert_eq!(out["outputs"][0]["shape"], json!([2, 2]));
}

#[tokio::test]
async fn test_v2_infer_generates_id_and_rejects_bad_shape() {
    let (app, _) = router_with(vec![ready_echo("echo").await]);
    let body = json!({
        "inputs": [{"name": "x", "shape": [2], "datatype": "BYTES", "data": ["a", "b"]}]
    });
    let reply = post_json(&app, "/v2/models/echo/infer", &body).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(!reply.json()["id"].as_str().unwrap().is_empty());
    assert_eq!(reply.json()["outputs"][0]["data"], json!(["a", "b"]));

    let bad = json!({
        "inputs": [{"name": "x", "shape": [3], "datatype": "INT32", "data": [1]}]
    });
    let reply = post_json(&app, "/v2/models/echo/infer", &bad).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_and_metadata_routes() {
    let (app, _) = router_with(vec![ready_echo("echo").await]);

    assert_eq!(get(&app, "/").await.json(), json!({"status": "alive"}));
    assert_eq!(get(&app, "/v2/health/live").await.json(), json!({"live": true}));
    assert_eq!(get(&app, "/v2/health/ready").await.json(), json!({"ready": true}));
    assert_eq!(get(&app, "/v1/models").await.json(), json!({"models": ["echo"]}));
    assert_eq!(get(&app, "/v1/models/echo").await.json(), json!({"name": "echo", "ready": true}));
    assert_eq!(
        get(&app, "/v2/models/echo/ready").await.json(),
        json!({"name": "echo", "ready": true})
    );

    let server = get(&app, "/v2").await.json();
    assert_eq!(server["name"], "model-dataplane");
    assert_eq!(server["extensions"], json!(["model_repository_extension"]));

    let model = get(&app, "/v2/models/echo").await.json();
    assert_eq!(model["name"], "echo");
    assert_eq!(model["platform"], "");

    let reply = get(&app, "/no/such/route").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert!(reply.json()["error"].is_string());

    assert_eq!(get(&app, "/metrics").await.status, StatusCode::OK);
}

#[tokio::test]
async fn test_v1_model_not_ready_is_503() {
    let (app, _) = router_with(vec![Arc::new(EchoModel::new("cold"))]);
    let reply = get(&app, "/v1/models/cold").await;
    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(get(&app, "/v2/health/ready").await.json(), json!({"ready": false}));
}

#[tokio::test]
async fn test_repository_load_and_unload() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("iris")).unwrap();

    let registry = Arc::new(ModelRegistry::new());
    let factory: Arc<dyn ModelFactory> =
        Arc::new(|name: &str, _path: &Path| -> anyhow::Result<Arc<dyn Model>> { Ok(Arc::new(EchoModel::new(name))) });
    let repository = ModelRepository::new(dir.path(), factory, registry.clone());
    let dataplane = Arc::new(DataPlane::new(registry).with_repository(repository));
    let app = build_router(dataplane, &Config::default());

    let reply = post(&app, "/v2/repository/models/iris/load", "").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json(), json!({"name": "iris", "load": true}));

    let reply = post_json(&app, "/v1/models/iris:predict", &json!({"instances": [1]})).await;
    assert_eq!(reply.status, StatusCode::OK);

    let reply = post(&app, "/v2/repository/models/iris/unload", "").await;
    assert_eq!(reply.json(), json!({"name": "iris", "unload": true}));

    let reply = post(&app, "/v2/repository/models/iris/unload", "").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);

    let reply = post(&app, "/v2/repository/models/absent/load", "").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}
