// model-dataplane/src/lib.rs

pub mod api;
pub mod config;
pub mod dataplane;
pub mod error;
pub mod grpc;
pub mod metrics;
pub mod model;
pub mod openai;
pub mod server;
pub mod supervisor;
pub mod telemetry;
pub mod tensor;

// Public API exports
pub use config::{Config, ModelKind};
pub use dataplane::{DataPlane, ReadinessPolicy};
pub use error::{DataplaneError, Result};
pub use model::{Model, ModelRegistry};
pub use server::{build_router, run_server};
