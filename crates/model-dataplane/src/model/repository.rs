//! Model repository extension: load and unload models by name from a local
//! models directory.

use super::{Model, ModelRegistry};
use crate::error::{DataplaneError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Builds a model instance for a resolved local path.
pub trait ModelFactory: Send + Sync {
    fn create(&self, name: &str, path: &Path) -> anyhow::Result<Arc<dyn Model>>;
}

impl<F> ModelFactory for F
where
    F: Fn(&str, &Path) -> anyhow::Result<Arc<dyn Model>> + Send + Sync,
{
    fn create(&self, name: &str, path: &Path) -> anyhow::Result<Arc<dyn Model>> {
        self(name, path)
    }
}

pub struct ModelRepository {
    models_dir: PathBuf,
    factory: Arc<dyn ModelFactory>,
    registry: Arc<ModelRegistry>,
}

impl ModelRepository {
    pub fn new(models_dir: impl Into<PathBuf>, factory: Arc<dyn ModelFactory>, registry: Arc<ModelRegistry>) -> Self {
        Self {
            models_dir: models_dir.into(),
            factory,
            registry,
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains('/') || name.contains("..") {
            return Err(DataplaneError::invalid_input(format!("invalid model name '{}'", name)));
        }
        let path = self.models_dir.join(name);
        if !path.exists() {
            return Err(DataplaneError::ModelNotFound(name.to_string()));
        }
        Ok(path)
    }

    /// Builds, loads and registers `name`. Replaces any model already registered.
    pub async fn load(&self, name: &str) -> Result<()> {
        let path = self.resolve(name)?;
        let model = self.factory.create(name, &path)?;
        if !model.load().await? {
            return Err(DataplaneError::ModelNotReady(name.to_string()));
        }
        self.registry.register(model);
        info!("Loaded model {} from {}", name, path.display());
        Ok(())
    }

    pub async fn unload(&self, name: &str) -> Result<()> {
        let model = self.registry.unload(name)?;
        model.stop().await;
        info!("Unloaded model {}", name);
        Ok(())
    }
}
