use super::Model;
use crate::error::{DataplaneError, Result};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// Per-process map of model name to model instance.
#[derive(Default)]
pub struct ModelRegistry {
    models: DashMap<String, Arc<dyn Model>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts by name. A model already registered under the name is replaced.
    pub fn register(&self, model: Arc<dyn Model>) {
        let name = model.name().to_string();
        if self.models.insert(name.clone(), model).is_some() {
            info!("Replaced registered model {}", name);
        } else {
            info!("Registered model {}", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Model>> {
        self.models.get(name).map(|entry| entry.value().clone())
    }

    pub fn is_ready(&self, name: &str) -> bool {
        self.get(name).map(|m| m.ready()).unwrap_or(false)
    }

    pub fn unload(&self, name: &str) -> Result<Arc<dyn Model>> {
        self.models
            .remove(name)
            .map(|(_, model)| model)
            .ok_or_else(|| DataplaneError::ModelNotFound(name.to_string()))
    }

    /// Registered names, in no particular order.
    pub fn list(&self) -> Vec<String> {
        self.models.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn models(&self) -> Vec<Arc<dyn Model>> {
        self.models.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
