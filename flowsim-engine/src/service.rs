//! Transport-agnostic service facade
//!
//! The operations a transport layer (gRPC, HTTP, CLI) would expose. The
//! facade owns the canvas registry plus the collaborators every canvas
//! shares: the runtime, the strategy registry, and the file loader.

use std::sync::Arc;

use dashmap::DashMap;

use flowsim_components::BehaviorRegistry;

use crate::canvas::Canvas;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::loader::FileLoader;
use crate::runtime::Runtime;
use crate::strategy::StrategyRegistry;

/// Canvas registry and entry point for embedders
pub struct EngineService {
    config: EngineConfig,
    runtime: Arc<Runtime>,
    strategies: Arc<StrategyRegistry>,
    loader: Arc<dyn FileLoader>,
    canvases: DashMap<String, Arc<Canvas>>,
}

impl EngineService {
    pub fn new(config: EngineConfig, loader: Arc<dyn FileLoader>) -> Self {
        let registry = Arc::new(BehaviorRegistry::with_builtins());
        Self {
            config,
            runtime: Arc::new(Runtime::new(registry)),
            strategies: Arc::new(StrategyRegistry::with_defaults()),
            loader,
            canvases: DashMap::new(),
        }
    }

    /// The shared runtime evaluator
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// The shared strategy registry
    pub fn strategies(&self) -> &Arc<StrategyRegistry> {
        &self.strategies
    }

    /// Create a canvas under the given id
    pub fn create_canvas(&self, id: &str) -> EngineResult<Arc<Canvas>> {
        if id.is_empty() {
            return Err(EngineError::InvalidArgument(
                "canvas id must not be empty".to_string(),
            ));
        }
        if self.canvases.contains_key(id) {
            return Err(EngineError::AlreadyExists(format!("canvas {}", id)));
        }
        let canvas = Arc::new(Canvas::new(
            id,
            self.config.clone(),
            self.runtime.clone(),
            self.loader.clone(),
            self.strategies.clone(),
        ));
        self.canvases.insert(id.to_string(), canvas.clone());
        Ok(canvas)
    }

    /// Look up a canvas
    pub fn get_canvas(&self, id: &str) -> EngineResult<Arc<Canvas>> {
        self.canvases
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::NotFound(format!("canvas {}", id)))
    }

    /// All canvas ids, sorted
    pub fn list_canvases(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.canvases.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Tear down a canvas: stop its generators and metric workers, release
    /// its store, and drop it from the registry.
    pub async fn delete_canvas(&self, id: &str) -> EngineResult<()> {
        let (_, canvas) = self
            .canvases
            .remove(id)
            .ok_or_else(|| EngineError::NotFound(format!("canvas {}", id)))?;
        canvas.close().await;
        Ok(())
    }

    /// Reset a canvas in place
    pub async fn reset_canvas(&self, id: &str) -> EngineResult<()> {
        self.get_canvas(id)?.reset().await
    }

    /// Load a file into a canvas
    pub async fn load_file(&self, canvas_id: &str, path: &str) -> EngineResult<()> {
        self.get_canvas(canvas_id)?.load(path).await
    }

    /// Activate a system on a canvas
    pub async fn use_system(&self, canvas_id: &str, system: &str) -> EngineResult<()> {
        self.get_canvas(canvas_id)?.use_system(system).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::StaticLoader;

    fn service() -> EngineService {
        EngineService::new(EngineConfig::for_tests(), Arc::new(StaticLoader::new()))
    }

    #[test]
    fn test_create_requires_non_empty_id() {
        let s = service();
        assert!(matches!(
            s.create_canvas(""),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_duplicate_canvas_rejected() {
        let s = service();
        s.create_canvas("main").unwrap();
        assert!(matches!(
            s.create_canvas("main"),
            Err(EngineError::AlreadyExists(_))
        ));
        assert_eq!(s.list_canvases(), vec!["main"]);
    }

    #[tokio::test]
    async fn test_delete_canvas() {
        let s = service();
        s.create_canvas("main").unwrap();
        s.delete_canvas("main").await.unwrap();
        assert!(matches!(
            s.get_canvas("main"),
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            s.delete_canvas("main").await,
            Err(EngineError::NotFound(_))
        ));
    }
}
