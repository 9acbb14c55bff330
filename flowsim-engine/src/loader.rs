//! File loading seam
//!
//! Parsing is a collaborator concern; the engine only needs something that
//! turns a path into a `FileDecl`. Embedders plug in the real parser; the
//! in-memory loader backs tests and programmatic models.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::ast::FileDecl;
use crate::error::{EngineError, EngineResult};

/// Resolves a path to a parsed file declaration
pub trait FileLoader: Send + Sync {
    fn load(&self, path: &str) -> EngineResult<FileDecl>;
}

/// Loader over a fixed set of in-memory declarations
#[derive(Default)]
pub struct StaticLoader {
    files: RwLock<HashMap<String, FileDecl>>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a declaration under its path
    pub fn insert(&self, file: FileDecl) {
        self.files.write().insert(file.path.clone(), file);
    }
}

impl FileLoader for StaticLoader {
    fn load(&self, path: &str) -> EngineResult<FileDecl> {
        self.files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("file {}", path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_loader_round_trip() {
        let loader = StaticLoader::new();
        loader.insert(FileDecl::new("models/demo.fsim"));
        assert!(loader.load("models/demo.fsim").is_ok());
        assert!(matches!(
            loader.load("models/other.fsim"),
            Err(EngineError::NotFound(_))
        ));
    }
}
