use std::collections::HashMap;
use std::io;

use crate::error::PipelineError;

/// Where workers load their input from.
pub trait SourceReader: Send + Sync {
    fn read(&self, path: &str) -> Result<String, PipelineError>;
}

/// Reads sources from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsReader;

impl SourceReader for FsReader {
    fn read(&self, path: &str) -> Result<String, PipelineError> {
        std::fs::read_to_string(path).map_err(|source| PipelineError::SourceReadFailure {
            path: path.to_string(),
            source,
        })
    }
}

/// Serves sources from memory. Used by the `demo` command.
#[derive(Debug, Default, Clone)]
pub struct MemoryReader {
    files: HashMap<String, String>,
}

impl MemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl SourceReader for MemoryReader {
    fn read(&self, path: &str) -> Result<String, PipelineError> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| PipelineError::SourceReadFailure {
                path: path.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such in-memory source"),
            })
    }
}
