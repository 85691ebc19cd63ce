//! In-process versions, mostly for embedding and tests.

use std::sync::Arc;

use crate::source::BytecodeSource;
use crate::source::Error;
use crate::source::Result;

/// Ordered list of versions held in memory. The first one added is listed first.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    versions: Vec<(String, Arc<[u8]>)>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(mut self, version: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        self.versions.push((version.into(), bytes.into()));
        self
    }
}

#[async_trait::async_trait]
impl BytecodeSource for MemorySource {
    async fn list_versions(&self) -> Result<Vec<String>> {
        Ok(self.versions.iter().map(|(v, _)| v.clone()).collect())
    }

    async fn fetch_bytecode(&self, version: &str) -> Result<Vec<u8>> {
        self.versions
            .iter()
            .find(|(v, _)| v == version)
            .map(|(_, bytes)| bytes.to_vec())
            .ok_or_else(|| Error::NotFound(version.to_string()))
    }
}
