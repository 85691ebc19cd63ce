//! Versions stored as files in one directory, selected by a glob pattern.

use std::path::Path;
use std::path::PathBuf;

use crate::source::BytecodeSource;
use crate::source::Error;
use crate::source::Result;

/// Each file in `dir` matching `pattern` is one version, named by its file name.
#[derive(Clone, Debug)]
pub struct FsSource {
    dir: PathBuf,
    pattern: String,
}

impl FsSource {
    pub fn new(dir: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            pattern: pattern.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Blocking directory walk; run it off the async workers.
    fn list(&self) -> Result<Vec<String>> {
        let dir = self
            .dir
            .to_str()
            .ok_or_else(|| Error::Glob(format!("non UTF-8 directory: {}", self.dir.display())))?;
        // Only the pattern part is a glob; the directory is matched literally.
        let pattern = Path::new(&glob::Pattern::escape(dir)).join(&self.pattern);
        let pattern = pattern
            .to_str()
            .ok_or_else(|| Error::Glob(format!("non UTF-8 pattern: {}", pattern.display())))?;

        let paths = glob::glob(pattern).map_err(|e| Error::Glob(e.to_string()))?;

        let mut versions = Vec::new();
        for entry in paths {
            let path = entry.map_err(|e| Error::Io {
                path: e.path().to_path_buf(),
                error: e.into(),
            })?;
            if !path.is_file() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                versions.push(name.to_string());
            }
        }
        Ok(versions)
    }
}

/// A version must name a file directly inside the source directory.
fn is_plain_file_name(version: &str) -> bool {
    !version.is_empty()
        && version != "."
        && version != ".."
        && !version.contains(['/', '\\'])
}

#[async_trait::async_trait]
impl BytecodeSource for FsSource {
    async fn list_versions(&self) -> Result<Vec<String>> {
        let source = self.clone();
        tokio::task::spawn_blocking(move || source.list()).await?
    }

    async fn fetch_bytecode(&self, version: &str) -> Result<Vec<u8>> {
        if !is_plain_file_name(version) {
            return Err(Error::NotFound(version.to_string()));
        }

        let path = self.dir.join(version);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(version.to_string()))
            }
            Err(error) => Err(Error::Io { path, error }),
        }
    }
}
