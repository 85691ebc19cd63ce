//! # Bytecode Source
//!
//! Where versions come from. A source enumerates version identifiers and
//! supplies the raw bytecode for each one.
//!
//! ## Contract
//!
//! - `list_versions` re-queries the backing store on every call. Order matters:
//!   the first identifier becomes the router's default version.
//! - `fetch_bytecode` works even if `list_versions` was never called.

pub mod fs;
pub mod github;
pub mod memory;
pub mod url;

pub use fs::FsSource;
pub use github::GithubReleaseSource;
pub use memory::MemorySource;
pub use self::url::UrlSource;

#[cfg(test)]
mod mock_http;

use std::path::PathBuf;

#[derive(Debug)]
pub enum Error {
    Io { path: PathBuf, error: std::io::Error },
    Glob(String),
    /// A blocking listing task panicked or was cancelled.
    Task(tokio::task::JoinError),
    Http(reqwest::Error),
    Status { status: u16, url: String },
    InvalidUrl(String),
    /// The source does not know this version.
    NotFound(String),
    /// Enumeration succeeded but reported nothing to serve.
    NoVersions,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, error } => write!(f, "I/O error on {}: {}", path.display(), error),
            Self::Glob(msg) => write!(f, "Glob error: {}", msg),
            Self::Task(e) => write!(f, "Listing task failed: {}", e),
            Self::Http(e) => write!(f, "HTTP error: {}", e),
            Self::Status { status, url } => write!(f, "HTTP {} for URL: {}", status, url),
            Self::InvalidUrl(msg) => write!(f, "Invalid URL: {}", msg),
            Self::NotFound(version) => write!(f, "Version not found: {}", version),
            Self::NoVersions => write!(f, "No versions found"),
        }
    }
}

impl std::error::Error for Error {}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Enumerates versions and supplies their bytecode.
///
/// This trait is designed to be object-safe (`Arc<dyn BytecodeSource>`).
#[async_trait::async_trait]
pub trait BytecodeSource: Send + Sync {
    /// Lists available versions, freshly queried, in preference order.
    async fn list_versions(&self) -> Result<Vec<String>>;

    /// Returns the raw bytecode of `version`.
    async fn fetch_bytecode(&self, version: &str) -> Result<Vec<u8>>;
}
