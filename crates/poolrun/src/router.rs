//! # Version Router
//!
//! Maps version identifiers to their pools and picks a default for requests
//! that do not name one.
//!
//! A router is built once from a full enumeration of its source: every version
//! is fetched and compiled up front, and construction fails as a whole if any
//! step fails. After that the set of versions is fixed for the router's
//! lifetime. There is no global router; whoever builds one owns it and passes
//! it to request handling.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::instance::InstanceGuard;
use crate::pool::RandomStart;
use crate::pool::ScanStart;
use crate::pool::VersionPool;
use crate::runtime::ModuleRuntime;
use crate::source::BytecodeSource;

/// Capacity of each version's pool unless configured otherwise.
pub const DEFAULT_MAX_INSTANCES: usize = 10;

#[derive(Debug)]
pub enum Error {
    Source(crate::source::Error),
    Compile { version: String, error: crate::runtime::Error },
    DuplicateVersion(String),
    InvalidCapacity(usize),
    UnknownVersion(String),
    Pool(crate::pool::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source(e) => write!(f, "Version source error: {}", e),
            Self::Compile { version, error } => write!(f, "Failed to compile {}: {}", version, error),
            Self::DuplicateVersion(v) => write!(f, "Duplicate version: {}", v),
            Self::InvalidCapacity(n) => write!(f, "Invalid pool capacity: {}", n),
            Self::UnknownVersion(v) => write!(f, "Unknown version: {}", v),
            Self::Pool(e) => write!(f, "Pool error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<crate::source::Error> for Error {
    fn from(e: crate::source::Error) -> Self {
        Self::Source(e)
    }
}

impl From<crate::pool::Error> for Error {
    fn from(e: crate::pool::Error) -> Self {
        Self::Pool(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Routes requests to per-version pools.
pub struct VersionRouter<R: ModuleRuntime> {
    default_version: Arc<str>,
    versions: Vec<Arc<str>>,
    pools: HashMap<Arc<str>, VersionPool<R>>,
}

impl<R: ModuleRuntime> VersionRouter<R> {
    pub fn builder(runtime: Arc<R>, config: R::Config) -> RouterBuilder<R> {
        RouterBuilder::new(runtime, config)
    }

    /// The version served to requests that do not name one: the first one
    /// the source listed.
    pub fn default_version(&self) -> &str {
        &self.default_version
    }

    /// All versions, in the order the source listed them.
    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.versions.iter().map(|v| &**v)
    }

    pub fn pool(&self, version: &str) -> Option<&VersionPool<R>> {
        self.pools.get(version)
    }

    /// Acquires an instance of `version`, or of the default version when `None`.
    ///
    /// The returned guard must be held for as long as the instance is driven;
    /// releasing or dropping it hands the instance back to its pool.
    pub async fn route(
        &self,
        version: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<InstanceGuard<R::Instance>> {
        let version = version.unwrap_or(&self.default_version);
        let pool = self
            .pools
            .get(version)
            .ok_or_else(|| Error::UnknownVersion(version.to_string()))?;
        Ok(pool.acquire(cancel).await?)
    }
}

/// Fluent builder for a `VersionRouter`.
pub struct RouterBuilder<R: ModuleRuntime> {
    runtime: Arc<R>,
    config: Arc<R::Config>,
    max_instances: usize,
    scan: Arc<dyn ScanStart>,
}

impl<R: ModuleRuntime> RouterBuilder<R> {
    pub fn new(runtime: Arc<R>, config: R::Config) -> Self {
        Self {
            runtime,
            config: Arc::new(config),
            max_instances: DEFAULT_MAX_INSTANCES,
            scan: Arc::new(RandomStart),
        }
    }

    /// Capacity of every version's pool. Must be at least one.
    pub fn max_instances(mut self, max_instances: usize) -> Self {
        self.max_instances = max_instances;
        self
    }

    pub fn scan_start(mut self, scan: impl ScanStart) -> Self {
        self.scan = Arc::new(scan);
        self
    }

    /// Enumerates `source`, then fetches and compiles every version.
    ///
    /// Fails without a router if the source lists nothing, lists a version
    /// twice, or any fetch or compile fails.
    pub async fn build(self, source: &dyn BytecodeSource) -> Result<VersionRouter<R>> {
        if self.max_instances == 0 {
            return Err(Error::InvalidCapacity(self.max_instances));
        }

        let listed = source.list_versions().await?;
        if listed.is_empty() {
            return Err(Error::Source(crate::source::Error::NoVersions));
        }

        let mut versions = Vec::with_capacity(listed.len());
        let mut pools = HashMap::with_capacity(listed.len());

        for version in listed {
            let version: Arc<str> = version.into();
            if pools.contains_key(&version) {
                return Err(Error::DuplicateVersion(version.to_string()));
            }

            let bytes = source.fetch_bytecode(&version).await?;
            let module = self.runtime.compile(&bytes).map_err(|error| Error::Compile {
                version: version.to_string(),
                error,
            })?;
            tracing::info!(
                version = %version,
                bytes = bytes.len(),
                max_instances = self.max_instances,
                "compiled version"
            );

            let pool = VersionPool::new(
                Arc::clone(&version),
                Arc::clone(&self.runtime),
                module,
                Arc::clone(&self.config),
                self.max_instances,
            )
            .with_scan_start(Arc::clone(&self.scan));

            versions.push(Arc::clone(&version));
            pools.insert(version, pool);
        }

        Ok(VersionRouter {
            default_version: Arc::clone(&versions[0]),
            versions,
            pools,
        })
    }
}
