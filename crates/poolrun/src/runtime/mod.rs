//! # Module Runtime
//!
//! The contract between the pool and whatever turns bytecode into live,
//! stateful execution contexts. A runtime compiles raw bytes into an immutable
//! module once per version, then instantiates that module as many times as
//! the pool needs.
//!
//! Instances are not assumed to be thread-safe or reentrant: the pool hands
//! each one to a single holder at a time.

pub mod engine;

pub use engine::WasmInstance;
pub use engine::WasmRuntime;

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub enum Error {
    Engine(wasmtime::Error),
    Compile(wasmtime::Error),
    Instantiate(wasmtime::Error),
    /// The cancellation token fired before the instance was ready.
    Cancelled,
    Call(wasmtime::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Engine(e) => write!(f, "Engine error: {}", e),
            Self::Compile(e) => write!(f, "Compile error: {}", e),
            Self::Instantiate(e) => write!(f, "Instantiate error: {}", e),
            Self::Cancelled => write!(f, "Instantiation cancelled"),
            Self::Call(e) => write!(f, "Call error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Compiles bytecode and instantiates compiled modules.
///
/// # Invariants
/// - `compile` is called exactly once per version; its output is shared
///   read-only by every instance of that version.
/// - `instantiate` must honour `cancel`: once the token fires it returns
///   `Error::Cancelled` and nothing it produced survives.
#[async_trait::async_trait]
pub trait ModuleRuntime: Send + Sync + 'static {
    /// Immutable, validated representation of one version's bytecode.
    type Module: Send + Sync + 'static;
    /// One live execution context. Mutated only by its current holder.
    type Instance: Send + 'static;
    /// Instantiation configuration, opaque to the pool.
    type Config: Send + Sync + 'static;

    fn compile(&self, bytes: &[u8]) -> Result<Self::Module>;

    async fn instantiate(
        &self,
        module: &Self::Module,
        config: &Self::Config,
        cancel: &CancellationToken,
    ) -> Result<Self::Instance>;
}
