pub mod context;
pub mod instance;
pub mod pool;
pub mod router;
pub mod runtime;
pub mod source;

pub use context::Budget;
pub use context::InstanceConfig;
pub use instance::InstanceGuard;
pub use instance::InstanceId;
pub use pool::VersionPool;
pub use router::VersionRouter;
pub use runtime::ModuleRuntime;
pub use runtime::WasmRuntime;
pub use source::BytecodeSource;
