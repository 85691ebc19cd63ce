//! # Wasmtime Runtime
//!
//! `ModuleRuntime` backed by wasmtime core modules with WASI preview1 linked in.

use tokio_util::sync::CancellationToken;
use wasmtime::Engine;
use wasmtime::Instance;
use wasmtime::Linker;
use wasmtime::Module;
use wasmtime::Store;
use wasmtime::WasmParams;
use wasmtime::WasmResults;

use crate::context::InstanceConfig;
use crate::context::PoolCtx;
use crate::runtime::Error;
use crate::runtime::ModuleRuntime;
use crate::runtime::Result;

/// Shared engine and linker. Cheap to share behind an `Arc`; every pool of a
/// router instantiates through the same one.
pub struct WasmRuntime {
    engine: Engine,
    linker: Linker<PoolCtx>,
}

impl WasmRuntime {
    /// Creates a runtime with async support and fuel metering enabled.
    pub fn new() -> Result<Self> {
        let mut config = wasmtime::Config::new();
        config.async_support(true);
        config.consume_fuel(true);

        let engine = Engine::new(&config).map_err(Error::Engine)?;
        Self::with_engine(engine)
    }

    /// Creates a runtime over a caller-supplied engine.
    ///
    /// The engine must have async support enabled. If it consumes fuel, each
    /// instance is budgeted from its `InstanceConfig`.
    pub fn with_engine(engine: Engine) -> Result<Self> {
        let mut linker = Linker::new(&engine);
        wasmtime_wasi::p1::add_to_linker_async(&mut linker, |ctx: &mut PoolCtx| &mut ctx.wasi)
            .map_err(Error::Engine)?;
        Ok(Self { engine, linker })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

#[async_trait::async_trait]
impl ModuleRuntime for WasmRuntime {
    type Module = Module;
    type Instance = WasmInstance;
    type Config = InstanceConfig;

    /// Accepts both binary modules and, with the `wat` feature, text.
    fn compile(&self, bytes: &[u8]) -> Result<Module> {
        Module::new(&self.engine, bytes).map_err(Error::Compile)
    }

    async fn instantiate(
        &self,
        module: &Module,
        config: &InstanceConfig,
        cancel: &CancellationToken,
    ) -> Result<WasmInstance> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut store = Store::new(&self.engine, config.build());
        store.limiter(|ctx| &mut ctx.limits);
        refuel(&mut store)?;

        let outcome = {
            let instantiate = self.linker.instantiate_async(&mut store, module);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                res = instantiate => Some(res),
            }
        };

        match outcome {
            Some(Ok(instance)) => Ok(WasmInstance { store, instance }),
            Some(Err(e)) => Err(Error::Instantiate(e)),
            None => Err(Error::Cancelled),
        }
    }
}

/// Resets the store's fuel to its per-call budget. A no-op on engines that do
/// not meter fuel.
fn refuel(store: &mut Store<PoolCtx>) -> Result<()> {
    if store.get_fuel().is_err() {
        return Ok(());
    }
    let fuel = store.data().fuel_per_call();
    store.set_fuel(fuel).map_err(Error::Engine)
}

/// A live core-module instance together with its store.
///
/// Not reentrant: every method takes `&mut self`, so the pool's exclusive
/// checkout is the only way to reach it.
pub struct WasmInstance {
    store: Store<PoolCtx>,
    instance: Instance,
}

impl WasmInstance {
    /// Calls a typed export, refuelling the store to its budget first.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut guard = router.route(None, &cancel).await?;
    /// let n: i32 = guard.call("handle", (7,)).await?;
    /// guard.release();
    /// ```
    pub async fn call<Params, Results>(&mut self, name: &str, params: Params) -> Result<Results>
    where
        Params: WasmParams + Send + Sync,
        Results: WasmResults + Send + Sync,
    {
        refuel(&mut self.store)?;
        let func = self
            .instance
            .get_typed_func::<Params, Results>(&mut self.store, name)
            .map_err(Error::Call)?;
        func.call_async(&mut self.store, params)
            .await
            .map_err(Error::Call)
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn store(&self) -> &Store<PoolCtx> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store<PoolCtx> {
        &mut self.store
    }
}
