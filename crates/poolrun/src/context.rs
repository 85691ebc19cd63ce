//! Context types for instance configuration and execution

use wasmtime::StoreLimits;
use wasmtime::StoreLimitsBuilder;
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::p1::WasiP1Ctx;

/// Resource budget applied to every instance of a pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Budget {
    /// Fuel granted to each invocation. The store is refuelled before every call.
    pub fuel: u64,
    /// Upper bound on linear memory held by one store.
    pub memory_bytes: usize,
}

impl Budget {
    pub fn standard() -> Self {
        Self {
            fuel: 1_000_000_000,
            memory_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Instantiation configuration shared by every instance of a pool.
///
/// Unlike `WasiCtxBuilder`, which is consumed when built, this is plain data so a
/// pool can stamp out any number of identical contexts from it.
#[derive(Clone, Debug, Default)]
pub struct InstanceConfig {
    pub(crate) args: Vec<String>,
    pub(crate) env: Vec<(String, String)>,
    pub(crate) inherit_stdio: bool,
    pub(crate) budget: Option<Budget>,
}

impl InstanceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn inherit_stdio(mut self) -> Self {
        self.inherit_stdio = true;
        self
    }

    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn budget(&self) -> Option<&Budget> {
        self.budget.as_ref()
    }

    /// Fuel handed to a store before each invocation.
    pub(crate) fn fuel(&self) -> u64 {
        self.budget.as_ref().map_or(u64::MAX, |b| b.fuel)
    }

    pub(crate) fn build(&self) -> PoolCtx {
        let mut wasi = WasiCtxBuilder::new();
        wasi.args(self.args.as_slice()).envs(self.env.as_slice());
        if self.inherit_stdio {
            wasi.inherit_stdio();
        }

        let mut limits = StoreLimitsBuilder::new();
        if let Some(budget) = &self.budget {
            limits = limits.memory_size(budget.memory_bytes);
        }

        PoolCtx {
            wasi: wasi.build_p1(),
            limits: limits.build(),
            fuel: self.fuel(),
        }
    }
}

/// Per-instance state stored in the wasmtime `Store`.
///
/// Lives as long as the instance, which for a pooled instance means as long as
/// its pool. Only the current holder of the instance touches it.
pub struct PoolCtx {
    pub(crate) wasi: WasiP1Ctx,
    pub(crate) limits: StoreLimits,
    fuel: u64,
}

impl PoolCtx {
    /// Fuel granted to each invocation on this store.
    pub fn fuel_per_call(&self) -> u64 {
        self.fuel
    }
}
