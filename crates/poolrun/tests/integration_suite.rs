//! Integration tests for poolrun on the wasmtime runtime.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use tokio_util::sync::CancellationToken;

use poolrun::Budget;
use poolrun::InstanceConfig;
use poolrun::ModuleRuntime;
use poolrun::VersionRouter;
use poolrun::WasmRuntime;
use poolrun::pool;
use poolrun::router;
use poolrun::runtime;
use poolrun::source::FsSource;
use poolrun::source::MemorySource;

/// A stateful module reporting which version it was built from.
fn counter(version: i32) -> String {
    format!(
        r#"(module
            (global $count (mut i32) (i32.const 0))
            (func (export "version") (result i32) i32.const {version})
            (func (export "bump") (result i32)
                global.get $count
                i32.const 1
                i32.add
                global.set $count
                global.get $count)
            (func (export "spin") (loop $forever br $forever)))"#
    )
}

const WASI_IMPORTER: &str = r#"(module
    (import "wasi_snapshot_preview1" "random_get" (func (param i32 i32) (result i32)))
    (memory (export "memory") 1)
    (func (export "version") (result i32) i32.const 7))"#;

const MISSING_IMPORT: &str = r#"(module
    (import "env" "missing" (func))
    (func (export "version") (result i32) i32.const 0))"#;

const LARGE_MEMORY: &str = r#"(module (memory 64))"#;

fn runtime() -> Arc<WasmRuntime> {
    Arc::new(WasmRuntime::new().expect("Failed to create runtime"))
}

fn versions() -> MemorySource {
    MemorySource::new()
        .with_version("v1", counter(1).into_bytes())
        .with_version("v2", counter(2).into_bytes())
}

// --- Routing ---

#[tokio::test]
async fn test_route_reaches_the_right_build() -> anyhow::Result<()> {
    let router = VersionRouter::builder(runtime(), InstanceConfig::new())
        .build(&versions())
        .await?;
    let cancel = CancellationToken::new();

    assert_eq!(router.default_version(), "v1");

    let mut v2 = router.route(Some("v2"), &cancel).await?;
    assert_eq!(v2.call::<(), i32>("version", ()).await?, 2);
    v2.release();

    let mut default = router.route(None, &cancel).await?;
    assert_eq!(default.call::<(), i32>("version", ()).await?, 1);
    default.release();

    assert!(matches!(
        router.route(Some("v3"), &cancel).await,
        Err(router::Error::UnknownVersion(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_invalid_bytecode_aborts_router() {
    let source = MemorySource::new()
        .with_version("good", counter(1).into_bytes())
        .with_version("broken", b"definitely not wasm".to_vec());

    let result = VersionRouter::builder(runtime(), InstanceConfig::new())
        .build(&source)
        .await;
    assert!(matches!(
        result,
        Err(router::Error::Compile { ref version, error: runtime::Error::Compile(_) }) if version == "broken"
    ));
}

#[tokio::test]
async fn test_router_from_directory() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("a.wat"), counter(10))?;
    std::fs::write(dir.path().join("b.wat"), counter(20))?;
    std::fs::write(dir.path().join("README.md"), "not a module")?;

    let source = FsSource::new(dir.path(), "*.wat");
    let router = VersionRouter::builder(runtime(), InstanceConfig::new())
        .build(&source)
        .await?;
    let cancel = CancellationToken::new();

    assert_eq!(router.versions().collect::<Vec<_>>(), vec!["a.wat", "b.wat"]);
    assert_eq!(router.default_version(), "a.wat");

    let mut b = router.route(Some("b.wat"), &cancel).await?;
    assert_eq!(b.call::<(), i32>("version", ()).await?, 20);
    Ok(())
}

// --- Instance state ---

#[tokio::test]
async fn test_instance_state_persists_across_checkouts() -> anyhow::Result<()> {
    let router = VersionRouter::builder(runtime(), InstanceConfig::new())
        .max_instances(1)
        .build(&versions())
        .await?;
    let cancel = CancellationToken::new();

    for expected in 1..=3 {
        let mut guard = router.route(None, &cancel).await?;
        assert_eq!(guard.call::<(), i32>("bump", ()).await?, expected);
        guard.release();
    }
    assert_eq!(router.pool("v1").unwrap().len().await, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_never_share_an_instance() -> anyhow::Result<()> {
    const MAX: usize = 2;
    const WORKERS: usize = 8;
    const CALLS: usize = 20;

    let router = Arc::new(
        VersionRouter::builder(runtime(), InstanceConfig::new())
            .max_instances(MAX)
            .build(&versions())
            .await?,
    );
    let exhausted = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..WORKERS {
        let router = Arc::clone(&router);
        let exhausted = Arc::clone(&exhausted);
        tasks.push(tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let mut done = 0;
            while done < CALLS {
                match router.route(None, &cancel).await {
                    Ok(mut guard) => {
                        guard.call::<(), i32>("bump", ()).await.expect("bump failed");
                        guard.release();
                        done += 1;
                    }
                    Err(router::Error::Pool(pool::Error::Exhausted { .. })) => {
                        exhausted.fetch_add(1, Ordering::Relaxed);
                        tokio::task::yield_now().await;
                    }
                    Err(e) => panic!("unexpected error: {}", e),
                }
            }
        }));
    }
    for task in tasks {
        task.await?;
    }

    let pool = router.pool("v1").unwrap();
    assert!(pool.len().await <= MAX);

    // Every bump landed on exactly one instance; the counters add up.
    let cancel = CancellationToken::new();
    let mut total = 0;
    let mut guards = Vec::new();
    for _ in 0..pool.len().await {
        let mut guard = pool.acquire(&cancel).await?;
        total += guard.call::<(), i32>("bump", ()).await? - 1;
        guards.push(guard);
    }
    assert_eq!(total as usize, WORKERS * CALLS);
    Ok(())
}

// --- Runtime configuration ---

#[tokio::test]
async fn test_wasi_imports_are_linked() -> anyhow::Result<()> {
    let source = MemorySource::new().with_version("wasi", WASI_IMPORTER.as_bytes().to_vec());
    let config = InstanceConfig::new().arg("app").env("MODE", "test");
    let router = VersionRouter::builder(runtime(), config).build(&source).await?;

    let mut guard = router.route(None, &CancellationToken::new()).await?;
    assert_eq!(guard.call::<(), i32>("version", ()).await?, 7);
    Ok(())
}

#[tokio::test]
async fn test_unresolved_import_fails_per_request() -> anyhow::Result<()> {
    let source = MemorySource::new().with_version("broken", MISSING_IMPORT.as_bytes().to_vec());
    let router = VersionRouter::builder(runtime(), InstanceConfig::new())
        .build(&source)
        .await?;

    let result = router.route(None, &CancellationToken::new()).await;
    assert!(matches!(
        result,
        Err(router::Error::Pool(pool::Error::Instantiate(runtime::Error::Instantiate(_))))
    ));
    assert!(router.pool("broken").unwrap().is_empty().await);
    Ok(())
}

#[tokio::test]
async fn test_memory_budget_rejects_instance() -> anyhow::Result<()> {
    let source = MemorySource::new().with_version("big", LARGE_MEMORY.as_bytes().to_vec());
    let config = InstanceConfig::new().with_budget(Budget {
        fuel: 1_000_000,
        memory_bytes: 1024 * 1024,
    });
    let router = VersionRouter::builder(runtime(), config).build(&source).await?;

    let result = router.route(None, &CancellationToken::new()).await;
    assert!(matches!(
        result,
        Err(router::Error::Pool(pool::Error::Instantiate(_)))
    ));
    assert!(router.pool("big").unwrap().is_empty().await);
    Ok(())
}

#[tokio::test]
async fn test_fuel_budget_is_per_call() -> anyhow::Result<()> {
    let config = InstanceConfig::new().with_budget(Budget {
        fuel: 100_000,
        memory_bytes: Budget::standard().memory_bytes,
    });
    let router = VersionRouter::builder(runtime(), config)
        .max_instances(1)
        .build(&versions())
        .await?;
    let cancel = CancellationToken::new();

    let mut guard = router.route(None, &cancel).await?;
    assert!(matches!(
        guard.call::<(), ()>("spin", ()).await,
        Err(runtime::Error::Call(_))
    ));
    // The trap burned the whole budget; the next call starts fresh.
    assert_eq!(guard.call::<(), i32>("bump", ()).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_cancelled_instantiation() -> anyhow::Result<()> {
    let rt = runtime();
    let module = rt.compile(counter(1).as_bytes())?;
    let config = InstanceConfig::new();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = rt.instantiate(&module, &config, &cancel).await;
    assert!(matches!(result, Err(runtime::Error::Cancelled)));

    let router = VersionRouter::builder(Arc::clone(&rt), config)
        .build(&versions())
        .await?;
    assert!(matches!(
        router.route(None, &cancel).await,
        Err(router::Error::Pool(pool::Error::Instantiate(runtime::Error::Cancelled)))
    ));
    assert!(router.pool("v1").unwrap().is_empty().await);
    Ok(())
}
