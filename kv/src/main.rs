// Forbid unwrap() in production code to prevent panics from corrupt data.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use kv::config::{ConfigError, StoreConfig, parse_demo_keys};
use kv::{ResultCode, Store, StoreError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Keys inserted by the demo workload when `KV_DEMO_KEYS` is not set.
const DEFAULT_DEMO_KEYS: i64 = 1_000_000;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kv=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment variables
    let config = match StoreConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    let keys = match load_demo_keys() {
        Ok(keys) => keys,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Loaded configuration: path={}, cache_pages={}, demo_keys={keys}",
        config.path.display(),
        config.cache_pages
    );

    // The store lives on the blocking task. Ctrl-C only raises the flag; the
    // task notices it between operations and closes the store, which forces
    // a flush of every dirty page.
    let stop = Arc::new(AtomicBool::new(false));
    let interrupt = {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted, closing store");
                stop.store(true, Ordering::SeqCst);
            }
        })
    };

    let workload = {
        let stop = Arc::clone(&stop);
        tokio::task::spawn_blocking(move || run(&config, keys, &stop))
    };
    let result = workload.await;
    interrupt.abort();

    let code = match result {
        Ok(Ok(code)) => code.code(),
        Ok(Err(e)) => {
            tracing::error!(class = ?e.class(), "Store error: {e}");
            e.result_code().map_or(1, ResultCode::code)
        }
        Err(e) => {
            tracing::error!("Workload task failed: {e}");
            1
        }
    };
    std::process::exit(code);
}

/// Load the number of demo keys from environment.
fn load_demo_keys() -> Result<i64, ConfigError> {
    std::env::var("KV_DEMO_KEYS").map_or(Ok(DEFAULT_DEMO_KEYS), |value| {
        parse_demo_keys("KV_DEMO_KEYS", &value)
    })
}

/// Open the store, run the workload and close the store.
///
/// The store is closed even when the workload fails; the workload's error
/// takes precedence over an error from closing.
fn run(config: &StoreConfig, keys: i64, stop: &AtomicBool) -> Result<ResultCode, StoreError> {
    let mut store = Store::open(config)?;
    let outcome = workload(&mut store, keys, stop);
    let closed = store.close();
    let code = outcome?;
    closed?;
    Ok(code)
}

/// Insert `1..=keys` with value `2 * key`, look up the first key and the
/// successor of the midpoint.
fn workload(store: &mut Store, keys: i64, stop: &AtomicBool) -> Result<ResultCode, StoreError> {
    for key in 1..=keys {
        if stop.load(Ordering::SeqCst) {
            tracing::info!(inserted = key - 1, "stopping early");
            return Ok(ResultCode::Success);
        }
        store.put(key, key * 2)?;
    }
    tracing::info!(records = keys, "inserted records");

    let first = store.get(1)?;
    tracing::info!(key = 1, value = ?first, "lookup");
    let code = ResultCode::of_lookup(first.as_ref());
    if code != ResultCode::Success {
        return Ok(code);
    }

    let middle = keys / 2;
    match store.next(middle)? {
        Some((key, value)) => tracing::info!(after = middle, key, value, "successor"),
        None => tracing::info!(after = middle, "no successor"),
    }
    Ok(ResultCode::Success)
}
