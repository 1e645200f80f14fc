//! Profiling demo
//!
//! Loads a profile registry, runs a small order pipeline through it, first
//! sequentially and then as concurrent tasks, and logs the buffered totals.
//!
//! Usage: `profiling-demo [profiles.json] [config.json]`
//!
//! Output goes through `tracing`; set `RUST_LOG=profiling=trace` to see
//! context pushes and pops as well.

use anyhow::Context;
use profiling::{Action, ProfileContext, ProfileDescriptor, ProfileRegistry, Profiler, ProfilerConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_PROFILES: &str = include_str!("../profiles.json");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let registry = match args.next() {
        Some(path) => ProfileRegistry::from_json(&read(&path)?)?,
        None => ProfileRegistry::from_json(DEFAULT_PROFILES)?,
    };
    let config = match args.next() {
        Some(path) => ProfilerConfig::from_json(&read(&path)?)?,
        None => ProfilerConfig::default(),
    };
    tracing::info!(keys = registry.len(), enabled = config.enabled, "profile registry loaded");

    let mut profiler = Profiler::new(config).with_registry(registry);
    profiler.register(
        "orders::notify",
        ProfileDescriptor::builder()
            .name("Notify")
            .message("Notifying {Customer.Name}")
            .on_stop(Action::new("slow-notify", |cx| {
                if cx.elapsed > Duration::from_millis(5) {
                    tracing::warn!(profile = %cx.profile.id(), elapsed = ?cx.elapsed, "slow notification");
                }
                Ok(())
            }))
            .build()?,
    );
    let profiler = Arc::new(profiler);

    tracing::info!("running orders sequentially");
    ProfileContext::new()
        .scope(async {
            for order in sample_orders() {
                submit(&profiler, &order).await?;
            }
            anyhow::Ok(())
        })
        .await?;

    tracing::info!("running orders concurrently");
    let tasks: Vec<_> = sample_orders()
        .into_iter()
        .map(|order| {
            let profiler = Arc::clone(&profiler);
            tokio::spawn(ProfileContext::new().scope(async move { submit(&profiler, &order).await }))
        })
        .collect();
    for task in tasks {
        task.await??;
    }

    for snapshot in profiler.factory().accumulator().snapshots() {
        tracing::info!(
            key = snapshot.key.as_str(),
            count = snapshot.count,
            total = ?snapshot.total,
            mean = ?snapshot.mean(),
            "accumulated"
        );
    }

    Ok(())
}

fn read(path: &str) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path))
}

async fn submit(profiler: &Profiler, order: &Value) -> anyhow::Result<()> {
    let _submit = profiler.enter("orders::submit", Some(order))?;
    let _audit = profiler.enter("orders::audit", Some(order))?;

    if let Some(lines) = order["Lines"].as_array() {
        for line in lines {
            let mut price = profiler.enter("orders::price", Some(line))?;
            if let Some(profile) = price.innermost_mut() {
                profile.append(format!("unit price {}", line["Price"]));
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    {
        let _ship = profiler.enter("orders::ship", Some(order))?;
        tokio::time::sleep(Duration::from_millis(3)).await;
    }

    let _notify = profiler.enter("orders::notify", Some(order))?;
    tokio::time::sleep(Duration::from_millis(1)).await;
    Ok(())
}

fn sample_orders() -> Vec<Value> {
    vec![
        json!({
            "Order": {"Id": 1001},
            "Customer": {"Name": "ACME", "Address": {"City": "Springfield"}},
            "Lines": [
                {"Sku": "BOLT-10", "Qty": 200, "Price": 0.12},
                {"Sku": "NUT-10", "Qty": 200, "Price": 0.05}
            ]
        }),
        json!({
            "Order": {"Id": 1002},
            "Customer": {"Name": "Globex", "Address": {"City": "Cypress Creek"}},
            "Lines": [{"Sku": "GEAR-3", "Qty": 4, "Price": 18.5}]
        }),
        json!({
            "Order": {"Id": 1003},
            "Customer": {"Name": "Initech"},
            "Lines": []
        }),
    ]
}
