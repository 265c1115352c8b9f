// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Watch a live change feed against a small seeded hierarchy.
//!
//! Demonstrates:
//! 1. Loading location and department caches from static snapshot pages
//! 2. Connecting to the change feed and waiting until it is streaming
//! 3. Printing connection state transitions as they happen
//! 4. Querying the caches while events arrive
//! 5. Displaying captured metrics and shutting down on Ctrl-C
//!
//! # Run
//!
//! ```bash
//! HSYNC_SERVER_URL=https://feed.example.com \
//! HSYNC_CLIENT_ID=svc HSYNC_CLIENT_SECRET=... \
//! RUST_LOG=hierarchy_sync=debug \
//! cargo run --example stream_watch
//! ```

use hierarchy_sync::loader::memory::StaticLoaderFactory;
use hierarchy_sync::{EntityKind, HierarchySync, HierarchySyncConfig, Identifier, SnapshotRecord};
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           hierarchy-sync: Stream Watch Example                ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Seed snapshot pages
    // ─────────────────────────────────────────────────────────────────────────
    let config = HierarchySyncConfig::from_env()?;
    println!("📦 Tenant '{}', feed at {}", config.tenant_id, config.stream.server_url);

    let loaders = StaticLoaderFactory::new()
        .with_page(
            EntityKind::Location,
            vec![
                SnapshotRecord::new(1, "France", None),
                SnapshotRecord::new(2, "Lyon", Some(Identifier::Int(1))),
                SnapshotRecord::new(3, "Paris", Some(Identifier::Int(1))),
            ],
        )
        .with_page(
            EntityKind::Department,
            vec![
                SnapshotRecord::new(100, "Company", None),
                SnapshotRecord::new(101, "Engineering", Some(Identifier::Int(100))),
            ],
        );

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Load caches and wait for the feed
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🚀 Starting (load, then connect)...");
    let sync = HierarchySync::start(&config, Arc::new(loaders)).await?;
    println!("   ✅ Streaming. Stats: {:?}", sync.manager().statistics());

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Follow state transitions
    // ─────────────────────────────────────────────────────────────────────────
    let mut states = sync.feed().state_receiver();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            println!("   🔌 Feed state: {}", state);
        }
    });

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Query periodically until Ctrl-C
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📖 Watching (Ctrl-C to stop)...");
    let mut ticker = tokio::time::interval(Duration::from_secs(15));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                for kind in sync.manager().loaded_kinds() {
                    if let Some(cache) = sync.manager().get_cache(kind) {
                        let stats = cache.stats();
                        println!(
                            "   └─ {}: {} nodes, {} roots, depth {}",
                            kind, stats.total_nodes, stats.root_nodes, stats.max_depth
                        );
                    }
                }
                if let Some(locations) = sync.manager().get_cache(EntityKind::Location) {
                    for path in locations.get_full_path_by_name("Lyon").into_paths() {
                        println!("      Lyon → {}", path);
                    }
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Metrics and shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📊 Metrics:");
    for (key, _, _, value) in snapshotter.snapshot().into_vec() {
        let name = key.key().name();
        if !name.starts_with("hierarchy_sync_") {
            continue;
        }
        let value = match value {
            DebugValue::Counter(c) => c.to_string(),
            DebugValue::Gauge(g) => format!("{:.1}", g.into_inner()),
            DebugValue::Histogram(h) => format!("{} samples", h.len()),
        };
        println!("   └─ {} = {}", name, value);
    }

    println!("\n🛑 Shutting down...");
    let state = sync.shutdown().await;
    println!("   ✅ Final feed state: {}", state);
    Ok(())
}
