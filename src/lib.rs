//! # Hierarchy Sync
//!
//! In-memory hierarchical entity caches kept current by a live change feed.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Startup (bulk load)                     │
//! │  • EntityLoader per kind pages the snapshot into a cache   │
//! │  • Indices and paths built eagerly before first query      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              CacheManager: one cache per kind               │
//! │  • HierarchicalCache behind a single RwLock                │
//! │  • Exact / prefix name search, root-to-node paths          │
//! │  • Orphaning on remove, cycle-safe ancestry                │
//! └─────────────────────────────────────────────────────────────┘
//!                              ▲
//!                    (ChangeEvent → EventRouter)
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │            ReconnectionController (one task)                │
//! │  • OAuth token → handshake token → WebSocket               │
//! │  • STOMP CONNECT / SUBSCRIBE, NUL-framed MESSAGEs          │
//! │  • Bounded fixed-delay retries, startup wait               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hierarchy_sync::{EntityKind, HierarchySync, HierarchySyncConfig, Identifier};
//! use hierarchy_sync::loader::memory::StaticLoaderFactory;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = HierarchySyncConfig::from_env().expect("Invalid config");
//!     let loaders = Arc::new(StaticLoaderFactory::new());
//!
//!     // Loads caches, then blocks until the feed is streaming
//!     let sync = HierarchySync::start(&config, loaders).await.expect("Failed to start");
//!
//!     if let Some(locations) = sync.manager().get_cache(EntityKind::Location) {
//!         for node in locations.search_by_name_prefix("Ly") {
//!             println!("{}", locations.get_full_path(&node.id));
//!         }
//!         let _ = locations.get_children(&Identifier::Int(1));
//!     }
//!
//!     sync.shutdown().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`cache`]: The indexed [`HierarchicalCache`]
//! - [`manager`]: [`CacheManager`] and its `global` shim
//! - [`loader`]: Snapshot loading boundary
//! - [`stream`]: Auth, transport, STOMP codec and session, event routing
//! - [`reconnect`]: Connection state machine and startup contract
//! - [`resilience`]: Retry policy

pub mod cache;
pub mod config;
pub mod error;
pub mod loader;
pub mod manager;
pub mod metrics;
pub mod node;
pub mod reconnect;
pub mod resilience;
pub mod service;
pub mod stream;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use cache::{CacheStats, HierarchicalCache, PathMatch, PATH_SEPARATOR};
pub use config::{HierarchySyncConfig, StreamConfig};
pub use error::{FrameError, LoadError, StreamError, SyncError, SyncResult};
pub use loader::{EntityKind, EntityLoader, LoaderFactory, SnapshotRecord};
pub use manager::{CacheManager, ManagerStats};
pub use node::{HierarchicalNode, Identifier};
pub use reconnect::{ConnectionState, ControllerHandle, ReconnectionController};
pub use resilience::retry::RetryConfig;
pub use service::HierarchySync;
pub use stream::{ChangeEvent, DispatchOutcome, EventRouter, HttpSessionConnector, SessionConnector};
