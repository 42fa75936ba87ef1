//! # optrack-core
//!
//! Core library for optrack - a client-side tracker for long-running
//! backend operations (repository indexing, documentation generation,
//! query streaming, research).
//!
//! This library provides:
//! - Domain types for operations and their kind-specific progress
//! - An in-memory [`OperationTracker`] with queries, statistics,
//!   subscriptions and a bounded history archive
//! - A [`NotificationGate`] deciding which changes notify the user
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! A transport layer decodes remote events and calls the tracker's
//! mutation API (`start`, `update`, `complete`, `error`, `cancel`).
//! UIs read snapshots through the query API and receive live changes
//! through `subscribe` / `subscribe_to_progress`. Nothing is persisted.
//!
//! ## Example
//!
//! ```rust,no_run
//! use optrack_core::{Config, OperationTracker};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Create a tracker sized from the history config
//! let tracker = OperationTracker::from_config(&config.history);
//! let _sub = tracker.subscribe(|ops| println!("{} live operations", ops.len()));
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use notifications::{NotificationConfig, NotificationEvent, NotificationGate};
pub use tracker::{HistoryEntry, OperationStats, OperationTracker, SubscriptionId};
pub use types::*;

// Public modules
pub mod config;
pub mod error;
pub mod format;
pub mod logging;
pub mod notifications;
pub mod tracker;
pub mod types;
