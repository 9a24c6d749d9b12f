//! qcwatch-core: Core library for qcwatch
//!
//! Passive work-session tracking for QC-audit work: intercepted lifecycle
//! calls are normalized, correlated into sessions, merged with manually
//! logged off-platform activity, and exposed as a filterable timeline.
//!
//! # Architecture
//!
//! ```text
//! Interceptor → Normalizer → Session Correlator → Entry Merger
//!                                   ↓
//!                          Persistence (snapshot/KvStore)
//!                                   ↓
//!                          Query interface / CLI
//! ```
//!
//! The Identifier Resolver (`link_map`) runs independently, triggered by
//! host-page scrapes.
//!
//! # Modules
//!
//! - `event`: Raw capture and lifecycle event types
//! - `normalizer`: Endpoint matching and event extraction
//! - `link_map`: Three-tier identifier index and deep-link URLs
//! - `correlator`: The session state machine
//! - `entry`: Dashboard entry types
//! - `merge`: Audit/off-platform timeline merge
//! - `query`: Entry filtering for UI surfaces
//! - `store`: KvStore collaborator (memory and SQLite backends)
//! - `persist`: Versioned snapshot persistence
//! - `retention`: Entry pruning by age and count
//! - `runtime`: The one-event-at-a-time engine loop
//! - `config`: Configuration management
//! - `logging`: Structured logging setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod config;
pub mod correlator;
pub mod entry;
pub mod error;
pub mod event;
pub mod link_map;
pub mod logging;
pub mod merge;
pub mod normalizer;
pub mod persist;
pub mod query;
pub mod retention;
pub mod runtime;
pub mod store;

pub use error::{Error, Result, StorageError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
