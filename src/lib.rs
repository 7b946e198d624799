//! drift - File Evolution and Drift Detection Library
//!
//! This library provides the core functionality for the drift CLI tool:
//! recording how files evolve under parallel tasks, detecting tasks whose
//! edits collide, and merging every activity source into one timeline.
//!
//! # Core Concepts
//!
//! - **Evolution events**: One record per observed file or task change
//! - **Drift analysis**: Per-file conflict grading across tasks
//! - **Unified timeline**: Evolution events, context snapshots and build
//!   logs normalized into one ascending stream
//!
//! # Module Organization
//!
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `.drift.toml`
//! - `error`: Error types and result aliases
//! - `event`: Evolution event data model
//! - `store`: Evolution index persistence, retention and queries
//! - `resolver`: File state hashing, classification and ignore rules
//! - `worktree`: Working-tree collaborator (libgit2, plain directory, in-memory)
//! - `tracker`: Task-lifecycle tracking entry points
//! - `drift`: Conflict detection between tasks
//! - `sources`: Snapshot and build-log record providers
//! - `timeline`: Unified timeline aggregation and persistence
//! - `trends`: Activity statistics and insights
//! - `export`: JSON and CSV export
//! - `sync`: Periodic background sync
//! - `storage`: State directory layout and JSON helpers
//! - `lock`: File locking and atomic operations for concurrency safety

pub mod cli;
pub mod config;
pub mod drift;
pub mod error;
pub mod event;
pub mod export;
pub mod lock;
pub mod output;
pub mod resolver;
pub mod sources;
pub mod storage;
pub mod store;
pub mod sync;
pub mod timeline;
pub mod tracker;
pub mod trends;
pub mod worktree;

pub use error::{Error, Result};
