//! Workflow execution runtime for drover agents.
//!
//! This crate drives one workflow's stages against a pluggable [`Engine`],
//! applies run policies, classifies step failures, and consults the
//! [`RecoveryManager`] so a restarted agent neither re-runs finished steps
//! nor re-launches steps that are still running.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │  Runtime                                                  │
//! │  - stages in order, steps of a stage as concurrent tasks  │
//! │  - OnSuccess / OnFailure run policy                       │
//! │  - trace before/after every dispatched step               │
//! │                                                           │
//! │     ┌─────────────────┐         ┌──────────────────┐      │
//! │     │ RecoveryManager │───────▶ │ StateStore       │      │
//! │     │ skip/reconnect  │         │ (versioned, TTL) │      │
//! │     └─────────────────┘         └──────────────────┘      │
//! │              │                                            │
//! │              ▼                                            │
//! │     ┌─────────────────┐                                   │
//! │     │ Engine          │  docker / kubernetes / local ...  │
//! │     └─────────────────┘                                   │
//! └───────────────────────────────────────────────────────────┘
//! ```

pub mod engine;
pub mod env;
pub mod error;
pub mod recovery;
pub mod runtime;
pub mod store;
pub mod trace;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use engine::{BackendRecovery, Engine, LogStream, SharedEngine};
pub use error::{EngineError, RuntimeError, StoreError};
pub use recovery::RecoveryManager;
pub use runtime::{Runtime, RuntimeBuilder};
pub use store::{
    FileBackend, MemoryBackend, RecordBackend, SharedStateStore, StateStore, VersionedStateStore,
    WorkflowRecord,
};
pub use trace::{Logger, TraceEvent, Tracer};
