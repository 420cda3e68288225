//! The drover agent.
//!
//! An [`Agent`] registers with the server through a [`Peer`](drover_types::Peer),
//! then runs one loop per capacity slot: take the next matching workflow,
//! execute it with a [`Runtime`](drover_pipeline::Runtime) over the configured
//! engine, and report the outcome. Step progress and output flow back to the
//! server through [`AgentTracer`] and [`AgentLogger`].

pub mod agent;
pub mod backend;
pub mod config;
pub mod counters;
pub mod error;
pub mod logger;
mod runner;
pub mod store;
pub mod tracer;

pub use agent::{Agent, AgentBuilder};
pub use backend::LocalEngine;
pub use config::AgentConfig;
pub use counters::{AgentCounters, CounterSnapshot};
pub use error::{AgentError, Result};
pub use logger::AgentLogger;
pub use store::open_store;
pub use tracer::AgentTracer;
