//! Shared types for the drover CI system.
//!
//! Everything that crosses a crate or process boundary lives here: the
//! workflow model handed to agents, the per-step process outcome, recovery
//! records, the wire records exchanged with the server, and the [`Peer`]
//! contract itself.

pub mod api;
pub mod error;
pub mod peer;
pub mod recovery;
pub mod rpc;
pub mod state;
pub mod workflow;

pub use api::{
    AGENT_HEADER, ErrorResponse, HealthResponse, RegisterResponse, SubmitRequest, SubmitResponse,
    WaitResponse, WorkflowInfo, WorkflowStatus,
};
pub use error::{PeerError, Result};
pub use peer::{Peer, SharedPeer};
pub use recovery::{RecoveryState, RecoveryStatus};
pub use rpc::{
    AgentInfo, LogEntry, PROTOCOL_VERSION, StepState, Version, WorkflowState, unix_now,
};
pub use state::State;
pub use workflow::{Config, Filter, Stage, Step, Workflow};
