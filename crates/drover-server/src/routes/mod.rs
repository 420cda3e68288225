//! API routes.

pub mod agents;
pub mod health;
pub mod queue;
pub mod workflows;

pub use agents::{
    AgentSummary, ListAgentsResponse, health_report_handler, list_agents_handler,
    register_agent_handler, unregister_agent_handler,
};
pub use health::{health_routes, version_handler};
pub use queue::{
    cancel_workflow_handler, get_workflow_handler, submit_workflow_handler,
    workflow_logs_handler,
};
pub use workflows::{
    LogsAccepted, done_handler, extend_handler, init_handler, logs_handler, next_handler,
    update_step_handler, wait_handler,
};
