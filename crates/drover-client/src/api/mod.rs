//! Admin and health APIs.

mod health;
mod workflows;

pub use health::HealthApi;
pub use workflows::WorkflowsApi;
