//! HTTP client for the drover server.
//!
//! [`DroverClient`] implements [`Peer`](drover_types::Peer), so an agent
//! talks to a remote server through it, and also exposes the admin
//! endpoints used by the CLI.
//!
//! # Example
//!
//! ```no_run
//! use drover_client::{DroverClient, Result};
//!
//! # async fn example() -> Result<()> {
//! let client = DroverClient::builder()
//!     .base_url("http://localhost:9000")
//!     .auth_token("secret")
//!     .build()?;
//!
//! if client.health().is_healthy().await {
//!     let info = client.workflows().get("build-42").await?;
//!     println!("{:?}", info.status);
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
mod client;
pub mod error;
mod logs;
mod peer;

pub use api::{HealthApi, WorkflowsApi};
pub use client::{ClientBuilder, DroverClient};
pub use error::{Error, Result};
