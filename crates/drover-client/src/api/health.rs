//! Health API.

use drover_types::{HealthResponse, Version};

use crate::client::DroverClient;
use crate::error::Result;

/// Health API client.
///
/// `/health` needs no authentication; `/api/v1/version` does.
pub struct HealthApi {
    client: DroverClient,
}

impl HealthApi {
    pub(crate) fn new(client: DroverClient) -> Self {
        Self { client }
    }

    /// Check basic health.
    pub async fn check(&self) -> Result<HealthResponse> {
        let url = self.client.root_url("health")?;
        self.client.get(url).await
    }

    /// Protocol version the server speaks.
    pub async fn version(&self) -> Result<Version> {
        let url = self.client.url("version")?;
        self.client.get(url).await
    }

    /// Simple connectivity check - returns true if server is reachable.
    pub async fn is_healthy(&self) -> bool {
        self.check().await.is_ok()
    }
}
