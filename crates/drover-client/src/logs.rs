//! Background delivery of log lines.

use std::time::Duration;

use drover_types::LogEntry;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

/// Maximum entries per POST.
const MAX_BATCH: usize = 256;

pub(crate) struct Shipper {
    pub(crate) http: reqwest::Client,
    pub(crate) url: Url,
    pub(crate) timeout: Duration,
}

/// Drain `rx` in batches until every sender is gone.
///
/// Failed batches are logged and dropped.
pub(crate) async fn ship(shipper: Shipper, mut rx: mpsc::UnboundedReceiver<LogEntry>) {
    let mut batch = Vec::with_capacity(MAX_BATCH);
    while let Some(entry) = rx.recv().await {
        batch.push(entry);
        while batch.len() < MAX_BATCH {
            match rx.try_recv() {
                Ok(entry) => batch.push(entry),
                Err(_) => break,
            }
        }

        let lines = batch.len();
        let result = shipper
            .http
            .post(shipper.url.clone())
            .json(&batch)
            .timeout(shipper.timeout)
            .send()
            .await
            .and_then(|response| response.error_for_status());
        match result {
            Ok(_) => debug!(lines, "Shipped log batch"),
            Err(e) => warn!(lines, error = %e, "Failed to ship log batch, dropping"),
        }
        batch.clear();
    }
    debug!("Log shipper stopped");
}
