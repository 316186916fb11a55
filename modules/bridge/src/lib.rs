//! Shared plumbing for notification bridges.
//!
//! A bridge drains the results queue and forwards each record into an
//! external alerting system. The loop, the stable alert id, and the
//! record-to-alert translation live here; delivery is behind [`Backend`].

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use sha1::{Digest, Sha1};
use tokio::time::Instant;
use tracing::warn;

use queue::{Queue, RESULTS_KEY};

/// How often a liveness alert is pushed to the backend, so an outside
/// system notices a dead bridge.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(60);

/// Stable identifier for a test: repeated passes clear and repeated
/// failures raise the same alert.
pub fn stable_id(target: &str, input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(target.as_bytes());
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// One alert, ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub id: String,
    pub subject: String,
    pub detail: String,
    pub raise: String,
}

/// Translate one result record into an alert.
pub fn alert_from_record(record: &str) -> Result<Alert> {
    let data: HashMap<String, String> =
        serde_json::from_str(record).context("malformed result record")?;

    let kind = data.get("type").map(String::as_str).unwrap_or("");
    let target = data
        .get("target")
        .ok_or_else(|| anyhow!("result record has no target"))?;
    let input = data
        .get("input")
        .ok_or_else(|| anyhow!("result record has no input"))?;
    let error = data.get("error").map(String::as_str).unwrap_or("");

    let (detail, raise) = if error.is_empty() {
        (
            format!(
                "<p>The <code>{}</code> test against <code>{}</code> passed.</p>",
                kind, target
            ),
            "clear",
        )
    } else {
        (
            format!(
                "<p>The <code>{}</code> test against <code>{}</code> failed:</p><p><pre>{}</pre></p>",
                kind, target, error
            ),
            "now",
        )
    };

    Ok(Alert {
        id: stable_id(target, input),
        subject: input.clone(),
        detail,
        raise: raise.to_string(),
    })
}

/// The liveness alert.
pub fn heartbeat_alert() -> Alert {
    Alert {
        id: "overseer-bridge-heartbeat".to_string(),
        subject: "overseer-bridge heartbeat".to_string(),
        detail: "The overseer-bridge is alive and draining test-results.".to_string(),
        raise: "clear".to_string(),
    }
}

/// Delivery into one external alerting system.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn dispatch(&self, alert: &Alert) -> Result<()>;
}

/// Consume the results queue forever, dispatching each record.
///
/// Pops use a short finite wait so the heartbeat keeps its schedule
/// without ever cancelling an in-flight queue command. Record and
/// delivery failures are logged and skipped; only the queue connection
/// itself can end the loop.
pub async fn run(queue: &mut dyn Queue, backend: &dyn Backend) -> Result<()> {
    let mut last_beat = Instant::now();
    backend.dispatch(&heartbeat_alert()).await.ok();

    loop {
        if last_beat.elapsed() >= HEARTBEAT_PERIOD {
            if let Err(e) = backend.dispatch(&heartbeat_alert()).await {
                warn!("failed to deliver heartbeat: {:#}", e);
            }
            last_beat = Instant::now();
        }

        match queue
            .blocking_pop(RESULTS_KEY, Some(Duration::from_secs(1)))
            .await
        {
            Ok(Some(record)) => match alert_from_record(&record) {
                Ok(alert) => {
                    if let Err(e) = backend.dispatch(&alert).await {
                        warn!(alert = %alert.id, "failed to deliver alert: {:#}", e);
                    }
                }
                Err(e) => warn!("skipping result record: {:#}", e),
            },
            Ok(None) => {}
            Err(e) => {
                warn!("queue pop failed: {:#}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
