//! Webhook notification bridge.
//!
//! Reads test-results from the queue and posts each alert as JSON to an
//! HTTP endpoint, so a human can be notified of test failures.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tracing::info;

use bridge::{Alert, Backend};
use queue::RedisQueue;

#[derive(Debug, Parser)]
#[command(name = "overseer-bridge", version, about = "Forward test-results to a webhook")]
struct Cli {
    /// Address of the queue.
    #[arg(long, default_value = "localhost:6379")]
    queue_host: String,

    /// Password for the queue.
    #[arg(long)]
    queue_pass: Option<String>,

    /// URL alerts are POSTed to.
    #[arg(long)]
    url: String,

    /// Show more output.
    #[arg(long)]
    verbose: bool,
}

struct WebhookBackend {
    url: String,
    client: reqwest::Client,
}

#[async_trait]
impl Backend for WebhookBackend {
    async fn dispatch(&self, alert: &Alert) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .with_context(|| format!("posting to {}", self.url))?;
        if !response.status().is_success() {
            bail!("webhook returned {}", response.status());
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let mut queue = RedisQueue::connect(&cli.queue_host, cli.queue_pass.as_deref())
            .await
            .context("queue connection failed")?;

        info!(url = %cli.url, "bridge started");
        let backend = WebhookBackend {
            url: cli.url,
            client: reqwest::Client::new(),
        };
        bridge::run(&mut queue, &backend).await
    })
}
