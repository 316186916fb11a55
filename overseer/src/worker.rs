//! The worker loop: pull test lines from the jobs queue and execute
//! them, forever.

use anyhow::{Context, Result};
use tracing::{info, warn};

use metrics::Emitter;
use overseer_core::{Options, Parser, Registry};
use queue::{Queue, RedisQueue, JOBS_KEY};

use crate::runner::{run_test, ResultPublisher};

/// Run the pipeline until the process is terminated.
///
/// Only the initial queue connections can fail this function; once the
/// loop is running, parse failures discard the job and queue failures
/// are retried after a short pause.
pub async fn run(
    opts: Options,
    queue_host: &str,
    queue_pass: Option<&str>,
    registry: &Registry,
) -> Result<()> {
    let mut jobs = RedisQueue::connect(queue_host, queue_pass)
        .await
        .context("queue connection failed")?;
    let results = RedisQueue::connect(queue_host, queue_pass)
        .await
        .context("queue connection failed")?;

    let mut publisher = ResultPublisher::new(results, opts.tag.clone());
    let emitter = Emitter::from_env();

    info!(queue = queue_host, "worker started");

    loop {
        let line = match jobs.blocking_pop(JOBS_KEY, None).await {
            Ok(Some(line)) => line,
            Ok(None) => continue,
            Err(e) => {
                warn!("queue pop failed: {:#}", e);
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                continue;
            }
        };

        // Each job line is its own parse session.
        let mut parser = Parser::new(registry);
        let mut tests = Vec::new();
        if let Err(e) = parser.parse_line(&line, &mut |t| {
            tests.push(t);
            Ok(())
        }) {
            warn!("discarding unparseable job: {:#}", e);
            continue;
        }

        for test in tests {
            if let Err(e) = run_test(&test, &opts, registry, &mut publisher, emitter.as_ref()).await
            {
                warn!("test execution failed: {:#}", e);
            }
        }
    }
}
