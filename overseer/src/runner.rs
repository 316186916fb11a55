//! Test execution: resolve the target, fan out over its addresses,
//! retry failures, and hand each outcome to a notifier.

use std::net::IpAddr;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;

use metrics::Emitter;
use overseer_core::{Options, Registry, Test};
use queue::{Queue, RESULTS_KEY};

/// Receives the outcome of every executed test.
///
/// `probed` is the address the test actually ran against, which is not
/// necessarily the target the operator submitted.
#[async_trait]
pub trait Notifier: Send {
    async fn notify(&mut self, test: &Test, probed: &str, error: Option<&str>) -> Result<()>;
}

/// Execute one parsed test.
///
/// The target is resolved (timed), filtered by address family, and the
/// probe runs against each surviving address in turn under the retry
/// policy. One notification is delivered per address, or a single
/// synthetic failure when resolution fails. Notifier errors are logged,
/// never fatal.
pub async fn run_test(
    test: &Test,
    opts: &Options,
    registry: &Registry,
    notifier: &mut dyn Notifier,
    emitter: Option<&Emitter>,
) -> Result<()> {
    let probe = registry
        .lookup(&test.kind)
        .ok_or_else(|| anyhow!("unknown test-type '{}'", test.kind))?;

    // A URI target resolves by its hostname.
    let mut host = test.target.clone();
    if host.contains("://") {
        let parsed = Url::parse(&host)?;
        host = parsed
            .host_str()
            .ok_or_else(|| anyhow!("no host in '{}'", test.target))?
            .to_string();
    }

    let started = Instant::now();
    let resolved = resolve(&host).await;
    let resolve_ms = started.elapsed().as_millis() as u64;

    if let Some(emitter) = emitter {
        emitter
            .emit(&metrics::dns_duration_key(&test.target), resolve_ms)
            .await;
    }

    let ips = match resolved {
        Ok(ips) => ips,
        Err(e) => {
            warn!("failed to resolve {} for {} test: {:#}", host, test.kind, e);
            let message = format!("Failed to resolve name {}", host);
            if let Err(e) = notifier.notify(test, &test.target, Some(&message)).await {
                warn!("failed to publish result: {:#}", e);
            }
            return Ok(());
        }
    };

    let targets: Vec<IpAddr> = ips
        .into_iter()
        .filter(|ip| match ip {
            IpAddr::V4(_) => opts.ipv4,
            IpAddr::V6(_) => opts.ipv6,
        })
        .collect();

    // Metrics for dns tests are keyed by what was looked up, not by the
    // nameserver under test.
    let metric_target = if test.kind == "dns" {
        test.arguments
            .get("lookup")
            .cloned()
            .unwrap_or_else(|| test.target.clone())
    } else {
        test.target.clone()
    };

    for ip in targets {
        if opts.verbose {
            debug!("running '{}' test against {} ({})", test.kind, test.target, ip);
        }

        let max_attempts = match test.max_retries {
            Some(n) => n + 1,
            None if opts.retry => opts.retry_count.max(1),
            None => 1,
        };

        let mut attempt = 0u32;
        let mut last_error = None;
        let mut duration_ms = 0;

        while attempt < max_attempts {
            attempt += 1;
            let t0 = Instant::now();
            let result = probe.run(test, ip, opts).await;
            duration_ms = t0.elapsed().as_millis() as u64;

            match result {
                Ok(()) => {
                    debug!("[{}/{}] test passed", attempt, max_attempts);
                    last_error = None;
                    break;
                }
                Err(e) => {
                    debug!("[{}/{}] test failed: {:#}", attempt, max_attempts, e);
                    last_error = Some(format!("{:#}", e));
                    if attempt < max_attempts {
                        tokio::time::sleep(opts.retry_delay).await;
                    }
                }
            }
        }

        if let Some(emitter) = emitter {
            emitter
                .emit(
                    &metrics::test_duration_key(&test.kind, &metric_target),
                    duration_ms,
                )
                .await;
            emitter
                .emit(
                    &metrics::test_attempts_key(&test.kind, &metric_target),
                    u64::from(attempt - 1),
                )
                .await;
        }

        if let Err(e) = notifier
            .notify(test, &ip.to_string(), last_error.as_deref())
            .await
        {
            warn!("failed to publish result: {:#}", e);
        }
    }

    Ok(())
}

/// All addresses of a hostname, in resolver order. IP literals resolve
/// to themselves.
async fn resolve(host: &str) -> Result<Vec<IpAddr>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }

    let mut ips: Vec<IpAddr> = Vec::new();
    for addr in tokio::net::lookup_host((host, 0u16)).await? {
        let ip = addr.ip();
        if !ips.contains(&ip) {
            ips.push(ip);
        }
    }
    if ips.is_empty() {
        bail!("no addresses found for {}", host);
    }
    Ok(ips)
}

/// Publishes one JSON record per outcome onto the results queue.
///
/// The record always carries the sanitised input line; raw input never
/// reaches the queue.
pub struct ResultPublisher<Q> {
    queue: Q,
    tag: String,
}

impl<Q: Queue> ResultPublisher<Q> {
    pub fn new(queue: Q, tag: Option<String>) -> Self {
        Self {
            queue,
            tag: tag.unwrap_or_default(),
        }
    }
}

#[async_trait]
impl<Q: Queue> Notifier for ResultPublisher<Q> {
    async fn notify(&mut self, test: &Test, probed: &str, error: Option<&str>) -> Result<()> {
        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut record = serde_json::Map::new();
        record.insert("input".into(), test.sanitize().into());
        record.insert(
            "result".into(),
            if error.is_some() { "failed" } else { "passed" }.into(),
        );
        record.insert("target".into(), probed.into());
        record.insert("time".into(), time.to_string().into());
        record.insert("type".into(), test.kind.clone().into());
        record.insert("tag".into(), self.tag.clone().into());
        if let Some(error) = error {
            record.insert("error".into(), error.into());
        }

        let payload = serde_json::Value::Object(record).to_string();
        self.queue.push(RESULTS_KEY, &payload).await
    }
}

/// Prints outcomes to stdout, for queue-less local runs.
pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn notify(&mut self, test: &Test, probed: &str, error: Option<&str>) -> Result<()> {
        match error {
            None => println!("PASS {} [{}]", test.sanitize(), probed),
            Some(e) => println!("FAIL {} [{}] - {}", test.sanitize(), probed, e),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overseer_core::{base_schema, Probe, Schema};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Fails a configurable number of times, then passes.
    struct Flaky {
        failures: u32,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Probe for Flaky {
        fn schema(&self) -> Schema {
            base_schema()
        }

        fn example(&self) -> &'static str {
            "must run flaky"
        }

        async fn run(&self, _: &Test, _: IpAddr, _: &Options) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                bail!("transient failure {}", n + 1)
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct Collector {
        records: Vec<(String, Option<String>)>,
    }

    #[async_trait]
    impl Notifier for Collector {
        async fn notify(&mut self, _test: &Test, probed: &str, error: Option<&str>) -> Result<()> {
            self.records
                .push((probed.to_string(), error.map(str::to_string)));
            Ok(())
        }
    }

    fn flaky_registry(failures: u32) -> (Registry, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = Registry::new();
        let shared = calls.clone();
        registry.register("flaky", move || {
            Box::new(Flaky {
                failures,
                calls: shared.clone(),
            })
        });
        (registry, calls)
    }

    fn test_record(kind: &str) -> Test {
        Test {
            target: "127.0.0.1".to_string(),
            kind: kind.to_string(),
            input: format!("127.0.0.1 must run {}", kind),
            arguments: BTreeMap::new(),
            max_retries: None,
        }
    }

    fn fast_opts() -> Options {
        Options {
            retry: true,
            retry_count: 5,
            retry_delay: Duration::from_millis(1),
            ..Options::default()
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let (registry, calls) = flaky_registry(3);
        let mut collector = Collector::default();

        run_test(
            &test_record("flaky"),
            &fast_opts(),
            &registry,
            &mut collector,
            None,
        )
        .await
        .unwrap();

        // Three failures, then the winning fourth attempt.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(collector.records.len(), 1);
        assert_eq!(collector.records[0], ("127.0.0.1".to_string(), None));
    }

    #[tokio::test]
    async fn exhausted_retries_report_the_last_error() {
        let (registry, calls) = flaky_registry(u32::MAX);
        let mut collector = Collector::default();

        run_test(
            &test_record("flaky"),
            &fast_opts(),
            &registry,
            &mut collector,
            None,
        )
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        let (_, error) = &collector.records[0];
        assert_eq!(error.as_deref(), Some("transient failure 5"));
    }

    #[tokio::test]
    async fn retry_count_one_equals_no_retry() {
        let (registry, calls) = flaky_registry(u32::MAX);
        let mut collector = Collector::default();
        let opts = Options {
            retry_count: 1,
            ..fast_opts()
        };

        run_test(&test_record("flaky"), &opts, &registry, &mut collector, None)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let (registry, calls) = flaky_registry(u32::MAX);
        let opts = Options {
            retry: false,
            ..fast_opts()
        };
        run_test(&test_record("flaky"), &opts, &registry, &mut collector, None)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn per_test_override_beats_worker_policy() {
        let (registry, calls) = flaky_registry(u32::MAX);
        let mut collector = Collector::default();
        let mut test = test_record("flaky");
        test.max_retries = Some(2);
        let opts = Options {
            retry: false,
            ..fast_opts()
        };

        run_test(&test, &opts, &registry, &mut collector, None)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn disabled_families_mean_no_probes_and_no_records() {
        let (registry, calls) = flaky_registry(0);
        let mut collector = Collector::default();
        let opts = Options {
            ipv4: false,
            ipv6: false,
            ..fast_opts()
        };

        run_test(&test_record("flaky"), &opts, &registry, &mut collector, None)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(collector.records.is_empty());
    }

    #[tokio::test]
    async fn resolution_failure_publishes_one_synthetic_record() {
        let (registry, calls) = flaky_registry(0);
        let mut collector = Collector::default();
        let mut test = test_record("flaky");
        test.target = "does-not-exist.invalid".to_string();

        run_test(&test, &fast_opts(), &registry, &mut collector, None)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(collector.records.len(), 1);
        let (probed, error) = &collector.records[0];
        assert_eq!(probed, "does-not-exist.invalid");
        assert!(error.as_deref().unwrap().contains("Failed to resolve"));
    }

    #[tokio::test]
    async fn unknown_protocol_is_an_error() {
        let registry = Registry::new();
        let mut collector = Collector::default();
        let err = run_test(
            &test_record("ghost"),
            &fast_opts(),
            &registry,
            &mut collector,
            None,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("unknown test-type"));
    }

    /// In-memory queue capturing pushes.
    #[derive(Default)]
    struct MemQueue {
        pushed: Vec<(String, String)>,
    }

    #[async_trait]
    impl Queue for MemQueue {
        async fn blocking_pop(
            &mut self,
            _key: &str,
            _timeout: Option<Duration>,
        ) -> Result<Option<String>> {
            Ok(None)
        }

        async fn push(&mut self, key: &str, value: &str) -> Result<()> {
            self.pushed.push((key.to_string(), value.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn published_records_are_sanitised_json() {
        let mut test = test_record("flaky");
        test.arguments
            .insert("password".to_string(), "s3cr3t".to_string());

        let mut publisher = ResultPublisher::new(MemQueue::default(), Some("worker-1".into()));
        publisher
            .notify(&test, "127.0.0.1", Some("boom"))
            .await
            .unwrap();

        let queue = &publisher.queue;
        assert_eq!(queue.pushed.len(), 1);
        let (key, payload) = &queue.pushed[0];
        assert_eq!(key, RESULTS_KEY);

        let record: serde_json::Value = serde_json::from_str(payload).unwrap();
        assert_eq!(record["result"], "failed");
        assert_eq!(record["target"], "127.0.0.1");
        assert_eq!(record["type"], "flaky");
        assert_eq!(record["tag"], "worker-1");
        assert_eq!(record["error"], "boom");
        assert!(!payload.contains("s3cr3t"));
        assert!(record["input"].as_str().unwrap().contains("CENSORED"));
        assert!(record["time"].is_string());
    }

    #[tokio::test]
    async fn passing_records_have_no_error_field() {
        let test = test_record("flaky");
        let mut publisher = ResultPublisher::new(MemQueue::default(), None);
        publisher.notify(&test, "127.0.0.1", None).await.unwrap();

        let (_, payload) = &publisher.queue.pushed[0];
        let record: serde_json::Value = serde_json::from_str(payload).unwrap();
        assert_eq!(record["result"], "passed");
        assert!(record.get("error").is_none());
    }
}
