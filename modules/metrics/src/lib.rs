//! Line-oriented metrics submission in the carbon plaintext format.
//!
//! One `key value` line per datapoint, UDP by default. The sink address
//! comes from the environment; when it is absent nothing is emitted.

use std::env;

use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tracing::debug;

const DEFAULT_PORT: u16 = 2003;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    Udp,
    Tcp,
}

/// A handle on the configured metrics sink.
#[derive(Debug, Clone)]
pub struct Emitter {
    addr: String,
    transport: Transport,
}

impl Emitter {
    /// Build an emitter from `METRICS_HOST` and `METRICS_PROTOCOL`.
    ///
    /// Returns `None` when no host is configured. A bare hostname gets the
    /// default carbon port appended; `METRICS_PROTOCOL=tcp` switches the
    /// transport, anything else means UDP.
    pub fn from_env() -> Option<Self> {
        let host = env::var("METRICS_HOST").ok().filter(|h| !h.is_empty())?;
        let transport = match env::var("METRICS_PROTOCOL").ok().as_deref() {
            Some("tcp") => Transport::Tcp,
            _ => Transport::Udp,
        };
        Some(Self::new(&host, transport == Transport::Tcp))
    }

    pub fn new(host: &str, tcp: bool) -> Self {
        let addr = if host.contains(':') {
            host.to_string()
        } else {
            format!("{}:{}", host, DEFAULT_PORT)
        };
        Self {
            addr,
            transport: if tcp { Transport::Tcp } else { Transport::Udp },
        }
    }

    /// Emit one datapoint. Failures are logged and swallowed; metrics are
    /// never allowed to fail a test run.
    pub async fn emit(&self, name: &str, value: u64) {
        if let Err(e) = self.try_emit(name, value).await {
            debug!(name, "metrics emission failed: {:#}", e);
        }
    }

    async fn try_emit(&self, name: &str, value: u64) -> Result<()> {
        let line = format!("{} {}\n", name, value);
        match self.transport {
            Transport::Udp => {
                let socket = UdpSocket::bind("0.0.0.0:0").await?;
                socket.send_to(line.as_bytes(), &self.addr).await?;
            }
            Transport::Tcp => {
                let mut stream = TcpStream::connect(&self.addr).await?;
                stream.write_all(line.as_bytes()).await?;
            }
        }
        Ok(())
    }
}

/// Replace every non-alphanumeric character so the name is a single
/// graphite path segment.
pub fn safe_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Milliseconds spent resolving the target.
pub fn dns_duration_key(target: &str) -> String {
    format!("overseer.dns.{}.duration", safe_name(target))
}

/// Milliseconds of the successful or final attempt.
pub fn test_duration_key(kind: &str, target: &str) -> String {
    format!("overseer.test.{}.{}.duration", safe_name(kind), safe_name(target))
}

/// Retries needed; zero when the first attempt passed.
pub fn test_attempts_key(kind: &str, target: &str) -> String {
    format!("overseer.test.{}.{}.attempts", safe_name(kind), safe_name(target))
}
