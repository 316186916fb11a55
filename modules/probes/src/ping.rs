//! ICMP tester, via the system ping binary.

use std::net::IpAddr;
use std::process::Stdio;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use overseer_core::{base_schema, Options, Probe, Registry, Schema, Test};

pub struct PingProbe;

#[async_trait]
impl Probe for PingProbe {
    fn schema(&self) -> Schema {
        base_schema()
    }

    fn example(&self) -> &'static str {
        r"
Ping Tester
-----------
 The ping tester invokes the system 'ping' binary to carry out a
 ping-test against a remote host, selecting the address family to
 match the probed address.

 If the binary reports a failure, via its exit-code, then this test
 fails.

 This test is invoked via input like so:

    host.example.com must run ping
"
    }

    async fn run(&self, _test: &Test, ip: IpAddr, opts: &Options) -> Result<()> {
        let family = match ip {
            IpAddr::V4(_) => "-4",
            IpAddr::V6(_) => "-6",
        };

        let status = timeout(
            opts.timeout,
            Command::new("ping")
                .args([family, "-c", "1", "-w", "4", "-W", "4"])
                .arg(ip.to_string())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status(),
        )
        .await
        .map_err(|_| anyhow!("ping timed out"))??;

        if !status.success() {
            bail!("failed to ping {}", ip);
        }
        Ok(())
    }
}

pub fn register(registry: &Registry) {
    registry.register("ping", || Box::new(PingProbe));
}
