//! SSH service tester.

use std::net::IpAddr;

use anyhow::Result;
use async_trait::async_trait;

use overseer_core::{base_schema, Options, Probe, Registry, Schema, Test};

use crate::util;

pub struct SshProbe;

#[async_trait]
impl Probe for SshProbe {
    fn schema(&self) -> Schema {
        let mut known = base_schema();
        known.insert("port", "^[0-9]+$");
        known
    }

    fn example(&self) -> &'static str {
        r"
SSH Tester
----------
 The SSH tester connects to a remote host and ensures that a response
 is received that looks like an ssh-server banner.

 This test is invoked via input like so:

    host.example.com must run ssh [with port 2222]
"
    }

    async fn run(&self, test: &Test, ip: IpAddr, opts: &Options) -> Result<()> {
        util::expect_banner(test, ip, opts, 22, "SSH-", "an SSH server").await?;
        Ok(())
    }
}

pub fn register(registry: &Registry) {
    registry.register("ssh", || Box::new(SshProbe));
}
