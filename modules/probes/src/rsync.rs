//! rsync service tester.

use std::net::IpAddr;

use anyhow::Result;
use async_trait::async_trait;

use overseer_core::{base_schema, Options, Probe, Registry, Schema, Test};

use crate::util;

pub struct RsyncProbe;

#[async_trait]
impl Probe for RsyncProbe {
    fn schema(&self) -> Schema {
        let mut known = base_schema();
        known.insert("port", "^[0-9]+$");
        known
    }

    fn example(&self) -> &'static str {
        r"
rsync Tester
------------
 The rsync tester connects to a remote host and ensures that a response
 is received that looks like an rsync-server banner.

 This test is invoked via input like so:

    host.example.com must run rsync [with port 8730]
"
    }

    async fn run(&self, test: &Test, ip: IpAddr, opts: &Options) -> Result<()> {
        util::expect_banner(test, ip, opts, 873, "RSYNC", "an rsync server").await?;
        Ok(())
    }
}

pub fn register(registry: &Registry) {
    registry.register("rsync", || Box::new(RsyncProbe));
}
