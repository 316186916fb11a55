//! VNC service tester.

use std::net::IpAddr;

use anyhow::Result;
use async_trait::async_trait;

use overseer_core::{base_schema, Options, Probe, Registry, Schema, Test};

use crate::util;

pub struct VncProbe;

#[async_trait]
impl Probe for VncProbe {
    fn schema(&self) -> Schema {
        let mut known = base_schema();
        known.insert("port", "^[0-9]+$");
        known
    }

    fn example(&self) -> &'static str {
        r"
VNC Tester
----------
 The VNC tester connects to a remote host and ensures that a response
 is received that looks like a VNC protocol banner.

 This test is invoked via input like so:

    host.example.com must run vnc [with port 5901]
"
    }

    async fn run(&self, test: &Test, ip: IpAddr, opts: &Options) -> Result<()> {
        util::expect_banner(test, ip, opts, 5900, "RFB", "a VNC server").await?;
        Ok(())
    }
}

pub fn register(registry: &Registry) {
    registry.register("vnc", || Box::new(VncProbe));
}
