//! Telnet service tester.

use std::net::IpAddr;

use anyhow::Result;
use async_trait::async_trait;

use overseer_core::{base_schema, Options, Probe, Registry, Schema, Test};

use crate::util;

pub struct TelnetProbe;

#[async_trait]
impl Probe for TelnetProbe {
    fn schema(&self) -> Schema {
        let mut known = base_schema();
        known.insert("port", "^[0-9]+$");
        known
    }

    fn example(&self) -> &'static str {
        r"
Telnet Tester
-------------
 The telnet tester determines whether a telnet service is reachable,
 by connecting and disconnecting without sending any data.

 This test is invoked via input like so:

    host.example.com must run telnet [with port 2323]
"
    }

    async fn run(&self, test: &Test, ip: IpAddr, opts: &Options) -> Result<()> {
        let port = util::port_arg(test, 23)?;
        util::connect(ip, port, opts.timeout).await?;
        Ok(())
    }
}

pub fn register(registry: &Registry) {
    registry.register("telnet", || Box::new(TelnetProbe));
}
