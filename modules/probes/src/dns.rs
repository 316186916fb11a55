//! DNS server tester.
//!
//! Queries the probed nameserver directly and compares the rendered
//! answer set against an expected string.

use std::net::IpAddr;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use trust_dns_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::proto::op::ResponseCode;
use trust_dns_resolver::proto::rr::{RData, RecordType};
use trust_dns_resolver::TokioAsyncResolver;

use overseer_core::{base_schema, Options, Probe, Registry, Schema, Test};

pub struct DnsProbe;

#[async_trait]
impl Probe for DnsProbe {
    fn schema(&self) -> Schema {
        let mut known = base_schema();
        known.insert("lookup", ".*");
        known.insert("type", "^(A|AAAA|MX|NS|TXT)$");
        known.insert("result", ".*");
        known
    }

    fn example(&self) -> &'static str {
        r"
DNS Tester
----------
 The DNS tester sends a query to the probed nameserver and requires
 the answers to match an expected value. Answers are sorted and
 comma-joined before the comparison, and an empty expected result
 asserts an empty answer set.

 Supported record types are A, AAAA, MX, NS, and TXT.

 This test is invoked via input like so:

    ns1.example.com must run dns with lookup www.example.com with type A with result '192.0.2.1'
"
    }

    async fn run(&self, test: &Test, ip: IpAddr, opts: &Options) -> Result<()> {
        let name = test
            .arguments
            .get("lookup")
            .filter(|l| !l.is_empty())
            .ok_or_else(|| anyhow!("the DNS test requires a 'lookup' argument"))?;
        let record_type = match test.arguments.get("type").map(String::as_str) {
            Some("A") => RecordType::A,
            Some("AAAA") => RecordType::AAAA,
            Some("MX") => RecordType::MX,
            Some("NS") => RecordType::NS,
            Some("TXT") => RecordType::TXT,
            other => bail!("unsupported record to lookup '{}'", other.unwrap_or("")),
        };
        let expected = test
            .arguments
            .get("result")
            .map(String::as_str)
            .unwrap_or("");

        let mut results = self.lookup(ip, name, record_type, opts).await?;
        results.sort();
        let found = results.join(",");

        if found != expected {
            bail!("Expected DNS result to be '{}', but found '{}'", expected, found);
        }
        Ok(())
    }
}

impl DnsProbe {
    async fn lookup(
        &self,
        server: IpAddr,
        name: &str,
        record_type: RecordType,
        opts: &Options,
    ) -> Result<Vec<String>> {
        let nameservers = NameServerConfigGroup::from_ips_clear(&[server], 53, true);
        let config = ResolverConfig::from_parts(None, vec![], nameservers);
        let mut resolver_opts = ResolverOpts::default();
        resolver_opts.timeout = opts.timeout;
        resolver_opts.attempts = 1;

        let resolver = TokioAsyncResolver::tokio(config, resolver_opts);

        let lookup = match resolver.lookup(name, record_type).await {
            Ok(lookup) => lookup,
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { response_code, .. } => {
                    if *response_code == ResponseCode::NXDomain {
                        bail!("No such domain {}", name);
                    }
                    return Ok(Vec::new());
                }
                _ => return Err(e.into()),
            },
        };

        let mut results = Vec::new();
        for rdata in lookup.iter() {
            match rdata {
                RData::A(a) => results.push(a.to_string()),
                RData::AAAA(aaaa) => results.push(aaaa.to_string()),
                RData::MX(mx) => {
                    results.push(format!("{} {}", mx.preference(), mx.exchange()))
                }
                RData::NS(ns) => results.push(ns.to_string()),
                RData::TXT(txt) => {
                    if let Some(first) = txt.txt_data().first() {
                        results.push(String::from_utf8_lossy(first).into_owned());
                    }
                }
                _ => {}
            }
        }
        Ok(results)
    }
}

pub fn register(registry: &Registry) {
    registry.register("dns", || Box::new(DnsProbe));
}
