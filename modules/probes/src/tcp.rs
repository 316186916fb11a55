//! Plain TCP tester.

use std::net::IpAddr;

use anyhow::{bail, Result};
use async_trait::async_trait;
use regex::RegexBuilder;
use tokio::io::BufReader;

use overseer_core::{base_schema, Options, Probe, Registry, Schema, Test};

use crate::util;

pub struct TcpProbe;

#[async_trait]
impl Probe for TcpProbe {
    fn schema(&self) -> Schema {
        let mut known = base_schema();
        known.insert("port", "^[0-9]+$");
        known.insert("banner", ".*");
        known
    }

    fn example(&self) -> &'static str {
        r"
TCP Tester
----------
 The TCP tester determines whether a TCP-based service is reachable,
 by excluding errors such as 'host not found' or 'connection refused'.
 There is no default port, so one must always be supplied.

 If 'banner' is supplied the first line the service sends must match
 the given regular expression.

 This test is invoked via input like so:

    host.example.com must run tcp with port 873 [with banner 'RSYNCD']
"
    }

    async fn run(&self, test: &Test, ip: IpAddr, opts: &Options) -> Result<()> {
        let port = match test.arguments.get("port").filter(|p| !p.is_empty()) {
            Some(_) => util::port_arg(test, 0)?,
            None => bail!("you must specify the port for TCP-tests"),
        };

        let stream = util::connect(ip, port, opts.timeout).await?;

        if let Some(pattern) = test.arguments.get("banner").filter(|b| !b.is_empty()) {
            let mut reader = BufReader::new(stream);
            let banner = util::read_line(&mut reader, opts.timeout).await?;
            let expr = RegexBuilder::new(pattern)
                .multi_line(true)
                .build()?;
            if !expr.is_match(&banner) {
                bail!(
                    "banner '{}' did not match the pattern '{}'",
                    banner.trim(),
                    pattern
                );
            }
        }

        Ok(())
    }
}

pub fn register(registry: &Registry) {
    registry.register("tcp", || Box::new(TcpProbe));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::net::Ipv4Addr;
    use tokio::io::AsyncWriteExt;

    fn test_with(args: &[(&str, &str)]) -> Test {
        let mut arguments = BTreeMap::new();
        for (k, v) in args {
            arguments.insert(k.to_string(), v.to_string());
        }
        Test {
            target: "example.com".to_string(),
            kind: "tcp".to_string(),
            input: String::new(),
            arguments,
            max_retries: None,
        }
    }

    #[tokio::test]
    async fn port_is_required() {
        let err = TcpProbe
            .run(
                &test_with(&[]),
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                &Options::default(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("specify the port"));
    }

    #[tokio::test]
    async fn connect_and_banner_match() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"@RSYNCD: 31.0\n").await.unwrap();
        });

        let test = test_with(&[("port", &port.to_string()), ("banner", "RSYNCD")]);
        TcpProbe
            .run(&test, IpAddr::V4(Ipv4Addr::LOCALHOST), &Options::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn banner_mismatch_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"hello\n").await.unwrap();
        });

        let test = test_with(&[("port", &port.to_string()), ("banner", "^RSYNCD$")]);
        let err = TcpProbe
            .run(&test, IpAddr::V4(Ipv4Addr::LOCALHOST), &Options::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not match"));
    }
}
