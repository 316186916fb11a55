//! HTTP and HTTPS tester.
//!
//! Fetches the target URL and tests the status-code and body response.
//! The TCP dial is pinned to the address chosen by the caller while the
//! Host header, SNI, and certificate validation keep using the URL's
//! hostname, so the same URL can be probed separately over every
//! resolved address.
//!
//! Redirections are deliberately not followed, to allow testing them.

use std::net::{IpAddr, SocketAddr};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use regex::RegexBuilder;
use reqwest::redirect::Policy;
use reqwest::Method;
use url::Url;
use x509_parser::prelude::*;

use overseer_core::{base_schema, Options, Probe, Registry, Schema, Test};

use crate::util;

/// Minimum remaining certificate validity when no `expiration` argument
/// is supplied.
const DEFAULT_EXPIRATION_HOURS: u64 = 14 * 24;

pub struct HttpProbe;

#[async_trait]
impl Probe for HttpProbe {
    fn schema(&self) -> Schema {
        let mut known = base_schema();
        known.insert("method", "^(GET|HEAD|POST|PUT|PATCH|DELETE)$");
        known.insert("data", ".*");
        known.insert("username", ".*");
        known.insert("password", ".*");
        known.insert("status", "^(any|[0-9]+)$");
        known.insert("content", ".*");
        known.insert("pattern", ".*");
        known.insert("tls", "insecure");
        known.insert("expiration", "^(any|[0-9]+[hd]?)$");
        known.insert("user-agent", ".*");
        known
    }

    fn example(&self) -> &'static str {
        r"
HTTP Tester
-----------
 The HTTP tester fetches the given URL and checks the response. The
 status-code must be 200 unless 'status' says otherwise ('any' accepts
 every code, including redirections, which are never followed).

 The body can be tested with 'content' (substring) or 'pattern'
 (regular expression). A request-body can be sent with 'data', which
 also switches the default method to POST. 'username' and 'password'
 enable HTTP basic-authentication.

 For https URLs the certificate must be valid for at least 14 days
 unless 'expiration' says otherwise ('7d', '12h', or 'any'); with
 'tls insecure' no certificate checks are made.

 This test is invoked via input like so:

    https://example.com/login must run http [with status 302] [with content 'Sign in']
"
    }

    async fn run(&self, test: &Test, ip: IpAddr, opts: &Options) -> Result<()> {
        let url = Url::parse(&test.target)
            .with_context(|| format!("'{}' is not a URL", test.target))?;
        let host = url
            .host_str()
            .ok_or_else(|| anyhow!("'{}' has no host", test.target))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| anyhow!("'{}' has no usable port", test.target))?;
        let insecure = util::tls_insecure(test);

        // The certificate chain isn't reachable through the HTTP client,
        // so expiry is checked with a direct handshake against the same
        // address first.
        if url.scheme() == "https" && !insecure {
            self.check_expiration(test, &host, port, ip, opts).await?;
        }

        let user_agent = test
            .arguments
            .get("user-agent")
            .filter(|ua| !ua.is_empty())
            .cloned()
            .unwrap_or_else(|| format!("overseer/{}", env!("CARGO_PKG_VERSION")));

        let client = reqwest::Client::builder()
            .timeout(opts.timeout)
            .connect_timeout(opts.timeout)
            .redirect(Policy::none())
            .resolve(&host, SocketAddr::new(ip, port))
            .danger_accept_invalid_certs(insecure)
            .user_agent(user_agent)
            .build()?;

        let data = test.arguments.get("data").filter(|d| !d.is_empty());
        let method = match test.arguments.get("method").filter(|m| !m.is_empty()) {
            Some(m) => Method::from_bytes(m.as_bytes())?,
            None if data.is_some() => Method::POST,
            None => Method::GET,
        };

        let mut request = client.request(method, url.clone());
        if let Some(username) = test.arguments.get("username").filter(|u| !u.is_empty()) {
            request = request.basic_auth(username, test.arguments.get("password"));
        }
        if let Some(data) = data {
            request = request.body(data.clone());
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        let expected = test.arguments.get("status").map(String::as_str).unwrap_or("");
        match expected {
            "any" => {}
            "" => {
                if status != 200 {
                    bail!("Status code was {} not {}", status, 200);
                }
            }
            want => {
                let want: u16 = want.parse()?;
                if status != want {
                    bail!("Status code was {} not {}", status, want);
                }
            }
        }

        if let Some(content) = test.arguments.get("content").filter(|c| !c.is_empty()) {
            if !body.contains(content.as_str()) {
                bail!("Body didn't contain '{}'", content);
            }
        }

        if let Some(pattern) = test.arguments.get("pattern").filter(|p| !p.is_empty()) {
            let expr = RegexBuilder::new(pattern)
                .multi_line(true)
                .dot_matches_new_line(true)
                .build()?;
            if !expr.is_match(&body) {
                bail!("Body didn't match the pattern '{}'", pattern);
            }
        }

        Ok(())
    }
}

impl HttpProbe {
    /// Fail if any certificate the server presents expires too soon.
    async fn check_expiration(
        &self,
        test: &Test,
        host: &str,
        port: u16,
        ip: IpAddr,
        opts: &Options,
    ) -> Result<()> {
        let arg = test
            .arguments
            .get("expiration")
            .map(String::as_str)
            .unwrap_or("");
        if arg == "any" {
            return Ok(());
        }
        let min_hours = parse_expiration(arg)?;

        let stream = util::connect(ip, port, opts.timeout).await?;
        let tls = util::tls_connect(stream, host, false, opts.timeout).await?;
        let (_, conn) = tls.get_ref();
        let certs = conn
            .peer_certificates()
            .ok_or_else(|| anyhow!("no certificates presented by {}", host))?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let mut earliest: Option<i64> = None;
        for der in certs {
            let (_, cert) = X509Certificate::from_der(der.as_ref())
                .map_err(|e| anyhow!("failed to parse certificate: {}", e))?;
            let remaining = cert.validity().not_after.timestamp() - now;
            earliest = Some(match earliest {
                Some(prev) => prev.min(remaining),
                None => remaining,
            });
        }

        if let Some(remaining) = earliest {
            let hours = remaining / 3600;
            if remaining < (min_hours as i64) * 3600 {
                bail!(
                    "certificate will expire in {} hours ({} days)",
                    hours,
                    hours / 24
                );
            }
        }

        Ok(())
    }
}

/// Parse the `expiration` argument into hours.
///
/// A bare number or a `d` suffix means days, `h` means hours; the empty
/// string means the default of 14 days.
fn parse_expiration(arg: &str) -> Result<u64> {
    if arg.is_empty() {
        return Ok(DEFAULT_EXPIRATION_HOURS);
    }
    if let Some(hours) = arg.strip_suffix('h') {
        return Ok(hours.parse()?);
    }
    let days: u64 = arg.strip_suffix('d').unwrap_or(arg).parse()?;
    Ok(days * 24)
}

pub fn register(registry: &Registry) {
    registry.register("http", || Box::new(HttpProbe));
}
