//! SMTP service tester.

use std::net::IpAddr;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufStream};

use overseer_core::{base_schema, Options, Probe, Registry, Schema, Test};

use crate::util;

pub struct SmtpProbe;

#[async_trait]
impl Probe for SmtpProbe {
    fn schema(&self) -> Schema {
        let mut known = base_schema();
        known.insert("port", "^[0-9]+$");
        known.insert("username", ".*");
        known.insert("password", ".*");
        known.insert("tls", "insecure");
        known
    }

    fn example(&self) -> &'static str {
        r"
SMTP Tester
-----------
 The SMTP tester checks on the status of a remote SMTP-server.

 This test is invoked via input like so:

    host.example.com must run smtp [with port 25]

 By default a connection will be attempted and nothing else. A more
 complete test would be to specify a username & password and test that
 authentication succeeds.

 Note that performing an authentication-request requires the use of
 STARTTLS. If the TLS certificate is self-signed or otherwise
 non-trusted you'll need to disable the validity checking by appending
 'with tls insecure'.

 A complete example, testing a login, will look like this:

    host.example.com must run smtp with port 587 with username 'steve@example.com' with password 's3cr3t' [with tls insecure]
"
    }

    async fn run(&self, test: &Test, ip: IpAddr, opts: &Options) -> Result<()> {
        let port = util::port_arg(test, 25)?;
        let host = util::target_host(test);

        let stream = util::connect(ip, port, opts.timeout).await?;
        let mut plain = BufStream::new(stream);

        let (code, _) = read_response(&mut plain, opts.timeout).await?;
        if code != 220 {
            bail!("greeting doesn't look like an SMTP server: {}", code);
        }

        let (code, extensions) = command(&mut plain, &format!("EHLO {}", host), opts.timeout).await?;
        if code != 250 {
            bail!("EHLO was rejected: {}", code);
        }

        let username = test.arguments.get("username").filter(|v| !v.is_empty());
        let password = test.arguments.get("password").filter(|v| !v.is_empty());
        let (username, password) = match (username, password) {
            (Some(u), Some(p)) => (u, p),
            _ => return Ok(()),
        };

        // Credentials never travel in the clear; an SMTP server that does
        // not offer STARTTLS fails the test.
        if !extensions.iter().any(|line| line.contains("STARTTLS")) {
            bail!("we cannot login without STARTTLS, and that was not advertised");
        }

        let (code, _) = command(&mut plain, "STARTTLS", opts.timeout).await?;
        if code != 220 {
            bail!("STARTTLS was rejected: {}", code);
        }

        let tls = util::tls_connect(
            plain.into_inner(),
            &host,
            util::tls_insecure(test),
            opts.timeout,
        )
        .await?;
        let mut secured = BufStream::new(tls);

        let (code, _) = command(&mut secured, &format!("EHLO {}", host), opts.timeout).await?;
        if code != 250 {
            bail!("EHLO after STARTTLS was rejected: {}", code);
        }

        let token = STANDARD.encode(format!("\0{}\0{}", username, password));
        let (code, _) = command(&mut secured, &format!("AUTH PLAIN {}", token), opts.timeout).await?;
        if code != 235 {
            bail!("authentication failed: {}", code);
        }

        Ok(())
    }
}

/// Send one command and read the (possibly multi-line) response.
async fn command<S>(stream: &mut S, line: &str, deadline: Duration) -> Result<(u16, Vec<String>)>
where
    S: AsyncBufRead + AsyncWrite + Unpin + Send,
{
    stream.write_all(format!("{}\r\n", line).as_bytes()).await?;
    stream.flush().await?;
    read_response(stream, deadline).await
}

/// Read one SMTP response: `NNN-` lines continue, `NNN ` ends it.
async fn read_response<S>(stream: &mut S, deadline: Duration) -> Result<(u16, Vec<String>)>
where
    S: AsyncBufRead + Unpin + Send,
{
    let mut lines = Vec::new();
    loop {
        let line = util::read_line(stream, deadline).await?;
        let line = line.trim_end().to_string();
        let code: u16 = line
            .get(..3)
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(|| anyhow::anyhow!("malformed SMTP response: '{}'", line))?;
        let last = line.as_bytes().get(3) != Some(&b'-');
        lines.push(line);
        if last {
            return Ok((code, lines));
        }
    }
}

pub fn register(registry: &Registry) {
    registry.register("smtp", || Box::new(SmtpProbe));
}
