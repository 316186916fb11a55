//! Shared connection and TLS helpers for the protocol probes.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

use overseer_core::{Options, Test};

/// Compose `host:port`, bracketing IPv6 literals.
pub fn format_address(ip: IpAddr, port: u16) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{}:{}", v4, port),
        IpAddr::V6(v6) => format!("[{}]:{}", v6, port),
    }
}

/// The `port` argument if supplied, otherwise the probe's default.
pub fn port_arg(test: &Test, default: u16) -> Result<u16> {
    match test.arguments.get("port") {
        Some(raw) if !raw.is_empty() => raw
            .parse()
            .with_context(|| format!("invalid port '{}'", raw)),
        _ => Ok(default),
    }
}

/// Whether the test asked for certificate verification to be skipped.
pub fn tls_insecure(test: &Test) -> bool {
    test.arguments.get("tls").map(String::as_str) == Some("insecure")
}

/// The hostname the operator originally named, for TLS verification.
///
/// The probed address is an IP by the time a probe runs; certificates are
/// still checked against the name from the test line.
pub fn target_host(test: &Test) -> String {
    if test.target.contains("://") {
        if let Ok(parsed) = url::Url::parse(&test.target) {
            if let Some(host) = parsed.host_str() {
                return host.to_string();
            }
        }
    }
    test.target.clone()
}

/// TCP connect bounded by the probe timeout.
pub async fn connect(ip: IpAddr, port: u16, deadline: Duration) -> Result<TcpStream> {
    let addr = format_address(ip, port);
    let stream = timeout(deadline, TcpStream::connect(&addr))
        .await
        .map_err(|_| anyhow!("connection to {} timed out", addr))?
        .with_context(|| format!("connection to {} failed", addr))?;
    Ok(stream)
}

/// Read one line, bounded by the probe timeout.
pub async fn read_line<R>(reader: &mut R, deadline: Duration) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = timeout(deadline, reader.read_line(&mut line))
        .await
        .map_err(|_| anyhow!("read timed out"))??;
    if n == 0 {
        bail!("connection closed before a line was received");
    }
    Ok(line)
}

/// Read until the given delimiter byte, bounded by the probe timeout.
pub async fn read_until(reader: &mut (impl AsyncBufRead + Unpin), delim: u8, deadline: Duration) -> Result<String> {
    let mut buf = Vec::new();
    let n = timeout(deadline, reader.read_until(delim, &mut buf))
        .await
        .map_err(|_| anyhow!("read timed out"))??;
    if n == 0 {
        bail!("connection closed before a response was received");
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Connect, read the service greeting, and require the expected token.
///
/// The shared body of the plain banner probes (ssh, ftp, nntp, vnc,
/// rsync, ...).
pub async fn expect_banner(
    test: &Test,
    ip: IpAddr,
    opts: &Options,
    default_port: u16,
    token: &str,
    service: &str,
) -> Result<String> {
    let port = port_arg(test, default_port)?;
    let stream = connect(ip, port, opts.timeout).await?;
    let mut reader = BufReader::new(stream);
    let banner = read_line(&mut reader, opts.timeout).await?;
    if !banner.contains(token) {
        bail!("banner doesn't look like {}: '{}'", service, banner.trim());
    }
    Ok(banner)
}

/// A client configuration trusting the webpki roots, or trusting
/// everything when `insecure` is set.
pub fn tls_client_config(insecure: bool) -> ClientConfig {
    let _ = rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider());

    if insecure {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerify::new()))
            .with_no_client_auth()
    } else {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    }
}

/// The SNI name for a host that may be a hostname or an IP literal.
pub fn server_name(host: &str) -> Result<ServerName<'static>> {
    match host.parse::<IpAddr>() {
        Ok(ip) => Ok(ServerName::IpAddress(ip.into())),
        Err(_) => ServerName::try_from(host.to_owned())
            .map_err(|_| anyhow!("invalid server name '{}'", host)),
    }
}

/// TLS handshake over an established stream, bounded by the probe timeout.
pub async fn tls_connect(
    stream: TcpStream,
    host: &str,
    insecure: bool,
    deadline: Duration,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let connector = TlsConnector::from(Arc::new(tls_client_config(insecure)));
    let name = server_name(host)?;
    timeout(deadline, connector.connect(name, stream))
        .await
        .map_err(|_| anyhow!("TLS handshake with {} timed out", host))?
        .with_context(|| format!("TLS handshake with {} failed", host))
}

/// Certificate verifier that accepts any server certificate.
///
/// Used only when a test carries `with tls insecure`. Signatures are still
/// checked so the handshake itself stays well-formed.
#[derive(Debug)]
struct NoVerify(rustls::crypto::CryptoProvider);

impl NoVerify {
    fn new() -> Self {
        Self(rustls::crypto::ring::default_provider())
    }
}

impl ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
