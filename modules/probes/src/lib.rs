//! The protocol probes.
//!
//! One module per wire protocol, each registering a constructor under its
//! protocol name. Adding a protocol means implementing the three methods
//! of the probe contract and wiring the module into [`register_all`].

pub mod util;

mod dns;
mod finger;
mod ftp;
mod http;
mod imap;
mod mysql;
mod nntp;
mod ping;
mod pop3;
mod psql;
mod redis;
mod rsync;
mod smtp;
mod ssh;
mod tcp;
mod telnet;
mod vnc;
mod xmpp;

use overseer_core::Registry;

/// Register every protocol tester into the given registry.
pub fn register_all(registry: &Registry) {
    dns::register(registry);
    finger::register(registry);
    ftp::register(registry);
    http::register(registry);
    imap::register(registry);
    mysql::register(registry);
    nntp::register(registry);
    ping::register(registry);
    pop3::register(registry);
    psql::register(registry);
    redis::register(registry);
    rsync::register(registry);
    smtp::register(registry);
    ssh::register(registry);
    tcp::register(registry);
    telnet::register(registry);
    vnc::register(registry);
    xmpp::register(registry);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_protocol_is_registered() {
        let registry = Registry::new();
        register_all(&registry);
        assert_eq!(
            registry.names(),
            vec![
                "dns", "finger", "ftp", "http", "imap", "imaps", "mysql", "nntp", "ping",
                "pop3", "pop3s", "psql", "redis", "rsync", "smtp", "ssh", "tcp", "telnet",
                "vnc", "xmpp",
            ]
        );
    }

    #[test]
    fn every_schema_pattern_compiles() {
        let registry = Registry::new();
        register_all(&registry);
        for name in registry.names() {
            let probe = registry.lookup(&name).unwrap();
            for (arg, pattern) in probe.schema() {
                assert!(
                    regex::Regex::new(pattern).is_ok(),
                    "{}: bad pattern for '{}'",
                    name,
                    arg
                );
            }
        }
    }

    #[test]
    fn every_schema_allows_a_retry_override() {
        let registry = Registry::new();
        register_all(&registry);
        for name in registry.names() {
            let probe = registry.lookup(&name).unwrap();
            assert!(
                probe.schema().contains_key("max-retries"),
                "{} lacks max-retries",
                name
            );
        }
    }

    #[test]
    fn every_probe_documents_itself() {
        let registry = Registry::new();
        register_all(&registry);
        for name in registry.names() {
            let probe = registry.lookup(&name).unwrap();
            assert!(
                probe.example().contains("must run"),
                "{} has no usage example",
                name
            );
        }
    }
}
