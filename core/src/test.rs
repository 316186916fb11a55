//! The parsed test record and the per-worker execution policy.

use std::collections::BTreeMap;
use std::time::Duration;

/// Replacement token used for password values in sanitised output.
pub const CENSORED: &str = "CENSORED";

/// A single test definition as identified by the parser.
///
/// Tests have the general form:
///
/// ```text
/// HOST must run PROTOCOL with ARG_NAME1 ARG_VALUE1 ..
/// ```
///
/// For example a simple test might read `1.2.3.4 must run ftp`, and to
/// change the port from the default the `port` argument could be given:
/// `1.2.3.4 must run ftp with port 2121`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Test {
    /// Target of the test; a hostname, IP literal, or URI.
    pub target: String,

    /// The protocol identifier, e.g. `ftp`.
    pub kind: String,

    /// A copy of the complete input-line the parser saw.
    pub input: String,

    /// Optional arguments supplied to the test, keyed by name.
    pub arguments: BTreeMap<String, String>,

    /// Overrides the worker's retry policy for this test, if set.
    pub max_retries: Option<u32>,
}

impl Test {
    /// Returns a display form of the test with any password censored.
    ///
    /// Result records and logs must always carry this form, never the raw
    /// input line.
    pub fn sanitize(&self) -> String {
        let mut res = format!("{} must run {}", self.target, self.kind);

        for (key, value) in &self.arguments {
            if key == "password" {
                res.push_str(&format!(" with password '{}'", CENSORED));
            } else {
                res.push_str(&format!(" with {} '{}'", key, value));
            }
        }

        res
    }
}

/// Options passed to every protocol probe, and to the worker pipeline.
#[derive(Debug, Clone)]
pub struct Options {
    /// Deadline applied to every network operation a probe performs.
    pub timeout: Duration,

    /// Emit diagnostic output while running.
    pub verbose: bool,

    /// Probe addresses of the corresponding family.
    pub ipv4: bool,
    pub ipv6: bool,

    /// Re-run failing tests before reporting a failure.
    pub retry: bool,

    /// Number of attempts when `retry` is enabled. Must be >= 1.
    pub retry_count: u32,

    /// Pause between attempts.
    pub retry_delay: Duration,

    /// Copied into every published result record.
    pub tag: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            verbose: false,
            ipv4: true,
            ipv6: true,
            retry: true,
            retry_count: 5,
            retry_delay: Duration::from_secs(5),
            tag: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Test {
        let mut arguments = BTreeMap::new();
        arguments.insert("port".to_string(), "2222".to_string());
        arguments.insert("password".to_string(), "s3cr3t".to_string());
        Test {
            target: "mail.example.com".to_string(),
            kind: "ssh".to_string(),
            input: "mail.example.com must run ssh with port 2222 with password 's3cr3t'".to_string(),
            arguments,
            max_retries: None,
        }
    }

    #[test]
    fn sanitize_censors_password() {
        let out = sample().sanitize();
        assert!(!out.contains("s3cr3t"));
        assert!(out.contains("with password 'CENSORED'"));
    }

    #[test]
    fn sanitize_keeps_other_arguments_sorted() {
        let out = sample().sanitize();
        assert_eq!(
            out,
            "mail.example.com must run ssh with password 'CENSORED' with port '2222'"
        );
    }

    #[test]
    fn sanitize_without_password_has_no_censor_token() {
        let mut t = sample();
        t.arguments.remove("password");
        assert!(!t.sanitize().contains(CENSORED));
    }

    #[test]
    fn default_options() {
        let opts = Options::default();
        assert_eq!(opts.retry_count, 5);
        assert_eq!(opts.retry_delay, Duration::from_secs(5));
        assert!(opts.ipv4 && opts.ipv6);
    }
}
