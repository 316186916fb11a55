//! Optional JSON configuration.
//!
//! The file is named by the `OVERSEER_CONFIG` environment variable; its
//! keys mirror the long-form flag names and fill in only flags the user
//! left unset.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub queue_host: Option<String>,
    pub queue_pass: Option<String>,
    pub tag: Option<String>,
    pub timeout: Option<String>,
    pub retry: Option<bool>,
    pub retry_count: Option<u32>,
    pub retry_delay: Option<String>,
    pub ipv4: Option<bool>,
    pub ipv6: Option<bool>,
    pub verbose: Option<bool>,
}

pub fn load() -> Option<Config> {
    let path = std::env::var("OVERSEER_CONFIG").ok()?;
    if path.is_empty() {
        return None;
    }
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

/// Parse `10s` / `500ms` / `2m` / bare seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let parse = |digits: &str| {
        digits
            .parse::<u64>()
            .map_err(|_| format!("invalid duration '{}'", raw))
    };

    if let Some(ms) = raw.strip_suffix("ms") {
        return parse(ms).map(Duration::from_millis);
    }
    if let Some(secs) = raw.strip_suffix('s') {
        return parse(secs).map(Duration::from_secs);
    }
    if let Some(mins) = raw.strip_suffix('m') {
        return parse(mins).map(|m| Duration::from_secs(m * 60));
    }
    parse(raw).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_forms() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
        assert!(parse_duration("fast").is_err());
    }

    #[test]
    fn config_keys_use_flag_names() {
        let cfg: Config = serde_json::from_str(
            r#"{"queue-host": "redis.example.com:6379", "retry-count": 3, "timeout": "30s"}"#,
        )
        .unwrap();
        assert_eq!(cfg.queue_host.as_deref(), Some("redis.example.com:6379"));
        assert_eq!(cfg.retry_count, Some(3));
        assert_eq!(cfg.timeout.as_deref(), Some("30s"));
        assert!(cfg.tag.is_none());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let cfg: Config = serde_json::from_str(r#"{"future-option": true}"#).unwrap();
        assert!(cfg.queue_host.is_none());
    }
}
