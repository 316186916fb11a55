//! Distributed synthetic monitoring: parse declarative test lines, probe
//! targets over many protocols, and publish structured results.

mod config;
mod runner;
mod worker;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use tracing::warn;

use config::{parse_duration, Config};
use overseer_core::{Options, Parser, Registry};
use queue::{Queue, RedisQueue, JOBS_KEY};

use runner::{run_test, ConsoleNotifier};

const DEFAULT_QUEUE: &str = "localhost:6379";

#[derive(Debug, ClapParser)]
#[command(name = "overseer", version, about = "Distributed synthetic monitoring")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,

    /// Parse configuration files and echo every expanded test
    Dump {
        #[arg(required = true)]
        files: Vec<String>,
    },

    /// Parse configuration files and append every test to the jobs queue
    Enqueue {
        /// Address of the queue
        #[arg(long)]
        queue_host: Option<String>,
        /// Password for the queue
        #[arg(long)]
        queue_pass: Option<String>,
        #[arg(required = true)]
        files: Vec<String>,
    },

    /// Execute tests from the given files locally, without a queue
    Local {
        /// Deadline for each network operation (e.g. 10s)
        #[arg(long, value_parser = parse_duration)]
        timeout: Option<Duration>,
        /// Re-run failing tests before reporting a failure
        #[arg(long)]
        retry: bool,
        /// Attempts per test when retrying
        #[arg(long)]
        retry_count: Option<u32>,
        /// Pause between attempts (e.g. 5s)
        #[arg(long, value_parser = parse_duration)]
        retry_delay: Option<Duration>,
        /// Probe only IPv4 addresses
        #[arg(short = '4', long = "ipv4")]
        only_ipv4: bool,
        /// Probe only IPv6 addresses
        #[arg(short = '6', long = "ipv6")]
        only_ipv6: bool,
        /// Show more output
        #[arg(long)]
        verbose: bool,
        #[arg(required = true)]
        files: Vec<String>,
    },

    /// Execute tests from the queue, until terminated
    Worker {
        /// Address of the queue
        #[arg(long)]
        queue_host: Option<String>,
        /// Password for the queue
        #[arg(long)]
        queue_pass: Option<String>,
        /// Copied into every published result
        #[arg(long)]
        tag: Option<String>,
        /// Attempts per failing test
        #[arg(long)]
        retry_count: Option<u32>,
        /// Pause between attempts (e.g. 5s)
        #[arg(long, value_parser = parse_duration)]
        retry_delay: Option<Duration>,
        /// Deadline for each network operation (e.g. 10s)
        #[arg(long, value_parser = parse_duration)]
        timeout: Option<Duration>,
        /// Probe only IPv4 addresses
        #[arg(short = '4', long = "ipv4")]
        only_ipv4: bool,
        /// Probe only IPv6 addresses
        #[arg(short = '6', long = "ipv6")]
        only_ipv6: bool,
        /// Show more output
        #[arg(long)]
        verbose: bool,
    },

    /// Show example usage of each protocol tester
    Examples {
        /// Only show protocols matching this pattern
        pattern: Option<String>,
    },
}

/// Flag values feeding into one [`Options`], before config merging.
#[derive(Debug, Default)]
struct Policy {
    timeout: Option<Duration>,
    retry: Option<bool>,
    retry_count: Option<u32>,
    retry_delay: Option<Duration>,
    only_ipv4: bool,
    only_ipv6: bool,
    verbose: bool,
    tag: Option<String>,
}

/// Merge flags over config over defaults. Flags win; config fills only
/// what the user left unset.
fn build_options(cfg: &Config, policy: Policy, default_retry: bool) -> Result<Options> {
    let defaults = Options::default();

    let timeout = match policy.timeout {
        Some(t) => t,
        None => match &cfg.timeout {
            Some(raw) => parse_duration(raw).map_err(anyhow::Error::msg)?,
            None => defaults.timeout,
        },
    };
    let retry_delay = match policy.retry_delay {
        Some(d) => d,
        None => match &cfg.retry_delay {
            Some(raw) => parse_duration(raw).map_err(anyhow::Error::msg)?,
            None => defaults.retry_delay,
        },
    };

    let (ipv4, ipv6) = match (policy.only_ipv4, policy.only_ipv6) {
        (true, false) => (true, false),
        (false, true) => (false, true),
        _ => (cfg.ipv4.unwrap_or(true), cfg.ipv6.unwrap_or(true)),
    };

    Ok(Options {
        timeout,
        verbose: policy.verbose || cfg.verbose.unwrap_or(false),
        ipv4,
        ipv6,
        retry: policy.retry.or(cfg.retry).unwrap_or(default_retry),
        retry_count: policy
            .retry_count
            .or(cfg.retry_count)
            .unwrap_or(defaults.retry_count)
            .max(1),
        retry_delay,
        tag: policy.tag.or_else(|| cfg.tag.clone()),
    })
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .init();
}

fn queue_address(flag: Option<String>, cfg: &Config) -> String {
    flag.or_else(|| cfg.queue_host.clone())
        .unwrap_or_else(|| DEFAULT_QUEUE.to_string())
}

fn show_examples(registry: &Registry, filter: &str) -> Result<()> {
    let expr = regex::Regex::new(filter).context("invalid pattern")?;

    for name in registry.names() {
        if !expr.is_match(&name) {
            continue;
        }
        let probe = match registry.lookup(&name) {
            Some(probe) => probe,
            None => continue,
        };

        println!("{}", probe.example());
        println!("Optional arguments which are supported are now shown:");
        println!();
        println!("  {:>12}|{}", "Name", "Valid Value");
        println!("  ----------------------------------");
        let mut args: Vec<_> = probe.schema().into_iter().collect();
        args.sort();
        for (arg, pattern) in args {
            println!("  {:>12}|{}", arg, pattern);
        }
        println!();
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load().unwrap_or_default();

    let registry = overseer_core::probe::global();
    probes::register_all(registry);

    match cli.command {
        Commands::Version => {
            println!(
                "overseer {} (core {})",
                env!("CARGO_PKG_VERSION"),
                overseer_core::version()
            );
        }

        Commands::Dump { files } => {
            for file in files {
                let mut parser = Parser::new(registry);
                parser
                    .parse_file(&file, &mut |test| {
                        println!("{}", test.input);
                        Ok(())
                    })
                    .with_context(|| format!("error parsing {}", file))?;
            }
        }

        Commands::Enqueue {
            queue_host,
            queue_pass,
            files,
        } => {
            init_logging(false);
            let host = queue_address(queue_host, &cfg);
            let pass = queue_pass.or_else(|| cfg.queue_pass.clone());

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async move {
                let mut jobs = RedisQueue::connect(&host, pass.as_deref())
                    .await
                    .context("queue connection failed")?;

                for file in files {
                    let mut parser = Parser::new(registry);
                    let mut tests = Vec::new();
                    parser
                        .parse_file(&file, &mut |test| {
                            tests.push(test);
                            Ok(())
                        })
                        .with_context(|| format!("error parsing {}", file))?;

                    for test in tests {
                        jobs.push(JOBS_KEY, &test.input).await?;
                    }
                }
                Ok::<_, anyhow::Error>(())
            })?;
        }

        Commands::Local {
            timeout,
            retry,
            retry_count,
            retry_delay,
            only_ipv4,
            only_ipv6,
            verbose,
            files,
        } => {
            init_logging(verbose);
            let opts = build_options(
                &cfg,
                Policy {
                    timeout,
                    retry: if retry { Some(true) } else { None },
                    retry_count,
                    retry_delay,
                    only_ipv4,
                    only_ipv6,
                    verbose,
                    tag: None,
                },
                false,
            )?;

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async move {
                let emitter = metrics::Emitter::from_env();
                let mut notifier = ConsoleNotifier;

                for file in files {
                    let mut parser = Parser::new(registry);
                    let mut tests = Vec::new();
                    parser
                        .parse_file(&file, &mut |test| {
                            tests.push(test);
                            Ok(())
                        })
                        .with_context(|| format!("error parsing {}", file))?;

                    for test in tests {
                        if let Err(e) =
                            run_test(&test, &opts, registry, &mut notifier, emitter.as_ref()).await
                        {
                            warn!("test execution failed: {:#}", e);
                        }
                    }
                }
                Ok::<_, anyhow::Error>(())
            })?;
        }

        Commands::Worker {
            queue_host,
            queue_pass,
            tag,
            retry_count,
            retry_delay,
            timeout,
            only_ipv4,
            only_ipv6,
            verbose,
        } => {
            init_logging(verbose);
            let opts = build_options(
                &cfg,
                Policy {
                    timeout,
                    retry: None,
                    retry_count,
                    retry_delay,
                    only_ipv4,
                    only_ipv6,
                    verbose,
                    tag,
                },
                true,
            )?;
            let host = queue_address(queue_host, &cfg);
            let pass = queue_pass.or_else(|| cfg.queue_pass.clone());

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(worker::run(opts, &host, pass.as_deref(), registry))?;
        }

        Commands::Examples { pattern } => {
            show_examples(registry, pattern.as_deref().unwrap_or(".*"))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_config() {
        let cfg = Config {
            timeout: Some("30s".to_string()),
            retry_count: Some(9),
            tag: Some("from-config".to_string()),
            ..Config::default()
        };
        let policy = Policy {
            timeout: Some(Duration::from_secs(3)),
            tag: Some("from-flag".to_string()),
            ..Policy::default()
        };

        let opts = build_options(&cfg, policy, true).unwrap();
        assert_eq!(opts.timeout, Duration::from_secs(3));
        assert_eq!(opts.retry_count, 9);
        assert_eq!(opts.tag.as_deref(), Some("from-flag"));
    }

    #[test]
    fn config_fills_unset_flags() {
        let cfg = Config {
            timeout: Some("30s".to_string()),
            retry: Some(false),
            ..Config::default()
        };

        let opts = build_options(&cfg, Policy::default(), true).unwrap();
        assert_eq!(opts.timeout, Duration::from_secs(30));
        assert!(!opts.retry);
    }

    #[test]
    fn family_flags_select_a_single_family() {
        let cfg = Config::default();

        let opts = build_options(
            &cfg,
            Policy {
                only_ipv4: true,
                ..Policy::default()
            },
            true,
        )
        .unwrap();
        assert!(opts.ipv4 && !opts.ipv6);

        let opts = build_options(
            &cfg,
            Policy {
                only_ipv6: true,
                ..Policy::default()
            },
            true,
        )
        .unwrap();
        assert!(!opts.ipv4 && opts.ipv6);

        let opts = build_options(&cfg, Policy::default(), true).unwrap();
        assert!(opts.ipv4 && opts.ipv6);
    }

    #[test]
    fn retry_count_is_clamped_to_at_least_one() {
        let cfg = Config {
            retry_count: Some(0),
            ..Config::default()
        };
        let opts = build_options(&cfg, Policy::default(), true).unwrap();
        assert_eq!(opts.retry_count, 1);
    }

    #[test]
    fn queue_address_fallbacks() {
        let cfg = Config {
            queue_host: Some("redis.internal:6379".to_string()),
            ..Config::default()
        };
        assert_eq!(
            queue_address(Some("flag:6379".to_string()), &cfg),
            "flag:6379"
        );
        assert_eq!(queue_address(None, &cfg), "redis.internal:6379");
        assert_eq!(queue_address(None, &Config::default()), DEFAULT_QUEUE);
    }
}
