//! Core types shared across the overseer workspace: parsed tests, execution
//! options, the probe contract with its protocol registry, and the
//! configuration-language parser.

pub mod error;
pub mod parser;
pub mod probe;
pub mod test;

pub use error::ParseError;
pub use parser::Parser;
pub use probe::{base_schema, Probe, Registry, Schema};
pub use test::{Options, Test, CENSORED};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!version().is_empty());
    }
}
