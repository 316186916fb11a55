use thiserror::Error;

/// Failures raised while parsing test definitions.
///
/// Every variant carries enough of the offending input to make the log
/// line actionable on its own.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Unrecognized line - '{0}'")]
    UnrecognizedLine(String),

    #[error("Unknown test-type '{kind}' in input '{input}'")]
    UnknownProtocol { kind: String, input: String },

    #[error("Unsupported argument '{name}' for test-type '{kind}' in input '{input}'")]
    UnsupportedArgument {
        name: String,
        kind: String,
        input: String,
    },

    #[error("Argument '{name}' for test-type '{kind}' in input '{input}' did not match pattern '{pattern}'")]
    ArgumentValidationFailed {
        name: String,
        kind: String,
        input: String,
        pattern: String,
    },

    #[error("Redeclaring an existing macro is a fatal error, {0} exists already")]
    MacroRedefined(String),

    #[error("Generator {path} failed: {detail}")]
    Generator { path: String, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Callback failed: {0}")]
    Callback(anyhow::Error),
}
