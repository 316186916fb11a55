//! The configuration-file parser.
//!
//! Given either an input file of text, or a single line of text,
//! protocol-tests are parsed and returned as instances of [`Test`].
//! Regardless of which sub-command is involved this is the sole place
//! tests are parsed.
//!
//! The parser is invoked with a callback so that the caller decides what
//! happens to each test: run it, dump it, or push it onto a queue.

use std::collections::{BTreeMap, HashMap};
use std::io::BufRead;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::ParseError;
use crate::probe::Registry;
use crate::test::Test;

fn macro_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Z0-9]+)\s+are\s+(.*)$").expect("macro pattern"))
}

fn test_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([^ \t]+)\s+must\s+run\s+(\S+)").expect("test pattern"))
}

fn args_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^(.*)\s+with\s+(\S+)\s+('.+'|".+"|\S+)"#).expect("argument pattern")
    })
}

/// Parser state: the macro table for one parse session.
///
/// Macros comprise a name and a list of hostnames; a macro used as a test
/// target expands to one test per host.
pub struct Parser<'r> {
    registry: &'r Registry,
    macros: HashMap<String, Vec<String>>,
}

impl<'r> Parser<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            macros: HashMap::new(),
        }
    }

    /// Parse the named file, invoking `cb` for every test found.
    ///
    /// `-` reads standard input. A file with any executable bit set is run
    /// and its stdout parsed instead of its bytes, which lets operators
    /// generate test sets dynamically.
    pub fn parse_file<F>(&mut self, filename: &str, cb: &mut F) -> Result<(), ParseError>
    where
        F: FnMut(Test) -> anyhow::Result<()>,
    {
        if filename == "-" {
            let stdin = std::io::stdin();
            return self.parse_reader(stdin.lock(), cb);
        }

        if is_executable(filename)? {
            let output = std::process::Command::new(filename).output()?;
            if !output.status.success() {
                return Err(ParseError::Generator {
                    path: filename.to_string(),
                    detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
            return self.parse_reader(&output.stdout[..], cb);
        }

        let file = std::fs::File::open(filename)?;
        self.parse_reader(std::io::BufReader::new(file), cb)
    }

    /// Parse a stream of lines, handling continuation and comments.
    pub fn parse_reader<R, F>(&mut self, reader: R, cb: &mut F) -> Result<(), ParseError>
    where
        R: BufRead,
        F: FnMut(Test) -> anyhow::Result<()>,
    {
        let mut line = String::new();

        for physical in reader.lines() {
            let physical = physical?;
            line.push_str(physical.trim());

            // A trailing backslash continues the line.
            if line.ends_with('\\') {
                line.pop();
                continue;
            }

            let assembled = line.trim().to_string();
            line.clear();

            if assembled.is_empty() || assembled.starts_with('#') {
                continue;
            }

            self.parse_line(&assembled, cb)?;
        }

        Ok(())
    }

    /// Parse a single line of text, invoking `cb` for every valid test.
    ///
    /// Returns `Ok(None)` for macro definitions and macro-target lines
    /// (which deliver their expanded tests through the callback), and the
    /// parsed test otherwise.
    pub fn parse_line<F>(&mut self, input: &str, cb: &mut F) -> Result<Option<Test>, ParseError>
    where
        F: FnMut(Test) -> anyhow::Result<()>,
    {
        // Macro definition?  Redefinition is fatal, it would be too
        // confusing otherwise.
        if let Some(caps) = macro_re().captures(input) {
            let name = caps[1].to_string();
            if self.macros.contains_key(&name) {
                return Err(ParseError::MacroRedefined(name));
            }
            let hosts = caps[2]
                .split(',')
                .map(|host| host.trim().to_string())
                .collect();
            self.macros.insert(name, hosts);
            return Ok(None);
        }

        let caps = test_re()
            .captures(input)
            .ok_or_else(|| ParseError::UnrecognizedLine(input.to_string()))?;
        let target = caps[1].to_string();
        let kind = caps[2].to_string();

        if self.registry.lookup(&kind).is_none() {
            return Err(ParseError::UnknownProtocol {
                kind,
                input: input.to_string(),
            });
        }

        // A macro target expands to one test per host, with the remainder
        // of the line unchanged. Hosts are not themselves re-expanded.
        if let Some(hosts) = self.macros.get(&target).cloned() {
            if !hosts.is_empty() {
                let rest = input[target.len()..].trim_start();
                for host in hosts {
                    let expanded = format!("{} {}", host, rest);
                    self.parse_single(&expanded, cb)?;
                }
                return Ok(None);
            }
        }

        self.parse_single(input, cb).map(Some)
    }

    /// Parse and validate one concrete (non-macro) test line.
    fn parse_single<F>(&self, input: &str, cb: &mut F) -> Result<Test, ParseError>
    where
        F: FnMut(Test) -> anyhow::Result<()>,
    {
        let caps = test_re()
            .captures(input)
            .ok_or_else(|| ParseError::UnrecognizedLine(input.to_string()))?;

        let kind = caps[2].to_string();
        let probe = self
            .registry
            .lookup(&kind)
            .ok_or_else(|| ParseError::UnknownProtocol {
                kind: kind.clone(),
                input: input.to_string(),
            })?;

        let mut test = Test {
            target: caps[1].to_string(),
            kind,
            input: input.to_string(),
            arguments: parse_arguments(input),
            max_retries: None,
        };

        let schema = probe.schema();
        for (name, value) in &test.arguments {
            let pattern =
                schema
                    .get(name.as_str())
                    .ok_or_else(|| ParseError::UnsupportedArgument {
                        name: name.clone(),
                        kind: test.kind.clone(),
                        input: input.to_string(),
                    })?;

            // An empty value means "argument present but empty", which is
            // always expressible.
            if value.is_empty() {
                continue;
            }

            let expr = Regex::new(pattern).expect("schema pattern must compile");
            if !expr.is_match(value) {
                return Err(ParseError::ArgumentValidationFailed {
                    name: name.clone(),
                    kind: test.kind.clone(),
                    input: input.to_string(),
                    pattern: (*pattern).to_string(),
                });
            }
        }

        if let Some(raw) = test.arguments.get("max-retries") {
            if !raw.is_empty() {
                test.max_retries =
                    Some(
                        raw.parse()
                            .map_err(|_| ParseError::ArgumentValidationFailed {
                                name: "max-retries".to_string(),
                                kind: test.kind.clone(),
                                input: input.to_string(),
                                pattern: "^[0-9]+$".to_string(),
                            })?,
                    );
            }
        }

        cb(test.clone()).map_err(ParseError::Callback)?;
        Ok(test)
    }
}

/// Extract the `with <name> <value>` options from a test line.
///
/// Scanning runs right to left: the trailing option is matched and
/// consumed, and the process repeats on the remaining prefix. The first
/// value stored for a name therefore wins, which means the *last*
/// occurrence in left-to-right reading overrides earlier ones. Values in
/// matching quotes have them removed.
pub fn parse_arguments(input: &str) -> BTreeMap<String, String> {
    let mut res = BTreeMap::new();
    let mut remainder = input.to_string();

    while let Some(caps) = args_re().captures(&remainder) {
        let prefix = caps[1].to_string();
        let name = caps[2].to_string();
        let mut value = caps[3].to_string();

        value = trim_quotes(&value, '\'');
        value = trim_quotes(&value, '"');

        res.entry(name).or_insert(value);
        remainder = prefix;
    }

    res
}

/// Remove matching quotes from around a string, if present.
///
/// `'steve'` becomes `steve`, but `'steve` stays unchanged as there are
/// no matching quotes around it.
fn trim_quotes(s: &str, c: char) -> String {
    if s.chars().count() >= 2 && s.starts_with(c) && s.ends_with(c) {
        s[c.len_utf8()..s.len() - c.len_utf8()].to_string()
    } else {
        s.to_string()
    }
}

#[cfg(unix)]
fn is_executable(path: &str) -> Result<bool, ParseError> {
    use std::os::unix::fs::PermissionsExt;

    let stat = std::fs::metadata(path)?;
    Ok(stat.is_file() && (stat.permissions().mode() & 0o111) != 0)
}

#[cfg(not(unix))]
fn is_executable(_path: &str) -> Result<bool, ParseError> {
    Ok(false)
}
