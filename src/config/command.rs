//! Command file format.
//!
//! The command file is flat `KEY=value` text (`KEY: value` is accepted too,
//! and lines starting with `#` or `!` are comments). Recognized keys:
//!
//! - `COMMAND`: one of `PAUSE`, `RESUME`, `STOP`
//! - `THREAD-COUNT`: new worker count; non-positive values become 1
//!
//! Other keys are ignored here; the configuration layer reads them once at
//! startup.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Key carrying a live command.
pub const COMMAND_KEY: &str = "COMMAND";
/// Key carrying a live thread count.
pub const THREAD_COUNT_KEY: &str = "THREAD-COUNT";

/// Live directive for a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Stop starting new units.
    Pause,
    /// Start units again.
    Resume,
    /// End the run.
    Stop,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PAUSE" => Ok(Self::Pause),
            "RESUME" => Ok(Self::Resume),
            "STOP" => Ok(Self::Stop),
            other => Err(format!("unknown command `{other}`")),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pause => write!(f, "PAUSE"),
            Self::Resume => write!(f, "RESUME"),
            Self::Stop => write!(f, "STOP"),
        }
    }
}

/// Split properties-style text into normalized `KEY -> value` pairs.
///
/// Keys are upper-cased with `_` mapped to `-`; later duplicates win.
#[must_use]
pub fn parse_properties(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .filter_map(|line| {
            let split = line.find(['=', ':'])?;
            let key = normalize_key(&line[..split]);
            let value = line[split + 1..].trim().to_string();
            (!key.is_empty()).then_some((key, value))
        })
        .collect()
}

/// Normalize a configuration key: trimmed, upper case, `_` replaced by `-`.
#[must_use]
pub fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_uppercase().replace('_', "-")
}

/// Directives parsed from one read of the command file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandFile {
    /// Requested command, if any.
    pub command: Option<Command>,
    /// Requested thread count, normalized to at least 1.
    pub thread_count: Option<usize>,
    /// Values that were present but could not be understood.
    pub invalid: Vec<String>,
}

impl CommandFile {
    /// Parse command file text.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let properties = parse_properties(text);
        let mut parsed = Self::default();

        if let Some(value) = properties.get(COMMAND_KEY).filter(|v| !v.is_empty()) {
            match value.parse() {
                Ok(command) => parsed.command = Some(command),
                Err(e) => parsed.invalid.push(e),
            }
        }

        if let Some(value) = properties.get(THREAD_COUNT_KEY).filter(|v| !v.is_empty()) {
            match value.parse::<i64>() {
                Ok(n) => parsed.thread_count = Some(usize::try_from(n).unwrap_or(0).max(1)),
                Err(_) => parsed.invalid.push(format!("invalid {THREAD_COUNT_KEY} `{value}`")),
            }
        }

        parsed
    }

    /// Whether the file asked for anything.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.command.is_none() && self.thread_count.is_none()
    }
}
