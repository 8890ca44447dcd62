//! Directive line parsing: `[-np N] [--info] [--time]`.

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectiveError {
    #[error("unbalanced quotes in directive: {line}")]
    UnbalancedQuotes { line: String },

    #[error("-np expects a process count")]
    MissingProcessCount,

    #[error("invalid process count '{value}' for -np")]
    InvalidProcessCount { value: String },

    #[error("process count must be at least 1")]
    ZeroProcessCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Normal,
    Info,
    Timed,
}

/// Options recognized on a directive line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Directive {
    pub process_count: usize,
    pub mode: Mode,
}

impl Directive {
    pub fn parse(line: &str, default_np: usize) -> Result<Self, DirectiveError> {
        let tokens = shlex::split(line).ok_or_else(|| DirectiveError::UnbalancedQuotes {
            line: line.to_string(),
        })?;

        let process_count = match tokens.iter().position(|t| t == "-np") {
            Some(i) => {
                let raw = tokens.get(i + 1).ok_or(DirectiveError::MissingProcessCount)?;
                let n = raw
                    .parse::<usize>()
                    .map_err(|_| DirectiveError::InvalidProcessCount { value: raw.clone() })?;
                if n == 0 {
                    return Err(DirectiveError::ZeroProcessCount);
                }
                n
            }
            None => default_np.max(1),
        };

        let info = tokens.iter().any(|t| t == "--info");
        let time = tokens.iter().any(|t| t == "--time");
        let mode = if info {
            Mode::Info
        } else if time {
            Mode::Timed
        } else {
            Mode::Normal
        };

        Ok(Self { process_count, mode })
    }
}

/// One dispatch: constructed, executed, discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub process_count: usize,
    pub mode: Mode,
    pub source_text: String,
    pub environment_overrides: BTreeMap<String, String>,
}

impl ExecutionRequest {
    pub fn new(directive: Directive, source_text: impl Into<String>) -> Self {
        Self {
            process_count: directive.process_count,
            mode: directive.mode,
            source_text: source_text.into(),
            environment_overrides: BTreeMap::new(),
        }
    }

    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment_overrides.insert(key.into(), value.into());
        self
    }
}
