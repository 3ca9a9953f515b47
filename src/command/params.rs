//! Declarative parameter contracts for command handlers

use serde_json::{Map, Value};

/// Accepted shape of one argument
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamKind {
    Number { min: f64, max: f64 },
    Integer { min: i64, max: i64 },
    Text { max_len: usize },
    Choice(&'static [&'static str]),
    Bool,
    Object,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }
}

/// First contract violation found
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParamError {
    #[error("missing required argument '{0}'")]
    Missing(&'static str),

    #[error("unexpected argument '{0}'")]
    Unexpected(String),

    #[error("argument '{name}' must be {expected}")]
    WrongType { name: &'static str, expected: &'static str },

    #[error("argument '{name}' = {value} is outside [{min}, {max}]")]
    OutOfRange {
        name: &'static str,
        value: String,
        min: String,
        max: String,
    },

    #[error("argument '{name}' is longer than {max_len} characters")]
    TooLong { name: &'static str, max_len: usize },

    #[error("argument '{name}' must be one of: {allowed}")]
    NotAChoice { name: &'static str, allowed: String },
}

/// Check `args` against `specs`; unknown keys are rejected
pub fn validate(specs: &[ParamSpec], args: &Map<String, Value>) -> Result<(), ParamError> {
    if let Some(key) = args.keys().find(|k| !specs.iter().any(|s| s.name == k.as_str())) {
        return Err(ParamError::Unexpected(key.clone()));
    }

    for spec in specs {
        match args.get(spec.name) {
            None | Some(Value::Null) if spec.required => return Err(ParamError::Missing(spec.name)),
            None | Some(Value::Null) => continue,
            Some(value) => check(spec, value)?,
        }
    }
    Ok(())
}

fn check(spec: &ParamSpec, value: &Value) -> Result<(), ParamError> {
    let name = spec.name;
    let wrong = |expected| ParamError::WrongType { name, expected };

    match spec.kind {
        ParamKind::Number { min, max } => {
            let v = value.as_f64().ok_or_else(|| wrong("a number"))?;
            if !(min..=max).contains(&v) {
                return Err(ParamError::OutOfRange {
                    name,
                    value: v.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
            }
        }
        ParamKind::Integer { min, max } => {
            let v = value.as_i64().ok_or_else(|| wrong("an integer"))?;
            if !(min..=max).contains(&v) {
                return Err(ParamError::OutOfRange {
                    name,
                    value: v.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
            }
        }
        ParamKind::Text { max_len } => {
            let v = value.as_str().ok_or_else(|| wrong("a string"))?;
            if v.trim().is_empty() {
                return Err(wrong("a non-empty string"));
            }
            if v.chars().count() > max_len {
                return Err(ParamError::TooLong { name, max_len });
            }
        }
        ParamKind::Choice(allowed) => {
            let v = value.as_str().ok_or_else(|| wrong("a string"))?;
            if !allowed.contains(&v) {
                return Err(ParamError::NotAChoice {
                    name,
                    allowed: allowed.join(", "),
                });
            }
        }
        ParamKind::Bool => {
            value.as_bool().ok_or_else(|| wrong("a boolean"))?;
        }
        ParamKind::Object => {
            value.as_object().ok_or_else(|| wrong("an object"))?;
        }
    }
    Ok(())
}
