//! Parameter validation (§4.9): typed coercion of path and search
//! parameters, with a fail-fast path-param validator and a "safe" variant
//! that collects every error instead of stopping at the first.

use std::collections::HashMap;

use regex::Regex;
use thiserror::Error;

use crate::matcher::{ParamValue, Params};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("parameter {0:?} is required but missing")]
    Missing(String),
    #[error("parameter {0:?} must be a number, got {1:?}")]
    NotANumber(String, String),
    #[error("parameter {0:?} must be an integer, got {1:?}")]
    NotAnInteger(String, String),
    #[error("parameter {0:?} must be a boolean, got {1:?}")]
    NotABoolean(String, String),
    #[error("parameter {0:?} must be one of {1:?}, got {2:?}")]
    NotInEnum(String, Vec<String>, String),
    #[error("parameter {0:?} must be at least {1} characters long, got {2}")]
    TooShort(String, usize, usize),
    #[error("parameter {0:?} must be at most {1} characters long, got {2}")]
    TooLong(String, usize, usize),
    #[error("parameter {0:?} does not match the required pattern")]
    PatternMismatch(String),
    #[error("parameter {0:?} must be at least {1}, got {2}")]
    TooSmall(String, f64, f64),
    #[error("parameter {0:?} must be at most {1}, got {2}")]
    TooLarge(String, f64, f64),
}

/// Constraints accepted by [`Validator::Str`] beyond "is a string".
#[derive(Debug, Clone, Default)]
pub struct StrOptions {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<Regex>,
}

/// Constraints accepted by [`Validator::Number`] beyond "parses as f64".
#[derive(Debug, Clone, Default)]
pub struct NumberOptions {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub integer: bool,
}

/// A validator for a single parameter. `List`, `Optional`, and `Default`
/// wrap another validator to compose behavior rather than duplicating it.
#[derive(Debug, Clone)]
pub enum Validator {
    Str(StrOptions),
    Number(NumberOptions),
    Boolean,
    Enum(Vec<String>),
    List(Box<Validator>),
    Optional(Box<Validator>),
    Default(Box<Validator>, String),
}

impl Validator {
    /// A plain string validator with no length or pattern constraint.
    pub fn str() -> Self {
        Validator::Str(StrOptions::default())
    }

    /// A plain number validator with no range or integer constraint.
    pub fn number() -> Self {
        Validator::Number(NumberOptions::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Validated {
    Str(String),
    Number(f64),
    Boolean(bool),
    List(Vec<Validated>),
    Missing,
}

/// A named, ordered set of path-parameter validators.
#[derive(Debug, Clone, Default)]
pub struct Schema(pub Vec<(String, Validator)>);

pub fn validate_param(validator: &Validator, raw: Option<&ParamValue>, name: &str) -> Result<Validated, ValidationError> {
    match validator {
        Validator::Optional(inner) => match raw {
            None => Ok(Validated::Missing),
            Some(_) => validate_param(inner, raw, name),
        },
        Validator::Default(inner, default) => match raw {
            None => validate_param(inner, Some(&ParamValue::Single(default.clone())), name),
            Some(_) => validate_param(inner, raw, name),
        },
        Validator::Str(options) => {
            let s = require_str(raw, name)?;
            if let Some(min) = options.min_length {
                if s.chars().count() < min {
                    return Err(ValidationError::TooShort(name.to_owned(), min, s.chars().count()));
                }
            }
            if let Some(max) = options.max_length {
                if s.chars().count() > max {
                    return Err(ValidationError::TooLong(name.to_owned(), max, s.chars().count()));
                }
            }
            if let Some(pattern) = &options.pattern {
                if !pattern.is_match(s) {
                    return Err(ValidationError::PatternMismatch(name.to_owned()));
                }
            }
            Ok(Validated::Str(s.to_owned()))
        }
        Validator::Number(options) => {
            let s = require_str(raw, name)?;
            let value = s.parse::<f64>().map_err(|_| ValidationError::NotANumber(name.to_owned(), s.to_owned()))?;
            if options.integer && value.fract() != 0.0 {
                return Err(ValidationError::NotAnInteger(name.to_owned(), s.to_owned()));
            }
            if let Some(min) = options.min {
                if value < min {
                    return Err(ValidationError::TooSmall(name.to_owned(), min, value));
                }
            }
            if let Some(max) = options.max {
                if value > max {
                    return Err(ValidationError::TooLarge(name.to_owned(), max, value));
                }
            }
            Ok(Validated::Number(value))
        }
        Validator::Boolean => {
            let s = require_str(raw, name)?;
            if s.eq_ignore_ascii_case("true") || s == "1" || s.eq_ignore_ascii_case("yes") {
                Ok(Validated::Boolean(true))
            } else if s.eq_ignore_ascii_case("false") || s == "0" || s.eq_ignore_ascii_case("no") {
                Ok(Validated::Boolean(false))
            } else {
                Err(ValidationError::NotABoolean(name.to_owned(), s.to_owned()))
            }
        }
        Validator::Enum(options) => {
            let s = require_str(raw, name)?;
            if options.iter().any(|o| o == s) {
                Ok(Validated::Str(s.to_owned()))
            } else {
                Err(ValidationError::NotInEnum(name.to_owned(), options.clone(), s.to_owned()))
            }
        }
        Validator::List(inner) => match raw {
            Some(ParamValue::List(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(validate_param(inner, Some(&ParamValue::Single(item.clone())), name)?);
                }
                Ok(Validated::List(out))
            }
            Some(ParamValue::Single(s)) => Ok(Validated::List(vec![validate_param(
                inner,
                Some(&ParamValue::Single(s.clone())),
                name,
            )?])),
            None => Err(ValidationError::Missing(name.to_owned())),
        },
    }
}

fn require_str<'a>(raw: Option<&'a ParamValue>, name: &str) -> Result<&'a str, ValidationError> {
    raw.and_then(ParamValue::as_str)
        .ok_or_else(|| ValidationError::Missing(name.to_owned()))
}

/// Validates every parameter in `schema` against `params`, stopping and
/// returning the first error encountered.
pub fn validate_path_params(schema: &Schema, params: &Params) -> Result<HashMap<String, Validated>, ValidationError> {
    let mut out = HashMap::new();
    for (name, validator) in &schema.0 {
        out.insert(name.clone(), validate_param(validator, params.get(name), name)?);
    }
    Ok(out)
}

/// As `validate_path_params`, but collects every error instead of
/// stopping at the first, for callers that want to report all problems
/// with a request at once.
pub fn validate_path_params_safe(schema: &Schema, params: &Params) -> (HashMap<String, Validated>, Vec<ValidationError>) {
    let mut out = HashMap::new();
    let mut errors = Vec::new();
    for (name, validator) in &schema.0 {
        match validate_param(validator, params.get(name), name) {
            Ok(v) => {
                out.insert(name.clone(), v);
            }
            Err(e) => errors.push(e),
        }
    }
    (out, errors)
}

/// Parses a `key=value&key=value` query string into `Params`, percent
/// decoding both keys and values. A key repeated more than once becomes a
/// `ParamValue::List`.
pub fn parse_search_params(query: &str) -> Params {
    let mut collected: HashMap<String, Vec<String>> = HashMap::new();
    for pair in query.split('&').filter(|s| !s.is_empty()) {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or("");
        let value = parts.next().unwrap_or("");
        let key = percent_encoding::percent_decode_str(key).decode_utf8_lossy().into_owned();
        let value = percent_encoding::percent_decode_str(value).decode_utf8_lossy().into_owned();
        collected.entry(key).or_default().push(value);
    }
    collected
        .into_iter()
        .map(|(k, mut values)| {
            if values.len() == 1 {
                (k, ParamValue::Single(values.pop().unwrap()))
            } else {
                (k, ParamValue::List(values))
            }
        })
        .collect()
}
