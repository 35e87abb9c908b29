use std::{fmt::Display, str::FromStr};

use thiserror::Error;

/// An environment variable required by the application is not set.
#[derive(Debug, Error)]
#[error("Missing environment variable: {0}")]
pub struct MissingEnvVarError(pub String);

/// An environment variable is set but its value does not parse into the expected type.
#[derive(Debug, Error)]
#[error("Invalid value for environment variable {name}: {message}")]
pub struct EnvParseError {
    pub name: String,
    pub message: String,
}

/// Reads an environment variable, returning a structured error if it's missing.
///
/// This is a thin wrapper around `std::env::var` that provides a more
/// ergonomic and specific error type for missing variables.
///
/// # Arguments
/// * `name` - The name of the environment variable to read.
pub fn get_env_var(name: &str) -> Result<String, MissingEnvVarError> {
    std::env::var(name).map_err(|_| MissingEnvVarError(name.to_string()))
}

/// Reads an optional override from the environment.
///
/// Returns `Ok(None)` when the variable is unset or blank, so callers can keep
/// their configured value. A present-but-unparseable value is an error rather
/// than being silently ignored.
pub fn env_override<T>(name: &str) -> Result<Option<T>, EnvParseError>
where
    T: FromStr,
    T::Err: Display,
{
    match get_env_var(name) {
        Ok(raw) => parse_override(name, &raw),
        Err(_) => Ok(None),
    }
}

fn parse_override<T>(name: &str, raw: &str) -> Result<Option<T>, EnvParseError>
where
    T: FromStr,
    T::Err: Display,
{
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed.parse::<T>().map(Some).map_err(|e| EnvParseError {
        name: name.to_string(),
        message: e.to_string(),
    })
}
