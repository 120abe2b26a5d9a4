use crate::error::WorkerError;
use std::str::FromStr;

/// Reads and parses an optional environment variable.
pub(crate) fn var<T>(name: &str) -> Result<Option<T>, WorkerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| WorkerError::config(format!("invalid value for {name}: {e}"))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(WorkerError::config(format!("invalid value for {name}: {e}"))),
    }
}
