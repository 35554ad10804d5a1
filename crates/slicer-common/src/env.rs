//! Typed environment variable lookup
//!
//! Unset variables fall back to the supplied default; variables that are set
//! but do not parse are reported instead of silently replaced.

use std::fmt::Display;
use std::str::FromStr;

use crate::error::{CommonError, Result};

/// Parse `name` from the environment, or return `default` when unset.
pub fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match parse_opt(name)? {
        Some(value) => Ok(value),
        None => Ok(default),
    }
}

/// Parse `name` from the environment, returning `None` when unset or blank.
pub fn parse_opt<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    let Ok(raw) = std::env::var(name) else {
        return Ok(None);
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    trimmed
        .parse()
        .map(Some)
        .map_err(|e: T::Err| CommonError::InvalidEnv {
            name: name.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        })
}

/// Read `name` as a string, or return `default` when unset.
pub fn string_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_parse_or_default_when_unset() {
        std::env::remove_var("SLICER_TEST_UNSET");
        assert_eq!(parse_or("SLICER_TEST_UNSET", 42u64).unwrap(), 42);
    }

    #[test]
    #[serial]
    fn test_parse_or_reads_value() {
        std::env::set_var("SLICER_TEST_NUM", " 17 ");
        assert_eq!(parse_or("SLICER_TEST_NUM", 0i64).unwrap(), 17);
        std::env::remove_var("SLICER_TEST_NUM");
    }

    #[test]
    #[serial]
    fn test_parse_rejects_garbage() {
        std::env::set_var("SLICER_TEST_BAD", "ten");
        let err = parse_or("SLICER_TEST_BAD", 0usize).unwrap_err();
        assert!(matches!(err, CommonError::InvalidEnv { ref name, .. } if name == "SLICER_TEST_BAD"));
        std::env::remove_var("SLICER_TEST_BAD");
    }

    #[test]
    #[serial]
    fn test_parse_opt_blank_is_none() {
        std::env::set_var("SLICER_TEST_BLANK", "  ");
        assert_eq!(parse_opt::<i64>("SLICER_TEST_BLANK").unwrap(), None);
        std::env::remove_var("SLICER_TEST_BLANK");
    }
}
