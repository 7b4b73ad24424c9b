//! Environment variable expansion for configuration values
//!
//! Hook commands, deployment locations and key paths may reference
//! environment variables with shell-style syntax:
//!
//! - `${VAR}` - required, error when unset or empty
//! - `${VAR:-default}` - fall back to `default` when unset or empty
//! - `$$` - literal `$`

use regex::{Captures, Regex};
use std::sync::LazyLock;
use thiserror::Error;

/// Cap on the expanded result so a pathological variable cannot balloon
/// a config value.
const MAX_EXPANDED: usize = 64 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvExpandError {
    #[error("environment variable '{0}' is not set")]
    Missing(String),

    #[error("environment variable '{0}' is empty")]
    Empty(String),

    #[error("expanded value exceeds {MAX_EXPANDED} bytes")]
    TooLarge,
}

static VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("static pattern")
});

static ESCAPED_DOLLAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\$").expect("static pattern"));

/// Expand `${VAR}` / `${VAR:-default}` / `$$` in a configuration string.
pub fn expand(input: &str) -> Result<String, EnvExpandError> {
    let mut err: Option<EnvExpandError> = None;

    let expanded = VAR_PATTERN.replace_all(input, |caps: &Captures<'_>| {
        let name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str());

        match std::env::var(name) {
            Ok(value) if !value.is_empty() => value,
            _ => match default {
                Some(d) => d.to_string(),
                None => {
                    if err.is_none() {
                        err = Some(match std::env::var(name) {
                            Ok(_) => EnvExpandError::Empty(name.to_string()),
                            Err(_) => EnvExpandError::Missing(name.to_string()),
                        });
                    }
                    String::new()
                }
            },
        }
    });

    if let Some(e) = err {
        return Err(e);
    }

    let result = ESCAPED_DOLLAR.replace_all(&expanded, "$").into_owned();
    if result.len() > MAX_EXPANDED {
        return Err(EnvExpandError::TooLarge);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn expands_set_variable() {
        std::env::set_var("GETCERT_TEST_VAR", "hello");
        assert_eq!(expand("x=${GETCERT_TEST_VAR}").unwrap(), "x=hello");
        std::env::remove_var("GETCERT_TEST_VAR");
    }

    #[test]
    #[serial]
    fn missing_variable_is_an_error() {
        std::env::remove_var("GETCERT_TEST_MISSING");
        assert_eq!(
            expand("${GETCERT_TEST_MISSING}"),
            Err(EnvExpandError::Missing("GETCERT_TEST_MISSING".to_string()))
        );
    }

    #[test]
    #[serial]
    fn default_applies_when_unset() {
        std::env::remove_var("GETCERT_TEST_UNSET");
        assert_eq!(expand("${GETCERT_TEST_UNSET:-fallback}").unwrap(), "fallback");
    }

    #[test]
    fn escaped_dollar_is_literal() {
        assert_eq!(expand("cost: $$5").unwrap(), "cost: $5");
    }

    #[test]
    fn plain_strings_pass_through() {
        assert_eq!(expand("/srv/www/html").unwrap(), "/srv/www/html");
    }
}
