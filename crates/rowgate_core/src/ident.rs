//! Table and column name validation.
//!
//! Names are restricted to `[A-Za-z0-9_]`, must be non-empty and no longer
//! than a configured maximum. An [`Identifier`] can only be obtained through
//! validation, so every name stored in an
//! [`Operation`](crate::operation::Operation) has already passed it.

use crate::error::{CoreError, CoreResult};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Default maximum identifier length (matches common SQL engines).
pub const DEFAULT_MAX_IDENTIFIER_LEN: usize = 64;

/// Validates a table or column name.
pub fn validate_identifier(name: &str, max_len: usize) -> CoreResult<()> {
    if name.is_empty() {
        return Err(invalid(name, "must not be empty".to_string()));
    }
    if name.len() > max_len {
        return Err(invalid(
            name,
            format!("longer than {max_len} characters"),
        ));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
    {
        return Err(invalid(
            name,
            format!("contains disallowed character {bad:?}"),
        ));
    }
    Ok(())
}

fn invalid(name: &str, reason: String) -> CoreError {
    CoreError::InvalidIdentifier {
        name: name.to_string(),
        reason,
    }
}

/// A validated table or column name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Validates `name` against the default length limit.
    pub fn parse(name: impl Into<String>) -> CoreResult<Self> {
        Self::parse_with_limit(name, DEFAULT_MAX_IDENTIFIER_LEN)
    }

    /// Validates `name` against an explicit length limit.
    pub fn parse_with_limit(name: impl Into<String>, max_len: usize) -> CoreResult<Self> {
        let name = name.into();
        validate_identifier(&name, max_len)?;
        Ok(Self(name))
    }

    /// Returns the name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the identifier, returning the name.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Identifier {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for Identifier {
    type Error = CoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<String> for Identifier {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}
