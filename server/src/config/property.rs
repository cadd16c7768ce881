//! Typed property declarations.
//!
//! A property pairs a name with a parse rule. Declarations are `const` so they
//! can live next to the code that reads them:
//!
//! ```
//! use portico::config::{BooleanProperty, Property};
//!
//! const ENABLED: BooleanProperty = BooleanProperty::new("feature-enabled");
//! assert_eq!(ENABLED.parse("TRUE").ok(), Some(Some(true)));
//! ```

use std::path::PathBuf;

use super::ConfigError;

/// A named configuration property with a typed value.
pub trait Property {
    /// The parsed value type.
    type Value;

    /// The property name as it appears in `portico.properties`.
    fn name(&self) -> &str;

    /// Parse a raw value.
    ///
    /// Returns `Ok(None)` when the raw value should be treated as unset.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if `raw` is not a valid value.
    fn parse(&self, raw: &str) -> Result<Option<Self::Value>, ConfigError>;
}

fn invalid(name: &str, message: String) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        message,
    }
}

/// `true` or `false`, case-insensitive.
#[derive(Debug, Clone, Copy)]
pub struct BooleanProperty {
    name: &'static str,
}

impl BooleanProperty {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl Property for BooleanProperty {
    type Value = bool;

    fn name(&self) -> &str {
        self.name
    }

    fn parse(&self, raw: &str) -> Result<Option<bool>, ConfigError> {
        let value = raw.trim();
        if value.eq_ignore_ascii_case("true") {
            Ok(Some(true))
        } else if value.eq_ignore_ascii_case("false") {
            Ok(Some(false))
        } else {
            Err(invalid(
                self.name,
                format!("'{value}' is not a boolean (expected \"true\" or \"false\")"),
            ))
        }
    }
}

/// Non-negative decimal integer.
#[derive(Debug, Clone, Copy)]
pub struct IntegerProperty {
    name: &'static str,
}

impl IntegerProperty {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl Property for IntegerProperty {
    type Value = u64;

    fn name(&self) -> &str {
        self.name
    }

    fn parse(&self, raw: &str) -> Result<Option<u64>, ConfigError> {
        let value = raw.trim();
        value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| invalid(self.name, format!("'{value}' is not a non-negative integer")))
    }
}

/// Free-form string. An empty value is treated as unset.
#[derive(Debug, Clone, Copy)]
pub struct StringProperty {
    name: &'static str,
}

impl StringProperty {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl Property for StringProperty {
    type Value = String;

    fn name(&self) -> &str {
        self.name
    }

    fn parse(&self, raw: &str) -> Result<Option<String>, ConfigError> {
        let value = raw.trim();
        if value.is_empty() {
            return Ok(None);
        }
        Ok(Some(value.to_string()))
    }
}

/// Filesystem path. An empty value is treated as unset.
#[derive(Debug, Clone, Copy)]
pub struct PathProperty {
    name: &'static str,
}

impl PathProperty {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl Property for PathProperty {
    type Value = PathBuf;

    fn name(&self) -> &str {
        self.name
    }

    fn parse(&self, raw: &str) -> Result<Option<PathBuf>, ConfigError> {
        let value = raw.trim();
        if value.is_empty() {
            return Ok(None);
        }
        Ok(Some(PathBuf::from(value)))
    }
}

/// Comma-separated list. Items are trimmed and empty items dropped.
#[derive(Debug, Clone, Copy)]
pub struct StringListProperty {
    name: &'static str,
}

impl StringListProperty {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl Property for StringListProperty {
    type Value = Vec<String>;

    fn name(&self) -> &str {
        self.name
    }

    fn parse(&self, raw: &str) -> Result<Option<Vec<String>>, ConfigError> {
        Ok(Some(
            raw.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(ToString::to_string)
                .collect(),
        ))
    }
}
