//! Configuration module.
//!
//! This module provides configuration loading for the Portico web process.
//! Configuration is read from `portico.properties` inside the Portico home
//! directory and, when `enable-environment-properties` is `true` in that file,
//! from process environment variables.
//!
//! # Sources
//!
//! - `FileProperties`: `{home}/portico.properties` (optional)
//! - `EnvironmentProperties`: process environment, `foo-bar` read as `FOO_BAR`
//!
//! # Invariants
//!
//! - Sources are consulted in the order they were added; the first source
//!   defining a property wins
//! - A `ConfigurationView` is never modified once resolution completes
//! - A property requested with a default never fails

pub mod home;
pub mod property;
pub mod resolver;
pub mod source;

use std::path::PathBuf;

pub use home::resolve_home;
pub use property::{
    BooleanProperty, IntegerProperty, PathProperty, Property, StringListProperty, StringProperty,
};
pub use resolver::{CONFIG_FILE_NAME, ConfigurationResolver, ENABLE_ENVIRONMENT_PROPERTIES};
pub use source::{EnvironmentProperties, FileProperties, PropertySource};

/// Error returned when loading or reading configuration fails.
#[derive(Debug)]
pub enum ConfigError {
    /// A required property is not defined by any source.
    Missing(String),
    /// A property is defined but its value cannot be parsed.
    InvalidValue { name: String, message: String },
    /// A configuration file could not be read.
    Io { path: PathBuf, source: std::io::Error },
    /// The process environment contains a variable that cannot be mapped.
    MalformedEnvironment(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing(name) => write!(f, "missing required property: {name}"),
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
            Self::Io { path, source } => {
                write!(f, "unable to read {}: {source}", path.display())
            }
            Self::MalformedEnvironment(message) => {
                write!(f, "malformed environment: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Missing(_) | Self::InvalidValue { .. } | Self::MalformedEnvironment(_) => None,
        }
    }
}

/// Merged, queryable view over an ordered list of property sources.
///
/// # Invariants
///
/// - Lookups walk `sources` front to back and stop at the first hit
/// - `get_or` never fails; `get_required` fails only with `ConfigError::Missing`
///   or `ConfigError::InvalidValue`
#[derive(Debug, Default)]
pub struct ConfigurationView {
    /// Directory the file source was resolved against.
    home: PathBuf,
    sources: Vec<Box<dyn PropertySource>>,
}

impl ConfigurationView {
    /// Create an empty view rooted at `home`.
    #[must_use]
    pub fn new(home: PathBuf) -> Self {
        Self {
            home,
            sources: Vec::new(),
        }
    }

    /// The Portico home directory this view was resolved against.
    #[must_use]
    pub fn home(&self) -> &std::path::Path {
        &self.home
    }

    /// Append a source. Sources added earlier take precedence.
    pub fn add_source(&mut self, source: impl PropertySource + 'static) {
        tracing::debug!("adding configuration source: {}", source.describe());
        self.sources.push(Box::new(source));
    }

    /// Number of sources merged into this view.
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Raw value of `name` from the highest-precedence source defining it.
    #[must_use]
    pub fn raw(&self, name: &str) -> Option<String> {
        self.sources.iter().find_map(|source| source.value(name))
    }

    /// Read a typed property.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the property is defined but
    /// cannot be parsed. An undefined property is `Ok(None)`.
    pub fn get<P: Property>(&self, property: &P) -> Result<Option<P::Value>, ConfigError> {
        self.raw(property.name())
            .map_or(Ok(None), |raw| property.parse(&raw))
    }

    /// Read a typed property, falling back to `default`.
    ///
    /// A malformed value is logged and replaced by `default`.
    pub fn get_or<P: Property>(&self, property: &P, default: P::Value) -> P::Value {
        match self.get(property) {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(e) => {
                tracing::warn!("{e}; using default for \"{}\"", property.name());
                default
            }
        }
    }

    /// Read a property that must be defined.
    ///
    /// Every built-in property has a default. This is for providers registered
    /// from outside this crate that need a mandatory setting; they report the
    /// error from `activate` as `ProviderError::Configuration`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if no source defines the property, or
    /// `ConfigError::InvalidValue` if it cannot be parsed.
    pub fn get_required<P: Property>(&self, property: &P) -> Result<P::Value, ConfigError> {
        self.get(property)?
            .ok_or_else(|| ConfigError::Missing(property.name().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[derive(Debug)]
    struct MapSource(HashMap<String, String>);

    impl MapSource {
        fn of(pairs: &[(&str, &str)]) -> Self {
            Self(
                pairs
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            )
        }
    }

    impl PropertySource for MapSource {
        fn value(&self, name: &str) -> Option<String> {
            self.0.get(name).cloned()
        }

        fn describe(&self) -> String {
            "map".to_string()
        }
    }

    const FLAG: BooleanProperty = BooleanProperty::new("some-flag");
    const PORT: IntegerProperty = IntegerProperty::new("some-port");

    #[test]
    fn test_first_source_wins() {
        let mut view = ConfigurationView::new(PathBuf::from("/tmp"));
        view.add_source(MapSource::of(&[("foo", "1")]));
        view.add_source(MapSource::of(&[("foo", "2"), ("bar", "3")]));

        assert_eq!(view.raw("foo").as_deref(), Some("1"));
        assert_eq!(view.raw("bar").as_deref(), Some("3"));
        assert_eq!(view.source_count(), 2);
    }

    #[test]
    fn test_get_or_absent_returns_default() {
        let view = ConfigurationView::new(PathBuf::from("/tmp"));
        assert!(!view.get_or(&FLAG, false));
        assert_eq!(view.get_or(&PORT, 8080), 8080);
    }

    #[test]
    fn test_get_or_malformed_returns_default() {
        let mut view = ConfigurationView::new(PathBuf::from("/tmp"));
        view.add_source(MapSource::of(&[("some-flag", "yes please")]));
        assert!(!view.get_or(&FLAG, false));
        assert!(view.get(&FLAG).is_err());
    }

    #[test]
    fn test_get_required_missing() {
        let view = ConfigurationView::new(PathBuf::from("/tmp"));
        let error = view.get_required(&PORT).expect_err("should be missing");
        assert!(matches!(error, ConfigError::Missing(ref name) if name == "some-port"));
        assert_eq!(error.to_string(), "missing required property: some-port");
    }

    #[test]
    fn test_get_required_present() {
        let mut view = ConfigurationView::new(PathBuf::from("/tmp"));
        view.add_source(MapSource::of(&[("some-port", "4822")]));
        assert_eq!(view.get_required(&PORT).expect("defined"), 4822);
    }

    #[test]
    fn test_config_error_display_invalid() {
        let error = ConfigError::InvalidValue {
            name: "TEST_VAR".to_string(),
            message: "bad value".to_string(),
        };
        assert_eq!(error.to_string(), "invalid value for TEST_VAR: bad value");
    }
}
