//! Configuration resolution.
//!
//! Resolution is best-effort and never fails:
//! 1. `{home}/portico.properties` is loaded if readable
//! 2. `enable-environment-properties` is read from what step 1 produced
//! 3. If enabled, environment variables are added as a second source
//!
//! Because the flag is read before the environment source exists, it can only
//! be enabled from the file.

use std::ffi::OsString;
use std::path::PathBuf;

use super::{BooleanProperty, ConfigurationView, EnvironmentProperties, FileProperties, Property};

/// Name of the configuration file inside the Portico home directory.
pub const CONFIG_FILE_NAME: &str = "portico.properties";

/// Whether environment variables fill in properties the file leaves unset.
pub const ENABLE_ENVIRONMENT_PROPERTIES: BooleanProperty =
    BooleanProperty::new("enable-environment-properties");

/// Where the environment source reads variables from.
#[derive(Debug, Clone)]
enum EnvironmentInput {
    Process,
    Fixed(Vec<(OsString, OsString)>),
}

/// Builds a `ConfigurationView` from the file and environment sources.
#[derive(Debug, Clone)]
pub struct ConfigurationResolver {
    home: PathBuf,
    environment: EnvironmentInput,
}

impl ConfigurationResolver {
    /// Resolver for `home` reading the process environment.
    #[must_use]
    pub const fn new(home: PathBuf) -> Self {
        Self {
            home,
            environment: EnvironmentInput::Process,
        }
    }

    /// Replace the process environment with a fixed set of variables.
    #[must_use]
    pub fn with_environment<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        self.environment = EnvironmentInput::Fixed(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Path of the configuration file this resolver reads.
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.home.join(CONFIG_FILE_NAME)
    }

    /// Resolve configuration.
    ///
    /// # Post-conditions
    ///
    /// - Always returns a view, possibly with no sources
    /// - The file source, when present, precedes the environment source
    #[must_use]
    pub fn resolve(&self) -> ConfigurationView {
        let mut view = ConfigurationView::new(self.home.clone());

        let path = self.config_file();
        match FileProperties::load(&path) {
            Ok(properties) => {
                tracing::info!(
                    "Read {} properties from {}",
                    properties.len(),
                    path.display()
                );
                view.add_source(properties);
            }
            Err(e) => {
                tracing::error!("Unable to read {CONFIG_FILE_NAME}: {e}");
                tracing::debug!("Error reading {CONFIG_FILE_NAME}: {e:?}");
            }
        }

        let enabled = match view.get(&ENABLE_ENVIRONMENT_PROPERTIES) {
            Ok(enabled) => enabled.unwrap_or(false),
            Err(e) => {
                tracing::error!("Unable to configure support for environment properties: {e}");
                tracing::debug!(
                    "Error reading \"{}\" property from {CONFIG_FILE_NAME}: {e:?}",
                    ENABLE_ENVIRONMENT_PROPERTIES.name()
                );
                false
            }
        };

        if enabled {
            match self.load_environment() {
                Ok(environment) => view.add_source(environment),
                Err(e) => {
                    tracing::error!("Unable to configure support for environment properties: {e}");
                }
            }
        }

        view
    }

    fn load_environment(&self) -> Result<EnvironmentProperties, super::ConfigError> {
        match &self.environment {
            EnvironmentInput::Process => EnvironmentProperties::from_process(),
            EnvironmentInput::Fixed(vars) => EnvironmentProperties::from_vars(vars.iter().cloned()),
        }
    }
}
