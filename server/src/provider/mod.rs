//! Authentication providers.
//!
//! A provider is a pluggable module that verifies credentials. Providers are
//! declared in an explicit registration list, activated once at startup in a
//! configured order, and shut down once at process teardown.
//!
//! # Selection
//!
//! - `auth-providers`: which registrations to activate (default `user-mapping`)
//! - `extension-priority`: providers to move to the front, in the listed order
//!
//! # Invariants
//!
//! - The registry's provider list never changes after activation
//! - `shutdown_all` calls each provider's `shutdown` at most once, in
//!   activation order, and never stops early

pub mod header;
pub mod user_mapping;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::{ConfigError, ConfigurationView, StringListProperty};

/// Registrations to activate, in order.
pub const AUTH_PROVIDERS: StringListProperty = StringListProperty::new("auth-providers");

/// Providers that should be consulted before all others.
pub const EXTENSION_PRIORITY: StringListProperty = StringListProperty::new("extension-priority");

/// Providers built into the binary.
pub const BUILTIN_PROVIDERS: &[ProviderRegistration] =
    &[user_mapping::REGISTRATION, header::REGISTRATION];

/// Errors raised by authentication providers.
#[derive(Debug)]
pub enum ProviderError {
    /// The provider's configuration is invalid.
    Configuration {
        provider: String,
        source: ConfigError,
    },
    /// The provider cannot serve requests.
    Unavailable { provider: String, message: String },
    /// The provider's shutdown hook failed.
    Shutdown { provider: String, message: String },
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration { provider, source } => {
                write!(f, "provider '{provider}' is misconfigured: {source}")
            }
            Self::Unavailable { provider, message } => {
                write!(f, "provider '{provider}' is unavailable: {message}")
            }
            Self::Shutdown { provider, message } => {
                write!(f, "provider '{provider}' failed to shut down: {message}")
            }
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Configuration { source, .. } => Some(source),
            Self::Unavailable { .. } | Self::Shutdown { .. } => None,
        }
    }
}

/// Credentials submitted with an authentication request.
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Request headers, keyed by lower-case name.
    headers: HashMap<String, String>,
}

impl Credentials {
    /// Credentials as submitted, where either part may be missing.
    #[must_use]
    pub fn new(username: Option<String>, password: Option<String>) -> Self {
        Self {
            username,
            password,
            headers: HashMap::new(),
        }
    }

    /// Credentials carrying a username and password.
    #[must_use]
    pub fn with_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            headers: HashMap::new(),
        }
    }

    /// Add a request header. Header names are case-insensitive.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Value of a request header, if present.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// An identity verified by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub username: String,
    /// Identifier of the provider that verified the identity.
    pub provider: String,
}

/// A pluggable authentication provider.
///
/// Activation happens in the provider's `ProviderRegistration::activate`.
/// `shutdown` must tolerate being called on a provider that never fully
/// started.
pub trait AuthenticationProvider: Send + Sync {
    /// Unique provider identifier, such as `"user-mapping"`.
    fn identifier(&self) -> &str;

    /// Verify `credentials`.
    ///
    /// Returns `Ok(None)` when the credentials are not accepted by this
    /// provider, leaving the decision to later providers.
    fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Option<AuthenticatedUser>, ProviderError>;

    /// Release any resources held by the provider.
    fn shutdown(&self) -> Result<(), ProviderError>;
}

/// Activation function for a provider.
pub type ActivateFn =
    fn(&ConfigurationView) -> Result<Arc<dyn AuthenticationProvider>, ProviderError>;

/// A provider known to the process, ready to be activated.
#[derive(Clone, Copy)]
pub struct ProviderRegistration {
    pub identifier: &'static str,
    pub activate: ActivateFn,
}

impl std::fmt::Debug for ProviderRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistration")
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

/// Outcome of draining the provider list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Providers whose shutdown hook was invoked.
    pub attempted: usize,
    /// Identifiers of providers whose shutdown returned an error or panicked.
    pub failed: Vec<String>,
}

/// Invoke `shutdown` on every provider, in order, continuing past failures.
///
/// Errors and panics are logged and recorded in the report; neither stops the
/// remaining providers from being shut down.
pub fn shutdown_all(providers: &[Arc<dyn AuthenticationProvider>]) -> ShutdownReport {
    let mut report = ShutdownReport::default();

    for provider in providers {
        let identifier = provider.identifier().to_string();
        report.attempted += 1;

        match std::panic::catch_unwind(AssertUnwindSafe(|| provider.shutdown())) {
            Ok(Ok(())) => {
                tracing::debug!("Provider '{identifier}' shut down");
            }
            Ok(Err(e)) => {
                tracing::warn!("Error shutting down provider '{identifier}': {e}");
                report.failed.push(identifier);
            }
            Err(_) => {
                tracing::warn!("Provider '{identifier}' panicked during shutdown");
                report.failed.push(identifier);
            }
        }
    }

    report
}

/// The ordered list of active providers.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn AuthenticationProvider>>,
    /// Set once `shutdown` has drained the list.
    drained: AtomicBool,
}

impl ProviderRegistry {
    /// Wrap providers that are already active.
    #[must_use]
    pub const fn from_providers(providers: Vec<Arc<dyn AuthenticationProvider>>) -> Self {
        Self {
            providers,
            drained: AtomicBool::new(false),
        }
    }

    /// Activate the providers selected by `config`.
    ///
    /// # Post-conditions
    ///
    /// - On success, providers appear in priority order
    /// - On failure, every provider activated so far has been shut down
    ///
    /// # Errors
    ///
    /// Returns the first activation error.
    pub fn activate(
        config: &ConfigurationView,
        registrations: &[ProviderRegistration],
    ) -> Result<Self, ProviderError> {
        let selected = select(config, registrations);
        let mut providers: Vec<Arc<dyn AuthenticationProvider>> =
            Vec::with_capacity(selected.len());

        for registration in selected {
            match (registration.activate)(config) {
                Ok(provider) => {
                    tracing::info!(
                        "Authentication provider '{}' activated",
                        registration.identifier
                    );
                    providers.push(provider);
                }
                Err(e) => {
                    tracing::error!(
                        "Authentication provider '{}' could not be activated: {e}",
                        registration.identifier
                    );
                    shutdown_all(&providers);
                    return Err(e);
                }
            }
        }

        Ok(Self::from_providers(providers))
    }

    /// Active providers in priority order.
    #[must_use]
    pub fn providers(&self) -> &[Arc<dyn AuthenticationProvider>] {
        &self.providers
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Ask each provider in turn; the first to accept wins.
    ///
    /// A provider error is logged and the next provider is consulted.
    #[must_use]
    pub fn authenticate(&self, credentials: &Credentials) -> Option<AuthenticatedUser> {
        if self.drained.load(Ordering::SeqCst) {
            return None;
        }

        for provider in &self.providers {
            match provider.authenticate(credentials) {
                Ok(Some(user)) => return Some(user),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        "Authentication provider '{}' failed: {e}",
                        provider.identifier()
                    );
                }
            }
        }
        None
    }

    /// Shut down every provider once.
    ///
    /// Later calls do nothing and return an empty report.
    pub fn shutdown(&self) -> ShutdownReport {
        if self.drained.swap(true, Ordering::SeqCst) {
            return ShutdownReport::default();
        }
        shutdown_all(&self.providers)
    }
}

/// Registrations named by `auth-providers`, ordered by `extension-priority`.
fn select<'a>(
    config: &ConfigurationView,
    registrations: &'a [ProviderRegistration],
) -> Vec<&'a ProviderRegistration> {
    let requested = config.get_or(&AUTH_PROVIDERS, vec![user_mapping::IDENTIFIER.to_string()]);
    let priority = config.get_or(&EXTENSION_PRIORITY, Vec::new());

    let mut selected: Vec<&ProviderRegistration> = Vec::with_capacity(requested.len());
    for name in &requested {
        match registrations.iter().find(|r| r.identifier == name) {
            Some(registration) if !selected.iter().any(|s| s.identifier == name) => {
                selected.push(registration);
            }
            Some(_) => {}
            None => tracing::warn!("Unknown authentication provider '{name}' ignored"),
        }
    }

    // Stable sort: unlisted providers keep their relative order after the listed ones
    selected.sort_by_key(|r| {
        priority
            .iter()
            .position(|p| p == r.identifier)
            .unwrap_or(usize::MAX)
    });
    selected
}
