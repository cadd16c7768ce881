//! Explicit wiring of the process's subsystems.
//!
//! `compose` takes the resolved configuration and the session registry and
//! returns every handle the request layer needs. Providers are activated
//! here, so none can start before the session registry exists.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;

use crate::config::{ConfigError, ConfigurationView};
use crate::provider::{ProviderError, ProviderRegistration, ProviderRegistry};
use crate::request;
use crate::session::SessionRegistry;

/// Error returned when a required subsystem cannot be built.
#[derive(Debug)]
pub enum ComposeError {
    /// An authentication provider failed to activate.
    Provider(ProviderError),
}

impl std::fmt::Display for ComposeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provider(e) => write!(f, "authentication provider activation failed: {e}"),
        }
    }
}

impl std::error::Error for ComposeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Provider(e) => Some(e),
        }
    }
}

impl From<ProviderError> for ComposeError {
    fn from(e: ProviderError) -> Self {
        Self::Provider(e)
    }
}

/// The wired set of process-scoped handles.
#[derive(Clone)]
pub struct Composition {
    pub config: Arc<ConfigurationView>,
    pub sessions: Arc<SessionRegistry>,
    pub providers: Arc<ProviderRegistry>,
}

impl Composition {
    /// Request layer over this composition's registries.
    #[must_use]
    pub fn router(&self) -> Router {
        request::router(Arc::clone(&self.sessions), Arc::clone(&self.providers))
    }

    /// Address the request layer should listen on.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for a malformed address or port.
    pub fn listen_address(&self) -> Result<SocketAddr, ConfigError> {
        request::listen_address(&self.config)
    }
}

/// Activate providers and assemble the composition.
///
/// # Pre-conditions
///
/// - `sessions` is the one registry for this process
///
/// # Errors
///
/// Returns `ComposeError::Provider` if any selected provider fails to
/// activate. Providers activated before the failure have been shut down.
pub fn compose(
    config: Arc<ConfigurationView>,
    sessions: Arc<SessionRegistry>,
    registrations: &[ProviderRegistration],
) -> Result<Composition, ComposeError> {
    let providers = ProviderRegistry::activate(&config, registrations)?;
    if providers.is_empty() {
        tracing::warn!("No authentication providers are active; all logins will be refused");
    }

    Ok(Composition {
        config,
        sessions,
        providers: Arc::new(providers),
    })
}
