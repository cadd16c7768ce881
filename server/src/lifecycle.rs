//! Process lifecycle: ordered startup and best-effort teardown.
//!
//! ```text
//! Uninitialized -> ConfiguringEnvironment -> Composing -> Running -> ShuttingDown -> Terminated
//! ```
//!
//! Startup resolves configuration, builds the session registry, then hands
//! both to `compose`. Teardown shuts down the session registry and then every
//! provider. Each step is guarded: a failure is logged and the next step runs.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::compose::{ComposeError, Composition, compose};
use crate::config::{ConfigurationResolver, ConfigurationView};
use crate::logging::LogHandle;
use crate::provider::{BUILTIN_PROVIDERS, ProviderRegistration, ProviderRegistry, ShutdownReport};
use crate::session::SessionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    ConfiguringEnvironment,
    Composing,
    Running,
    ShuttingDown,
    Terminated,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::ConfiguringEnvironment => "configuring environment",
            Self::Composing => "composing",
            Self::Running => "running",
            Self::ShuttingDown => "shutting down",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum LifecycleError {
    /// `start` was called after the coordinator had already started.
    InvalidState(LifecycleState),
    /// A required subsystem could not be built; startup was aborted.
    Composition(ComposeError),
}

impl std::fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidState(state) => write!(f, "cannot start while {state}"),
            Self::Composition(e) => write!(f, "startup aborted: {e}"),
        }
    }
}

impl std::error::Error for LifecycleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidState(_) => None,
            Self::Composition(e) => Some(e),
        }
    }
}

impl From<ComposeError> for LifecycleError {
    fn from(e: ComposeError) -> Self {
        Self::Composition(e)
    }
}

/// What teardown did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownSummary {
    /// True if this teardown shut the session registry down.
    pub sessions_shut_down: bool,
    pub providers: ShutdownReport,
}

/// Sequences startup and shutdown of the process's subsystems.
pub struct LifecycleCoordinator {
    resolver: ConfigurationResolver,
    registrations: Vec<ProviderRegistration>,
    logging: Option<LogHandle>,
    state: LifecycleState,
    config: Option<Arc<ConfigurationView>>,
    sessions: Option<Arc<SessionRegistry>>,
    providers: Option<Arc<ProviderRegistry>>,
}

impl LifecycleCoordinator {
    /// Coordinator using the built-in providers.
    #[must_use]
    pub fn new(resolver: ConfigurationResolver) -> Self {
        Self {
            resolver,
            registrations: BUILTIN_PROVIDERS.to_vec(),
            logging: None,
            state: LifecycleState::Uninitialized,
            config: None,
            sessions: None,
            providers: None,
        }
    }

    /// Replace the set of providers available for activation.
    #[must_use]
    pub fn with_registrations(mut self, registrations: Vec<ProviderRegistration>) -> Self {
        self.registrations = registrations;
        self
    }

    /// Apply `log-level` once configuration is resolved.
    #[must_use]
    pub fn with_logging(mut self, logging: LogHandle) -> Self {
        self.logging = Some(logging);
        self
    }

    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// Resolved configuration, once startup has reached it.
    #[must_use]
    pub const fn config(&self) -> Option<&Arc<ConfigurationView>> {
        self.config.as_ref()
    }

    /// The session registry, until teardown releases it.
    #[must_use]
    pub const fn sessions(&self) -> Option<&Arc<SessionRegistry>> {
        self.sessions.as_ref()
    }

    /// Active providers, until teardown releases them.
    #[must_use]
    pub const fn providers(&self) -> Option<&Arc<ProviderRegistry>> {
        self.providers.as_ref()
    }

    /// Bring the process up.
    ///
    /// # Post-conditions
    ///
    /// - On success the state is `Running`
    /// - On failure everything built so far has been torn down and the state
    ///   is `Terminated`
    ///
    /// # Errors
    ///
    /// - `LifecycleError::InvalidState` if called more than once
    /// - `LifecycleError::Composition` if a required subsystem cannot be built
    pub fn start(&mut self) -> Result<Composition, LifecycleError> {
        if self.state != LifecycleState::Uninitialized {
            return Err(LifecycleError::InvalidState(self.state));
        }

        self.transition(LifecycleState::ConfiguringEnvironment);
        let config = Arc::new(self.resolver.resolve());
        if let Some(logging) = &self.logging {
            logging.apply(&config);
        }
        self.config = Some(Arc::clone(&config));

        self.transition(LifecycleState::Composing);
        let sessions = SessionRegistry::from_config(&config);
        self.sessions = Some(Arc::clone(&sessions));

        match compose(config, sessions, &self.registrations) {
            Ok(composition) => {
                self.providers = Some(Arc::clone(&composition.providers));
                self.transition(LifecycleState::Running);
                Ok(composition)
            }
            Err(e) => {
                tracing::error!("Startup failed: {e}");
                self.teardown();
                Err(e.into())
            }
        }
    }

    /// Tear the process down.
    ///
    /// Never fails. Only the first call does any work; the state is always
    /// `Terminated` afterwards.
    pub fn stop(&mut self) -> ShutdownSummary {
        if self.state == LifecycleState::Terminated {
            tracing::debug!("Stop requested but already terminated");
            return ShutdownSummary::default();
        }
        if self.state != LifecycleState::Running {
            tracing::warn!("Stop requested while {}", self.state);
        }
        self.teardown()
    }

    fn teardown(&mut self) -> ShutdownSummary {
        self.transition(LifecycleState::ShuttingDown);

        let sessions_shut_down = self.sessions.take().is_some_and(|sessions| {
            std::panic::catch_unwind(AssertUnwindSafe(|| sessions.shutdown())).unwrap_or_else(|_| {
                tracing::error!("Session registry panicked during shutdown");
                false
            })
        });

        let providers = self
            .providers
            .take()
            .map(|providers| providers.shutdown())
            .unwrap_or_default();
        if !providers.failed.is_empty() {
            tracing::warn!(
                "{} of {} provider(s) failed to shut down cleanly: {}",
                providers.failed.len(),
                providers.attempted,
                providers.failed.join(", ")
            );
        }

        self.transition(LifecycleState::Terminated);
        ShutdownSummary {
            sessions_shut_down,
            providers,
        }
    }

    fn transition(&mut self, next: LifecycleState) {
        tracing::debug!("Lifecycle: {} -> {next}", self.state);
        self.state = next;
    }
}
