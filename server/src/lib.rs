// Life of the process:
// 1. Resolve configuration (file, then optionally environment variables)
// 2. Build the session registry from the resolved configuration
// 3. Compose: activate authentication providers, wire the request layer
// 4. Serve until a stop signal arrives
// 5. Tear down: session registry, then every provider, each best-effort
//
// System components:
//  - Configuration resolver and typed properties
//  - Session registry with background eviction
//  - Authentication provider registry
//  - Lifecycle coordinator
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod compose;
pub mod config;
pub mod lifecycle;
pub mod logging;
pub mod provider;
pub mod request;
pub mod session;

pub use compose::{Composition, compose};
pub use lifecycle::{LifecycleCoordinator, LifecycleError, LifecycleState};
