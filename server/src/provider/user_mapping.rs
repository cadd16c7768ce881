//! Username/password provider backed by a properties file.
//!
//! Each line of `{home}/user-mapping.properties` maps a username to a
//! password:
//!
//! ```text
//! alice = correct horse battery staple
//! bob   = hunter2
//! ```
//!
//! The `user-mapping` property overrides the file location.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use subtle::ConstantTimeEq;

use super::{
    AuthenticatedUser, AuthenticationProvider, Credentials, ProviderError, ProviderRegistration,
};
use crate::config::{ConfigurationView, FileProperties, PathProperty};

pub const IDENTIFIER: &str = "user-mapping";

/// Location of the user mapping file.
pub const USER_MAPPING: PathProperty = PathProperty::new("user-mapping");

/// File name used when `user-mapping` is not set.
pub const DEFAULT_FILE_NAME: &str = "user-mapping.properties";

pub const REGISTRATION: ProviderRegistration = ProviderRegistration {
    identifier: IDENTIFIER,
    activate,
};

fn activate(config: &ConfigurationView) -> Result<Arc<dyn AuthenticationProvider>, ProviderError> {
    let path = config
        .get(&USER_MAPPING)
        .map_err(|source| ProviderError::Configuration {
            provider: IDENTIFIER.to_string(),
            source,
        })?
        .unwrap_or_else(|| config.home().join(DEFAULT_FILE_NAME));

    let file = FileProperties::load(&path).map_err(|source| ProviderError::Configuration {
        provider: IDENTIFIER.to_string(),
        source,
    })?;

    let users: HashMap<String, String> = file
        .iter()
        .map(|(username, password)| (username.to_string(), password.to_string()))
        .collect();
    tracing::info!("Loaded {} user(s) from {}", users.len(), path.display());

    Ok(Arc::new(UserMappingProvider::new(users)))
}

/// Authenticates against a fixed username → password table.
#[derive(Debug)]
pub struct UserMappingProvider {
    /// Emptied on shutdown.
    users: RwLock<HashMap<String, String>>,
}

impl UserMappingProvider {
    #[must_use]
    pub const fn new(users: HashMap<String, String>) -> Self {
        Self {
            users: RwLock::new(users),
        }
    }
}

impl AuthenticationProvider for UserMappingProvider {
    fn identifier(&self) -> &str {
        IDENTIFIER
    }

    fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Option<AuthenticatedUser>, ProviderError> {
        let (Some(username), Some(password)) = (&credentials.username, &credentials.password)
        else {
            return Ok(None);
        };

        let accepted = self
            .users
            .read()
            .map_err(|_| ProviderError::Unavailable {
                provider: IDENTIFIER.to_string(),
                message: "user table lock poisoned".to_string(),
            })?
            .get(username)
            .is_some_and(|expected| bool::from(expected.as_bytes().ct_eq(password.as_bytes())));

        Ok(accepted.then(|| AuthenticatedUser {
            username: username.clone(),
            provider: IDENTIFIER.to_string(),
        }))
    }

    fn shutdown(&self) -> Result<(), ProviderError> {
        self.users
            .write()
            .map_err(|_| ProviderError::Shutdown {
                provider: IDENTIFIER.to_string(),
                message: "user table lock poisoned".to_string(),
            })?
            .clear();
        Ok(())
    }
}
