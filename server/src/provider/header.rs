//! Provider trusting a username header set by an upstream proxy.
//!
//! Only enable this when every request reaches Portico through a proxy that
//! sets (and strips client-supplied copies of) the header.

use std::sync::Arc;

use super::{
    AuthenticatedUser, AuthenticationProvider, Credentials, ProviderError, ProviderRegistration,
};
use crate::config::{ConfigurationView, StringProperty};

pub const IDENTIFIER: &str = "header";

/// Name of the header carrying the authenticated username.
pub const HTTP_AUTH_HEADER: StringProperty = StringProperty::new("http-auth-header");

pub const DEFAULT_HEADER: &str = "REMOTE_USER";

pub const REGISTRATION: ProviderRegistration = ProviderRegistration {
    identifier: IDENTIFIER,
    activate,
};

#[allow(clippy::unnecessary_wraps)] // Signature fixed by `ActivateFn`
fn activate(config: &ConfigurationView) -> Result<Arc<dyn AuthenticationProvider>, ProviderError> {
    let header = config.get_or(&HTTP_AUTH_HEADER, DEFAULT_HEADER.to_string());
    tracing::info!("Trusting usernames from the \"{header}\" header");
    Ok(Arc::new(HeaderProvider { header }))
}

#[derive(Debug)]
pub struct HeaderProvider {
    header: String,
}

impl AuthenticationProvider for HeaderProvider {
    fn identifier(&self) -> &str {
        IDENTIFIER
    }

    fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Option<AuthenticatedUser>, ProviderError> {
        Ok(credentials
            .header(&self.header)
            .map(str::trim)
            .filter(|username| !username.is_empty())
            .map(|username| AuthenticatedUser {
                username: username.to_string(),
                provider: IDENTIFIER.to_string(),
            }))
    }

    fn shutdown(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}
