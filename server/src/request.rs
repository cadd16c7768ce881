//! Request layer: token issue, lookup and revocation over HTTP.
//!
//! - `POST /api/tokens` (form `username`, `password`): authenticate and start a session
//! - `GET /api/session` (header `Portico-Token`): describe the caller's session
//! - `DELETE /api/tokens/{token}`: end a session
//!
//! Every handler shares the process-wide `SessionRegistry` and
//! `ProviderRegistry` handed over at composition time.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    Form, Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ConfigurationView, IntegerProperty, Property, StringProperty};
use crate::provider::{Credentials, ProviderRegistry};
use crate::session::SessionRegistry;

/// Header carrying the session token on authenticated requests.
pub const TOKEN_HEADER: &str = "Portico-Token";

/// Address the HTTP listener binds to.
pub const LISTEN_ADDRESS: StringProperty = StringProperty::new("listen-address");

/// Port the HTTP listener binds to.
pub const LISTEN_PORT: IntegerProperty = IntegerProperty::new("listen-port");

pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_LISTEN_PORT: u16 = 8080;

/// Shared handles available to every handler.
#[derive(Clone)]
pub struct RequestState {
    sessions: Arc<SessionRegistry>,
    providers: Arc<ProviderRegistry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub auth_token: String,
    pub username: String,
    pub data_source: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub username: String,
    pub data_source: String,
}

/// Build the router over the shared registries.
pub fn router(sessions: Arc<SessionRegistry>, providers: Arc<ProviderRegistry>) -> Router {
    Router::new()
        .route("/api/tokens", post(create_token))
        .route("/api/tokens/{token}", delete(revoke_token))
        .route("/api/session", get(current_session))
        .with_state(RequestState {
            sessions,
            providers,
        })
}

/// Socket address configured by `listen-address` and `listen-port`.
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` if the address is not an IP address or
/// the port does not fit in 1-65535.
pub fn listen_address(config: &ConfigurationView) -> Result<SocketAddr, ConfigError> {
    let address = config.get_or(&LISTEN_ADDRESS, DEFAULT_LISTEN_ADDRESS.to_string());
    let ip: IpAddr = address.parse().map_err(|_| ConfigError::InvalidValue {
        name: LISTEN_ADDRESS.name().to_string(),
        message: format!("'{address}' is not an IP address"),
    })?;

    let port = config
        .get(&LISTEN_PORT)?
        .unwrap_or_else(|| u64::from(DEFAULT_LISTEN_PORT));
    let port = u16::try_from(port)
        .ok()
        .filter(|port| *port != 0)
        .ok_or_else(|| ConfigError::InvalidValue {
            name: LISTEN_PORT.name().to_string(),
            message: format!("'{port}' is not a valid port number (must be 1-65535)"),
        })?;

    Ok(SocketAddr::new(ip, port))
}

fn credentials_from(headers: &HeaderMap, form: LoginForm) -> Credentials {
    let mut credentials = Credentials::new(form.username, form.password);
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            credentials = credentials.with_header(name.as_str(), value);
        }
    }
    credentials
}

async fn create_token(
    State(state): State<RequestState>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Response {
    let credentials = credentials_from(&headers, form);

    let Some(user) = state.providers.authenticate(&credentials) else {
        tracing::info!(
            "Authentication attempt for {:?} rejected",
            credentials.username.as_deref().unwrap_or("<anonymous>")
        );
        return StatusCode::FORBIDDEN.into_response();
    };

    let username = user.username.clone();
    let data_source = user.provider.clone();
    match state.sessions.create(user) {
        Ok(auth_token) => {
            tracing::info!("User \"{username}\" authenticated via \"{data_source}\"");
            Json(TokenResponse {
                auth_token,
                username,
                data_source,
            })
            .into_response()
        }
        Err(e) => {
            tracing::warn!("Unable to start session for \"{username}\": {e}");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

async fn current_session(State(state): State<RequestState>, headers: HeaderMap) -> Response {
    let Some(token) = headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok()) else {
        return StatusCode::FORBIDDEN.into_response();
    };

    match state.sessions.get(token) {
        Ok(Some(session)) => Json(SessionResponse {
            username: session.user.username,
            data_source: session.user.provider,
        })
        .into_response(),
        Ok(None) => StatusCode::FORBIDDEN.into_response(),
        Err(e) => {
            tracing::error!("Session lookup failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn revoke_token(State(state): State<RequestState>, Path(token): Path<String>) -> StatusCode {
    match state.sessions.remove(&token) {
        Ok(Some(session)) => {
            tracing::info!("User \"{}\" logged out", session.user.username);
            StatusCode::NO_CONTENT
        }
        Ok(None) => StatusCode::NOT_FOUND,
        Err(e) => {
            tracing::error!("Session removal failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::provider::user_mapping::UserMappingProvider;
    use crate::provider::AuthenticationProvider;
    use crate::provider::tests::view;

    fn app() -> (Router, Arc<SessionRegistry>) {
        let sessions = SessionRegistry::from_config(&view(vec![]));
        let provider: Arc<dyn AuthenticationProvider> = Arc::new(UserMappingProvider::new(
            HashMap::from([("alice".to_string(), "secret".to_string())]),
        ));
        let providers = Arc::new(ProviderRegistry::from_providers(vec![provider]));
        (router(Arc::clone(&sessions), providers), sessions)
    }

    fn login(body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/tokens")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .expect("build request")
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("valid json")
    }

    #[tokio::test]
    async fn test_login_lookup_logout() {
        let (app, sessions) = app();

        let response = app
            .clone()
            .oneshot(login("username=alice&password=secret"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["username"], "alice");
        assert_eq!(body["dataSource"], "user-mapping");
        let token = body["authToken"].as_str().expect("token").to_string();
        assert_eq!(sessions.len(), 1);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/session")
                    .header(TOKEN_HEADER, &token)
                    .body(Body::empty())
                    .expect("build request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["username"], "alice");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/tokens/{token}"))
                    .body(Body::empty())
                    .expect("build request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(sessions.is_empty());

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/tokens/{token}"))
                    .body(Body::empty())
                    .expect("build request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        sessions.shutdown();
    }

    #[tokio::test]
    async fn test_bad_password_is_forbidden() {
        let (app, sessions) = app();
        let response = app
            .oneshot(login("username=alice&password=wrong"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(sessions.is_empty());
        sessions.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_token_is_forbidden() {
        let (app, sessions) = app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/session")
                    .header(TOKEN_HEADER, "not-a-token")
                    .body(Body::empty())
                    .expect("build request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        sessions.shutdown();
    }

    #[tokio::test]
    async fn test_login_after_shutdown_is_unavailable() {
        let (app, sessions) = app();
        sessions.shutdown();
        let response = app
            .oneshot(login("username=alice&password=secret"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_listen_address_defaults_and_overrides() {
        assert_eq!(
            listen_address(&view(vec![])).expect("valid"),
            SocketAddr::from(([127, 0, 0, 1], DEFAULT_LISTEN_PORT))
        );
        assert_eq!(
            listen_address(&view(vec![("listen-address", "0.0.0.0"), ("listen-port", "4567")]))
                .expect("valid"),
            SocketAddr::from(([0, 0, 0, 0], 4567))
        );
    }

    #[test]
    fn test_listen_address_rejects_invalid_values() {
        assert!(listen_address(&view(vec![("listen-address", "localhost")])).is_err());
        assert!(listen_address(&view(vec![("listen-port", "70000")])).is_err());
        assert!(listen_address(&view(vec![("listen-port", "0")])).is_err());
        assert!(listen_address(&view(vec![("listen-port", "eighty")])).is_err());
    }
}
