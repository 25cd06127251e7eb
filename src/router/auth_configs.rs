//! `/v3/authConfigs/{name}` action endpoint.

use std::str::FromStr;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;

use crate::config::Session as SessionConfig;
use crate::directory::TestAndApplyInput;
use crate::session::Caller;
use crate::{AppState, ServerError};

/// Actions callable on an auth config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    TestAndApply,
}

impl FromStr for Action {
    type Err = ServerError;

    fn from_str(action: &str) -> Result<Self, Self::Err> {
        match action {
            "testAndApply" => Ok(Action::TestAndApply),
            _ => Err(ServerError::ActionNotAvailable(action.to_owned())),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ActionQuery {
    action: Option<String>,
}

pub async fn handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Extension(caller): Extension<Caller>,
    query: Result<Query<ActionQuery>, QueryRejection>,
    body: Result<Json<TestAndApplyInput>, JsonRejection>,
) -> Result<Response, ServerError> {
    let Query(query) = query?;
    let action = query.action.unwrap_or_default();

    if name != state.config.provider {
        tracing::debug!(%name, %action, "action requested on unknown auth config");
        return Err(ServerError::ActionNotAvailable(action));
    }

    match action.parse::<Action>()? {
        Action::TestAndApply => {
            let Json(input) = body?;
            let session = state.handshake.test_and_apply(&caller, input).await?;

            let cookie = session_cookie(&state.config.session, &session.token)?;
            let mut response = Json(session.principal).into_response();
            response.headers_mut().insert(header::SET_COOKIE, cookie);

            Ok(response)
        },
    }
}

fn session_cookie(config: &SessionConfig, token: &str) -> Result<HeaderValue, ServerError> {
    let mut cookie = format!("{}={token}; Path=/; HttpOnly; SameSite=Lax", config.cookie);
    if config.secure {
        cookie.push_str("; Secure");
    }

    HeaderValue::from_str(&cookie).map_err(|err| ServerError::internal("invalid session cookie", err))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};

    use super::*;
    use crate::config::Configuration;
    use crate::directory::{PROVIDER_NAME, Principal};
    use crate::handshake::{DEFAULT_TIMEOUT, Handshake};
    use crate::memory::{MemoryAccounts, MemoryConfigStore, StaticDirectory};
    use crate::store::ConfigStore;
    use crate::{app, make_request};

    const PATH: &str = "/v3/authConfigs/activedirectory?action=testAndApply";

    struct Fixture {
        state: AppState,
        store: Arc<MemoryConfigStore>,
        accounts: Arc<MemoryAccounts>,
    }

    fn fixture() -> Fixture {
        let config = Arc::new(Configuration::default());
        let store = Arc::new(MemoryConfigStore::registered(PROVIDER_NAME));
        let accounts = Arc::new(MemoryAccounts::with_account("admin"));
        let directory = Arc::new(StaticDirectory::default().with_user("jdoe", "s3cret"));

        let handshake = Handshake {
            provider: config.provider.clone(),
            store: store.clone(),
            authenticator: directory,
            accounts: accounts.clone(),
            session_ttl: config.session.ttl,
            timeout: DEFAULT_TIMEOUT,
        };

        Fixture {
            state: AppState {
                config,
                handshake: Arc::new(handshake),
                accounts: accounts.clone(),
                metrics: None,
            },
            store,
            accounts,
        }
    }

    fn body(password: &str) -> String {
        json!({
            "servers": ["dc1.example.com"],
            "enabled": true,
            "userSearchBase": "dc=example,dc=com",
            "username": "jdoe",
            "password": password,
        })
        .to_string()
    }

    #[test]
    fn test_parse_action() {
        assert_eq!("testAndApply".parse::<Action>().unwrap(), Action::TestAndApply);
        assert!(matches!(
            "delete".parse::<Action>(),
            Err(ServerError::ActionNotAvailable(action)) if action == "delete"
        ));
    }

    #[test]
    fn test_session_cookie() {
        let mut config = SessionConfig::default();
        assert_eq!(
            session_cookie(&config, "abc").unwrap(),
            "R_SESS=abc; Path=/; HttpOnly; SameSite=Lax; Secure"
        );

        config.secure = false;
        config.cookie = "token".into();
        assert_eq!(
            session_cookie(&config, "abc").unwrap(),
            "token=abc; Path=/; HttpOnly; SameSite=Lax"
        );
    }

    #[tokio::test]
    async fn test_test_and_apply_handler() {
        let f = fixture();
        let app = app(f.state);

        let response = make_request(Some("admin"), app, Method::POST, PATH, body("s3cret")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let sessions = f.accounts.sessions().await;
        assert_eq!(sessions.len(), 1);

        let cookie = response.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with(&format!("R_SESS={};", sessions[0].token)));
        assert!(cookie.contains("HttpOnly"));

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let principal: Principal = serde_json::from_slice(&body).unwrap();
        assert_eq!(principal, sessions[0].principal);

        let stored = f.store.get(PROVIDER_NAME).await.unwrap().unwrap();
        assert!(stored.spec.enabled);
    }

    #[tokio::test]
    async fn test_wrong_password_is_unauthorized() {
        let f = fixture();
        let app = app(f.state);

        let response = make_request(Some("admin"), app, Method::POST, PATH, body("wrong")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(header::SET_COOKIE).is_none());

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["detail"], "invalid username or password");

        let stored = f.store.get(PROVIDER_NAME).await.unwrap().unwrap();
        assert!(!stored.spec.enabled);
    }

    #[tokio::test]
    async fn test_validation_error_is_bad_request() {
        let f = fixture();
        let app = app(f.state);

        let body = json!({ "servers": [], "username": "jdoe", "password": "s3cret" }).to_string();
        let response = make_request(Some("admin"), app, Method::POST, PATH, body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(f.accounts.sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_session_is_unauthorized() {
        let f = fixture();
        let app = app(f.state);

        let response = make_request(None, app, Method::POST, PATH, body("s3cret")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(f.accounts.sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_action_or_name() {
        let f = fixture();

        for path in [
            "/v3/authConfigs/activedirectory?action=disable",
            "/v3/authConfigs/activedirectory",
            "/v3/authConfigs/openldap?action=testAndApply",
        ] {
            let response =
                make_request(Some("admin"), app(f.state.clone()), Method::POST, path, body("s3cret"))
                    .await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{path}");
        }

        assert!(f.accounts.sessions().await.is_empty());
    }
}
