//! Test-and-apply: prove a proposed directory configuration live, then make
//! it the active one.
//!
//! Stages run in order and the first failure ends the request:
//!
//! `Validating → BuildingTrust → Authenticating → Persisting → BindingSession → Issued`
//!
//! The stored record is only written after the directory accepted the exact
//! credentials and trust material being committed, and a session is only
//! issued after the record was written.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::response::{IntoResponse, Response};
use tokio::time::{Instant, timeout_at};

use crate::directory::{DirectoryAuthenticator, TestAndApplyInput, TrustBuilder, validate};
use crate::error::ServerError;
use crate::session::{AccountPort, Caller, Session, SessionIssuer};
use crate::store::{ConfigPersister, ConfigStore};

/// Default request deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Position of a request in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    BuildingTrust,
    Authenticating,
    Persisting,
    BindingSession,
    Issued,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Validating => "validating",
            Stage::BuildingTrust => "building_trust",
            Stage::Authenticating => "authenticating",
            Stage::Persisting => "persisting",
            Stage::BindingSession => "binding_session",
            Stage::Issued => "issued",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure, with the stage it happened in.
#[derive(Debug, thiserror::Error)]
#[error("test-and-apply failed while {stage}: {error}")]
pub struct Failed {
    pub stage: Stage,
    #[source]
    pub error: ServerError,
}

impl IntoResponse for Failed {
    fn into_response(self) -> Response {
        self.error.into_response()
    }
}

impl From<Failed> for ServerError {
    fn from(failed: Failed) -> Self {
        failed.error
    }
}

/// Collaborators of the handshake, built once at start-up.
pub struct Handshake {
    /// Name of the stored provider record.
    pub provider: String,
    pub store: Arc<dyn ConfigStore>,
    pub authenticator: Arc<dyn DirectoryAuthenticator>,
    pub accounts: Arc<dyn AccountPort>,
    /// Session lifetime in seconds, `0` for session lifetime.
    pub session_ttl: u64,
    /// Budget for the whole request, covering both blocking stages.
    pub timeout: Duration,
}

impl Handshake {
    /// Validate, authenticate, persist, bind and issue a session for
    /// `caller`. Nothing is written unless authentication succeeded.
    pub async fn test_and_apply(
        &self,
        caller: &Caller,
        input: TestAndApplyInput,
    ) -> Result<Session, Failed> {
        let deadline = Instant::now() + self.timeout;
        let mut stage = Stage::Validating;

        let result = self.run(caller, input, deadline, &mut stage).await;

        metrics::counter!(
            "directory_test_and_apply_total",
            "outcome" => if result.is_ok() { "success" } else { "failure" },
            "stage" => stage.as_str(),
        )
        .increment(1);

        result.map_err(|error| {
            match &error {
                ServerError::Authentication(reason) => {
                    tracing::warn!(%stage, %reason, "directory rejected proposed configuration");
                },
                error => tracing::debug!(%stage, kind = error.kind(), %error, "test-and-apply failed"),
            }
            Failed { stage, error }
        })
    }

    async fn run(
        &self,
        caller: &Caller,
        input: TestAndApplyInput,
        deadline: Instant,
        stage: &mut Stage,
    ) -> Result<Session, ServerError> {
        validate(&input)?;

        advance(stage, Stage::BuildingTrust);
        let trust = TrustBuilder::build(input.config.certificate.as_deref())?;

        advance(stage, Stage::Authenticating);
        let identity = bounded(
            deadline,
            self.authenticator
                .login(&input.credentials, &input.config, &trust),
        )
        .await?;
        drop(trust);

        advance(stage, Stage::Persisting);
        let persister = ConfigPersister::new(self.store.as_ref(), &self.provider);
        let saved = bounded(deadline, async {
            persister.apply(input.config).await.map_err(|err| {
                ServerError::persistence("failed to save activedirectory config", err)
            })
        })
        .await?;

        tracing::info!(
            name = %saved.metadata.name,
            version = saved.metadata.resource_version,
            enabled = saved.spec.enabled,
            "activedirectory config applied"
        );

        advance(stage, Stage::BindingSession);
        let session = SessionIssuer::new(self.accounts.as_ref())
            .bind_and_issue(caller, identity, self.session_ttl)
            .await?;

        advance(stage, Stage::Issued);
        Ok(session)
    }
}

fn advance(stage: &mut Stage, next: Stage) {
    tracing::debug!(from = %stage, to = %next, "test-and-apply stage");
    *stage = next;
}

/// Abort `future` once `deadline` is reached.
async fn bounded<T>(
    deadline: Instant,
    future: impl Future<Output = Result<T, ServerError>>,
) -> Result<T, ServerError> {
    timeout_at(deadline, future)
        .await
        .unwrap_or(Err(ServerError::Timeout))
}
