//! Principal binding and session issuance.
mod postgres;

pub use postgres::PostgresAccounts;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::directory::{Identity, Principal, ProviderInfo};
use crate::error::ServerError;

pub const SESSION_DESCRIPTION: &str = "session via active directory configuration";
const TOKEN_BYTES: usize = 32;

pub type Result<T> = std::result::Result<T, AccountError>;

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("account {0:?} does not exist")]
    NotFound(String),
    #[error("principal {principal} is already bound to another account")]
    PrincipalTaken { principal: String, account: String },
    #[error("SQL request failed: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("stored session is not valid: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Account behind the request being served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub account: String,
}

/// Local account principals get bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub name: String,
    pub display_name: String,
    pub principal_ids: Vec<String>,
}

/// Credential issued after a successful test-and-apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub account: String,
    pub principal: Principal,
    pub groups: Vec<Principal>,
    pub provider_info: ProviderInfo,
    pub description: String,
    /// `None` means session lifetime.
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Account and session collaborator.
#[async_trait]
pub trait AccountPort: Send + Sync {
    /// Resolve the caller owning an unexpired session `token`.
    async fn find_caller(&self, token: &str) -> Result<Option<Caller>>;

    /// Bind `principal` to the caller's account.
    async fn set_principal_on_caller(
        &self,
        caller: &Caller,
        principal: &Principal,
    ) -> Result<Account>;

    /// Store a new session.
    async fn create_session(&self, session: &Session) -> Result<()>;
}

/// Binds a resolved principal to the caller and mints its session.
pub struct SessionIssuer<'a> {
    accounts: &'a dyn AccountPort,
}

impl<'a> SessionIssuer<'a> {
    /// Create a new [`SessionIssuer`].
    pub fn new(accounts: &'a dyn AccountPort) -> Self {
        Self { accounts }
    }

    /// Bind `identity.user` to `caller`, then issue a session valid for
    /// `ttl` seconds (`0` for session lifetime).
    pub async fn bind_and_issue(
        &self,
        caller: &Caller,
        identity: Identity,
        ttl: u64,
    ) -> crate::error::Result<Session> {
        let account = self
            .accounts
            .set_principal_on_caller(caller, &identity.user)
            .await
            .map_err(|err| match err {
                err @ AccountError::PrincipalTaken { .. } => {
                    ServerError::InvalidInput(err.to_string())
                },
                AccountError::NotFound(_) => ServerError::Unauthorized,
                err => ServerError::internal("cannot bind principal to account", err),
            })?;

        let now = Utc::now();
        let session = Session {
            token: generate_token(),
            account: account.name,
            principal: identity.user,
            groups: identity.groups,
            provider_info: identity.provider_info,
            description: SESSION_DESCRIPTION.to_owned(),
            expires_at: expiry(now, ttl),
            created_at: now,
        };

        self.accounts
            .create_session(&session)
            .await
            .map_err(|err| ServerError::internal("cannot create session", err))?;

        tracing::info!(
            account = %session.account,
            principal = %session.principal.id,
            "session issued"
        );

        Ok(session)
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn expiry(now: DateTime<Utc>, ttl: u64) -> Option<DateTime<Utc>> {
    if ttl == 0 {
        return None;
    }

    let expires_at = i64::try_from(ttl)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);

    Some(expires_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::PROVIDER_NAME;
    use crate::memory::MemoryAccounts;

    fn identity() -> Identity {
        Identity {
            user: Principal::user("CN=John Doe,DC=example,DC=com", "John Doe", "jdoe"),
            groups: vec![Principal::group("CN=Admins,DC=example,DC=com", "Admins")],
            provider_info: ProviderInfo::new("ldap://dc1.example.com:389"),
        }
    }

    fn caller() -> Caller {
        Caller { account: "admin".into() }
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        assert_eq!(expiry(now, 0), None);
        assert_eq!(expiry(now, 60), Some(now + TimeDelta::seconds(60)));
        assert_eq!(expiry(now, u64::MAX), Some(DateTime::<Utc>::MAX_UTC));
        assert_eq!(expiry(now, i64::MAX as u64), Some(DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn test_token_is_random_hex() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[tokio::test]
    async fn test_bind_and_issue() {
        let accounts = MemoryAccounts::with_account("admin");
        let session = SessionIssuer::new(&accounts)
            .bind_and_issue(&caller(), identity(), 0)
            .await
            .unwrap();

        assert_eq!(session.account, "admin");
        assert_eq!(session.principal, identity().user);
        assert_eq!(session.groups, identity().groups);
        assert_eq!(session.description, SESSION_DESCRIPTION);
        assert!(session.expires_at.is_none());
        assert_eq!(session.provider_info.0["provider"], PROVIDER_NAME);

        let account = accounts.account("admin").await.unwrap();
        assert_eq!(account.principal_ids, vec![identity().user.id]);
        assert_eq!(accounts.sessions().await, vec![session.clone()]);
        assert_eq!(
            accounts.find_caller(&session.token).await.unwrap(),
            Some(caller())
        );
    }

    #[tokio::test]
    async fn test_principal_bound_elsewhere() {
        let accounts = MemoryAccounts::with_account("admin");
        accounts.insert_account("other", &[&identity().user.id]).await;

        let err = SessionIssuer::new(&accounts)
            .bind_and_issue(&caller(), identity(), 0)
            .await
            .unwrap_err();

        assert!(matches!(err, ServerError::InvalidInput(_)));
        assert!(accounts.sessions().await.is_empty());
    }
}
