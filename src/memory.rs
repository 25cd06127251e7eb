//! In-memory collaborators. MUST NEVER be used in production.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::directory::{
    API_VERSION, ActiveDirectoryConfig, CONFIG_TYPE, Credentials, DirectoryAuthenticator,
    DirectoryConfig, Identity, KIND, ObjectMeta, Principal, ProviderInfo, TrustAnchors,
};
use crate::error::{Result as ServerResult, ServerError};
use crate::session::{self, Account, AccountError, AccountPort, Caller, Session};
use crate::store::{self, ConfigStore, StoreError};

/// Versioned map of configuration records.
#[derive(Default)]
pub struct MemoryConfigStore {
    records: RwLock<HashMap<String, ActiveDirectoryConfig>>,
}

impl MemoryConfigStore {
    /// Store with a disabled record, as created at provider registration.
    pub fn registered(name: &str) -> Self {
        let record = ActiveDirectoryConfig {
            api_version: API_VERSION.to_owned(),
            kind: KIND.to_owned(),
            r#type: CONFIG_TYPE.to_owned(),
            metadata: ObjectMeta {
                name: name.to_owned(),
                resource_version: 1,
                created_at: Utc::now(),
            },
            spec: DirectoryConfig::default(),
        };

        Self {
            records: RwLock::new(HashMap::from([(name.to_owned(), record)])),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, name: &str) -> store::Result<Option<ActiveDirectoryConfig>> {
        Ok(self.records.read().await.get(name).cloned())
    }

    async fn update(
        &self,
        name: &str,
        record: &ActiveDirectoryConfig,
    ) -> store::Result<ActiveDirectoryConfig> {
        let mut records = self.records.write().await;
        let stored = records
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_owned()))?;

        if stored.metadata.resource_version != record.metadata.resource_version {
            return Err(StoreError::Conflict {
                name: name.to_owned(),
                expected: record.metadata.resource_version,
            });
        }

        let mut updated = record.clone();
        updated.metadata.resource_version += 1;
        *stored = updated.clone();

        Ok(updated)
    }
}

/// Store whose writes always fail.
pub struct BrokenConfigStore(pub MemoryConfigStore);

#[async_trait]
impl ConfigStore for BrokenConfigStore {
    async fn get(&self, name: &str) -> store::Result<Option<ActiveDirectoryConfig>> {
        self.0.get(name).await
    }

    async fn update(
        &self,
        name: &str,
        _record: &ActiveDirectoryConfig,
    ) -> store::Result<ActiveDirectoryConfig> {
        Err(StoreError::Sql(sqlx::Error::Protocol(format!(
            "cannot write {name}"
        ))))
    }
}

/// Store whose writes never complete.
pub struct HangingConfigStore(pub MemoryConfigStore);

#[async_trait]
impl ConfigStore for HangingConfigStore {
    async fn get(&self, name: &str) -> store::Result<Option<ActiveDirectoryConfig>> {
        self.0.get(name).await
    }

    async fn update(
        &self,
        _name: &str,
        _record: &ActiveDirectoryConfig,
    ) -> store::Result<ActiveDirectoryConfig> {
        std::future::pending().await
    }
}

#[derive(Default)]
struct AccountsState {
    accounts: HashMap<String, Account>,
    sessions: Vec<Session>,
}

/// Accounts and sessions kept in a map.
#[derive(Default)]
pub struct MemoryAccounts {
    state: RwLock<AccountsState>,
}

impl MemoryAccounts {
    /// Create with one account holding a session whose token is its name.
    pub fn with_account(name: &str) -> Self {
        let account = Account {
            name: name.to_owned(),
            display_name: name.to_owned(),
            principal_ids: Vec::new(),
        };
        let session = Session {
            token: name.to_owned(),
            account: name.to_owned(),
            principal: Principal::user(name, name, name),
            groups: Vec::new(),
            provider_info: ProviderInfo::default(),
            description: "local".into(),
            expires_at: None,
            created_at: Utc::now(),
        };

        Self {
            state: RwLock::new(AccountsState {
                accounts: HashMap::from([(name.to_owned(), account)]),
                sessions: vec![session],
            }),
        }
    }

    pub async fn insert_account(&self, name: &str, principal_ids: &[&str]) {
        self.state.write().await.accounts.insert(
            name.to_owned(),
            Account {
                name: name.to_owned(),
                display_name: name.to_owned(),
                principal_ids: principal_ids.iter().map(|id| id.to_string()).collect(),
            },
        );
    }

    pub async fn account(&self, name: &str) -> Option<Account> {
        self.state.read().await.accounts.get(name).cloned()
    }

    /// Sessions issued through [`AccountPort::create_session`].
    pub async fn sessions(&self) -> Vec<Session> {
        self.state
            .read()
            .await
            .sessions
            .iter()
            .filter(|session| session.description != "local")
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AccountPort for MemoryAccounts {
    async fn find_caller(&self, token: &str) -> session::Result<Option<Caller>> {
        let now = Utc::now();
        Ok(self
            .state
            .read()
            .await
            .sessions
            .iter()
            .find(|session| {
                session.token == token && session.expires_at.is_none_or(|at| at > now)
            })
            .map(|session| Caller {
                account: session.account.clone(),
            }))
    }

    async fn set_principal_on_caller(
        &self,
        caller: &Caller,
        principal: &Principal,
    ) -> session::Result<Account> {
        let mut state = self.state.write().await;

        if let Some(owner) = state.accounts.values().find(|account| {
            account.name != caller.account && account.principal_ids.contains(&principal.id)
        }) {
            return Err(AccountError::PrincipalTaken {
                principal: principal.id.clone(),
                account: owner.name.clone(),
            });
        }

        let account = state
            .accounts
            .get_mut(&caller.account)
            .ok_or_else(|| AccountError::NotFound(caller.account.clone()))?;
        if !account.principal_ids.contains(&principal.id) {
            account.principal_ids.push(principal.id.clone());
        }

        Ok(account.clone())
    }

    async fn create_session(&self, session: &Session) -> session::Result<()> {
        self.state.write().await.sessions.push(session.clone());
        Ok(())
    }
}

/// Directory answering from a fixed user table.
#[derive(Default)]
pub struct StaticDirectory {
    users: HashMap<String, (String, Identity)>,
    calls: AtomicUsize,
}

impl StaticDirectory {
    pub fn with_user(mut self, username: &str, password: &str) -> Self {
        let dn = format!("CN={username},DC=example,DC=com");
        let identity = Identity {
            user: Principal::user(&dn, username, username),
            groups: vec![Principal::group("CN=Admins,DC=example,DC=com", "Admins")],
            provider_info: ProviderInfo::new("ldap://dc1.example.com:389"),
        };
        self.users
            .insert(username.to_owned(), (password.to_owned(), identity));
        self
    }

    /// Number of login attempts received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectoryAuthenticator for StaticDirectory {
    async fn login(
        &self,
        credentials: &Credentials,
        _config: &DirectoryConfig,
        _trust: &TrustAnchors,
    ) -> ServerResult<Identity> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match self.users.get(&credentials.username) {
            Some((password, identity)) if *password == credentials.password => {
                Ok(identity.clone())
            },
            _ => Err(ServerError::Authentication(
                "invalid username or password".into(),
            )),
        }
    }
}

/// Directory that never answers.
pub struct HangingDirectory;

#[async_trait]
impl DirectoryAuthenticator for HangingDirectory {
    async fn login(
        &self,
        _credentials: &Credentials,
        _config: &DirectoryConfig,
        _trust: &TrustAnchors,
    ) -> ServerResult<Identity> {
        std::future::pending().await
    }
}
