//! Handle account and session database requests.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{Pool, Postgres};

use crate::directory::Principal;
use crate::session::{Account, AccountError, AccountPort, Caller, Result, Session};

#[derive(Clone)]
pub struct PostgresAccounts {
    pool: Pool<Postgres>,
}

impl PostgresAccounts {
    /// Create a new [`PostgresAccounts`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountPort for PostgresAccounts {
    async fn find_caller(&self, token: &str) -> Result<Option<Caller>> {
        let account = sqlx::query_scalar::<_, String>(
            r#"SELECT account_name FROM sessions
                WHERE token = $1 AND (expires_at IS NULL OR expires_at > NOW())"#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account.map(|account| Caller { account }))
    }

    async fn set_principal_on_caller(
        &self,
        caller: &Caller,
        principal: &Principal,
    ) -> Result<Account> {
        let mut tx = self.pool.begin().await?;

        // Held until commit or rollback: concurrent bindings of one
        // principal run one after the other.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&principal.id)
            .execute(&mut *tx)
            .await?;

        let owner = sqlx::query_scalar::<_, String>(
            r#"SELECT name FROM accounts WHERE $1 = ANY(principal_ids) AND name <> $2 LIMIT 1"#,
        )
        .bind(&principal.id)
        .bind(&caller.account)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(account) = owner {
            tx.rollback().await?;
            return Err(AccountError::PrincipalTaken {
                principal: principal.id.clone(),
                account,
            });
        }

        let account = sqlx::query_as::<_, Account>(
            r#"UPDATE accounts
                SET principal_ids = CASE
                    WHEN $1 = ANY(principal_ids) THEN principal_ids
                    ELSE array_append(principal_ids, $1)
                END
                WHERE name = $2
                RETURNING name, display_name, principal_ids"#,
        )
        .bind(&principal.id)
        .bind(&caller.account)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AccountError::NotFound(caller.account.clone()))?;

        tx.commit().await?;

        Ok(account)
    }

    async fn create_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO sessions
                (token, account_name, principal, group_principals, provider_info, description, expires_at, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(&session.token)
        .bind(&session.account)
        .bind(Json(&session.principal))
        .bind(Json(&session.groups))
        .bind(Json(&session.provider_info))
        .bind(&session.description)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
