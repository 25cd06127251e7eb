//! LDAP support.

use std::time::Duration;

use async_trait::async_trait;
use ldap3::{Ldap as Ldap3, LdapConnAsync, LdapConnSettings, LdapError, Scope, SearchEntry};

use crate::directory::{
    Credentials, DirectoryConfig, Identity, Principal, ProviderInfo, TrustAnchors,
};
use crate::error::{Result, ServerError};

/// `invalidCredentials` result code.
const INVALID_CREDENTIALS: u32 = 49;
const MEMBER_OF: &str = "memberOf";
/// `LDAP_MATCHING_RULE_IN_CHAIN`, walks nested groups server-side.
const IN_CHAIN: &str = "1.2.840.113556.1.4.1941";

/// Proves credentials against the single server of a [`DirectoryConfig`].
#[async_trait]
pub trait DirectoryAuthenticator: Send + Sync {
    /// Bind as `credentials` and resolve the user and its groups.
    async fn login(
        &self,
        credentials: &Credentials,
        config: &DirectoryConfig,
        trust: &TrustAnchors,
    ) -> Result<Identity>;
}

/// [`DirectoryAuthenticator`] talking to a real server with `ldap3`.
#[derive(Clone, Debug, Default)]
pub struct LdapAuthenticator;

#[async_trait]
impl DirectoryAuthenticator for LdapAuthenticator {
    async fn login(
        &self,
        credentials: &Credentials,
        config: &DirectoryConfig,
        trust: &TrustAnchors,
    ) -> Result<Identity> {
        let Some(url) = config.server_url() else {
            return Err(ServerError::InvalidInput("must supply a server".into()));
        };

        let connector = trust
            .connector()
            .map_err(|err| ServerError::internal("cannot build TLS connector", err))?;
        let settings = LdapConnSettings::new()
            .set_conn_timeout(Duration::from_millis(config.connection_timeout))
            .set_starttls(config.start_tls && !config.tls)
            .set_connector(connector);

        let (handle, mut conn) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|err| classify(err, "cannot reach directory"))?;
        ldap3::drive!(handle);

        let identity = authenticate(&mut conn, credentials, config, &url).await;

        if let Err(err) = conn.unbind().await {
            tracing::debug!(error = %err, %url, "unbind failed");
        }

        identity
    }
}

async fn authenticate(
    conn: &mut Ldap3,
    credentials: &Credentials,
    config: &DirectoryConfig,
    url: &str,
) -> Result<Identity> {
    let domain = config.default_login_domain.as_deref();
    bind(conn, &login_name(&credentials.username, domain), &credentials.password)
        .await?;

    if let Some((user, password)) = config.service_account() {
        bind(conn, &login_name(user, domain), password)
            .await
            .map_err(|err| match err {
                ServerError::Authentication(reason) => {
                    ServerError::Authentication(format!("service account: {reason}"))
                },
                err => err,
            })?;
    }

    let sam = sam_name(&credentials.username);
    let filter = format!(
        "(&(objectClass={})({}={}))",
        config.user_object_class,
        config.user_login_attribute,
        escape_ldap(sam)
    );
    let attrs = vec![
        config.user_name_attribute.as_str(),
        config.user_login_attribute.as_str(),
        config.user_enabled_attribute.as_str(),
        MEMBER_OF,
    ];

    let (entries, _) = conn
        .search(&config.user_search_base, Scope::Subtree, &filter, attrs)
        .await
        .map_err(|err| classify(err, "user search failed"))?
        .success()
        .map_err(|err| classify(err, "user search failed"))?;

    let entry = match <[_; 1]>::try_from(entries) {
        Ok([entry]) => SearchEntry::construct(entry),
        Err(entries) if entries.is_empty() => {
            return Err(ServerError::Authentication(format!("user {sam} not found")));
        },
        Err(_) => {
            return Err(ServerError::Authentication(format!(
                "user {sam} matches several entries"
            )));
        },
    };

    let mut identity = resolve_identity(&entry, config, url)?;

    if config.nested_group_membership_enabled {
        if let Some(base) = config.group_search_base.as_deref() {
            let nested = nested_groups(conn, config, base, &entry.dn).await?;
            merge_groups(&mut identity.groups, nested);
        }
    }

    tracing::debug!(
        user = %identity.user.id,
        groups = identity.groups.len(),
        "directory user resolved"
    );

    Ok(identity)
}

async fn bind(conn: &mut Ldap3, dn: &str, password: &str) -> Result<()> {
    let result = conn
        .simple_bind(dn, password)
        .await
        .map_err(|err| classify(err, "bind failed"))?;

    match result.rc {
        0 => Ok(()),
        INVALID_CREDENTIALS => Err(ServerError::Authentication(
            "invalid username or password".into(),
        )),
        rc => Err(ServerError::Authentication(format!(
            "bind rejected by directory (rc={rc}): {}",
            result.text
        ))),
    }
}

async fn nested_groups(
    conn: &mut Ldap3,
    config: &DirectoryConfig,
    base: &str,
    user_dn: &str,
) -> Result<Vec<Principal>> {
    let filter = format!(
        "(&(objectClass={})(member:{IN_CHAIN}:={}))",
        config.group_object_class,
        escape_ldap(user_dn)
    );

    let (entries, _) = conn
        .search(base, Scope::Subtree, &filter, vec![config.group_name_attribute.as_str()])
        .await
        .map_err(|err| classify(err, "group search failed"))?
        .success()
        .map_err(|err| classify(err, "group search failed"))?;

    Ok(entries
        .into_iter()
        .map(SearchEntry::construct)
        .map(|entry| {
            let name = attribute(&entry, &config.group_name_attribute)
                .and_then(|values| values.first().cloned())
                .unwrap_or_else(|| first_rdn_value(&entry.dn));
            Principal::group(&entry.dn, name)
        })
        .collect())
}

/// Build the user principal and its direct groups from a search entry.
pub fn resolve_identity(
    entry: &SearchEntry,
    config: &DirectoryConfig,
    server: &str,
) -> Result<Identity> {
    let first = |name: &str| attribute(entry, name).and_then(|values| values.first());

    if let Some(flags) = first(config.user_enabled_attribute.as_str())
        .and_then(|value| value.parse::<u64>().ok())
    {
        if flags & config.user_disabled_bit_mask != 0 {
            return Err(ServerError::Authentication("user is disabled".into()));
        }
    }

    let login = first(config.user_login_attribute.as_str()).cloned().unwrap_or_default();
    let display_name = first(config.user_name_attribute.as_str())
        .cloned()
        .unwrap_or_else(|| first_rdn_value(&entry.dn));

    let mut groups = Vec::new();
    merge_groups(
        &mut groups,
        attribute(entry, MEMBER_OF)
            .into_iter()
            .flatten()
            .map(|dn| Principal::group(dn, first_rdn_value(dn))),
    );

    Ok(Identity {
        user: Principal::user(&entry.dn, display_name, login),
        groups,
        provider_info: ProviderInfo::new(server),
    })
}

fn merge_groups(groups: &mut Vec<Principal>, extra: impl IntoIterator<Item = Principal>) {
    for group in extra {
        if !groups.iter().any(|known| known.id.eq_ignore_ascii_case(&group.id)) {
            groups.push(group);
        }
    }
}

/// Attribute names are case-insensitive on the wire.
fn attribute<'a>(entry: &'a SearchEntry, name: &str) -> Option<&'a Vec<String>> {
    entry
        .attrs
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, values)| values)
}

/// Qualify a bare username with the default domain (`DOMAIN\user`).
fn login_name(username: &str, domain: Option<&str>) -> String {
    match domain.filter(|d| !d.is_empty()) {
        Some(domain) if !username.contains('\\') && !username.contains('@') => {
            format!("{domain}\\{username}")
        },
        _ => username.to_owned(),
    }
}

/// Strip `DOMAIN\` or `@realm` from a username.
fn sam_name(username: &str) -> &str {
    if let Some((_, user)) = username.split_once('\\') {
        user
    } else if let Some((user, _)) = username.split_once('@') {
        user
    } else {
        username
    }
}

/// Value of the first RDN, e.g. `Admins` for `CN=Admins,DC=example,DC=com`.
fn first_rdn_value(dn: &str) -> String {
    let mut rdn = String::new();
    let mut escaped = false;
    for c in dn.chars() {
        match c {
            ',' if !escaped => break,
            '\\' if !escaped => escaped = true,
            c => {
                escaped = false;
                rdn.push(c);
            },
        }
    }

    match rdn.split_once('=') {
        Some((_, value)) => value.trim().to_owned(),
        None => rdn,
    }
}

/// Map a transport failure to the error kind the caller can act on.
fn classify(err: LdapError, context: &str) -> ServerError {
    match err {
        LdapError::OpSend { .. } | LdapError::ResultRecv { .. } => ServerError::Internal {
            details: format!("{context}: ldap driver stopped ({err})"),
            source: None,
        },
        LdapError::FilterParsing => {
            ServerError::InvalidInput(format!("{context}: invalid search filter"))
        },
        err => ServerError::Authentication(format!("{context}: {err}")),
    }
}

fn escape_ldap(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '*' => out.push_str(r"\2a"),
            '(' => out.push_str(r"\28"),
            ')' => out.push_str(r"\29"),
            '\\' => out.push_str(r"\5c"),
            '\0' => out.push_str(r"\00"),
            c => out.push(c),
        }
    }
    out
}
