//! Directory (Active Directory) data model.
//!
//! [`DirectoryConfig`] is what a caller proposes and, once proven, what is
//! stored inside an [`ActiveDirectoryConfig`] record. [`Credentials`] only
//! live for one handshake.
pub mod ldap;
pub mod trust;
pub mod validate;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

pub use ldap::{DirectoryAuthenticator, LdapAuthenticator};
pub use trust::{TrustAnchors, TrustBuilder};
pub use validate::validate;

/// Provider name, also used as principal scheme prefix.
pub const PROVIDER_NAME: &str = "activedirectory";
pub const API_VERSION: &str = "management.autha/v1";
pub const KIND: &str = "AuthConfig";
pub const CONFIG_TYPE: &str = "activeDirectoryConfig";

const DEFAULT_PORT: u16 = 389;
const DEFAULT_CONNECTION_TIMEOUT: u64 = 5000; // 5 seconds.
const DEFAULT_DISABLED_BIT_MASK: u64 = 2; // ACCOUNTDISABLE flag.

/// Who may log in once the provider is active.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccessMode {
    #[default]
    Unrestricted,
    Restricted,
    Required,
}

/// Connection parameters of a single directory server.
#[derive(Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectoryConfig {
    pub servers: Vec<String>,
    #[validate(range(min = 1, message = "Port must be between 1 and 65535."))]
    pub port: u16,
    pub tls: bool,
    #[serde(rename = "startTLS")]
    pub start_tls: bool,
    pub certificate: Option<String>,
    pub default_login_domain: Option<String>,
    pub service_account_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_password: Option<String>,
    #[validate(length(min = 1, message = "User search base is required."))]
    pub user_search_base: String,
    #[validate(length(min = 1, message = "User login attribute is required."))]
    #[validate(custom(function = "attribute_name"))]
    pub user_login_attribute: String,
    #[validate(length(min = 1, message = "User object class is required."))]
    #[validate(custom(function = "attribute_name"))]
    pub user_object_class: String,
    #[validate(custom(function = "attribute_name"))]
    pub user_name_attribute: String,
    #[validate(custom(function = "attribute_name"))]
    pub user_enabled_attribute: String,
    pub user_disabled_bit_mask: u64,
    pub group_search_base: Option<String>,
    #[validate(custom(function = "attribute_name"))]
    pub group_object_class: String,
    #[validate(custom(function = "attribute_name"))]
    pub group_name_attribute: String,
    pub nested_group_membership_enabled: bool,
    /// Connection timeout, in milliseconds.
    #[validate(range(min = 1, message = "Connection timeout must be positive."))]
    pub connection_timeout: u64,
    pub access_mode: AccessMode,
    pub allowed_principal_ids: Vec<String>,
    pub enabled: bool,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            port: DEFAULT_PORT,
            tls: false,
            start_tls: false,
            certificate: None,
            default_login_domain: None,
            service_account_username: None,
            service_account_password: None,
            user_search_base: String::default(),
            user_login_attribute: "sAMAccountName".into(),
            user_object_class: "person".into(),
            user_name_attribute: "name".into(),
            user_enabled_attribute: "userAccountControl".into(),
            user_disabled_bit_mask: DEFAULT_DISABLED_BIT_MASK,
            group_search_base: None,
            group_object_class: "group".into(),
            group_name_attribute: "name".into(),
            nested_group_membership_enabled: false,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            access_mode: AccessMode::default(),
            allowed_principal_ids: Vec::new(),
            enabled: false,
        }
    }
}

impl fmt::Debug for DirectoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryConfig")
            .field("servers", &self.servers)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("start_tls", &self.start_tls)
            .field("certificate", &self.certificate.as_ref().map(|_| "[pem]"))
            .field("default_login_domain", &self.default_login_domain)
            .field("service_account_username", &self.service_account_username)
            .field(
                "service_account_password",
                &self.service_account_password.as_ref().map(|_| "[redacted]"),
            )
            .field("user_search_base", &self.user_search_base)
            .field("user_login_attribute", &self.user_login_attribute)
            .field("user_object_class", &self.user_object_class)
            .field("user_name_attribute", &self.user_name_attribute)
            .field("user_enabled_attribute", &self.user_enabled_attribute)
            .field("user_disabled_bit_mask", &self.user_disabled_bit_mask)
            .field("group_search_base", &self.group_search_base)
            .field("group_object_class", &self.group_object_class)
            .field("group_name_attribute", &self.group_name_attribute)
            .field(
                "nested_group_membership_enabled",
                &self.nested_group_membership_enabled,
            )
            .field("connection_timeout", &self.connection_timeout)
            .field("access_mode", &self.access_mode)
            .field("allowed_principal_ids", &self.allowed_principal_ids)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl DirectoryConfig {
    /// Service account to search with, when both halves are set.
    pub fn service_account(&self) -> Option<(&str, &str)> {
        let username = self
            .service_account_username
            .as_deref()
            .filter(|username| !username.trim().is_empty())?;
        let password = self
            .service_account_password
            .as_deref()
            .filter(|password| !password.is_empty())?;
        Some((username, password))
    }

    /// LDAP URL of the single supported server.
    pub fn server_url(&self) -> Option<String> {
        let scheme = if self.tls { "ldaps" } else { "ldap" };
        self.servers
            .first()
            .map(|server| format!("{scheme}://{server}:{}", self.port))
    }
}

/// Attribute descriptor or numeric OID, safe to place in a search filter.
fn attribute_name(value: &str) -> Result<(), ValidationError> {
    let mut chars = value.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
        },
        Some(c) if c.is_ascii_digit() => value.split('.').all(|number| {
            !number.is_empty()
                && number.bytes().all(|b| b.is_ascii_digit())
                && (number == "0" || !number.starts_with('0'))
        }),
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("attribute_name")
            .with_message(format!("{value:?} is not a valid LDAP attribute name.").into()))
    }
}

/// Username and secret used for one handshake. Never persisted.
#[derive(Clone, Default, Deserialize, Validate)]
pub struct Credentials {
    #[validate(length(min = 1, message = "Username is required."))]
    pub username: String,
    #[validate(length(min = 1, message = "Password is required."))]
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// Decoded `testAndApply` body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestAndApplyInput {
    #[serde(flatten)]
    pub config: DirectoryConfig,
    #[serde(flatten)]
    pub credentials: Credentials,
}

/// Identity metadata of a stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub resource_version: i64,
    pub created_at: DateTime<Utc>,
}

/// Durable provider configuration. At most one per provider name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveDirectoryConfig {
    pub api_version: String,
    pub kind: String,
    pub r#type: String,
    pub metadata: ObjectMeta,
    #[serde(flatten)]
    pub spec: DirectoryConfig,
}

impl ActiveDirectoryConfig {
    /// Stamp `spec` with the identity of an already stored record.
    pub fn from_stored(stored: &ActiveDirectoryConfig, spec: DirectoryConfig) -> Self {
        Self {
            api_version: API_VERSION.to_owned(),
            kind: KIND.to_owned(),
            r#type: CONFIG_TYPE.to_owned(),
            metadata: stored.metadata.clone(),
            spec,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    User,
    Group,
}

/// A resolved identity, user or group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// `<provider>_<kind>://<dn>`.
    pub id: String,
    pub display_name: String,
    pub login_name: Option<String>,
    pub kind: PrincipalKind,
    pub provider: String,
    /// Whether this principal belongs to the caller.
    pub me: bool,
    pub member_of: bool,
}

impl Principal {
    /// Build a user principal from its distinguished name.
    pub fn user(dn: &str, display_name: impl Into<String>, login_name: impl Into<String>) -> Self {
        Self {
            id: format!("{PROVIDER_NAME}_user://{dn}"),
            display_name: display_name.into(),
            login_name: Some(login_name.into()),
            kind: PrincipalKind::User,
            provider: PROVIDER_NAME.to_owned(),
            me: true,
            member_of: false,
        }
    }

    /// Build a group principal from its distinguished name.
    pub fn group(dn: &str, display_name: impl Into<String>) -> Self {
        Self {
            id: format!("{PROVIDER_NAME}_group://{dn}"),
            display_name: display_name.into(),
            login_name: None,
            kind: PrincipalKind::Group,
            provider: PROVIDER_NAME.to_owned(),
            me: false,
            member_of: true,
        }
    }
}

/// Opaque metadata about the provider that resolved a principal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo(pub BTreeMap<String, String>);

impl ProviderInfo {
    pub fn new(server: &str) -> Self {
        let mut info = BTreeMap::new();
        info.insert("provider".to_owned(), PROVIDER_NAME.to_owned());
        info.insert("server".to_owned(), server.to_owned());
        Self(info)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Output of a successful bind.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub user: Principal,
    pub groups: Vec<Principal>,
    pub provider_info: ProviderInfo,
}
