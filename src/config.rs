//! Configuration manager.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::directory::PROVIDER_NAME;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_COOKIE: &str = "R_SESS";
const DEFAULT_HANDSHAKE_TIMEOUT: u64 = 30; // seconds.
const MAX_SESSION_TTL: u64 = 60 * 60 * 24 * 365; // one year.
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Socket address to listen on.
    pub address: String,
    /// Name of the stored provider record.
    pub provider: String,
    #[serde(skip_deserializing)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to PostgreSQL configuration.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to issued sessions.
    pub session: Session,
    /// Related to the test-and-apply handshake.
    pub handshake: Handshake,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: env!("CARGO_CRATE_NAME").to_owned(),
            address: DEFAULT_ADDRESS.to_owned(),
            provider: PROVIDER_NAME.to_owned(),
            version: VERSION.to_owned(),
            path: PathBuf::default(),
            postgres: None,
            session: Session::default(),
            handshake: Handshake::default(),
        }
    }
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Hostname:(?port) for PostgreSQL instance.
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
}

/// Session cookie configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    /// Cookie carrying the session token.
    pub cookie: String,
    /// Lifetime in seconds. `0` keeps the session for the browser session.
    pub ttl: u64,
    /// Add `Secure` attribute on cookie.
    pub secure: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            cookie: DEFAULT_COOKIE.to_owned(),
            ttl: 0,
            secure: true,
        }
    }
}

impl Session {
    /// Bring `ttl` back under [`MAX_SESSION_TTL`].
    fn clamp_ttl(&mut self) {
        if self.ttl > MAX_SESSION_TTL {
            tracing::warn!(
                ttl = self.ttl,
                max = MAX_SESSION_TTL,
                "`session.ttl` too large, clamped"
            );
            self.ttl = MAX_SESSION_TTL;
        }
    }
}

/// Test-and-apply configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Handshake {
    /// Deadline for a whole request, in seconds.
    pub timeout: u64,
}

impl Default for Handshake {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Arc<Self> {
        let file_path = if self.path.is_file() {
            self.path.clone()
        } else {
            Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        let file = match File::open(&file_path) {
            Ok(file) => file,
            Err(err) => return Arc::new(self.error(err)),
        };

        match serde_yaml::from_reader::<_, Configuration>(file) {
            Ok(mut config) => {
                config.version = VERSION.to_owned();
                config.path = file_path;
                config.session.clamp_ttl();
                Arc::new(config)
            },
            Err(err) => Arc::new(self.error(err)),
        }
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not readable");
        Self {
            path: self.path.clone(),
            ..Default::default()
        }
    }
}
