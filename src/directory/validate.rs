//! Structural checks run before any network I/O.

use validator::Validate;

use crate::directory::TestAndApplyInput;
use crate::error::{Result, ServerError};

/// Reject proposals that cannot be tested.
///
/// Exactly one server is supported: callers must not expect failover across
/// several servers.
pub fn validate(input: &TestAndApplyInput) -> Result<()> {
    match input.config.servers.len() {
        0 => return Err(ServerError::InvalidInput("must supply a server".into())),
        1 => {},
        _ => {
            return Err(ServerError::InvalidInput(
                "multiple servers not yet supported".into(),
            ));
        },
    }

    if input.config.servers[0].trim().is_empty() {
        return Err(ServerError::InvalidInput("must supply a server".into()));
    }

    let config = &input.config;
    let username = config.service_account_username.as_deref();
    let password = config.service_account_password.as_deref();
    match (
        username.is_some_and(|u| !u.trim().is_empty()),
        password.is_some_and(|p| !p.is_empty()),
    ) {
        (true, false) => {
            return Err(ServerError::InvalidInput(
                "service account password is required".into(),
            ));
        },
        (false, true) => {
            return Err(ServerError::InvalidInput(
                "service account username is required".into(),
            ));
        },
        _ => {},
    }

    config.validate()?;
    input.credentials.validate()?;

    Ok(())
}
