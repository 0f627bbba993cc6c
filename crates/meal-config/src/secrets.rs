//! Runtime secret resolution.
//!
//! Config stores only env var NAMES (e.g. `"MEAL_DATABASE_URL"`). Callers
//! resolve once at startup and pass the result into constructors. Error
//! messages name the variable, never its value, and `Debug` redacts.

use anyhow::{bail, Result};

use crate::settings::ServiceSettings;

/// Database URL resolved from the environment.
#[derive(Clone)]
pub struct DatabaseUrl(String);

impl DatabaseUrl {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for DatabaseUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DatabaseUrl(<REDACTED>)")
    }
}

/// Resolve a named environment variable; unset or blank is `None`.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Resolve the database URL from the env var named in settings.
///
/// # Errors
/// `SECRETS_MISSING` naming the variable when it is unset or empty.
pub fn resolve_database_url(settings: &ServiceSettings) -> Result<DatabaseUrl> {
    match resolve_env(&settings.database_url_env) {
        Some(url) => Ok(DatabaseUrl(url)),
        None => bail!(
            "SECRETS_MISSING: required env var '{}' (database url) is not set or empty",
            settings.database_url_env
        ),
    }
}
