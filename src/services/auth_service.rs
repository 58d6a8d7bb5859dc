use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::file_service::{get_app_data_dir, read_json_or_default, remove_if_exists, write_json};
use crate::error::{Error, Result};

// ============================================================================
// AUTH DATA STRUCTURES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthState {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// A bearer token acquired for a single request.
///
/// The store is re-read for every acquisition, so a sign-out is observed by
/// the very next request. Dropping the credential releases it.
#[derive(Clone)]
pub struct Credential {
    token: String,
}

impl Credential {
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

// ============================================================================
// AUTH STATE PERSISTENCE
// ============================================================================

#[derive(Debug, Clone)]
pub struct AuthStore {
    path: PathBuf,
}

impl AuthStore {
    /// Store rooted at `dir/auth.json`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join("auth.json"),
        }
    }

    pub fn from_app_data() -> Result<Self> {
        Ok(Self::new(get_app_data_dir()?))
    }

    pub fn load(&self) -> Result<AuthState> {
        read_json_or_default(&self.path)
    }

    pub fn save(&self, state: &AuthState) -> Result<()> {
        write_json(&self.path, state)
    }

    /// Persist the token handed back by the login flow.
    pub fn sign_in(&self, username: &str, access_token: &str) -> Result<AuthState> {
        let state = AuthState {
            access_token: Some(access_token.to_string()),
            username: Some(username.to_string()),
        };
        self.save(&state)?;
        info!(username, "stored credential");
        Ok(state)
    }

    pub fn sign_out(&self) -> Result<()> {
        remove_if_exists(&self.path)?;
        info!("cleared stored credential");
        Ok(())
    }

    pub fn is_authenticated(&self) -> bool {
        self.bearer().is_ok()
    }

    /// Acquire the bearer credential, failing with `Error::Auth` before any I/O when absent.
    pub fn bearer(&self) -> Result<Credential> {
        let state = self
            .load()
            .map_err(|e| Error::Auth(format!("Could not read stored credential: {}", e)))?;

        match state.access_token {
            Some(token) if !token.trim().is_empty() => Ok(Credential { token }),
            _ => Err(Error::Auth("Not authenticated".to_string())),
        }
    }
}
