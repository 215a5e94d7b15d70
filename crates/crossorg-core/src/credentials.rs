//! Target org credentials and the credential context switcher
//!
//! Two modes:
//! - [`CredentialMode::PerCall`]: credentials travel with each engine call as
//!   subprocess environment; nothing process-wide changes.
//! - [`CredentialMode::Ambient`]: the process environment is swapped to the
//!   target's credentials under a process-wide lock and restored when the
//!   scope ends, even when the scoped work fails.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Held for the whole of every ambient scope in the process
static AMBIENT_LOCK: Lazy<Arc<Mutex<()>>> = Lazy::new(|| Arc::new(Mutex::new(())));

/// Client credential triple for one org
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// Region / endpoint selector
    pub region: String,
}

impl Credentials {
    /// Create credentials
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            region: region.into(),
        }
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}

/// Organization reference data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetOrg {
    /// Org id, used as mapping key
    #[serde(rename = "orgId")]
    pub id: String,
    /// Display name
    #[serde(rename = "orgName", default)]
    pub name: String,
    /// API credentials
    #[serde(flatten)]
    pub credentials: Credentials,
}

impl TargetOrg {
    /// Create org
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            credentials,
        }
    }
}

/// Environment variable names the apply engine reads credentials from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialEnvVars {
    /// Variable holding the client id
    pub client_id_var: String,
    /// Variable holding the client secret
    pub client_secret_var: String,
    /// Variable holding the region
    pub region_var: String,
}

impl Default for CredentialEnvVars {
    fn default() -> Self {
        Self {
            client_id_var: "GENESYSCLOUD_OAUTHCLIENT_ID".to_string(),
            client_secret_var: "GENESYSCLOUD_OAUTHCLIENT_SECRET".to_string(),
            region_var: "GENESYSCLOUD_REGION".to_string(),
        }
    }
}

impl CredentialEnvVars {
    fn names(&self) -> [&str; 3] {
        [&self.client_id_var, &self.client_secret_var, &self.region_var]
    }

    fn pairs<'a>(&'a self, credentials: &'a Credentials) -> [(&'a str, &'a str); 3] {
        [
            (&self.client_id_var, &credentials.client_id),
            (&self.client_secret_var, &credentials.client_secret),
            (&self.region_var, &credentials.region),
        ]
    }
}

/// How credentials reach the apply engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialMode {
    /// Explicit per-invocation environment
    #[default]
    PerCall,
    /// Process-wide environment swap with scoped restore
    Ambient,
}

/// Credential errors
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Value cannot be placed in the environment
    #[error("invalid value for environment variable '{var}': {reason}")]
    InvalidValue { var: String, reason: &'static str },

    /// Environment did not return to its prior state
    #[error("environment variable '{var}' was not restored to its previous value")]
    RestoreFailed { var: String },
}

/// Credentials an engine invocation must carry
///
/// Empty in ambient mode: the process environment already holds them.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialContext {
    env: Vec<(String, String)>,
}

impl CredentialContext {
    /// Context that adds nothing to the subprocess environment
    #[inline]
    #[must_use]
    pub fn inherited() -> Self {
        Self::default()
    }

    /// Variables to set on the engine subprocess
    #[inline]
    #[must_use]
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Value of one variable, if carried
    #[must_use]
    pub fn get(&self, var: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == var)
            .map(|(_, v)| v.as_str())
    }
}

impl Debug for CredentialContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.env.iter().map(|(k, _)| k))
            .finish()
    }
}

/// Result of a scoped call
#[derive(Debug)]
pub struct Scoped<T> {
    /// What the scoped work returned
    pub value: T,
    /// Restore failure, if any; never replaces `value`
    pub restore_error: Option<CredentialError>,
}

/// Scoped, restorable credential switch
#[derive(Debug, Clone)]
pub struct CredentialSwitcher {
    mode: CredentialMode,
    vars: CredentialEnvVars,
}

impl CredentialSwitcher {
    /// Create switcher
    #[must_use]
    pub fn new(mode: CredentialMode, vars: CredentialEnvVars) -> Self {
        Self { mode, vars }
    }

    /// Active mode
    #[inline]
    #[must_use]
    pub fn mode(&self) -> CredentialMode {
        self.mode
    }

    /// Authenticate as `target` for the duration of `f`
    ///
    /// The prior context is restored after `f` completes whatever it
    /// returns. A restore failure is logged and reported in
    /// [`Scoped::restore_error`] without affecting `f`'s result.
    ///
    /// # Errors
    /// Fails before running `f` when the target's values cannot be set.
    pub async fn with_target_credentials<F, Fut, T>(
        &self,
        target: &TargetOrg,
        f: F,
    ) -> Result<Scoped<T>, CredentialError>
    where
        F: FnOnce(CredentialContext) -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.acquire(target).await?;
        let value = f(guard.context().clone()).await;
        let restore_error = guard.release().err();
        if let Some(err) = &restore_error {
            tracing::warn!(target_org = %target.id, error = %err, "credential context restore failed");
        }
        Ok(Scoped {
            value,
            restore_error,
        })
    }

    /// Switch to `target`'s credentials until the guard is released or dropped
    ///
    /// In ambient mode this waits for every other ambient scope in the
    /// process to end, whichever switcher opened it.
    pub async fn acquire(&self, target: &TargetOrg) -> Result<CredentialGuard, CredentialError> {
        for (var, value) in self.vars.pairs(&target.credentials) {
            validate_env(var, value)?;
        }

        match self.mode {
            CredentialMode::PerCall => Ok(CredentialGuard {
                context: CredentialContext {
                    env: self
                        .vars
                        .pairs(&target.credentials)
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                },
                ambient: None,
            }),
            CredentialMode::Ambient => {
                let lock = Arc::clone(&AMBIENT_LOCK).lock_owned().await;
                let previous = self
                    .vars
                    .names()
                    .iter()
                    .map(|name| ((*name).to_string(), std::env::var_os(name)))
                    .collect();
                for (var, value) in self.vars.pairs(&target.credentials) {
                    std::env::set_var(var, value);
                }
                tracing::debug!(target_org = %target.id, "ambient credentials switched");
                Ok(CredentialGuard {
                    context: CredentialContext::inherited(),
                    ambient: Some(AmbientRestore {
                        previous,
                        _lock: lock,
                    }),
                })
            }
        }
    }
}

struct AmbientRestore {
    previous: Vec<(String, Option<OsString>)>,
    _lock: OwnedMutexGuard<()>,
}

impl AmbientRestore {
    fn restore(&self) -> Result<(), CredentialError> {
        for (var, value) in &self.previous {
            match value {
                Some(v) => std::env::set_var(var, v),
                None => std::env::remove_var(var),
            }
        }
        for (var, value) in &self.previous {
            if std::env::var_os(var) != *value {
                return Err(CredentialError::RestoreFailed { var: var.clone() });
            }
        }
        Ok(())
    }
}

/// Active credential scope
///
/// Dropping without [`CredentialGuard::release`] still restores.
pub struct CredentialGuard {
    context: CredentialContext,
    ambient: Option<AmbientRestore>,
}

impl CredentialGuard {
    /// Credentials to hand to the engine
    #[inline]
    #[must_use]
    pub fn context(&self) -> &CredentialContext {
        &self.context
    }

    /// Restore the prior context and report the outcome
    pub fn release(mut self) -> Result<(), CredentialError> {
        match self.ambient.take() {
            Some(ambient) => ambient.restore(),
            None => Ok(()),
        }
    }
}

impl Drop for CredentialGuard {
    fn drop(&mut self) {
        if let Some(ambient) = self.ambient.take() {
            if let Err(err) = ambient.restore() {
                tracing::warn!(error = %err, "credential context restore failed on drop");
            }
        }
    }
}

impl Debug for CredentialGuard {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialGuard")
            .field("context", &self.context)
            .field("ambient", &self.ambient.is_some())
            .finish()
    }
}

fn validate_env(var: &str, value: &str) -> Result<(), CredentialError> {
    let invalid = |reason| CredentialError::InvalidValue {
        var: var.to_string(),
        reason,
    };
    if var.is_empty() || var.contains('=') || var.contains('\0') {
        return Err(invalid("variable name must be non-empty without '=' or NUL"));
    }
    if value.contains('\0') {
        return Err(invalid("value contains NUL"));
    }
    Ok(())
}
