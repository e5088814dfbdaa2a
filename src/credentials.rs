//! Credential loading from the runtime `.env` file.
//!
//! Secrets live in `~/.discord-relay/.env` (mode 0600), never in
//! `config.toml`. A key missing from the file falls back to the process
//! environment.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing::debug;

use crate::config::config_dir;

/// Runtime credentials loaded from the `.env` file.
#[derive(Clone, Default)]
pub struct Credentials {
    vars: BTreeMap<String, String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("keys", &self.vars.keys().collect::<Vec<_>>())
            .field("values", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    /// Build credentials from a key-value map.
    pub fn from_map(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    /// Returns a credential value for a key, if present in the file.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Returns a required credential, consulting `env` when the file lacks it.
    ///
    /// Blank values count as missing.
    ///
    /// # Errors
    ///
    /// Returns an error when neither source has a non-blank value.
    pub fn require_with(
        &self,
        key: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<String> {
        if let Some(value) = self.get(key).filter(|v| !v.trim().is_empty()) {
            return Ok(value.to_owned());
        }
        match env(key).filter(|v| !v.trim().is_empty()) {
            Some(value) => {
                debug!(key, "credential taken from process environment");
                Ok(value)
            }
            None => Err(anyhow::anyhow!("missing required credential: {key}")),
        }
    }

    /// Returns a required credential, falling back to the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error when the credential is missing or blank everywhere.
    pub fn require(&self, key: &str) -> anyhow::Result<String> {
        self.require_with(key, |k| std::env::var(k).ok())
    }
}

/// Load credentials from a specific `.env` path.
///
/// # Errors
///
/// Returns an error if the file does not exist, permissions are too broad,
/// or parsing fails.
pub fn load_credentials(path: &Path) -> anyhow::Result<Credentials> {
    if !path.exists() {
        return Err(anyhow::anyhow!(
            "credentials file does not exist: {}",
            path.display()
        ));
    }

    validate_private_permissions(path)?;

    let mut vars = BTreeMap::new();
    let iter = dotenvy::from_path_iter(path)
        .with_context(|| format!("failed to read credentials at {}", path.display()))?;

    for item in iter {
        let (key, value) = item.with_context(|| {
            format!(
                "failed to parse key-value entry in credentials file {}",
                path.display()
            )
        })?;
        vars.insert(key, value);
    }

    Ok(Credentials { vars })
}

/// Load credentials from `~/.discord-relay/.env`.
///
/// A missing file yields empty credentials so the process environment can
/// supply everything.
///
/// # Errors
///
/// Returns an error when the home directory cannot be resolved or the file
/// exists but is invalid.
pub fn load_default_credentials() -> anyhow::Result<Credentials> {
    let path = config_dir()?.join(".env");
    if !path.exists() {
        debug!(path = %path.display(), "no credentials file, using process environment");
        return Ok(Credentials::default());
    }
    load_credentials(&path)
}

#[cfg(unix)]
fn validate_private_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path)
        .with_context(|| format!("failed to inspect credentials file {}", path.display()))?;
    let mode = metadata.permissions().mode() & 0o777;

    if mode & 0o077 != 0 {
        return Err(anyhow::anyhow!(
            "credentials file {} must be 0600, found {:o}",
            path.display(),
            mode
        ));
    }

    Ok(())
}

#[cfg(not(unix))]
fn validate_private_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}
