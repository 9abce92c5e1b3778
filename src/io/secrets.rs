//! Secret lookup for remote storage credentials.
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Error, Result};

pub trait Secrets: Send + Sync {
    fn get_secret(&self, id: &str) -> Result<String>;
}

/// Environment-backed provider; the id is the variable name.
pub struct EnvSecrets;

impl Secrets for EnvSecrets {
    fn get_secret(&self, id: &str) -> Result<String> {
        std::env::var(id).map_err(|_| Error::Secret {
            id: id.to_string(),
            reason: "not set in the environment".to_string(),
        })
    }
}

/// Env var naming the service-account key JSON used to materialize a GCS
/// credentials file.
pub const GCS_KEY_SECRET: &str = "GCS_KEY_JSON";

/// Make sure the file `GOOGLE_APPLICATION_CREDENTIALS` points at exists,
/// writing it from the key secret when missing. Used before any `gs://`
/// access; `Ok(None)` when no credentials path is configured at all, which
/// is only an error if a `gs://` URI is actually used.
///
/// The write is attempted twice: ephemeral volumes occasionally drop the
/// first write of a freshly created directory.
pub fn ensure_gcs_credentials(secrets: &dyn Secrets) -> Result<Option<PathBuf>> {
    let path = match std::env::var("GOOGLE_APPLICATION_CREDENTIALS") {
        Ok(p) if !p.is_empty() => PathBuf::from(p),
        _ => return Ok(None),
    };
    if path.exists() {
        return Ok(Some(path));
    }

    let key = secrets.get_secret(GCS_KEY_SECRET)?;
    for attempt in 1..=2 {
        if let Err(e) = write_key(&path, &key) {
            warn!(
                "writing GCS credentials to {:?} failed (attempt {}): {}",
                path, attempt, e
            );
            continue;
        }
        if path.exists() {
            info!("materialized GCS credentials at {:?}", path);
            return Ok(Some(path));
        }
    }
    Err(Error::Secret {
        id: GCS_KEY_SECRET.to_string(),
        reason: format!("could not materialize credentials file at {:?}", path),
    })
}

fn write_key(path: &Path, key: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, key)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_secrets_reports_missing_variables() {
        let err = EnvSecrets
            .get_secret("TILEPIPE_TEST_SECRET_THAT_DOES_NOT_EXIST")
            .unwrap_err();
        assert!(matches!(err, Error::Secret { .. }));
    }

    #[test]
    fn write_key_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds/key.json");
        write_key(&path, "{\"type\": \"service_account\"}").unwrap();
        assert!(path.exists());
    }
}
