//! Per-account credential state on disk.
//!
//! Each account owns `<root>/<account_id>/creds.json`. The transport reports
//! credential changes as partial objects which are merged into that file
//! before the session driver looks at the next event.

use std::path::{Path, PathBuf};

use {
    serde_json::{Map, Value},
    tracing::{debug, info},
};

use crate::error::{AuthError, SessionError};

/// Opaque credential object owned by the transport.
pub type Credentials = Map<String, Value>;

const CREDS_FILE: &str = "creds.json";

/// Reject account ids that cannot be used as a directory name.
pub fn validate_account_id(account_id: &str) -> Result<(), SessionError> {
    let valid = !account_id.is_empty()
        && account_id.len() <= 128
        && account_id != "."
        && account_id != ".."
        && account_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
    if valid {
        Ok(())
    } else {
        Err(SessionError::InvalidAccount(account_id.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct AuthStore {
    root: PathBuf,
}

impl AuthStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn account_dir(&self, account_id: &str) -> PathBuf {
        self.root.join(account_id)
    }

    fn creds_path(&self, account_id: &str) -> PathBuf {
        self.account_dir(account_id).join(CREDS_FILE)
    }

    /// Create the account directory if needed and return it.
    pub async fn prepare(&self, account_id: &str) -> Result<PathBuf, AuthError> {
        let dir = self.account_dir(account_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| AuthError::Io {
                path: dir.clone(),
                source,
            })?;
        Ok(dir)
    }

    pub async fn load(&self, account_id: &str) -> Result<Option<Credentials>, AuthError> {
        let path = self.creds_path(account_id);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(AuthError::Io { path, source }),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| AuthError::Malformed { path, source })
    }

    /// Whether the stored state identifies an already-paired device.
    pub async fn is_resumable(&self, account_id: &str) -> bool {
        matches!(
            self.load(account_id).await,
            Ok(Some(creds)) if creds.get("me").is_some_and(|me| !me.is_null())
        )
    }

    /// Merge `delta` into the stored credentials and write them back
    /// atomically (temp file + rename).
    pub async fn apply_delta(&self, account_id: &str, delta: &Credentials) -> Result<(), AuthError> {
        let dir = self.prepare(account_id).await?;
        let mut creds = match self.load(account_id).await {
            Ok(creds) => creds.unwrap_or_default(),
            // A corrupt file is replaced by the transport's current view.
            Err(AuthError::Malformed { .. }) => Credentials::new(),
            Err(e) => return Err(e),
        };
        for (key, value) in delta {
            creds.insert(key.clone(), value.clone());
        }

        let path = dir.join(CREDS_FILE);
        let tmp = dir.join(format!("{CREDS_FILE}.tmp"));
        let body = serde_json::to_vec_pretty(&creds).map_err(|source| AuthError::Malformed {
            path: path.clone(),
            source,
        })?;
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|source| AuthError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| AuthError::Io { path, source })?;
        debug!(account_id, keys = delta.len(), "credentials updated");
        Ok(())
    }

    /// Remove all credential state for the account. Returns whether anything
    /// was there.
    pub async fn purge(&self, account_id: &str) -> Result<bool, AuthError> {
        let dir = self.account_dir(account_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(AuthError::Io { path: dir, source }),
        }
    }

    /// Purge leftover state that cannot resume a session.
    ///
    /// Paired credentials are kept so a restart reconnects without a new QR
    /// scan; half-written pairing state from an interrupted attempt is not.
    pub async fn clean_ghost(&self, account_id: &str) -> Result<bool, AuthError> {
        if self.is_resumable(account_id).await {
            return Ok(false);
        }
        let purged = self.purge(account_id).await?;
        if purged {
            info!(account_id, "removed stale credential state");
        }
        Ok(purged)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {super::*, serde_json::json};

    fn delta(value: Value) -> Credentials {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn delta_merges_into_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuthStore::new(dir.path());

        store
            .apply_delta("acct", &delta(json!({"noiseKey": "a", "registered": false})))
            .await
            .unwrap();
        store
            .apply_delta("acct", &delta(json!({"registered": true, "me": {"id": "1555:3@s.whatsapp.net"}})))
            .await
            .unwrap();

        let creds = store.load("acct").await.unwrap().unwrap();
        assert_eq!(creds["noiseKey"], "a");
        assert_eq!(creds["registered"], true);
        assert!(store.is_resumable("acct").await);
        assert!(!store.account_dir("acct").join("creds.json.tmp").exists());
    }

    #[tokio::test]
    async fn ghost_cleanup_keeps_paired_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuthStore::new(dir.path());

        store
            .apply_delta("half", &delta(json!({"noiseKey": "a"})))
            .await
            .unwrap();
        store
            .apply_delta("paired", &delta(json!({"me": {"id": "1555@s.whatsapp.net"}})))
            .await
            .unwrap();

        assert!(store.clean_ghost("half").await.unwrap());
        assert!(!store.account_dir("half").exists());
        assert!(!store.clean_ghost("paired").await.unwrap());
        assert!(store.account_dir("paired").exists());
        assert!(!store.clean_ghost("never-seen").await.unwrap());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_ghost() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuthStore::new(dir.path());
        let account_dir = store.prepare("acct").await.unwrap();
        tokio::fs::write(account_dir.join("creds.json"), b"{not json")
            .await
            .unwrap();

        assert!(matches!(
            store.load("acct").await,
            Err(AuthError::Malformed { .. })
        ));
        assert!(store.clean_ghost("acct").await.unwrap());
    }

    #[test]
    fn account_ids_must_be_path_safe() {
        assert!(validate_account_id("user-42").is_ok());
        assert!(validate_account_id("a.b@c_d").is_ok());
        assert!(validate_account_id("").is_err());
        assert!(validate_account_id("..").is_err());
        assert!(validate_account_id("../etc").is_err());
        assert!(validate_account_id("a/b").is_err());
    }
}
