//! Durable credential file: `{ "tokens": {...}, "client_info": {...} }`.
//!
//! Every write replaces the whole file through a temp file + rename, so a
//! crash mid-write leaves either the old record or the new one.

use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use {
    serde::{Deserialize, Serialize},
    tracing::{debug, info, warn},
};

use crate::{
    Result,
    types::{ClientRegistration, OAuthTokens},
};

/// Everything persisted for one machine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<OAuthTokens>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<ClientRegistration>,
}

/// File-backed store for the client registration and current token set.
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load whatever is stored. Missing or malformed files read as empty.
    pub fn load(&self) -> StoredCredentials {
        let path = self.path.display().to_string();
        let data = match std::fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path, "credential file not found");
                return StoredCredentials::default();
            },
            Err(e) => {
                warn!(path = %path, error = %e, "credential file read failed");
                return StoredCredentials::default();
            },
        };

        match serde_json::from_str(&data) {
            Ok(creds) => creds,
            Err(e) => {
                warn!(path = %path, error = %e, "credential file parse failed, ignoring it");
                StoredCredentials::default()
            },
        }
    }

    pub fn save_tokens(&self, tokens: &OAuthTokens) -> Result<()> {
        self.update(|creds| creds.tokens = Some(tokens.clone()))?;
        info!(path = %self.path.display(), "tokens saved");
        Ok(())
    }

    pub fn save_registration(&self, registration: &ClientRegistration) -> Result<()> {
        self.update(|creds| creds.client_info = Some(registration.clone()))?;
        info!(path = %self.path.display(), client_id = %registration.client_id, "client registration saved");
        Ok(())
    }

    /// Drop the stored token set but keep the client registration.
    pub fn clear_tokens(&self) -> Result<()> {
        self.update(|creds| creds.tokens = None)
    }

    /// Remove the credential file entirely.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "credential file removed");
                Ok(())
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn update(&self, mutate: impl FnOnce(&mut StoredCredentials)) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut creds = self.load();
        mutate(&mut creds);
        self.write_atomic(&creds)
    }

    fn write_atomic(&self, creds: &StoredCredentials) -> Result<()> {
        let data = serde_json::to_string_pretty(creds)?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "credentials.json".into());
        let tmp_path = dir.join(format!(".{file_name}.tmp"));

        {
            let mut file = std::fs::File::create(&tmp_path)?;
            // The file holds bearer tokens; restrict it before any data lands.
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
            }
            file.write_all(data.as_bytes())?;
            file.sync_all()?;
        }

        if let Err(e) = std::fs::rename(&tmp_path, &self.path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }
}
