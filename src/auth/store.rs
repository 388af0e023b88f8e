use std::{fs, path::PathBuf, sync::RwLock};

use anyhow::{Context, Result};
use log::warn;

use super::AuthContext;

/// Persists the token and user between runs, like browser local storage.
pub struct CredentialStore {
    path: PathBuf,
    data: RwLock<AuthContext>,
}

impl CredentialStore {
    /// Loads stored credentials. A corrupt file is discarded rather than
    /// failing startup.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read credentials from {}", path.display()))?;
            match serde_json::from_str(&contents) {
                Ok(auth) => auth,
                Err(err) => {
                    warn!("Discarding unreadable credentials at {}: {err}", path.display());
                    let _ = fs::remove_file(&path);
                    AuthContext::anonymous()
                }
            }
        } else {
            AuthContext::anonymous()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn current(&self) -> AuthContext {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn save(&self, auth: AuthContext) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(&auth)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write credentials to {}", self.path.display()))?;

        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = auth;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("Failed to remove {}", self.path.display()))?;
        }
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = AuthContext::anonymous();
        Ok(())
    }
}
