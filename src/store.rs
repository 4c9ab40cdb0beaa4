use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::models::{BindingScope, ServerBinding, StoredCredentials};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no Plex server configured for this user and no global server set")]
    ConfigurationMissing,
    #[error("failed to access config store at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config store at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to serialize config store: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSettings {
    #[serde(flatten)]
    pub credentials: StoredCredentials,
    #[serde(default)]
    pub lyricsgenius: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    global: GlobalSettings,
    #[serde(default)]
    users: HashMap<u64, StoredCredentials>,
}

/// Per-user and global key/value configuration, written through to a JSON file.
pub struct ConfigStore {
    path: PathBuf,
    document: RwLock<Document>,
}

impl ConfigStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let document = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                info!("No config store at {}, starting empty", path.display());
                Document::default()
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        Ok(Self {
            path,
            document: RwLock::new(document),
        })
    }

    pub async fn user(&self, user: UserId) -> StoredCredentials {
        self.document
            .read()
            .await
            .users
            .get(&user.0)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn set_user(
        &self,
        user: UserId,
        credentials: StoredCredentials,
    ) -> Result<(), StoreError> {
        self.update(|document| {
            document.users.insert(user.0, credentials);
        })
        .await
    }

    /// Removes exactly this user's entry. Returns whether one existed.
    pub async fn clear_user(&self, user: UserId) -> Result<bool, StoreError> {
        if !self.document.read().await.users.contains_key(&user.0) {
            return Ok(false);
        }

        self.update(|document| document.users.remove(&user.0).is_some())
            .await
    }

    pub async fn global(&self) -> GlobalSettings {
        self.document.read().await.global.clone()
    }

    pub async fn set_global_credentials(
        &self,
        credentials: StoredCredentials,
    ) -> Result<(), StoreError> {
        self.update(|document| {
            document.global.credentials = credentials;
        })
        .await
    }

    pub async fn set_lyrics_token(&self, token: Option<String>) -> Result<(), StoreError> {
        self.update(|document| {
            document.global.lyricsgenius = token;
        })
        .await
    }

    /// Drops the global server and the lyrics token.
    pub async fn clear_global(&self) -> Result<(), StoreError> {
        self.update(|document| {
            document.global = GlobalSettings::default();
        })
        .await
    }

    /// A fully configured user binding wins over the global one.
    pub async fn resolve_binding(
        &self,
        user: UserId,
    ) -> Result<(BindingScope, ServerBinding), StoreError> {
        let document = self.document.read().await;

        if let Some(binding) = document.users.get(&user.0).and_then(StoredCredentials::binding) {
            return Ok((BindingScope::User(user), binding));
        }

        document
            .global
            .credentials
            .binding()
            .map(|binding| (BindingScope::Global, binding))
            .ok_or(StoreError::ConfigurationMissing)
    }

    /// Applies `change` to a copy, writes the copy, and only then makes it visible.
    async fn update<R>(&self, change: impl FnOnce(&mut Document) -> R) -> Result<R, StoreError> {
        let mut document = self.document.write().await;

        let mut next = document.clone();
        let result = change(&mut next);
        self.persist(&next).await?;
        *document = next;

        Ok(result)
    }

    async fn persist(&self, document: &Document) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(document)?;
        let staging = self.path.with_extension("json.tmp");

        fs::write(&staging, bytes)
            .await
            .map_err(|source| StoreError::Io {
                path: staging.clone(),
                source,
            })?;
        fs::rename(&staging, &self.path)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;

        debug!("Config store written to {}", self.path.display());

        Ok(())
    }
}
