use std::sync::Arc;

use serenity::client::Context;
use serenity::model::id::UserId;
use serenity::prelude::TypeMapKey;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::lyrics::Genius;
use crate::player::Coordinator;
use crate::presenter::Presenter;
use crate::store::{ConfigStore, StoreError};

pub struct PlexMusicKey;

impl TypeMapKey for PlexMusicKey {
    type Value = Arc<PlexMusic>;
}

/// Everything the commands need, shared through the client's data map.
pub struct PlexMusic {
    pub coordinator: Arc<Coordinator>,
    pub catalog: Catalog,
    pub presenter: Arc<Presenter>,
    store: Arc<ConfigStore>,
    http: reqwest::Client,
    lyrics: RwLock<Option<Genius>>,
}

impl PlexMusic {
    pub fn new(
        coordinator: Arc<Coordinator>,
        catalog: Catalog,
        presenter: Arc<Presenter>,
        store: Arc<ConfigStore>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            coordinator,
            catalog,
            presenter,
            store,
            http,
            lyrics: RwLock::new(None),
        }
    }

    pub async fn from_context(ctx: &Context) -> Option<Arc<PlexMusic>> {
        ctx.data.read().await.get::<PlexMusicKey>().cloned()
    }

    /// Brings up lyrics and the global library from stored configuration.
    pub async fn init(&self) {
        let token = self.store.global().await.lyricsgenius;
        self.enable_lyrics(token).await;
        self.catalog.init_global().await;
    }

    pub async fn lyrics(&self) -> Option<Genius> {
        self.lyrics.read().await.clone()
    }

    pub async fn set_lyrics_token(&self, token: &str) -> Result<(), StoreError> {
        self.store.set_lyrics_token(Some(token.to_string())).await?;
        self.enable_lyrics(Some(token.to_string())).await;

        Ok(())
    }

    /// Turns lyrics off for this run; the stored token is left for the next start.
    pub async fn disable_lyrics(&self) {
        warn!("Lyrics disabled until a new token is set");
        *self.lyrics.write().await = None;
    }

    async fn enable_lyrics(&self, token: Option<String>) {
        let genius = match token.filter(|token| !token.is_empty()) {
            Some(token) => match Genius::new(self.http.clone(), token) {
                Ok(genius) => Some(genius),
                Err(why) => {
                    warn!("Could not set up Genius client: {why}");
                    None
                }
            },
            None => {
                warn!("No lyrics token specified, lyrics disabled");
                None
            }
        };

        *self.lyrics.write().await = genius;
    }

    /// Removes everything stored about `user`.
    pub async fn forget_user(&self, user: UserId) -> Result<bool, StoreError> {
        self.catalog.reset_user(user).await
    }

    /// Owner-side deletion: the global server, the lyrics token, and the owner's own entry.
    pub async fn forget_owner(&self, owner: UserId) -> Result<(), StoreError> {
        self.catalog.reset_global().await?;
        self.forget_user(owner).await?;
        *self.lyrics.write().await = None;
        info!("Cleared global configuration");

        Ok(())
    }

    pub async fn shutdown(&self) {
        info!("Shutting down playback");
        self.coordinator.shutdown().await;
    }
}
