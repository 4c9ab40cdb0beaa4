use std::collections::HashMap;
use std::sync::Arc;

use serenity::model::id::UserId;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::models::{AlbumRef, BindingScope, MediaRef, PlaylistRef, StoredCredentials};
use crate::plex::{Account, CatalogError, MusicLibrary, PlexClient};
use crate::store::{ConfigStore, StoreError};

/// Resolves which Plex server a user talks to and runs searches against it.
///
/// Music libraries are looked up once per scope and cached until that scope's
/// credentials change.
pub struct Catalog {
    client: PlexClient,
    store: Arc<ConfigStore>,
    libraries: RwLock<HashMap<BindingScope, MusicLibrary>>,
}

impl Catalog {
    pub fn new(client: PlexClient, store: Arc<ConfigStore>) -> Self {
        Self {
            client,
            store,
            libraries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn library_for(&self, user: UserId) -> Result<MusicLibrary, CatalogError> {
        let (scope, binding) = self.store.resolve_binding(user).await?;

        if let Some(library) = self.libraries.read().await.get(&scope) {
            if library.server == binding {
                return Ok(library.clone());
            }
        }

        let library = self.client.music_library(&binding).await?;
        info!("Using music library {} on {}", library.title, binding.base_url);
        self.libraries.write().await.insert(scope, library.clone());

        Ok(library)
    }

    pub async fn search_track(
        &self,
        user: UserId,
        title: &str,
        artist: Option<&str>,
    ) -> Result<MediaRef, CatalogError> {
        let library = self.library_for(user).await?;
        self.client.search_track(&library, title, artist).await
    }

    pub async fn search_album(&self, user: UserId, title: &str) -> Result<AlbumRef, CatalogError> {
        let library = self.library_for(user).await?;
        self.client.search_album(&library, title).await
    }

    pub async fn album_tracks(&self, album: &AlbumRef) -> Result<Vec<MediaRef>, CatalogError> {
        self.client.album_tracks(album).await
    }

    pub async fn search_playlist(
        &self,
        user: UserId,
        title: &str,
    ) -> Result<PlaylistRef, CatalogError> {
        let (_, binding) = self.store.resolve_binding(user).await?;
        self.client.search_playlist(&binding, title).await
    }

    pub async fn playlist_tracks(
        &self,
        playlist: &PlaylistRef,
    ) -> Result<Vec<MediaRef>, CatalogError> {
        self.client.playlist_tracks(playlist).await
    }

    /// Signs in and stores the issued token for this user. Nothing is stored on failure.
    pub async fn authenticate_user(
        &self,
        user: UserId,
        email: &str,
        password: &str,
        server_url: &str,
    ) -> Result<Account, CatalogError> {
        let account = self.client.authenticate(email, password).await?;

        self.store
            .set_user(user, credentials(&account, server_url))
            .await?;
        self.libraries.write().await.remove(&BindingScope::User(user));

        Ok(account)
    }

    pub async fn authenticate_global(
        &self,
        email: &str,
        password: &str,
        server_url: &str,
    ) -> Result<Account, CatalogError> {
        let account = self.client.authenticate(email, password).await?;

        self.store
            .set_global_credentials(credentials(&account, server_url))
            .await?;
        self.init_global().await;

        Ok(account)
    }

    pub async fn reset_user(&self, user: UserId) -> Result<bool, StoreError> {
        self.libraries.write().await.remove(&BindingScope::User(user));
        self.store.clear_user(user).await
    }

    /// Forgets the global server; users without their own binding get nothing afterwards.
    pub async fn reset_global(&self) -> Result<(), StoreError> {
        self.libraries.write().await.remove(&BindingScope::Global);
        self.store.clear_global().await
    }

    /// Eagerly resolves the global library. Failures are only logged.
    pub async fn init_global(&self) {
        self.libraries.write().await.remove(&BindingScope::Global);

        let Some(binding) = self.store.global().await.credentials.binding() else {
            error!(
                "Missing global configuration, run `config global auth` in a DM with the bot \
                 to set up the global Plex server"
            );
            return;
        };

        match self.client.music_library(&binding).await {
            Ok(library) => {
                info!("Global music library {} ready", library.title);
                self.libraries
                    .write()
                    .await
                    .insert(BindingScope::Global, library);
            }
            Err(CatalogError::Unauthorized) => error!(
                "Invalid global Plex auth, run `config global auth` in a DM with the bot"
            ),
            Err(why) => warn!("Global Plex server unavailable: {why}"),
        }
    }
}

fn credentials(account: &Account, server_url: &str) -> StoredCredentials {
    StoredCredentials {
        username: Some(account.email.clone()),
        token: Some(account.token.clone()),
        url: Some(server_url.to_string()),
    }
}
