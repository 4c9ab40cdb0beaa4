use std::time::Duration;

use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::models::{AlbumRef, MediaRef, PlaylistRef, ServerBinding};
use crate::store::StoreError;

const SIGN_IN_URL: &str = "https://plex.tv/users/sign_in.json";
const PRODUCT: &str = "PlexMusic";

const TRACK_TYPE: &str = "10";
const ALBUM_TYPE: &str = "9";
const ARTIST_SECTION: &str = "artist";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{0} cannot be found")]
    NotFound(&'static str),
    #[error("invalid Plex credentials")]
    Unauthorized,
    #[error("no music library on {0}")]
    NoMusicLibrary(String),
    #[error("Plex request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid Plex url: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CatalogError {
    /// Errors the user should see as "can't find ...".
    pub fn is_not_found(&self) -> bool {
        matches!(self, CatalogError::NotFound(_) | CatalogError::NoMusicLibrary(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub email: String,
    pub username: String,
    pub token: String,
}

/// The first music ("artist") section of a server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MusicLibrary {
    pub server: ServerBinding,
    pub section_key: String,
    pub title: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "MediaContainer")]
    media_container: T,
}

#[derive(Debug, Default, Deserialize)]
struct DirectoryContainer {
    #[serde(rename = "Directory", default)]
    directories: Vec<Directory>,
}

#[derive(Debug, Deserialize)]
struct Directory {
    key: String,
    #[serde(rename = "type")]
    kind: String,
    title: String,
}

#[derive(Debug, Default, Deserialize)]
struct MetadataContainer {
    #[serde(rename = "Metadata", default)]
    metadata: Vec<Metadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Metadata {
    rating_key: String,
    key: String,
    #[serde(rename = "type")]
    kind: String,
    title: String,
    #[serde(default)]
    parent_title: Option<String>,
    #[serde(default)]
    grandparent_title: Option<String>,
    #[serde(default)]
    thumb: Option<String>,
    #[serde(default)]
    parent_thumb: Option<String>,
    #[serde(default)]
    composite: Option<String>,
}

impl Metadata {
    fn into_track(self, server: &ServerBinding) -> MediaRef {
        MediaRef {
            rating_key: self.rating_key,
            key: self.key,
            title: self.title,
            album: self.parent_title.unwrap_or_default(),
            artist: self.grandparent_title.unwrap_or_default(),
            thumb: self.parent_thumb.or(self.thumb),
            server: server.clone(),
        }
    }

    fn into_album(self, server: &ServerBinding) -> AlbumRef {
        AlbumRef {
            rating_key: self.rating_key,
            title: self.title,
            artist: self.parent_title.unwrap_or_default(),
            thumb: self.thumb,
            server: server.clone(),
        }
    }

    fn into_playlist(self, server: &ServerBinding) -> PlaylistRef {
        PlaylistRef {
            rating_key: self.rating_key,
            title: self.title,
            composite: self.composite,
            server: server.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SignInResponse {
    user: SignInUser,
}

#[derive(Debug, Deserialize)]
struct SignInUser {
    email: String,
    username: String,
    #[serde(rename = "authToken", alias = "authentication_token")]
    auth_token: String,
}

/// Thin client over the handful of Plex HTTP endpoints the bot needs.
#[derive(Clone)]
pub struct PlexClient {
    http: Client,
    client_identifier: String,
    sign_in_url: String,
}

impl PlexClient {
    pub fn new(client_identifier: impl Into<String>) -> Result<Self, CatalogError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(20))
            .build()?;

        Ok(Self {
            http,
            client_identifier: client_identifier.into(),
            sign_in_url: SIGN_IN_URL.to_string(),
        })
    }

    pub fn with_sign_in_url(mut self, sign_in_url: impl Into<String>) -> Self {
        self.sign_in_url = sign_in_url.into();
        self
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    async fn get<T: DeserializeOwned>(
        &self,
        server: &ServerBinding,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, CatalogError> {
        let response = self
            .http
            .get(server.url(path)?)
            .query(query)
            .header(ACCEPT, "application/json")
            .header("X-Plex-Client-Identifier", &self.client_identifier)
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(CatalogError::Unauthorized);
        }

        let envelope: Envelope<T> = response.error_for_status()?.json().await?;

        Ok(envelope.media_container)
    }

    /// Exchanges account credentials for a token. The password goes no further.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Account, CatalogError> {
        let response = self
            .http
            .post(&self.sign_in_url)
            .basic_auth(email, Some(password))
            .header(ACCEPT, "application/json")
            .header("X-Plex-Client-Identifier", &self.client_identifier)
            .header("X-Plex-Product", PRODUCT)
            .header("X-Plex-Version", env!("CARGO_PKG_VERSION"))
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::UNPROCESSABLE_ENTITY => {
                return Err(CatalogError::Unauthorized)
            }
            _ => {}
        }

        let body: SignInResponse = response.error_for_status()?.json().await?;

        Ok(Account {
            email: body.user.email,
            username: body.user.username,
            token: body.user.auth_token,
        })
    }

    pub async fn music_library(&self, server: &ServerBinding) -> Result<MusicLibrary, CatalogError> {
        let sections: DirectoryContainer = self.get(server, "/library/sections", &[]).await?;

        sections
            .directories
            .into_iter()
            .find(|section| section.kind == ARTIST_SECTION)
            .map(|section| MusicLibrary {
                server: server.clone(),
                section_key: section.key,
                title: section.title,
            })
            .ok_or_else(|| CatalogError::NoMusicLibrary(server.base_url.clone()))
    }

    async fn search_section(
        &self,
        library: &MusicLibrary,
        kind: &str,
        title: &str,
        max_results: usize,
    ) -> Result<Vec<Metadata>, CatalogError> {
        let path = format!("/library/sections/{}/all", library.section_key);
        let size = max_results.to_string();

        let found: MetadataContainer = self
            .get(
                &library.server,
                &path,
                &[
                    ("type", kind),
                    ("title", title),
                    ("sort", "titleSort"),
                    ("X-Plex-Container-Start", "0"),
                    ("X-Plex-Container-Size", size.as_str()),
                ],
            )
            .await?;

        Ok(found.metadata)
    }

    /// First title match by sort order; with an artist, the first whose
    /// artist name matches case-insensitively.
    pub async fn search_track(
        &self,
        library: &MusicLibrary,
        title: &str,
        artist: Option<&str>,
    ) -> Result<MediaRef, CatalogError> {
        let max_results = if artist.is_some() { 10 } else { 1 };
        let results = self
            .search_section(library, TRACK_TYPE, title, max_results)
            .await?;

        debug!("Track search for {title} returned {} results", results.len());

        results
            .into_iter()
            .map(|metadata| metadata.into_track(&library.server))
            .find(|track| artist.map_or(true, |artist| same_artist(&track.artist, artist)))
            .ok_or(CatalogError::NotFound("Track"))
    }

    pub async fn search_album(
        &self,
        library: &MusicLibrary,
        title: &str,
    ) -> Result<AlbumRef, CatalogError> {
        self.search_section(library, ALBUM_TYPE, title, 1)
            .await?
            .into_iter()
            .next()
            .map(|metadata| metadata.into_album(&library.server))
            .ok_or(CatalogError::NotFound("Album"))
    }

    pub async fn album_tracks(&self, album: &AlbumRef) -> Result<Vec<MediaRef>, CatalogError> {
        let path = format!("/library/metadata/{}/children", album.rating_key);
        let children: MetadataContainer = self.get(&album.server, &path, &[]).await?;

        Ok(tracks_only(children.metadata, &album.server))
    }

    /// Exact title match among the server's playlists.
    pub async fn search_playlist(
        &self,
        server: &ServerBinding,
        title: &str,
    ) -> Result<PlaylistRef, CatalogError> {
        let playlists: MetadataContainer = self.get(server, "/playlists", &[]).await?;

        playlists
            .metadata
            .into_iter()
            .find(|playlist| playlist.title == title)
            .map(|playlist| playlist.into_playlist(server))
            .ok_or(CatalogError::NotFound("Playlist"))
    }

    pub async fn playlist_tracks(
        &self,
        playlist: &PlaylistRef,
    ) -> Result<Vec<MediaRef>, CatalogError> {
        let path = format!("/playlists/{}/items", playlist.rating_key);
        let items: MetadataContainer = self.get(&playlist.server, &path, &[]).await?;

        Ok(tracks_only(items.metadata, &playlist.server))
    }
}

fn tracks_only(items: Vec<Metadata>, server: &ServerBinding) -> Vec<MediaRef> {
    items
        .into_iter()
        .filter(|item| item.kind == "track")
        .map(|item| item.into_track(server))
        .collect()
}

fn same_artist(candidate: &str, wanted: &str) -> bool {
    candidate.to_lowercase() == wanted.to_lowercase()
}
