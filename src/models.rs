use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use url::Url;

/// A Plex server and the token used to talk to it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServerBinding {
    pub base_url: String,
    pub token: String,
}

impl ServerBinding {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Self {
            base_url,
            token: token.into(),
        }
    }

    /// Absolute URL for a server path with the auth token attached.
    pub fn url(&self, path: &str) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))?;
        url.query_pairs_mut().append_pair("X-Plex-Token", &self.token);

        Ok(url)
    }
}

/// Which stored configuration a binding was resolved from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingScope {
    User(UserId),
    Global,
}

/// Persisted account data. The password is never part of it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl StoredCredentials {
    /// Only a binding with both a server URL and a token counts as configured.
    pub fn binding(&self) -> Option<ServerBinding> {
        let url = self.url.as_deref().filter(|url| !url.is_empty())?;
        let token = self.token.as_deref().filter(|token| !token.is_empty())?;

        Some(ServerBinding::new(url, token))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaRef {
    pub rating_key: String,
    pub key: String,
    pub title: String,
    pub album: String,
    pub artist: String,
    pub thumb: Option<String>,
    pub server: ServerBinding,
}

impl MediaRef {
    pub fn stream_url(&self) -> Result<Url, url::ParseError> {
        let mut url = self.server.url("/audio/:/transcode/universal/start.m3u8")?;
        url.query_pairs_mut()
            .append_pair("path", &self.key)
            .append_pair("mediaIndex", "0")
            .append_pair("partIndex", "0")
            .append_pair("offset", "0")
            .append_pair("fastSeek", "1")
            .append_pair("copyts", "1")
            .append_pair("X-Plex-Platform", "Chrome");

        Ok(url)
    }

    pub fn thumb_url(&self) -> Option<Result<Url, url::ParseError>> {
        self.thumb.as_deref().map(|thumb| self.server.url(thumb))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlbumRef {
    pub rating_key: String,
    pub title: String,
    pub artist: String,
    pub thumb: Option<String>,
    pub server: ServerBinding,
}

impl AlbumRef {
    pub fn thumb_url(&self) -> Option<Result<Url, url::ParseError>> {
        self.thumb.as_deref().map(|thumb| self.server.url(thumb))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaylistRef {
    pub rating_key: String,
    pub title: String,
    pub composite: Option<String>,
    pub server: ServerBinding,
}

impl PlaylistRef {
    pub fn composite_url(&self) -> Option<Result<Url, url::ParseError>> {
        self.composite.as_deref().map(|composite| self.server.url(composite))
    }
}
