use std::str::FromStr;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::models::{AlbumRef, MediaRef, PlaylistRef};

const IMAGE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PresenterError {
    #[error("Unsupported type of embed {0}")]
    InvalidKind(String),
}

/// Which status card to build for a track.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    Play,
    Queue,
}

impl FromStr for ArtifactKind {
    type Err = PresenterError;

    fn from_str(kind: &str) -> Result<Self, Self::Err> {
        match kind {
            "play" => Ok(ArtifactKind::Play),
            "queue" => Ok(ArtifactKind::Queue),
            other => Err(PresenterError::InvalidKind(other.to_string())),
        }
    }
}

/// A status card ready to be posted: embed text plus optional cover art.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    pub title: String,
    pub description: String,
    pub author: Option<String>,
    pub image: Option<Vec<u8>>,
}

pub struct Presenter {
    http: Client,
    author: Option<String>,
}

impl Presenter {
    pub fn new(http: Client, author: Option<String>) -> Self {
        Self { http, author }
    }

    pub async fn build_track_artifact(
        &self,
        track: &MediaRef,
        kind: &str,
    ) -> Result<Artifact, PresenterError> {
        let kind = kind.parse()?;
        Ok(self.track(track, kind).await)
    }

    pub async fn track(&self, track: &MediaRef, kind: ArtifactKind) -> Artifact {
        let title = match kind {
            ArtifactKind::Play => format!("Now Playing - {}", track.title),
            ArtifactKind::Queue => format!("Added to queue - {}", track.title),
        };

        let image = self.image(track.thumb_url(), &track.title).await;
        debug!("Built embed for track - {}", track.title);

        Artifact {
            title,
            description: format!("{} - {}", track.album, track.artist),
            author: self.author.clone(),
            image,
        }
    }

    pub async fn album(&self, album: &AlbumRef) -> Artifact {
        let image = self.image(album.thumb_url(), &album.title).await;
        debug!("Built embed for album - {}", album.title);

        Artifact {
            title: "Added album to queue".to_string(),
            description: format!("{} - {}", album.title, album.artist),
            author: self.author.clone(),
            image,
        }
    }

    pub async fn playlist(&self, playlist: &PlaylistRef) -> Artifact {
        let image = self.image(playlist.composite_url(), &playlist.title).await;
        debug!("Built embed for playlist - {}", playlist.title);

        Artifact {
            title: "Added playlist to queue".to_string(),
            description: playlist.title.clone(),
            author: self.author.clone(),
            image,
        }
    }

    /// Cover art is decoration: any failure yields a card without an image.
    async fn image(
        &self,
        url: Option<Result<Url, url::ParseError>>,
        item: &str,
    ) -> Option<Vec<u8>> {
        let url = match url {
            None => {
                warn!("{item} does not have a thumbnail");
                return None;
            }
            Some(Err(why)) => {
                warn!("Bad thumbnail url for {item}: {why}");
                return None;
            }
            Some(Ok(url)) => url,
        };

        let download = async {
            self.http
                .get(url)
                .send()
                .await?
                .error_for_status()?
                .bytes()
                .await
        };

        match tokio::time::timeout(IMAGE_TIMEOUT, download).await {
            Ok(Ok(bytes)) => Some(bytes.to_vec()),
            Ok(Err(why)) => {
                warn!("Could not fetch thumbnail for {item}: {why}");
                None
            }
            Err(_) => {
                warn!("Thumbnail for {item} timed out");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::models::ServerBinding;

    fn track(base_url: &str, thumb: Option<&str>) -> MediaRef {
        MediaRef {
            rating_key: "42".to_string(),
            key: "/library/metadata/42".to_string(),
            title: "Sunrise".to_string(),
            album: "Mornings".to_string(),
            artist: "Bandname".to_string(),
            thumb: thumb.map(str::to_string),
            server: ServerBinding::new(base_url, "token"),
        }
    }

    fn presenter() -> Presenter {
        Presenter::new(Client::new(), Some("PlexBot".to_string()))
    }

    #[tokio::test]
    async fn play_and_queue_cards_differ_in_title() {
        let presenter = presenter();
        let track = track("http://plex.invalid", None);

        let play = presenter.build_track_artifact(&track, "play").await.unwrap();
        let queue = presenter.build_track_artifact(&track, "queue").await.unwrap();

        assert_eq!(play.title, "Now Playing - Sunrise");
        assert_eq!(queue.title, "Added to queue - Sunrise");
        assert_eq!(play.description, "Mornings - Bandname");
        assert_eq!(play.author.as_deref(), Some("PlexBot"));
    }

    #[tokio::test]
    async fn unknown_kind_is_rejected() {
        let track = track("http://plex.invalid", None);

        assert_eq!(
            presenter().build_track_artifact(&track, "radio").await,
            Err(PresenterError::InvalidKind("radio".to_string()))
        );
    }

    #[tokio::test]
    async fn missing_thumbnail_builds_without_image() {
        let artifact = presenter()
            .track(&track("http://plex.invalid", None), ArtifactKind::Play)
            .await;

        assert_eq!(artifact.image, None);
    }

    #[tokio::test]
    async fn thumbnail_is_attached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/library/metadata/41/thumb/1"))
            .and(query_param("X-Plex-Token", "token"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x89, b'P', b'N', b'G']))
            .mount(&server)
            .await;

        let artifact = presenter()
            .track(
                &track(&server.uri(), Some("/library/metadata/41/thumb/1")),
                ArtifactKind::Queue,
            )
            .await;

        assert_eq!(artifact.image, Some(vec![0x89, b'P', b'N', b'G']));
    }

    #[tokio::test]
    async fn broken_thumbnail_degrades_to_no_image() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let artifact = presenter()
            .track(&track(&server.uri(), Some("/missing")), ArtifactKind::Play)
            .await;

        assert_eq!(artifact.image, None);
        assert_eq!(artifact.title, "Now Playing - Sunrise");
    }

    #[tokio::test]
    async fn album_and_playlist_cards() {
        let presenter = presenter();
        let server = ServerBinding::new("http://plex.invalid", "token");

        let album = presenter
            .album(&AlbumRef {
                rating_key: "20".to_string(),
                title: "Mornings".to_string(),
                artist: "Bandname".to_string(),
                thumb: None,
                server: server.clone(),
            })
            .await;
        assert_eq!(album.title, "Added album to queue");
        assert_eq!(album.description, "Mornings - Bandname");

        let playlist = presenter
            .playlist(&PlaylistRef {
                rating_key: "31".to_string(),
                title: "Gym".to_string(),
                composite: None,
                server,
            })
            .await;
        assert_eq!(playlist.title, "Added playlist to queue");
        assert_eq!(playlist.description, "Gym");
    }
}
