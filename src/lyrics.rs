use reqwest::{Client, StatusCode};
use scraper::{Html, Node, Selector};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

const API_BASE: &str = "https://api.genius.com/";
const LYRICS_CONTAINER: &str = r#"div[data-lyrics-container="true"]"#;

/// Discord caps messages at 2000 characters; leave room for the code fence.
pub const CHUNK_SIZE: usize = 1950;

#[derive(Debug, Error)]
pub enum LyricsError {
    #[error("Genius rejected the token")]
    Unauthorized,
    #[error("Genius request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid Genius url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    response: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "type")]
    kind: String,
    result: Song,
}

#[derive(Debug, Deserialize)]
struct Song {
    url: String,
    primary_artist: Artist,
}

#[derive(Debug, Deserialize)]
struct Artist {
    name: String,
}

#[derive(Clone)]
pub struct Genius {
    http: Client,
    token: String,
    api_base: Url,
}

impl Genius {
    pub fn new(http: Client, token: impl Into<String>) -> Result<Self, LyricsError> {
        Ok(Self::with_api_base(http, token, Url::parse(API_BASE)?))
    }

    pub fn with_api_base(http: Client, token: impl Into<String>, api_base: Url) -> Self {
        Self {
            http,
            token: token.into(),
            api_base,
        }
    }

    /// Lyrics of the best match for `title` by `artist`, or `None` when Genius has no page.
    pub async fn search_song(
        &self,
        title: &str,
        artist: &str,
    ) -> Result<Option<String>, LyricsError> {
        let mut url = self.api_base.join("search")?;
        url.query_pairs_mut()
            .append_pair("q", &format!("{title} {artist}"));

        let response = self.http.get(url).bearer_auth(&self.token).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(LyricsError::Unauthorized);
        }
        let search: SearchResponse = response.error_for_status()?.json().await?;

        let songs: Vec<Song> = search
            .response
            .hits
            .into_iter()
            .filter(|hit| hit.kind == "song")
            .map(|hit| hit.result)
            .collect();

        let artist = artist.to_lowercase();
        let song = match songs
            .iter()
            .position(|song| song.primary_artist.name.to_lowercase() == artist)
        {
            Some(index) => &songs[index],
            None => match songs.first() {
                Some(song) => song,
                None => {
                    debug!("No Genius hit for {title}");
                    return Ok(None);
                }
            },
        };

        let page = self
            .http
            .get(song.url.as_str())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(extract_lyrics(&page))
    }
}

/// Pulls the lyric text out of a Genius song page.
pub fn extract_lyrics(page: &str) -> Option<String> {
    let document = Html::parse_document(page);
    let selector = Selector::parse(LYRICS_CONTAINER).ok()?;

    let mut lyrics = String::new();
    for container in document.select(&selector) {
        if !lyrics.is_empty() {
            lyrics.push('\n');
        }
        for node in container.descendants() {
            match node.value() {
                Node::Text(text) => lyrics.push_str(text),
                Node::Element(element) if element.name() == "br" => lyrics.push('\n'),
                _ => {}
            }
        }
    }

    let lyrics = lyrics.trim();
    (!lyrics.is_empty()).then(|| lyrics.to_string())
}

/// Splits `text` into pieces of at most `size` characters, never yielding an empty piece.
pub fn chunk_lyrics(text: &str, size: usize) -> Vec<&str> {
    let size = size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    for (count, (index, _)) in text.char_indices().enumerate() {
        if count > 0 && count % size == 0 {
            chunks.push(&text[start..index]);
            start = index;
        }
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }

    chunks
}
