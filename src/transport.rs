use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serenity::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::tracks::{PlayMode, TrackError, TrackHandle};
use songbird::{Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent};
use thiserror::Error;
use tracing::{info, warn};

use crate::player::CompletionHandle;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected to a voice channel")]
    NotConnected,
    #[error("failed to join voice channel: {0}")]
    Join(#[from] songbird::error::JoinError),
    #[error("failed to start ffmpeg: {0}")]
    Input(String),
    #[error("track control failed: {0}")]
    Track(#[from] TrackError),
}

/// Voice side of playback: one connection and at most one track per guild.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// The voice channel the bot is connected to in this guild, if any.
    async fn connected_channel(&self, guild: GuildId) -> Option<ChannelId>;

    async fn join(&self, guild: GuildId, channel: ChannelId) -> Result<(), TransportError>;

    /// Starts streaming `url`. `completion` fires once the track stops for any reason.
    async fn play(
        &self,
        guild: GuildId,
        url: &str,
        completion: CompletionHandle,
    ) -> Result<(), TransportError>;

    /// Whether a track still holds the connection, paused or not.
    async fn is_playing(&self, guild: GuildId) -> bool;

    /// Returns whether there was a track to act on.
    async fn pause(&self, guild: GuildId) -> Result<bool, TransportError>;

    async fn resume(&self, guild: GuildId) -> Result<bool, TransportError>;

    async fn stop(&self, guild: GuildId) -> Result<bool, TransportError>;

    async fn disconnect(&self, guild: GuildId) -> Result<(), TransportError>;
}

pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    tracks: Mutex<HashMap<GuildId, TrackHandle>>,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self {
            manager,
            tracks: Mutex::new(HashMap::new()),
        }
    }

    fn tracks(&self) -> MutexGuard<'_, HashMap<GuildId, TrackHandle>> {
        self.tracks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, guild: GuildId) -> Option<TrackHandle> {
        self.tracks().get(&guild).cloned()
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn connected_channel(&self, guild: GuildId) -> Option<ChannelId> {
        let call = self.manager.get(guild)?;
        let channel = call.lock().await.current_channel();

        channel.map(|channel| ChannelId(channel.0))
    }

    async fn join(&self, guild: GuildId, channel: ChannelId) -> Result<(), TransportError> {
        let (call, result) = self.manager.join(guild, channel).await;
        result?;

        let mut handler = call.lock().await;

        if handler.is_deaf() {
            info!("Already deafen!")
        } else if let Err(e) = handler.deafen(true).await {
            info!("Deafen failed due to {e:?}")
        }

        Ok(())
    }

    async fn play(
        &self,
        guild: GuildId,
        url: &str,
        completion: CompletionHandle,
    ) -> Result<(), TransportError> {
        let call = self.manager.get(guild).ok_or(TransportError::NotConnected)?;

        let source = songbird::ffmpeg(url)
            .await
            .map_err(|why| TransportError::Input(why.to_string()))?;

        let mut handler = call.lock().await;
        handler.stop(); // Just in case something was playing before
        let track = handler.play_source(source);

        track.add_event(Event::Track(TrackEvent::End), TrackEndNotifier { completion })?;
        self.tracks().insert(guild, track);

        Ok(())
    }

    async fn is_playing(&self, guild: GuildId) -> bool {
        let Some(track) = self.track(guild) else {
            return false;
        };

        match track.get_info().await {
            Ok(state) => matches!(state.playing, PlayMode::Play | PlayMode::Pause),
            Err(_) => false,
        }
    }

    async fn pause(&self, guild: GuildId) -> Result<bool, TransportError> {
        match self.track(guild) {
            Some(track) => {
                track.pause()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn resume(&self, guild: GuildId) -> Result<bool, TransportError> {
        match self.track(guild) {
            Some(track) => {
                track.play()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn stop(&self, guild: GuildId) -> Result<bool, TransportError> {
        let Some(track) = self.tracks().remove(&guild) else {
            return Ok(false);
        };

        // A track that already ended reports an error here; nothing left to stop.
        if let Err(why) = track.stop() {
            warn!("Stopping track failed: {why}");
        }

        Ok(true)
    }

    async fn disconnect(&self, guild: GuildId) -> Result<(), TransportError> {
        self.tracks().remove(&guild);

        if self.manager.get(guild).is_some() {
            self.manager.remove(guild).await?;
            info!("Left voice channel in guild {}", guild.0);
        }

        Ok(())
    }
}

struct TrackEndNotifier {
    completion: CompletionHandle,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        info!("End notifier triggered");

        self.completion.finish();

        None
    }
}
