use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serenity::model::id::{ChannelId, GuildId};
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};
use tracing_futures::Instrument;

use crate::messaging::{delete_quietly, Messenger, MessagingError, StatusMessage};
use crate::models::MediaRef;
use crate::presenter::{ArtifactKind, Presenter};
use crate::queue::{PlayQueue, QueueError};
use crate::transport::{TransportError, VoiceTransport};

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("could not build stream url: {0}")]
    StreamUrl(#[from] url::ParseError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// How long one dequeue waits before the loop takes another turn.
    pub idle_poll: Duration,
    pub max_queue: Option<usize>,
}

#[derive(Clone, Debug)]
struct Current {
    play_id: u64,
    media: MediaRef,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn clear_current(current: &Mutex<Option<Current>>, play_id: u64) {
    let mut current = lock(current);

    if current.as_ref().map(|playing| playing.play_id) == Some(play_id) {
        *current = None;
    }
}

/// Handed to the transport along with each track.
///
/// `finish` may run on any thread: it clears the session's current track and
/// posts the completion to the session loop's channel.
#[derive(Clone)]
pub struct CompletionHandle {
    play_id: u64,
    current: Arc<Mutex<Option<Current>>>,
    completions: UnboundedSender<u64>,
}

impl CompletionHandle {
    pub fn finish(&self) {
        clear_current(&self.current, self.play_id);

        if self.completions.send(self.play_id).is_err() {
            debug!("Track {} finished after its session closed", self.play_id);
        }
    }
}

/// All playback state of one guild.
pub struct Session {
    guild: GuildId,
    queue: PlayQueue<MediaRef>,
    current: Arc<Mutex<Option<Current>>>,
    text_channel: Mutex<ChannelId>,
    status: Mutex<Option<StatusMessage>>,
    completions: UnboundedSender<u64>,
    cancel: CancellationToken,
}

impl Session {
    pub fn guild(&self) -> GuildId {
        self.guild
    }

    pub fn enqueue(&self, media: MediaRef) -> Result<(), QueueError> {
        self.queue.push(media)
    }

    pub fn enqueue_all(&self, tracks: Vec<MediaRef>) -> Result<usize, QueueError> {
        self.queue.push_all(tracks)
    }

    pub fn current(&self) -> Option<MediaRef> {
        lock(&self.current)
            .as_ref()
            .map(|playing| playing.media.clone())
    }

    pub fn pending(&self, limit: usize) -> Vec<MediaRef> {
        self.queue.snapshot(limit)
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    pub fn text_channel(&self) -> ChannelId {
        *lock(&self.text_channel)
    }

    fn take_status(&self) -> Option<StatusMessage> {
        lock(&self.status).take()
    }

    fn set_status(&self, status: StatusMessage) -> Option<StatusMessage> {
        lock(&self.status).replace(status)
    }
}

/// Owns every guild session and the loop that feeds each one's transport.
pub struct Coordinator {
    sessions: RwLock<HashMap<GuildId, Arc<Session>>>,
    transport: Arc<dyn VoiceTransport>,
    messenger: Arc<dyn Messenger>,
    presenter: Arc<Presenter>,
    config: PlayerConfig,
    shutdown: CancellationToken,
    next_play_id: AtomicU64,
}

impl Coordinator {
    pub fn new(
        transport: Arc<dyn VoiceTransport>,
        messenger: Arc<dyn Messenger>,
        presenter: Arc<Presenter>,
        config: PlayerConfig,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            transport,
            messenger,
            presenter,
            config,
            shutdown: CancellationToken::new(),
            next_play_id: AtomicU64::new(1),
        }
    }

    pub fn messenger(&self) -> &dyn Messenger {
        self.messenger.as_ref()
    }

    pub async fn session(&self, guild: GuildId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&guild).cloned()
    }

    /// Joins `voice` unless already connected there, then returns the guild's
    /// session, starting its loop if this is the first play in the guild.
    pub async fn connect(
        self: &Arc<Self>,
        guild: GuildId,
        voice: ChannelId,
        text: ChannelId,
    ) -> Result<Arc<Session>, TransportError> {
        let voice = match self.transport.connected_channel(guild).await {
            Some(channel) => {
                debug!("Already connected to vc ({}).", channel.0);
                channel
            }
            None => {
                self.transport.join(guild, voice).await?;
                debug!("Connected to vc ({}).", voice.0);
                voice
            }
        };

        debug!("Session in guild {} plays through vc ({})", guild.0, voice.0);

        Ok(self.ensure_session(guild, text).await)
    }

    async fn ensure_session(self: &Arc<Self>, guild: GuildId, text: ChannelId) -> Arc<Session> {
        let mut sessions = self.sessions.write().await;

        if let Some(session) = sessions.get(&guild) {
            *lock(&session.text_channel) = text;
            return session.clone();
        }

        let (completions, receiver) = unbounded_channel();
        let session = Arc::new(Session {
            guild,
            queue: PlayQueue::new(self.config.max_queue),
            current: Arc::new(Mutex::new(None)),
            text_channel: Mutex::new(text),
            status: Mutex::new(None),
            completions,
            cancel: self.shutdown.child_token(),
        });
        sessions.insert(guild, session.clone());

        let span = info_span!("session", guild = guild.0);
        tokio::spawn(
            self.clone()
                .run(session.clone(), receiver)
                .instrument(span),
        );

        session
    }

    pub async fn is_busy(&self, guild: GuildId) -> bool {
        let has_current = match self.session(guild).await {
            Some(session) => session.current().is_some(),
            None => false,
        };

        has_current || self.transport.is_playing(guild).await
    }

    pub async fn now_playing(&self, guild: GuildId) -> Option<MediaRef> {
        self.session(guild).await?.current()
    }

    /// Drops queued tracks; the one already playing keeps going.
    pub async fn clear(&self, guild: GuildId) -> usize {
        match self.session(guild).await {
            Some(session) => session.queue.clear(),
            None => 0,
        }
    }

    pub async fn pause(&self, guild: GuildId) -> Result<bool, TransportError> {
        if self.session(guild).await.is_none() {
            return Ok(false);
        }

        self.transport.pause(guild).await
    }

    pub async fn resume(&self, guild: GuildId) -> Result<bool, TransportError> {
        if self.session(guild).await.is_none() {
            return Ok(false);
        }

        self.transport.resume(guild).await
    }

    /// Stops the current track; the session loop moves on to the next one.
    pub async fn skip(&self, guild: GuildId) -> Result<bool, TransportError> {
        if self.session(guild).await.is_none() {
            return Ok(false);
        }

        self.transport.stop(guild).await
    }

    /// Tears the session down and leaves voice. A guild without a session is left untouched.
    pub async fn stop(&self, guild: GuildId) -> Result<bool, TransportError> {
        let Some(session) = self.sessions.write().await.remove(&guild) else {
            return Ok(false);
        };

        session.cancel.cancel();
        session.queue.clear();

        let stopped = self.transport.stop(guild).await;
        let disconnected = self.transport.disconnect(guild).await;
        *lock(&session.current) = None;

        if let Some(status) = session.take_status() {
            delete_quietly(self.messenger.as_ref(), status).await;
        }

        info!("Stopped session in guild {}", guild.0);

        stopped?;
        disconnected?;

        Ok(true)
    }

    /// Replaces the now-playing message with a fresh one.
    pub async fn repost_now_playing(&self, guild: GuildId) -> Result<bool, MessagingError> {
        let Some(session) = self.session(guild).await else {
            return Ok(false);
        };
        let Some(media) = session.current() else {
            return Ok(false);
        };

        let artifact = self.presenter.track(&media, ArtifactKind::Play).await;

        if let Some(old) = session.take_status() {
            delete_quietly(self.messenger.as_ref(), old).await;
            debug!("Deleted old np status");
        }

        let status = self
            .messenger
            .send_artifact(session.text_channel(), artifact)
            .await?;
        if let Some(stale) = session.set_status(status) {
            delete_quietly(self.messenger.as_ref(), stale).await;
        }
        debug!("Created np status");

        Ok(true)
    }

    /// Cancels every session loop and leaves every voice channel.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let sessions: Vec<Arc<Session>> = self
            .sessions
            .write()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect();

        for session in sessions {
            if let Err(why) = self.transport.stop(session.guild).await {
                warn!("Stopping playback in guild {} failed: {why}", session.guild.0);
            }
            if let Err(why) = self.transport.disconnect(session.guild).await {
                warn!("Leaving voice in guild {} failed: {why}", session.guild.0);
            }
        }
    }

    async fn run(self: Arc<Self>, session: Arc<Session>, mut completions: UnboundedReceiver<u64>) {
        info!("Session loop started");

        loop {
            tokio::select! {
                _ = session.cancel.cancelled() => break,
                _ = self.tick(&session, &mut completions) => {}
            }
        }

        info!("Session loop stopped");
    }

    /// One turn: wait for a track, play it, wait for it to finish, clean up.
    async fn tick(&self, session: &Session, completions: &mut UnboundedReceiver<u64>) {
        // A paused track still owns the transport until its completion arrives
        if session.current().is_some() || self.transport.is_playing(session.guild).await {
            tokio::time::sleep(self.config.idle_poll).await;
            return;
        }

        let Some(media) = session.queue.pop_timeout(self.config.idle_poll).await else {
            return;
        };

        let play_id = match self.start(session, &media).await {
            Ok(play_id) => play_id,
            Err(why) => {
                warn!("Playback attempt failed: {why}");
                return;
            }
        };

        if let Err(why) = self.announce(session, &media).await {
            warn!("Could not post now playing for {}: {why}", media.title);
        }

        while let Some(finished) = completions.recv().await {
            if finished == play_id {
                break;
            }
            debug!("Ignoring completion of earlier track {finished}");
        }

        clear_current(&session.current, play_id);

        if let Some(status) = session.take_status() {
            delete_quietly(self.messenger.as_ref(), status).await;
        }
    }

    async fn start(&self, session: &Session, media: &MediaRef) -> Result<u64, PlayerError> {
        let url = media.stream_url()?;

        let play_id = self.next_play_id.fetch_add(1, Ordering::Relaxed);
        *lock(&session.current) = Some(Current {
            play_id,
            media: media.clone(),
        });

        let completion = CompletionHandle {
            play_id,
            current: session.current.clone(),
            completions: session.completions.clone(),
        };

        if let Err(why) = self.transport.play(session.guild, url.as_str(), completion).await {
            clear_current(&session.current, play_id);
            return Err(why.into());
        }

        info!("Playing {} ({})", media.title, media.rating_key);

        Ok(play_id)
    }

    /// Posts the now-playing card once audio is already running.
    async fn announce(&self, session: &Session, media: &MediaRef) -> Result<(), MessagingError> {
        let artifact = self.presenter.track(media, ArtifactKind::Play).await;

        let status = self
            .messenger
            .send_artifact(session.text_channel(), artifact)
            .await?;
        if let Some(stale) = session.set_status(status) {
            delete_quietly(self.messenger.as_ref(), stale).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::future::Future;
    use std::sync::atomic::AtomicBool;

    use serenity::async_trait;
    use serenity::model::id::MessageId;

    use super::*;
    use crate::models::ServerBinding;
    use crate::presenter::Artifact;

    const GUILD: GuildId = GuildId(1);
    const VOICE: ChannelId = ChannelId(10);
    const TEXT: ChannelId = ChannelId(20);

    #[derive(Default)]
    struct FakeTransport {
        connected: Mutex<HashSet<GuildId>>,
        playing: Mutex<HashMap<GuildId, CompletionHandle>>,
        paused: Mutex<HashSet<GuildId>>,
        joins: Mutex<Vec<ChannelId>>,
        played: Mutex<Vec<String>>,
        disconnects: Mutex<Vec<GuildId>>,
    }

    impl FakeTransport {
        /// Simulates the track running out, as the voice driver would.
        fn finish(&self, guild: GuildId) {
            let handle = lock(&self.playing).remove(&guild);
            if let Some(handle) = handle {
                handle.finish();
            }
        }

        fn played(&self) -> Vec<String> {
            lock(&self.played).clone()
        }
    }

    #[async_trait]
    impl VoiceTransport for FakeTransport {
        async fn connected_channel(&self, guild: GuildId) -> Option<ChannelId> {
            lock(&self.connected).contains(&guild).then_some(VOICE)
        }

        async fn join(&self, guild: GuildId, channel: ChannelId) -> Result<(), TransportError> {
            lock(&self.joins).push(channel);
            lock(&self.connected).insert(guild);
            Ok(())
        }

        async fn play(
            &self,
            guild: GuildId,
            url: &str,
            completion: CompletionHandle,
        ) -> Result<(), TransportError> {
            if !lock(&self.connected).contains(&guild) {
                return Err(TransportError::NotConnected);
            }
            lock(&self.played).push(url.to_string());
            lock(&self.playing).insert(guild, completion);
            Ok(())
        }

        /// Reports only audible playback, so a paused track reads as not playing.
        async fn is_playing(&self, guild: GuildId) -> bool {
            lock(&self.playing).contains_key(&guild) && !lock(&self.paused).contains(&guild)
        }

        async fn pause(&self, guild: GuildId) -> Result<bool, TransportError> {
            let active = lock(&self.playing).contains_key(&guild);
            if active {
                lock(&self.paused).insert(guild);
            }
            Ok(active)
        }

        async fn resume(&self, guild: GuildId) -> Result<bool, TransportError> {
            lock(&self.paused).remove(&guild);
            Ok(lock(&self.playing).contains_key(&guild))
        }

        async fn stop(&self, guild: GuildId) -> Result<bool, TransportError> {
            let stopped = lock(&self.playing).contains_key(&guild);
            self.finish(guild);
            Ok(stopped)
        }

        async fn disconnect(&self, guild: GuildId) -> Result<(), TransportError> {
            lock(&self.connected).remove(&guild);
            lock(&self.disconnects).push(guild);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeMessenger {
        next_id: AtomicU64,
        sent: Mutex<Vec<(StatusMessage, Artifact)>>,
        deleted: Mutex<Vec<StatusMessage>>,
        failing: AtomicBool,
    }

    impl FakeMessenger {
        fn post(&self, channel: ChannelId) -> StatusMessage {
            StatusMessage {
                channel,
                message: MessageId(self.next_id.fetch_add(1, Ordering::Relaxed) + 100),
            }
        }

        fn sent_titles(&self) -> Vec<String> {
            lock(&self.sent)
                .iter()
                .map(|(_, artifact)| artifact.title.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Messenger for FakeMessenger {
        async fn send_artifact(
            &self,
            channel: ChannelId,
            artifact: Artifact,
        ) -> Result<StatusMessage, MessagingError> {
            if self.failing.load(Ordering::Relaxed) {
                return Err(MessagingError(serenity::Error::Other("post failed")));
            }
            let status = self.post(channel);
            lock(&self.sent).push((status, artifact));
            Ok(status)
        }

        async fn delete(&self, message: StatusMessage) -> Result<(), MessagingError> {
            lock(&self.deleted).push(message);
            Err(MessagingError(serenity::Error::Other("Unknown Message")))
        }
    }

    struct Harness {
        coordinator: Arc<Coordinator>,
        transport: Arc<FakeTransport>,
        messenger: Arc<FakeMessenger>,
    }

    fn harness() -> Harness {
        let transport = Arc::new(FakeTransport::default());
        let messenger = Arc::new(FakeMessenger::default());
        let presenter = Arc::new(Presenter::new(reqwest::Client::new(), None));
        let coordinator = Arc::new(Coordinator::new(
            transport.clone(),
            messenger.clone(),
            presenter,
            PlayerConfig {
                idle_poll: Duration::from_millis(20),
                max_queue: Some(10),
            },
        ));

        Harness {
            coordinator,
            transport,
            messenger,
        }
    }

    fn track(rating_key: &str) -> MediaRef {
        MediaRef {
            rating_key: rating_key.to_string(),
            key: format!("/library/metadata/{rating_key}"),
            title: format!("Track {rating_key}"),
            album: "Album".to_string(),
            artist: "Artist".to_string(),
            thumb: None,
            server: ServerBinding::new("http://plex.local:32400", "token"),
        }
    }

    fn current_key(session: &Session) -> Option<String> {
        session.current().map(|media| media.rating_key)
    }

    async fn eventually<F: Fn() -> bool>(condition: F) {
        let wait = async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };

        tokio::time::timeout(Duration::from_secs(2), wait)
            .await
            .expect("condition never became true");
    }

    async fn settle<F: Future>(future: F) -> F::Output {
        let output = future.await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        output
    }

    #[tokio::test]
    async fn stop_without_session_is_a_noop() {
        let h = harness();

        assert!(!h.coordinator.stop(GUILD).await.unwrap());
        assert!(lock(&h.transport.disconnects).is_empty());
        assert!(h.coordinator.session(GUILD).await.is_none());
    }

    #[tokio::test]
    async fn completion_advances_to_the_next_track() {
        let h = harness();
        let session = h.coordinator.connect(GUILD, VOICE, TEXT).await.unwrap();
        session.enqueue_all(vec![track("a"), track("b")]).unwrap();

        eventually(|| current_key(&session).as_deref() == Some("a")).await;
        h.transport.finish(GUILD);
        eventually(|| current_key(&session).as_deref() == Some("b")).await;

        assert_eq!(h.transport.played().len(), 2);
        assert!(h.transport.played()[1].contains("%2Flibrary%2Fmetadata%2Fb"));
    }

    #[tokio::test]
    async fn last_completion_leaves_the_session_waiting() {
        let h = harness();
        let session = h.coordinator.connect(GUILD, VOICE, TEXT).await.unwrap();
        session.enqueue(track("a")).unwrap();

        eventually(|| current_key(&session).is_some()).await;
        let posted = lock(&h.messenger.sent)[0].0;

        h.transport.finish(GUILD);
        assert_eq!(current_key(&session), None);

        eventually(|| lock(&h.messenger.deleted).contains(&posted)).await;
        assert!(h.coordinator.session(GUILD).await.is_some());
        assert!(!h.coordinator.is_busy(GUILD).await);

        session.enqueue(track("c")).unwrap();
        eventually(|| current_key(&session).as_deref() == Some("c")).await;
    }

    #[tokio::test]
    async fn now_playing_message_is_posted_to_the_text_channel() {
        let h = harness();
        let session = h.coordinator.connect(GUILD, VOICE, TEXT).await.unwrap();
        session.enqueue(track("a")).unwrap();

        eventually(|| !lock(&h.messenger.sent).is_empty()).await;

        let (status, _) = lock(&h.messenger.sent)[0].clone();
        assert_eq!(status.channel, TEXT);
        assert_eq!(h.messenger.sent_titles(), vec!["Now Playing - Track a"]);
    }

    #[tokio::test]
    async fn clear_keeps_the_playing_track() {
        let h = harness();
        let session = h.coordinator.connect(GUILD, VOICE, TEXT).await.unwrap();
        session
            .enqueue_all(vec![track("a"), track("b"), track("c")])
            .unwrap();

        eventually(|| current_key(&session).as_deref() == Some("a")).await;
        assert_eq!(h.coordinator.clear(GUILD).await, 2);
        assert_eq!(current_key(&session).as_deref(), Some("a"));

        settle(async { h.transport.finish(GUILD) }).await;
        assert_eq!(current_key(&session), None);
        assert_eq!(h.transport.played().len(), 1);
    }

    #[tokio::test]
    async fn bad_track_only_costs_its_own_turn() {
        let h = harness();
        let session = h.coordinator.connect(GUILD, VOICE, TEXT).await.unwrap();

        let mut broken = track("broken");
        broken.server = ServerBinding::new("not a url", "token");
        session.enqueue_all(vec![broken, track("b")]).unwrap();

        eventually(|| current_key(&session).as_deref() == Some("b")).await;
        assert_eq!(h.transport.played().len(), 1);
    }

    #[tokio::test]
    async fn failed_post_does_not_kill_the_loop() {
        let h = harness();
        h.messenger.failing.store(true, Ordering::Relaxed);
        let session = h.coordinator.connect(GUILD, VOICE, TEXT).await.unwrap();
        session.enqueue_all(vec![track("a"), track("b")]).unwrap();

        eventually(|| current_key(&session).as_deref() == Some("a")).await;
        h.messenger.failing.store(false, Ordering::Relaxed);
        h.transport.finish(GUILD);

        eventually(|| current_key(&session).as_deref() == Some("b")).await;
        assert_eq!(h.messenger.sent_titles(), vec!["Now Playing - Track b"]);
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let h = harness();
        let other = GuildId(2);
        let first = h.coordinator.connect(GUILD, VOICE, TEXT).await.unwrap();
        let second = h.coordinator.connect(other, VOICE, TEXT).await.unwrap();

        let mut broken = track("broken");
        broken.server = ServerBinding::new("not a url", "token");
        first.enqueue(broken).unwrap();
        second.enqueue(track("x")).unwrap();

        eventually(|| current_key(&second).as_deref() == Some("x")).await;
        assert_eq!(current_key(&first), None);
    }

    #[tokio::test]
    async fn stop_tears_everything_down() {
        let h = harness();
        let session = h.coordinator.connect(GUILD, VOICE, TEXT).await.unwrap();
        session.enqueue_all(vec![track("a"), track("b")]).unwrap();
        eventually(|| current_key(&session).is_some()).await;

        assert!(h.coordinator.stop(GUILD).await.unwrap());

        assert!(h.coordinator.session(GUILD).await.is_none());
        assert_eq!(current_key(&session), None);
        assert_eq!(session.pending_len(), 0);
        assert_eq!(*lock(&h.transport.disconnects), vec![GUILD]);
        assert!(session.cancel.is_cancelled());

        settle(async {}).await;
        assert_eq!(h.transport.played().len(), 1);
    }

    #[tokio::test]
    async fn play_after_stop_starts_a_fresh_session() {
        let h = harness();
        let first = h.coordinator.connect(GUILD, VOICE, TEXT).await.unwrap();
        h.coordinator.stop(GUILD).await.unwrap();

        let second = h.coordinator.connect(GUILD, VOICE, TEXT).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));

        second.enqueue(track("a")).unwrap();
        eventually(|| current_key(&second).as_deref() == Some("a")).await;
    }

    #[tokio::test]
    async fn skip_moves_on() {
        let h = harness();
        let session = h.coordinator.connect(GUILD, VOICE, TEXT).await.unwrap();
        session.enqueue_all(vec![track("a"), track("b")]).unwrap();
        eventually(|| current_key(&session).as_deref() == Some("a")).await;

        assert!(h.coordinator.skip(GUILD).await.unwrap());

        eventually(|| current_key(&session).as_deref() == Some("b")).await;
    }

    #[tokio::test]
    async fn stale_completion_does_not_clear_the_next_track() {
        let h = harness();
        let session = h.coordinator.connect(GUILD, VOICE, TEXT).await.unwrap();
        session.enqueue_all(vec![track("a"), track("b")]).unwrap();
        eventually(|| current_key(&session).as_deref() == Some("a")).await;

        let first = lock(&h.transport.playing).get(&GUILD).cloned().unwrap();
        h.transport.finish(GUILD);
        eventually(|| current_key(&session).as_deref() == Some("b")).await;

        settle(async { first.finish() }).await;
        assert_eq!(current_key(&session).as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn repost_replaces_the_status_message() {
        let h = harness();
        let session = h.coordinator.connect(GUILD, VOICE, TEXT).await.unwrap();
        session.enqueue(track("a")).unwrap();
        eventually(|| lock(&h.messenger.sent).len() == 1).await;
        let first_post = lock(&h.messenger.sent)[0].0;

        assert!(h.coordinator.repost_now_playing(GUILD).await.unwrap());

        assert_eq!(lock(&h.messenger.sent).len(), 2);
        assert!(lock(&h.messenger.deleted).contains(&first_post));
        assert!(!h.coordinator.repost_now_playing(GuildId(9)).await.unwrap());
    }

    #[tokio::test]
    async fn queue_limit_applies_per_session() {
        let h = harness();
        let session = h.coordinator.connect(GUILD, VOICE, TEXT).await.unwrap();

        let too_many: Vec<MediaRef> = (0..11).map(|n| track(&n.to_string())).collect();
        assert_eq!(
            session.enqueue_all(too_many),
            Err(QueueError::Full { capacity: 10 })
        );
        assert_eq!(session.pending_len(), 0);
    }

    #[tokio::test]
    async fn shutdown_leaves_every_channel() {
        let h = harness();
        h.coordinator.connect(GUILD, VOICE, TEXT).await.unwrap();
        h.coordinator.connect(GuildId(2), VOICE, TEXT).await.unwrap();

        h.coordinator.shutdown().await;

        let mut left = lock(&h.transport.disconnects).clone();
        left.sort();
        assert_eq!(left, vec![GUILD, GuildId(2)]);
        assert!(h.coordinator.session(GUILD).await.is_none());
    }

    #[tokio::test]
    async fn existing_voice_connection_is_reused() {
        let h = harness();
        lock(&h.transport.connected).insert(GUILD);

        let session = h
            .coordinator
            .connect(GUILD, ChannelId(99), TEXT)
            .await
            .unwrap();

        assert!(lock(&h.transport.joins).is_empty());
        assert_eq!(session.text_channel(), TEXT);
    }

    #[tokio::test]
    async fn paused_track_is_not_replaced() {
        let h = harness();
        h.messenger.failing.store(true, Ordering::Relaxed);
        let session = h.coordinator.connect(GUILD, VOICE, TEXT).await.unwrap();
        session.enqueue_all(vec![track("a"), track("b")]).unwrap();
        eventually(|| current_key(&session).as_deref() == Some("a")).await;

        assert!(h.coordinator.pause(GUILD).await.unwrap());
        assert!(!h.transport.is_playing(GUILD).await);

        settle(async {}).await;
        assert_eq!(current_key(&session).as_deref(), Some("a"));
        assert_eq!(h.transport.played().len(), 1);
        assert_eq!(session.pending_len(), 1);

        assert!(h.coordinator.resume(GUILD).await.unwrap());
        h.transport.finish(GUILD);
        eventually(|| current_key(&session).as_deref() == Some("b")).await;
    }

    #[tokio::test]
    async fn completion_from_a_driver_thread_advances() {
        let h = harness();
        let session = h.coordinator.connect(GUILD, VOICE, TEXT).await.unwrap();
        session.enqueue_all(vec![track("a"), track("b")]).unwrap();
        eventually(|| current_key(&session).as_deref() == Some("a")).await;

        let handle = lock(&h.transport.playing).remove(&GUILD).unwrap();
        std::thread::spawn(move || handle.finish())
            .join()
            .unwrap();

        eventually(|| current_key(&session).as_deref() == Some("b")).await;
        assert_eq!(h.transport.played().len(), 2);
    }

    #[tokio::test]
    async fn audio_starts_before_cover_art_arrives() {
        let plex = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_bytes(vec![1, 2, 3])
                    .set_delay(Duration::from_millis(800)),
            )
            .mount(&plex)
            .await;

        let h = harness();
        let session = h.coordinator.connect(GUILD, VOICE, TEXT).await.unwrap();
        let mut slow = track("a");
        slow.thumb = Some("/library/metadata/a/thumb/1".to_string());
        slow.server = ServerBinding::new(plex.uri(), "token");
        session.enqueue(slow).unwrap();

        eventually(|| h.transport.played().len() == 1).await;
        assert_eq!(current_key(&session).as_deref(), Some("a"));
        assert!(h.coordinator.is_busy(GUILD).await);
        assert!(lock(&h.messenger.sent).is_empty());

        eventually(|| lock(&h.messenger.sent).len() == 1).await;
        assert_eq!(lock(&h.messenger.sent)[0].1.image, Some(vec![1, 2, 3]));
    }
}
