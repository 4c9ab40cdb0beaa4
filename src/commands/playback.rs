use serenity::client::Context;
use serenity::framework::standard::macros::{command, group};
use serenity::framework::standard::{Args, CommandResult};
use serenity::model::channel::Message;
use tracing::{debug, info, warn};

use crate::commands::{
    check_msg, get_guild_id, join_author, plex_music, report_lookup_failure, report_queue_full,
};
use crate::lyrics::{chunk_lyrics, Genius, LyricsError, CHUNK_SIZE};
use crate::models::MediaRef;
use crate::plex::CatalogError;
use crate::presenter::ArtifactKind;

const QUEUE_LISTING: usize = 20;
const LYRICS_DISABLED: &str = "Lyrics extension is currently disabled.";

#[group]
#[commands(play, album, playlist, stop, pause, resume, skip, np, clear, queue, lyrics, help)]
struct General;

#[command]
#[only_in(guilds)]
async fn play(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let title = match args.single_quoted::<String>() {
        Ok(title) => title,
        Err(_) => {
            check_msg(msg.channel_id.say(&ctx.http, "Usage: play <title> [artist]").await);
            return Ok(());
        }
    };
    let artist = args.remains().map(str::to_string);

    let music = plex_music(ctx).await?;

    let track = match music
        .catalog
        .search_track(msg.author.id, &title, artist.as_deref())
        .await
    {
        Ok(track) => track,
        Err(why) => return report_lookup_failure(ctx, msg, "song", &title, why).await,
    };

    let Some(session) = join_author(ctx, msg, &music).await? else {
        return Ok(());
    };

    let busy = music.coordinator.is_busy(session.guild()).await;
    let queued = track.clone();

    if let Err(why) = session.enqueue(track) {
        report_queue_full(ctx, msg, why).await;
        return Ok(());
    }

    if busy {
        debug!("Added to queue - {title}");
        let artifact = music.presenter.track(&queued, ArtifactKind::Queue).await;
        music
            .coordinator
            .messenger()
            .send_artifact(msg.channel_id, artifact)
            .await?;
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn album(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    let title = args.rest().trim();
    if title.is_empty() {
        check_msg(msg.channel_id.say(&ctx.http, "Usage: album <title>").await);
        return Ok(());
    }

    let music = plex_music(ctx).await?;

    let found = async {
        let album = music.catalog.search_album(msg.author.id, title).await?;
        let tracks = music.catalog.album_tracks(&album).await?;
        Ok::<_, CatalogError>((album, tracks))
    };
    let (album, tracks) = match found.await {
        Ok(found) => found,
        Err(why) => return report_lookup_failure(ctx, msg, "album", title, why).await,
    };

    let Some(session) = join_author(ctx, msg, &music).await? else {
        return Ok(());
    };

    match session.enqueue_all(tracks) {
        Ok(count) => info!("Queued {count} tracks from album {}", album.title),
        Err(why) => {
            report_queue_full(ctx, msg, why).await;
            return Ok(());
        }
    }

    let artifact = music.presenter.album(&album).await;
    music
        .coordinator
        .messenger()
        .send_artifact(msg.channel_id, artifact)
        .await?;

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn playlist(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    let title = args.rest().trim();
    if title.is_empty() {
        check_msg(msg.channel_id.say(&ctx.http, "Usage: playlist <title>").await);
        return Ok(());
    }

    let music = plex_music(ctx).await?;

    let found = async {
        let playlist = music.catalog.search_playlist(msg.author.id, title).await?;
        let tracks = music.catalog.playlist_tracks(&playlist).await?;
        Ok::<_, CatalogError>((playlist, tracks))
    };
    let (playlist, tracks) = match found.await {
        Ok(found) => found,
        Err(why) => return report_lookup_failure(ctx, msg, "playlist", title, why).await,
    };

    let Some(session) = join_author(ctx, msg, &music).await? else {
        return Ok(());
    };

    match session.enqueue_all(tracks) {
        Ok(count) => info!("Queued {count} tracks from playlist {}", playlist.title),
        Err(why) => {
            report_queue_full(ctx, msg, why).await;
            return Ok(());
        }
    }

    let artifact = music.presenter.playlist(&playlist).await;
    music
        .coordinator
        .messenger()
        .send_artifact(msg.channel_id, artifact)
        .await?;

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn stop(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(msg)?;
    let music = plex_music(ctx).await?;

    if music.coordinator.stop(guild_id).await? {
        debug!("Stopped");
        check_msg(msg.channel_id.say(&ctx.http, ":stop_button: Stopped").await);
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn pause(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(msg)?;
    let music = plex_music(ctx).await?;

    if music.coordinator.pause(guild_id).await? {
        debug!("Paused");
        check_msg(msg.channel_id.say(&ctx.http, ":play_pause: Paused").await);
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn resume(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(msg)?;
    let music = plex_music(ctx).await?;

    if music.coordinator.resume(guild_id).await? {
        debug!("Resumed");
        check_msg(msg.channel_id.say(&ctx.http, ":play_pause: Resumed").await);
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn skip(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(msg)?;
    let music = plex_music(ctx).await?;

    // The session loop picks up the next track once the stopped one reports its end
    if music.coordinator.skip(guild_id).await? {
        debug!("Skipped");
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn np(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(msg)?;
    let music = plex_music(ctx).await?;

    music.coordinator.repost_now_playing(guild_id).await?;

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn clear(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(msg)?;
    let music = plex_music(ctx).await?;

    let dropped = music.coordinator.clear(guild_id).await;
    debug!("Cleared queue, dropped {dropped} tracks");
    check_msg(msg.channel_id.say(&ctx.http, ":boom: Queue cleared.").await);

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn queue(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(msg)?;
    let music = plex_music(ctx).await?;

    let (tracks, total) = match music.coordinator.session(guild_id).await {
        Some(session) => (session.pending(QUEUE_LISTING), session.pending_len()),
        None => (Vec::new(), 0),
    };

    if tracks.is_empty() {
        check_msg(msg.channel_id.say(&ctx.http, "The queue is empty!").await);
        return Ok(());
    }

    let listing = tracks
        .iter()
        .enumerate()
        .map(|(index, track)| format!("{} - {} ({})", index + 1, track.title, track.artist))
        .collect::<Vec<_>>()
        .join("\n");
    let more = match total.saturating_sub(tracks.len()) {
        0 => String::new(),
        hidden => format!("\n...and {hidden} more"),
    };

    check_msg(
        msg.channel_id
            .say(&ctx.http, format!("**Queue**:\n```{listing}{more}```"))
            .await,
    );

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn lyrics(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(msg)?;
    let music = plex_music(ctx).await?;

    let lookup = lyrics_lookup(
        music.lyrics().await,
        music.coordinator.now_playing(guild_id).await,
    );
    let (genius, track) = match lookup {
        Ok(lookup) => lookup,
        Err(reply) => {
            check_msg(msg.channel_id.say(&ctx.http, reply).await);
            return Ok(());
        }
    };

    check_msg(
        msg.channel_id
            .say(
                &ctx.http,
                format!("Searching for {}, {}.", track.title, track.artist),
            )
            .await,
    );

    match genius.search_song(&track.title, &track.artist).await {
        Ok(Some(lyrics)) => {
            for chunk in chunk_lyrics(&lyrics, CHUNK_SIZE) {
                check_msg(msg.channel_id.say(&ctx.http, format!("```{chunk}```")).await);
            }
        }
        Ok(None) => {
            check_msg(
                msg.channel_id
                    .say(&ctx.http, "Can't find lyrics for this song.")
                    .await,
            );
        }
        Err(LyricsError::Unauthorized) => {
            music.disable_lyrics().await;
            check_msg(
                msg.channel_id
                    .say(&ctx.http, LYRICS_DISABLED)
                    .await,
            );
        }
        Err(why) => {
            warn!("Lyrics lookup for {} failed: {why}", track.title);
            check_msg(
                msg.channel_id
                    .say(&ctx.http, "Can't find lyrics for this song.")
                    .await,
            );
        }
    }

    Ok(())
}

/// Lyrics being disabled takes precedence over there being nothing to look up.
fn lyrics_lookup(
    genius: Option<Genius>,
    track: Option<MediaRef>,
) -> Result<(Genius, MediaRef), &'static str> {
    let genius = genius.ok_or(LYRICS_DISABLED)?;
    let track = track.ok_or("No song currently playing.")?;

    Ok((genius, track))
}

#[command]
async fn help(ctx: &Context, msg: &Message) -> CommandResult {
    let message = r#"
**Commands:**
    **play <title> [artist]** - Plays (or adds to the queue) the first track matching the title. Quote titles with spaces.
    **album <title>** - Adds every track of an album to the queue.
    **playlist <title>** - Adds every track of a Plex playlist to the queue.
    **pause** - Pauses the current track.
    **resume** - Resumes the paused track.
    **skip** - Plays the next track.
    **stop** - Stops playback, clears the queue and leaves the voice channel.
    **np** - Shows the current track.
    **queue** - Shows the queue of tracks.
    **clear** - Clears the queue, the current track keeps playing.
    **lyrics** - Looks up the lyrics of the current track.
**Config (in a DM with the bot):**
    **config auth <email> <password> <server url>** - Play from your own Plex server.
    **config reset** - Forget your Plex server and credentials.
    **config global reset** - Owners only. Also forgets the global server and lyrics token.
    "#;

    check_msg(msg.channel_id.say(&ctx.http, message).await);

    Ok(())
}
