use std::sync::Arc;

use serenity::client::Context;
use serenity::framework::standard::{CommandError, CommandResult};
use serenity::model::channel::Message;
use serenity::model::guild::Guild;
use serenity::model::id::GuildId;
use serenity::Result as SerenityResult;
use tracing::{debug, error, info};

use crate::music::PlexMusic;
use crate::player::Session;
use crate::plex::CatalogError;
use crate::queue::QueueError;
use crate::store::StoreError;

pub mod config;
pub mod playback;

pub use config::PLEXCONFIG_GROUP;
pub use playback::GENERAL_GROUP;

/// Checks that a message successfully sent; if not, then logs why.
pub(crate) fn check_msg(result: SerenityResult<Message>) {
    if let Err(why) = result {
        info!("Error sending message: {why:?}");
    }
}

pub(crate) fn get_guild(ctx: &Context, msg: &Message) -> CommandResult<Guild> {
    msg.guild(&ctx.cache).ok_or(CommandError::from("Guild not found"))
}

pub(crate) fn get_guild_id(msg: &Message) -> CommandResult<GuildId> {
    msg.guild_id.ok_or(CommandError::from("Guild not found"))
}

pub(crate) async fn plex_music(ctx: &Context) -> CommandResult<Arc<PlexMusic>> {
    PlexMusic::from_context(ctx)
        .await
        .ok_or(CommandError::from("PlexMusic placed in at initialisation"))
}

/// Joins the author's voice channel and returns the guild's session, or
/// tells the author to join one first.
pub(crate) async fn join_author(
    ctx: &Context,
    msg: &Message,
    music: &PlexMusic,
) -> CommandResult<Option<Arc<Session>>> {
    let guild = get_guild(ctx, msg)?;

    let channel_id = guild
        .voice_states
        .get(&msg.author.id)
        .and_then(|voice_state| voice_state.channel_id);

    let Some(connect_to) = channel_id else {
        check_msg(msg.channel_id.say(&ctx.http, "Join a voice channel first!").await);
        debug!("Failed to play, requester not in voice channel");
        return Ok(None);
    };

    let session = music
        .coordinator
        .connect(guild.id, connect_to, msg.channel_id)
        .await?;

    Ok(Some(session))
}

/// Turns a failed lookup into the chat reply for it. Unexpected errors go to the after hook.
pub(crate) async fn report_lookup_failure(
    ctx: &Context,
    msg: &Message,
    kind: &str,
    query: &str,
    why: CatalogError,
) -> CommandResult {
    if why.is_not_found() {
        check_msg(
            msg.channel_id
                .say(&ctx.http, format!("Can't find {kind}: {query}"))
                .await,
        );
        debug!("Can't find {kind} - {query}: {why}");
        return Ok(());
    }

    if let CatalogError::Store(StoreError::ConfigurationMissing) = why {
        error!(
            "No Plex server for user {}, and no global server configured",
            msg.author.id
        );
        return Ok(());
    }

    Err(why.into())
}

pub(crate) async fn report_queue_full(ctx: &Context, msg: &Message, why: QueueError) {
    let QueueError::Full { capacity } = why;

    check_msg(
        msg.channel_id
            .say(
                &ctx.http,
                format!("The queue is full ({capacity} tracks), nothing was added."),
            )
            .await,
    );
}
