use serenity::client::Context;
use serenity::framework::standard::macros::{command, group};
use serenity::framework::standard::{Args, CommandResult};
use serenity::model::channel::Message;
use tracing::{info, warn};

use crate::commands::{check_msg, plex_music};
use crate::plex::{Account, CatalogError};

const AUTH_FAILED: &str = "Unable to complete authorization, please try again.";

#[group]
#[prefix("config")]
#[commands(auth, reset)]
#[sub_groups(Global)]
struct PlexConfig;

#[group]
#[prefix("global")]
#[owners_only]
#[only_in(dms)]
#[commands(global_auth, global_lyrics, global_reset)]
struct Global;

struct AuthArgs {
    email: String,
    password: String,
    server_url: String,
}

fn auth_args(args: &mut Args) -> Option<AuthArgs> {
    Some(AuthArgs {
        email: args.single::<String>().ok()?,
        password: args.single::<String>().ok()?,
        server_url: args.single::<String>().ok()?,
    })
}

async fn auth_usage(ctx: &Context, msg: &Message, prefix: &str) {
    check_msg(msg.channel_id.say(&ctx.http, AUTH_FAILED).await);
    check_msg(
        msg.channel_id
            .say(
                &ctx.http,
                format!(
                    "Usage: {prefix} auth <email> <password> <server url>\n\
                     With two-step verification, append the 6 digit code to the password."
                ),
            )
            .await,
    );
}

/// Replies to an auth attempt. Only a sign-in rejection is the user's problem.
async fn auth_outcome(
    ctx: &Context,
    msg: &Message,
    prefix: &str,
    outcome: Result<Account, CatalogError>,
) -> CommandResult {
    match outcome {
        Ok(account) => {
            check_msg(
                msg.channel_id
                    .say(
                        &ctx.http,
                        format!(
                            "Successfully authenticated as {} ({}).",
                            account.email, account.username
                        ),
                    )
                    .await,
            );
            Ok(())
        }
        Err(CatalogError::Unauthorized) => {
            auth_usage(ctx, msg, prefix).await;
            Ok(())
        }
        Err(why) => {
            warn!("Plex sign-in failed: {why}");
            check_msg(msg.channel_id.say(&ctx.http, AUTH_FAILED).await);
            Err(why.into())
        }
    }
}

/// Provide your Plex email, password and server url to play from your own server.
/// Only the issued token is stored, never the password.
#[command]
#[only_in(dms)]
async fn auth(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let Some(auth) = auth_args(&mut args) else {
        auth_usage(ctx, msg, "config").await;
        return Ok(());
    };

    let music = plex_music(ctx).await?;
    let outcome = music
        .catalog
        .authenticate_user(msg.author.id, &auth.email, &auth.password, &auth.server_url)
        .await;

    if outcome.is_ok() {
        info!("User {} bound to {}", msg.author.id, auth.server_url);
    }

    auth_outcome(ctx, msg, "config", outcome).await
}

/// Forget your stored Plex server. The global server is used afterwards, if there is one.
#[command]
async fn reset(ctx: &Context, msg: &Message) -> CommandResult {
    let music = plex_music(ctx).await?;

    music.forget_user(msg.author.id).await?;
    check_msg(
        msg.channel_id
            .say(&ctx.http, "Cleared any and all user identifiable information.")
            .await,
    );

    Ok(())
}

#[command("auth")]
async fn global_auth(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let Some(auth) = auth_args(&mut args) else {
        auth_usage(ctx, msg, "config global").await;
        return Ok(());
    };

    let music = plex_music(ctx).await?;
    let outcome = music
        .catalog
        .authenticate_global(&auth.email, &auth.password, &auth.server_url)
        .await;

    if outcome.is_ok() {
        info!("Global Plex server set to {}", auth.server_url);
    }

    auth_outcome(ctx, msg, "config global", outcome).await
}

/// Set a Genius token to enable lyrics. Get one at https://genius.com/signup_or_login
#[command("lyrics")]
async fn global_lyrics(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    let token = args.rest().trim();
    if token.is_empty() {
        check_msg(
            msg.channel_id
                .say(&ctx.http, "Usage: config global lyrics <token>")
                .await,
        );
        return Ok(());
    }

    let music = plex_music(ctx).await?;
    music.set_lyrics_token(token).await?;

    check_msg(
        msg.channel_id
            .say(&ctx.http, format!("Token set to: {token}"))
            .await,
    );

    Ok(())
}

/// Forget the global Plex server, the lyrics token and your own stored server.
#[command("reset")]
async fn global_reset(ctx: &Context, msg: &Message) -> CommandResult {
    let music = plex_music(ctx).await?;

    music.forget_owner(msg.author.id).await?;
    check_msg(
        msg.channel_id
            .say(&ctx.http, "Cleared any and all user identifiable information.")
            .await,
    );

    Ok(())
}
