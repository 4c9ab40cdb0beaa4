use std::collections::HashSet;
use std::sync::Arc;

use dotenvy::dotenv;
use serenity::{
    async_trait,
    client::{Client, Context, EventHandler},
    framework::standard::{macros::hook, CommandResult},
    framework::StandardFramework,
    http::Http,
    model::{channel::Message, gateway::Ready, voice::VoiceState},
    prelude::{GatewayIntents, TypeMapKey},
};
use songbird::{SerenityInit, Songbird};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::catalog::Catalog;
use crate::commands::{GENERAL_GROUP, PLEXCONFIG_GROUP};
use crate::messaging::SerenityMessenger;
use crate::music::{PlexMusic, PlexMusicKey};
use crate::player::{Coordinator, PlayerConfig};
use crate::plex::PlexClient;
use crate::presenter::Presenter;
use crate::settings::Settings;
use crate::store::ConfigStore;
use crate::transport::SongbirdTransport;

mod catalog;
mod commands;
mod lyrics;
mod messaging;
mod models;
mod music;
mod player;
mod plex;
mod presenter;
mod queue;
mod settings;
mod store;
mod transport;

struct Handler;

pub struct BotDataMap;

pub struct BotData {
    pub id: u64,
}

impl TypeMapKey for BotDataMap {
    type Value = BotData;
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("{} is connected!", ready.user.name);

        let bot_data = BotData { id: ready.user.id.0 };
        let data = &mut ctx.data.write().await;
        data.insert::<BotDataMap>(bot_data);
    }

    async fn voice_state_update(&self, ctx: Context, _: Option<VoiceState>, new: VoiceState) {
        if new.channel_id.is_some() {
            return;
        }

        let (bot_id, music) = {
            let data = ctx.data.read().await;
            (
                data.get::<BotDataMap>().map(|data| data.id),
                data.get::<PlexMusicKey>().cloned(),
            )
        };

        if let (Some(bot_id), Some(guild_id), Some(music)) = (bot_id, new.guild_id, music) {
            if bot_id == new.user_id.0 {
                info!("Bot was disconnected from voice in guild {}", guild_id.0);

                if let Err(error) = music.coordinator.stop(guild_id).await {
                    warn!("{error:#?}")
                }
            }
        }
    }
}

#[hook]
async fn after(_: &Context, msg: &Message, command_name: &str, command_result: CommandResult) {
    if let Err(why) = command_result {
        error!(
            "Command '{command_name}' from {} returned error {why:?}",
            msg.author.id
        );
    }
}

#[tokio::main]
async fn main() {
    let dotenv_result = dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(why) = dotenv_result {
        info!("No .env file loaded ({why}), using the process environment");
    }

    let settings = Settings::from_env().expect("Invalid configuration in the environment");

    let http = Http::new(&settings.discord_token);

    let (owners, bot_name) = {
        let info = http
            .get_current_application_info()
            .await
            .expect("Could not access application info");
        let bot = http
            .get_current_user()
            .await
            .expect("Could not access the bot user");

        (HashSet::from([info.owner.id]), bot.name.clone())
    };

    let framework = StandardFramework::new()
        .configure(|c| c.prefix(&settings.prefix).owners(owners))
        .after(after)
        .group(&GENERAL_GROUP)
        .group(&PLEXCONFIG_GROUP);

    let intents = GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT;

    let songbird = Songbird::serenity();

    let mut client = Client::builder(&settings.discord_token, intents)
        .event_handler(Handler)
        .framework(framework)
        .register_songbird_with(songbird.clone())
        .await
        .expect("Err creating client");

    let store = Arc::new(
        ConfigStore::open(&settings.store_path)
            .await
            .expect("Could not open the config store"),
    );
    let plex = PlexClient::new(&settings.client_identifier).expect("Could not build HTTP client");
    let http_client = plex.http().clone();

    let presenter = Arc::new(Presenter::new(http_client.clone(), Some(bot_name)));
    let coordinator = Arc::new(Coordinator::new(
        Arc::new(SongbirdTransport::new(songbird)),
        Arc::new(SerenityMessenger::new(client.cache_and_http.http.clone())),
        presenter.clone(),
        PlayerConfig {
            idle_poll: settings.idle_poll,
            max_queue: settings.max_queue,
        },
    ));

    let music = Arc::new(PlexMusic::new(
        coordinator,
        Catalog::new(plex, store.clone()),
        presenter,
        store,
        http_client,
    ));
    music.init().await;

    {
        let mut w = client.data.write().await;
        w.insert::<PlexMusicKey>(music.clone());
    }

    let shard_manager = client.shard_manager.clone();

    tokio::spawn(async move {
        let _ = client
            .start()
            .await
            .map_err(|why| error!("Client ended: {why:?}"));
    });

    tokio::signal::ctrl_c()
        .await
        .expect("Control-C interruption failed!");

    info!("Received Ctrl-C, shutting down.");

    music.shutdown().await;
    shard_manager.lock().await.shutdown_all().await;
}
