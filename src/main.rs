use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::SerenityInit;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod error;
mod session;
mod sources;
mod storage;
mod ui;

use crate::bot::MusicBot;
use crate::config::{AppEnv, ConfigStore};
use crate::session::{RefreshScheduler, SessionHandle, SessionState};
use crate::sources::CatalogClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("yun_music_bot=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Yun Music Bot v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let env = AppEnv::load()?;
    let config = Arc::new(ConfigStore::load(&env.config_path));
    let snapshot = config.snapshot();
    info!("⚙️ {}", snapshot.summary());

    // Sesión del catálogo compartida por resolución, refresco y login
    let session = SessionHandle::new(SessionState::from_config(&snapshot));
    let catalog = Arc::new(CatalogClient::new(&snapshot.api_base_url, session.clone())?);

    let shutdown = CancellationToken::new();
    // Refresco periódico de la cookie; se detiene con el shutdown
    let _refresher = RefreshScheduler::new(session.clone(), config.clone(), catalog.clone())
        .spawn(shutdown.child_token());

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let handler = MusicBot::new(config, session, catalog, shutdown.clone());

    let mut client = Client::builder(&env.discord_token, intents)
        .event_handler(handler)
        .register_songbird()
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        shutdown.cancel();
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}
