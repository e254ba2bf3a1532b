//! # Bot Module
//!
//! Discord adapter for the playback controller.
//!
//! [`MusicBot`] implements Serenity's [`EventHandler`]. It parses prefix text
//! commands, keeps one [`GuildSession`] per guild and translates voice state
//! updates into presence events for that guild's controller.
//!
//! Each guild session owns:
//!
//! - a [`PlaybackController`] with the queue, mode and presence state
//! - a [`SongbirdPlayer`] attached to the guild's voice call
//! - a [`DiscordAnnouncer`] that posts to the last text channel used
//! - a background task forwarding end/error signals from songbird back to
//!   the controller

use anyhow::Result;
use dashmap::DashMap;
use serenity::{
    all::{ActivityData, ChannelId, Context, EventHandler, GuildId, Message, Ready, UserId, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod events;

use crate::{
    audio::{
        pipeline::{ControllerParts, PlaybackController},
        player::{PlayerSignal, SongbirdPlayer},
        presence::PresenceEvent,
    },
    config::ConfigStore,
    session::{login::LoginFlow, SessionHandle},
    sources::{CatalogClient, TrackLookup},
    storage::PlaylistStore,
};
use events::DiscordAnnouncer;

/// Estado de reproducción de una guild
pub struct GuildSession {
    pub controller: Arc<PlaybackController>,
    pub player: Arc<SongbirdPlayer>,
    pub announcer: Arc<DiscordAnnouncer>,
}

pub struct MusicBot {
    config: Arc<ConfigStore>,
    session: SessionHandle,
    pub catalog: Arc<CatalogClient>,
    pub lookup: TrackLookup,
    pub store: PlaylistStore,
    pub login: Arc<LoginFlow>,
    /// Cliente sin timeout total para el streaming de audio
    stream_http: reqwest::Client,
    guilds: DashMap<GuildId, Arc<GuildSession>>,
    shutdown: CancellationToken,
}

impl MusicBot {
    pub fn new(
        config: Arc<ConfigStore>,
        session: SessionHandle,
        catalog: Arc<CatalogClient>,
        shutdown: CancellationToken,
    ) -> Self {
        let snapshot = config.snapshot();
        let login = LoginFlow::new(catalog.clone(), session.clone(), config.clone());

        Self {
            lookup: TrackLookup::new(catalog.clone()),
            store: PlaylistStore::new(snapshot.song_lists_dir),
            login: Arc::new(login),
            stream_http: reqwest::Client::new(),
            guilds: DashMap::new(),
            config,
            session,
            catalog,
            shutdown,
        }
    }

    pub fn prefix(&self) -> String {
        self.config.snapshot().command_prefix
    }

    /// Sesión de la guild, creada la primera vez que se usa
    pub fn guild_session(&self, ctx: &Context, guild_id: GuildId) -> Arc<GuildSession> {
        self.guilds
            .entry(guild_id)
            .or_insert_with(|| self.create_session(ctx, guild_id))
            .clone()
    }

    fn create_session(&self, ctx: &Context, guild_id: GuildId) -> Arc<GuildSession> {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let player = Arc::new(SongbirdPlayer::new(self.stream_http.clone(), signals_tx));
        let announcer = Arc::new(DiscordAnnouncer::new(
            ctx.clone(),
            self.config.snapshot().default_image_url,
        ));

        let controller = Arc::new(PlaybackController::new(
            ControllerParts {
                resolver: self.catalog.clone(),
                player: player.clone(),
                announcer: announcer.clone(),
                session: self.session.clone(),
                config: self.config.clone(),
            },
            ctx.cache.current_user().id.get(),
        ));

        spawn_signal_loop(
            guild_id,
            controller.clone(),
            signals_rx,
            self.shutdown.child_token(),
        );

        info!("🎛️ Controlador creado para guild {}", guild_id);
        Arc::new(GuildSession {
            controller,
            player,
            announcer,
        })
    }

    /// Se une al canal del autor si el bot no está en ninguno
    pub async fn ensure_voice(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        msg: &Message,
        session: &GuildSession,
    ) -> Result<()> {
        if session.player.is_attached() {
            return Ok(());
        }
        self.join_author_channel(ctx, guild_id, msg, session).await
    }

    pub async fn join_author_channel(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        msg: &Message,
        session: &GuildSession,
    ) -> Result<()> {
        let channel_id = get_user_voice_channel(ctx, guild_id, msg.author.id)?;
        self.join_voice_channel(ctx, guild_id, channel_id, session)
            .await
    }

    pub async fn join_voice_channel(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        channel_id: ChannelId,
        session: &GuildSession,
    ) -> Result<()> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;

        let call = manager.join(guild_id, channel_id).await.map_err(|e| {
            error!("Error al obtener handler de voz: {:?}", e);
            anyhow::anyhow!("Error al conectar al canal de voz")
        })?;
        session.player.attach(call);

        // el voice_state_update del bot llega después; se aplica ya para que
        // la pausa automática vea a los oyentes desde la primera canción
        let roster = events::roster(ctx, guild_id);
        let event = PresenceEvent::Moved {
            client: ctx.cache.current_user().id.get(),
            target: channel_id.get(),
        };
        session.controller.presence_event(event, &roster).await?;

        info!("🔊 Conectado al canal de voz en guild {}", guild_id);
        Ok(())
    }

    pub async fn leave_voice_channel(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        session: &GuildSession,
    ) -> Result<()> {
        session.controller.detach().await?;
        session.player.detach();

        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;
        if let Err(e) = manager.remove(guild_id).await {
            debug!("Sin llamada que cerrar en guild {}: {:?}", guild_id, e);
        }

        info!("👋 Desconectado del canal de voz en guild {}", guild_id);
        Ok(())
    }
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        ctx.set_activity(Some(ActivityData::listening(format!("{}help", self.prefix()))));
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(guild_id) = msg.guild_id else {
            return;
        };

        let prefix = self.prefix();
        let Some(parsed) = commands::parse(&msg.content, &prefix) else {
            return;
        };

        let result = match parsed {
            Ok(command) => commands::execute(self, &ctx, &msg, guild_id, command).await,
            Err(usage) => msg
                .channel_id
                .say(&ctx.http, usage)
                .await
                .map(|_| ())
                .map_err(Into::into),
        };

        if let Err(e) = result {
            warn!("⚠️ Error manejando comando: {:?}", e);
            if let Err(e) = msg.channel_id.say(&ctx.http, format!("❌ {}", e)).await {
                error!("Error al enviar mensaje: {:?}", e);
            }
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };
        let Some(session) = self.guilds.get(&guild_id).map(|s| s.clone()) else {
            return;
        };

        let bot_id = ctx.cache.current_user().id;
        let old_channel = old.as_ref().and_then(|s| s.channel_id).map(|c| c.get());
        let new_channel = new.channel_id.map(|c| c.get());

        if new.user_id == bot_id {
            if new_channel.is_none() {
                if !session.player.is_attached() {
                    return;
                }
                // Bot fue desconectado
                info!("🔌 Bot desconectado en guild {}", guild_id);
                if let Err(e) = session.controller.detach().await {
                    error!("Error al detener reproducción: {:?}", e);
                }
                session.player.detach();
                return;
            }
        } else if events::is_bot(&ctx, &new) {
            return;
        }

        let Some(event) = events::presence_event(new.user_id.get(), bot_id.get(), old_channel, new_channel)
        else {
            return;
        };

        let roster = events::roster(&ctx, guild_id);
        if let Err(e) = session.controller.presence_event(event, &roster).await {
            error!("Error aplicando presencia en guild {}: {:?}", guild_id, e);
        }
    }
}

/// Reenvía las señales de songbird al controlador, en orden
fn spawn_signal_loop(
    guild_id: GuildId,
    controller: Arc<PlaybackController>,
    mut signals: UnboundedReceiver<PlayerSignal>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let signal = tokio::select! {
                _ = shutdown.cancelled() => break,
                signal = signals.recv() => match signal {
                    Some(signal) => signal,
                    None => break,
                },
            };

            let result = match signal {
                PlayerSignal::TrackEnded { serial } => controller.on_track_end(serial).await,
                PlayerSignal::TrackFailed { serial, reason } => {
                    controller.on_track_failed(serial, &reason).await
                }
            };

            if let Err(e) = result {
                warn!("⚠️ Error tras fin de canción en guild {}: {}", guild_id, e);
            }
        }

        debug!("Tarea de señales terminada en guild {}", guild_id);
    });
}

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Result<ChannelId> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or_else(|| anyhow::anyhow!("Guild no encontrada en caché"))?;

    let channel_id = guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or_else(|| anyhow::anyhow!("Debes estar en un canal de voz"))?;

    Ok(channel_id)
}
