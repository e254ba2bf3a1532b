use anyhow::Result;
use serenity::{
    all::{GuildId, Message},
    builder::{CreateAttachment, CreateMessage},
    prelude::Context,
};
use tracing::{error, info, warn};

use super::MusicBot;
use crate::{
    audio::{
        mode::PlayMode,
        pipeline::PlayOutcome,
        queue::RestoreMode,
        track::PlayAttributes,
    },
    session::login::{QrChallenge, SmsStep},
    sources::LookupTarget,
    ui::embeds,
};

/// Comando de texto ya interpretado; los índices son 0-based
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play { query: Option<String>, attrs: PlayAttributes },
    Add { query: String, attrs: PlayAttributes },
    Next,
    Previous,
    Stop,
    Pause,
    Mode(Option<PlayMode>),
    Move { from: usize, to: usize },
    Remove(usize),
    Shuffle,
    Clear,
    Status(usize),
    Export(String),
    Import { name: String, append: bool },
    Lists(Option<String>),
    Playlist { replace: bool, target: String },
    LoginQr,
    LoginSms { phone: String, code: Option<String> },
    Join,
    Leave,
    Help,
}

/// Interpreta un mensaje con prefijo
///
/// `None` si el mensaje no es un comando; `Some(Err(uso))` si lo es pero los
/// argumentos no sirven.
pub fn parse(content: &str, prefix: &str) -> Option<std::result::Result<Command, String>> {
    let body = content.trim().strip_prefix(prefix)?;
    let mut words = body.split_whitespace();
    let name = words.next()?.to_lowercase();
    let args: Vec<&str> = words.collect();

    let command = match name.as_str() {
        "play" | "p" => {
            let (query, attrs) = split_attributes(&args);
            Ok(Command::Play { query, attrs })
        }
        "add" | "a" => match split_attributes(&args) {
            (Some(query), attrs) => Ok(Command::Add { query, attrs }),
            (None, _) => Err(format!("Uso: `{}add <canción> [@inicio] [#fuente]`", prefix)),
        },
        "next" | "n" => Ok(Command::Next),
        "previous" | "pre" => Ok(Command::Previous),
        "stop" => Ok(Command::Stop),
        "pause" => Ok(Command::Pause),
        "mode" => match args.first() {
            None => Ok(Command::Mode(None)),
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .and_then(PlayMode::from_index)
                .map(|mode| Command::Mode(Some(mode)))
                .ok_or_else(|| format!("Uso: `{}mode [0-3]`", prefix)),
        },
        "move" | "mv" => match (
            args.first().and_then(|a| position(a)),
            args.get(1).and_then(|a| position(a)),
        ) {
            (Some(from), Some(to)) => Ok(Command::Move { from, to }),
            _ => Err(format!("Uso: `{}move <de> <a>` (posiciones desde 1)", prefix)),
        },
        "rm" | "remove" => args
            .first()
            .and_then(|a| position(a))
            .map(Command::Remove)
            .ok_or_else(|| format!("Uso: `{}rm <posición>` (desde 1)", prefix)),
        "shuffle" => Ok(Command::Shuffle),
        "clear" => Ok(Command::Clear),
        "ls" | "queue" => match args.first() {
            None => Ok(Command::Status(embeds::DEFAULT_STATUS_LIMIT)),
            Some(raw) => raw
                .parse::<usize>()
                .map(Command::Status)
                .map_err(|_| format!("Uso: `{}ls [cantidad]`", prefix)),
        },
        "export" => match args.first() {
            Some(name) => Ok(Command::Export(name.to_string())),
            None => Err(format!("Uso: `{}export <nombre>`", prefix)),
        },
        "import" => match args.as_slice() {
            [name] => Ok(Command::Import { name: name.to_string(), append: false }),
            [name, flag] if flag.eq_ignore_ascii_case("append") => {
                Ok(Command::Import { name: name.to_string(), append: true })
            }
            _ => Err(format!("Uso: `{}import <nombre> [append]`", prefix)),
        },
        "lists" => Ok(Command::Lists(args.first().map(|p| p.to_string()))),
        "playlist" => match args.as_slice() {
            [action, rest @ ..] if !rest.is_empty() => {
                let target = rest.join(" ");
                match action.to_lowercase().as_str() {
                    "add" => Ok(Command::Playlist { replace: false, target }),
                    "set" => Ok(Command::Playlist { replace: true, target }),
                    _ => Err(format!("Uso: `{}playlist add|set <id o nombre>`", prefix)),
                }
            }
            _ => Err(format!("Uso: `{}playlist add|set <id o nombre>`", prefix)),
        },
        "login" => match args.as_slice() {
            [mode] if mode.eq_ignore_ascii_case("qr") => Ok(Command::LoginQr),
            [mode, phone] if mode.eq_ignore_ascii_case("sms") => Ok(Command::LoginSms {
                phone: phone.to_string(),
                code: None,
            }),
            [mode, phone, code] if mode.eq_ignore_ascii_case("sms") => Ok(Command::LoginSms {
                phone: phone.to_string(),
                code: Some(code.to_string()),
            }),
            _ => Err(format!("Uso: `{0}login qr` o `{0}login sms <teléfono> [código]`", prefix)),
        },
        "join" => Ok(Command::Join),
        "leave" => Ok(Command::Leave),
        "help" | "h" => Ok(Command::Help),
        _ => return None,
    };

    Some(command)
}

/// Separa los atributos finales (`@inicio`, `#fuente`) del texto de búsqueda
fn split_attributes(args: &[&str]) -> (Option<String>, PlayAttributes) {
    let attr_start = args
        .iter()
        .rposition(|word| !is_attribute(word))
        .map(|i| i + 1)
        .unwrap_or(0);

    let (query, attrs) = args.split_at(attr_start);
    let query = query.join(" ");
    (
        (!query.is_empty()).then_some(query),
        PlayAttributes::parse(attrs),
    )
}

fn is_attribute(word: &str) -> bool {
    word.len() > 1 && (word.starts_with('@') || word.starts_with('#'))
}

/// Posición 1-based del usuario a índice 0-based
fn position(raw: &str) -> Option<usize> {
    raw.parse::<usize>().ok()?.checked_sub(1)
}

/// Ejecuta un comando y responde en el canal del mensaje
pub async fn execute(
    bot: &MusicBot,
    ctx: &Context,
    msg: &Message,
    guild_id: GuildId,
    command: Command,
) -> Result<()> {
    info!(
        "📝 Comando {:?} usado por {} en guild {}",
        command, msg.author.name, guild_id
    );

    let session = bot.guild_session(ctx, guild_id);
    session.announcer.bind(msg.channel_id);
    let controller = &session.controller;

    let reply = match command {
        Command::Play { query: None, .. } => {
            bot.ensure_voice(ctx, guild_id, msg, &session).await?;
            describe(controller.play().await?)
        }
        Command::Play { query: Some(query), attrs } => {
            bot.ensure_voice(ctx, guild_id, msg, &session).await?;
            let queue_len = controller.queue_len().await;
            let lookup = bot.lookup.lookup(&query, attrs.source, queue_len).await?;
            announce_notices(ctx, msg, &lookup.notices).await;

            let track = match lookup.target {
                LookupTarget::Track(track) => track,
                LookupTarget::QueueItem(index) => controller
                    .queue_item(index)
                    .await
                    .ok_or_else(|| anyhow::anyhow!("La posición {} ya no existe", index + 1))?,
            };
            match controller.play_track(track, attrs.start_offset).await {
                Ok(outcome) => describe(outcome),
                // el controlador ya avisó en el canal
                Err(_) => return Ok(()),
            }
        }
        Command::Add { query, attrs } => {
            bot.ensure_voice(ctx, guild_id, msg, &session).await?;
            let queue_len = controller.queue_len().await;
            let lookup = bot.lookup.lookup(&query, attrs.source, queue_len).await?;
            announce_notices(ctx, msg, &lookup.notices).await;

            match lookup.target {
                LookupTarget::Track(track) => describe(controller.enqueue(track).await?),
                LookupTarget::QueueItem(index) => {
                    format!("ℹ️ Esa canción ya está en la cola (posición {})", index + 1)
                }
            }
        }
        Command::Next => {
            bot.ensure_voice(ctx, guild_id, msg, &session).await?;
            describe(controller.play_next().await?)
        }
        Command::Previous => {
            bot.ensure_voice(ctx, guild_id, msg, &session).await?;
            describe(controller.previous().await?)
        }
        Command::Stop => describe(controller.stop(false).await?),
        Command::Pause => match controller.toggle_pause().await? {
            Some(true) => "⏸️ Reproducción pausada".to_string(),
            Some(false) => "▶️ Reproducción reanudada".to_string(),
            None => "ℹ️ No hay nada sonando".to_string(),
        },
        Command::Mode(None) => {
            let current = controller.mode().await;
            let options = PlayMode::ALL
                .iter()
                .map(|m| format!("`{}` {}", m.index(), m.label()))
                .collect::<Vec<_>>()
                .join(", ");
            format!("🔁 Modo actual: {} ({})", current.label(), options)
        }
        Command::Mode(Some(mode)) => {
            let mode = controller.set_mode(mode).await;
            format!("🔁 Modo de reproducción: {}", mode.label())
        }
        Command::Move { from, to } => {
            controller.move_track(from, to).await?;
            format!("↕️ Posiciones {} y {} intercambiadas", from + 1, to + 1)
        }
        Command::Remove(index) => {
            let removed = controller.remove_track(index).await?;
            format!("🗑️ Quitada de la cola: {}", removed.full_name())
        }
        Command::Shuffle => {
            controller.shuffle().await;
            "🔀 Cola mezclada".to_string()
        }
        Command::Clear => {
            controller.clear().await;
            "🧹 Cola limpiada".to_string()
        }
        Command::Status(limit) => {
            let status = controller.status(limit).await;
            msg.channel_id
                .send_message(
                    &ctx.http,
                    CreateMessage::new().embed(embeds::create_status_embed(&status)),
                )
                .await?;
            return Ok(());
        }
        Command::Export(name) => {
            let snapshot = controller.snapshot().await;
            let count = snapshot.tracks.len();
            bot.store.export(&name, &snapshot).await?;
            format!("💾 Lista `{}` guardada ({} canciones)", name, count)
        }
        Command::Import { name, append } => {
            let snapshot = bot.store.import(&name).await?;
            let mode = if append { RestoreMode::Append } else { RestoreMode::Replace };
            let count = controller.restore(snapshot, mode).await;
            format!("📂 Lista `{}` cargada ({} canciones)", name, count)
        }
        Command::Lists(prefix) => {
            let names = bot.store.list(prefix.as_deref()).await?;
            if names.is_empty() {
                "📂 No hay listas guardadas".to_string()
            } else {
                format!("📂 Listas guardadas: {}", names.join(", "))
            }
        }
        Command::Playlist { replace, target } => {
            let (meta, tracks) = bot.catalog.playlist(&target).await?;
            let name = meta.name.clone().unwrap_or_else(|| target.clone());
            let count = tracks.len();
            if count == 0 {
                format!("⚠️ La playlist {} no tiene canciones", name)
            } else {
                bot.ensure_voice(ctx, guild_id, msg, &session).await?;
                let outcome = if replace {
                    controller.set_playlist(meta, tracks).await?
                } else {
                    controller.add_playlist(tracks).await?
                };
                info!("📂 Playlist {} ({} canciones): {:?}", name, count, outcome);
                format!("📂 Playlist **{}** agregada ({} canciones)", name, count)
            }
        }
        Command::LoginQr => {
            let QrChallenge { key, png } = bot.login.start_qr().await?;
            msg.channel_id
                .send_message(
                    &ctx.http,
                    CreateMessage::new()
                        .content("📱 Escanea el código QR con la app del catálogo")
                        .add_file(CreateAttachment::bytes(png, "login-qr.png")),
                )
                .await?;

            let login = bot.login.clone();
            let http = ctx.http.clone();
            let channel_id = msg.channel_id;
            tokio::spawn(async move {
                let message = match login.wait_qr(&key).await {
                    Ok(()) => "✅ Sesión iniciada con QR".to_string(),
                    Err(e) => {
                        warn!("⚠️ Login QR fallido: {}", e);
                        format!("❌ {}", e)
                    }
                };
                if let Err(e) = channel_id.say(&http, message).await {
                    error!("Error al enviar mensaje: {:?}", e);
                }
            });
            return Ok(());
        }
        Command::LoginSms { phone, code } => match bot.login.sms(&phone, code.as_deref()).await? {
            SmsStep::CodeSent => format!(
                "📨 Código enviado; responde con `{}login sms {} <código>`",
                bot.prefix(),
                phone
            ),
            SmsStep::LoggedIn => "✅ Sesión iniciada por SMS".to_string(),
        },
        Command::Join => {
            bot.join_author_channel(ctx, guild_id, msg, &session).await?;
            "🔊 Conectado al canal de voz".to_string()
        }
        Command::Leave => {
            bot.leave_voice_channel(ctx, guild_id, &session).await?;
            "👋 Desconectado del canal de voz".to_string()
        }
        Command::Help => {
            msg.channel_id
                .send_message(
                    &ctx.http,
                    CreateMessage::new().embed(embeds::create_help_embed(&bot.prefix())),
                )
                .await?;
            return Ok(());
        }
    };

    msg.channel_id.say(&ctx.http, reply).await?;
    Ok(())
}

async fn announce_notices(ctx: &Context, msg: &Message, notices: &[String]) {
    for notice in notices {
        if let Err(e) = msg.channel_id.say(&ctx.http, notice).await {
            error!("Error al enviar aviso: {:?}", e);
        }
    }
}

fn describe(outcome: PlayOutcome) -> String {
    match outcome {
        PlayOutcome::Started => "▶️ Reproduciendo".to_string(),
        PlayOutcome::Resumed => "▶️ Reproducción reanudada".to_string(),
        PlayOutcome::AlreadyPlaying => "ℹ️ Ya está sonando".to_string(),
        PlayOutcome::Queued { position } => format!("➕ Agregada a la cola (posición {})", position),
        PlayOutcome::Stopped => "⏹️ Reproducción detenida".to_string(),
        PlayOutcome::QueueEmpty => "📭 La cola está vacía".to_string(),
        PlayOutcome::Exhausted => "⚠️ Ninguna canción se pudo reproducir".to_string(),
        PlayOutcome::Superseded => "⏭️ Otra petición tomó el control".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::track::AudioSource;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn ok(content: &str) -> Command {
        parse(content, "!").unwrap().unwrap()
    }

    #[test]
    fn test_non_commands_are_ignored() {
        assert_eq!(parse("hola", "!"), None);
        assert_eq!(parse("!desconocido", "!"), None);
        assert_eq!(parse("!", "!"), None);
    }

    #[test]
    fn test_play_with_attributes() {
        assert_eq!(
            ok("!play 晴天 周杰伦 @1m30s #n"),
            Command::Play {
                query: Some("晴天 周杰伦".into()),
                attrs: PlayAttributes {
                    start_offset: Some(Duration::from_secs(90)),
                    source: Some(AudioSource::ExternalCatalog),
                },
            }
        );
        assert_eq!(
            ok("!play"),
            Command::Play { query: None, attrs: PlayAttributes::default() }
        );
    }

    #[test]
    fn test_hash_inside_query_stays_in_query() {
        match ok("!add C# minor #u") {
            Command::Add { query, attrs } => {
                assert_eq!(query, "C# minor");
                assert_eq!(attrs.source, Some(AudioSource::Url));
            }
            other => panic!("comando inesperado {:?}", other),
        }
        assert!(parse("!add", "!").unwrap().is_err());
    }

    #[test]
    fn test_positions_are_one_based() {
        assert_eq!(ok("!move 1 3"), Command::Move { from: 0, to: 2 });
        assert_eq!(ok("!rm 2"), Command::Remove(1));
        assert!(parse("!rm 0", "!").unwrap().is_err());
        assert!(parse("!move 1", "!").unwrap().is_err());
    }

    #[test]
    fn test_mode_and_status() {
        assert_eq!(ok("!mode"), Command::Mode(None));
        assert_eq!(ok("!mode 3"), Command::Mode(Some(PlayMode::RandomLoop)));
        assert!(parse("!mode 4", "!").unwrap().is_err());
        assert_eq!(ok("!ls"), Command::Status(embeds::DEFAULT_STATUS_LIMIT));
        assert_eq!(ok("!ls 5"), Command::Status(5));
    }

    #[test]
    fn test_lists_and_playlists() {
        assert_eq!(
            ok("!import chill append"),
            Command::Import { name: "chill".into(), append: true }
        );
        assert_eq!(ok("!import chill"), Command::Import { name: "chill".into(), append: false });
        assert_eq!(ok("!lists ch"), Command::Lists(Some("ch".into())));
        assert_eq!(
            ok("!playlist set 华语 经典"),
            Command::Playlist { replace: true, target: "华语 经典".into() }
        );
        assert!(parse("!playlist play 1", "!").unwrap().is_err());
    }

    #[test]
    fn test_login_commands() {
        assert_eq!(ok("!login qr"), Command::LoginQr);
        assert_eq!(
            ok("!login sms 13800000000 1234"),
            Command::LoginSms { phone: "13800000000".into(), code: Some("1234".into()) }
        );
        assert!(parse("!login", "!").unwrap().is_err());
    }

    #[test]
    fn test_custom_prefix() {
        assert_eq!(parse("?pre", "?").unwrap().unwrap(), Command::Previous);
        assert_eq!(parse("!pre", "?"), None);
    }
}
