use chrono::Utc;
use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::audio::{
    pipeline::{NowPlaying, QueueStatus},
    track::{PlaylistMeta, TrackDescriptor},
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Yun Music Bot";

/// Canciones próximas que se listan por defecto en `ls`
pub const DEFAULT_STATUS_LIMIT: usize = 3;

/// Crea un embed para la canción que acaba de empezar
pub fn create_now_playing_embed(now: &NowPlaying, default_image: &str) -> CreateEmbed {
    let track = &now.track;
    let artists = track.artist_line();

    let mut embed = CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!("**{}**", track.display_name()))
        .color(colors::SUCCESS_GREEN)
        .field(
            "🎤 Artista",
            if artists.is_empty() { "Desconocido".to_string() } else { artists },
            true,
        )
        .field("🔁 Modo", now.mode.label(), true);

    if let Some(position) = position_label(now.position) {
        embed = embed.field("📜 Posición", position, true);
    }

    if let Some(playlist) = now.playlist.as_ref().and_then(playlist_label) {
        embed = embed.field("📂 Playlist", playlist, true);
    }

    embed = embed.thumbnail(track.image.as_deref().unwrap_or(default_image));

    if let Some(url) = track.detail_url.as_deref().filter(|u| !u.is_empty()) {
        embed = embed.url(url);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Estado de la cola para `ls`
pub fn create_status_embed(status: &QueueStatus) -> CreateEmbed {
    let current = match &status.current {
        Some(record) => {
            let elapsed = (Utc::now() - record.started_at)
                .to_std()
                .unwrap_or_default();
            format!(
                "{}**{}**\nEmpezó hace {}",
                if record.paused { "⏸️ " } else { "" },
                record.track.full_name(),
                format_duration(elapsed)
            )
        }
        None => "Nada".to_string(),
    };

    let mut embed = CreateEmbed::default()
        .title("📜 Cola de Reproducción")
        .color(colors::MUSIC_PURPLE)
        .field("🎵 Sonando", current, false)
        .field("🔁 Modo", status.mode.label(), true)
        .field(
            "📊 Progreso",
            format!("{}/{}", status.play_count, status.queue_len),
            true,
        );

    if let Some(playlist) = status.playlist.as_ref().and_then(playlist_label) {
        embed = embed.field("📂 Playlist", playlist, true);
    }

    let upcoming = queue_lines(&status.upcoming, status.queue_len);
    embed
        .field(
            "⏭️ Siguientes",
            if upcoming.is_empty() { "La cola está vacía".to_string() } else { upcoming },
            false,
        )
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_help_embed(prefix: &str) -> CreateEmbed {
    let p = prefix;
    CreateEmbed::default()
        .title("🎵 Yun Music Bot - Comandos")
        .color(colors::INFO_BLUE)
        .field(
            "🎵 Reproducción",
            format!(
                "• `{p}play [canción] [@inicio] [#fuente]` - Reproduce o reanuda\n\
                • `{p}add <canción>` - Agrega a la cola\n\
                • `{p}next` / `{p}previous` - Siguiente o anterior\n\
                • `{p}pause` - Pausa o reanuda\n\
                • `{p}stop` - Detiene la reproducción"
            ),
            false,
        )
        .field(
            "📜 Cola",
            format!(
                "• `{p}ls [n]` - Muestra la cola\n\
                • `{p}mode [0-3]` - Secuencial, bucle, aleatorio, aleatorio en bucle\n\
                • `{p}move <de> <a>` / `{p}rm <n>` - Ordena la cola\n\
                • `{p}shuffle` / `{p}clear`"
            ),
            false,
        )
        .field(
            "💾 Listas",
            format!(
                "• `{p}export <nombre>` / `{p}import <nombre> [append]`\n\
                • `{p}lists [prefijo]` - Listas guardadas\n\
                • `{p}playlist add|set <id o nombre>` - Playlist del catálogo"
            ),
            false,
        )
        .field(
            "🔐 Sesión y conexión",
            format!(
                "• `{p}login qr` / `{p}login sms <teléfono> [código]`\n\
                • `{p}join` / `{p}leave`"
            ),
            false,
        )
        .field(
            "🏷️ Fuentes",
            "`#l` archivo local, `#n` catálogo, `#u` URL",
            false,
        )
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// `[playCount/len]` para el estado del bot y los embeds
pub fn position_label(position: Option<(usize, usize)>) -> Option<String> {
    position.map(|(count, len)| format!("[{}/{}]", count, len))
}

fn playlist_label(meta: &PlaylistMeta) -> Option<String> {
    meta.name
        .clone()
        .or_else(|| meta.id.as_ref().map(|id| format!("#{}", id)))
}

fn queue_lines(upcoming: &[TrackDescriptor], total: usize) -> String {
    let mut lines: Vec<String> = upcoming
        .iter()
        .enumerate()
        .map(|(i, track)| format!("`{}.` {}", i + 1, track.full_name()))
        .collect();

    if total > upcoming.len() {
        lines.push(format!("... y {} más", total - upcoming.len()));
    }
    lines.join("\n")
}

fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
