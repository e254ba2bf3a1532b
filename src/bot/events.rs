use parking_lot::RwLock;
use serenity::{
    all::{ActivityData, ChannelId, GuildId, UserId, VoiceState},
    async_trait,
    builder::CreateMessage,
    prelude::Context,
};
use tracing::{debug, error};

use crate::{
    audio::{
        pipeline::{Announcer, NowPlaying},
        presence::{ListenerId, PresenceEvent, Roster},
    },
    ui::embeds,
};

/// Publica mensajes del controlador en el último canal de texto usado
pub struct DiscordAnnouncer {
    ctx: Context,
    channel: RwLock<Option<ChannelId>>,
    default_image: String,
}

impl DiscordAnnouncer {
    pub fn new(ctx: Context, default_image: String) -> Self {
        Self {
            ctx,
            channel: RwLock::new(None),
            default_image,
        }
    }

    /// Los mensajes siguientes van a este canal
    pub fn bind(&self, channel_id: ChannelId) {
        *self.channel.write() = Some(channel_id);
    }

    fn channel(&self) -> Option<ChannelId> {
        *self.channel.read()
    }
}

#[async_trait]
impl Announcer for DiscordAnnouncer {
    async fn say(&self, message: String) {
        let Some(channel_id) = self.channel() else {
            debug!("Sin canal de texto, mensaje descartado: {}", message);
            return;
        };

        if let Err(e) = channel_id.say(&self.ctx.http, message).await {
            error!("Error al enviar mensaje: {:?}", e);
        }
    }

    async fn track_started(&self, now: NowPlaying) {
        let activity = match embeds::position_label(now.position) {
            Some(position) => format!("{} {}", position, now.track.display_name()),
            None => now.track.display_name(),
        };
        self.ctx.set_activity(Some(ActivityData::listening(activity)));

        let Some(channel_id) = self.channel() else {
            return;
        };
        let embed = embeds::create_now_playing_embed(&now, &self.default_image);
        if let Err(e) = channel_id
            .send_message(&self.ctx.http, CreateMessage::new().embed(embed))
            .await
        {
            error!("Error al enviar mensaje now playing: {:?}", e);
        }
    }
}

/// Traduce un cambio de canal de voz a un evento de presencia
///
/// Los cambios sin cambio de canal (mute, deafen) no generan evento. Cualquier
/// llegada del propio bot a un canal es un `Moved` para que el tracker
/// reconstruya la lista de oyentes.
pub fn presence_event(
    client: ListenerId,
    self_id: ListenerId,
    old_channel: Option<u64>,
    new_channel: Option<u64>,
) -> Option<PresenceEvent> {
    if old_channel == new_channel {
        return None;
    }

    match (old_channel, new_channel) {
        (_, Some(target)) if client == self_id => Some(PresenceEvent::Moved { client, target }),
        (None, Some(channel)) => Some(PresenceEvent::Entered { client, channel }),
        (Some(_), Some(target)) => Some(PresenceEvent::Moved { client, target }),
        (Some(channel), None) => Some(PresenceEvent::Left { client, channel }),
        (None, None) => None,
    }
}

/// Oyentes en canales de voz de la guild según la caché, sin cuentas bot
pub fn roster(ctx: &Context, guild_id: GuildId) -> Roster {
    let Some(guild) = ctx.cache.guild(guild_id) else {
        return Roster::default();
    };

    let entries: Vec<(ListenerId, u64)> = guild
        .voice_states
        .values()
        .filter(|state| !is_bot(ctx, state))
        .filter_map(|state| state.channel_id.map(|c| (state.user_id.get(), c.get())))
        .collect();

    Roster::new(entries)
}

pub fn is_bot(ctx: &Context, state: &VoiceState) -> bool {
    if let Some(member) = &state.member {
        return member.user.bot;
    }
    is_bot_user(ctx, state.user_id)
}

fn is_bot_user(ctx: &Context, user_id: UserId) -> bool {
    ctx.cache.user(user_id).map(|u| u.bot).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BOT: u64 = 1;

    #[test]
    fn test_listener_transitions() {
        assert_eq!(
            presence_event(7, BOT, None, Some(10)),
            Some(PresenceEvent::Entered { client: 7, channel: 10 })
        );
        assert_eq!(
            presence_event(7, BOT, Some(10), None),
            Some(PresenceEvent::Left { client: 7, channel: 10 })
        );
        assert_eq!(
            presence_event(7, BOT, Some(10), Some(11)),
            Some(PresenceEvent::Moved { client: 7, target: 11 })
        );
    }

    #[test]
    fn test_same_channel_is_ignored() {
        assert_eq!(presence_event(7, BOT, Some(10), Some(10)), None);
        assert_eq!(presence_event(7, BOT, None, None), None);
    }

    #[test]
    fn test_bot_arrival_is_a_move() {
        assert_eq!(
            presence_event(BOT, BOT, None, Some(10)),
            Some(PresenceEvent::Moved { client: BOT, target: 10 })
        );
        assert_eq!(
            presence_event(BOT, BOT, Some(10), None),
            Some(PresenceEvent::Left { client: BOT, channel: 10 })
        );
    }
}
