use std::collections::HashSet;
use tracing::{debug, info};

pub type ListenerId = u64;
pub type ChannelKey = u64;

/// Evento de presencia traducido desde el transporte de voz
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceEvent {
    Entered { client: ListenerId, channel: ChannelKey },
    Left { client: ListenerId, channel: ChannelKey },
    Moved { client: ListenerId, target: ChannelKey },
}

/// Foto de quién está en qué canal de voz
///
/// El adaptador del transporte excluye a las cuentas bot al construirla.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    entries: Vec<(ListenerId, ChannelKey)>,
}

impl Roster {
    pub fn new(entries: impl IntoIterator<Item = (ListenerId, ChannelKey)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn members_of(&self, channel: ChannelKey) -> impl Iterator<Item = ListenerId> + '_ {
        self.entries
            .iter()
            .filter(move |(_, c)| *c == channel)
            .map(|(listener, _)| *listener)
    }
}

/// Oyentes presentes en el canal del bot
#[derive(Debug)]
pub struct PresenceTracker {
    self_id: ListenerId,
    own_channel: Option<ChannelKey>,
    members: HashSet<ListenerId>,
    auto_pause: bool,
}

impl PresenceTracker {
    pub fn new(self_id: ListenerId, auto_pause: bool) -> Self {
        Self {
            self_id,
            own_channel: None,
            members: HashSet::new(),
            auto_pause,
        }
    }

    /// Aplica un evento y devuelve la decisión de pausa
    ///
    /// Devuelve `None` cuando la pausa automática está desactivada: el tracker
    /// sigue observando pero nunca controla el reproductor.
    pub fn apply(&mut self, event: PresenceEvent, roster: &Roster) -> Option<bool> {
        match event {
            PresenceEvent::Entered { client, channel } => {
                if client == self.self_id {
                    return None;
                }
                if Some(channel) == self.own_channel {
                    self.members.insert(client);
                }
            }
            PresenceEvent::Left { client, channel } => {
                if client == self.self_id {
                    return None;
                }
                if Some(channel) == self.own_channel {
                    self.members.remove(&client);
                }
            }
            PresenceEvent::Moved { client, target } if client == self.self_id => {
                self.rebuild(target, roster);
            }
            PresenceEvent::Moved { client, target } => {
                if Some(target) == self.own_channel {
                    self.members.insert(client);
                } else {
                    self.members.remove(&client);
                }
            }
        }

        debug!("👥 Oyentes en el canal: {}", self.members.len());
        self.decision()
    }

    /// El bot salió del canal de voz
    pub fn reset(&mut self) {
        self.own_channel = None;
        self.members.clear();
        debug!("Presencia reiniciada");
    }

    /// `paused = |members| < 1`, solo con pausa automática activa
    pub fn decision(&self) -> Option<bool> {
        if !self.auto_pause {
            return None;
        }
        Some(self.members.is_empty())
    }

    pub fn own_channel(&self) -> Option<ChannelKey> {
        self.own_channel
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    fn rebuild(&mut self, target: ChannelKey, roster: &Roster) {
        self.own_channel = Some(target);
        self.members.clear();
        let self_id = self.self_id;
        self.members
            .extend(roster.members_of(target).filter(|listener| *listener != self_id));
        info!(
            "🔊 Canal propio cambiado a {} ({} oyentes)",
            target,
            self.members.len()
        );
    }
}
