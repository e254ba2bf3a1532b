use async_trait::async_trait;
use parking_lot::RwLock;
use songbird::{
    input::{File, HttpRequest, Input},
    tracks::{Track, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, TrackEvent,
};
use std::sync::Arc;
use tokio::sync::{mpsc::UnboundedSender, Mutex};
use tracing::{debug, info, warn};

use super::{
    pipeline::{PlaybackSource, PlayerBackend},
    track::AudioSource,
};
use crate::error::{Error, Result};

/// Señales del driver de voz hacia el controlador
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerSignal {
    TrackEnded { serial: u64 },
    TrackFailed { serial: u64, reason: String },
}

/// Reproductor sobre una llamada de songbird
pub struct SongbirdPlayer {
    http: reqwest::Client,
    call: RwLock<Option<Arc<Mutex<Call>>>>,
    current: RwLock<Option<TrackHandle>>,
    signals: UnboundedSender<PlayerSignal>,
}

impl SongbirdPlayer {
    pub fn new(http: reqwest::Client, signals: UnboundedSender<PlayerSignal>) -> Self {
        Self {
            http,
            call: RwLock::new(None),
            current: RwLock::new(None),
            signals,
        }
    }

    /// Conecta el reproductor a la llamada del canal de voz
    pub fn attach(&self, call: Arc<Mutex<Call>>) {
        *self.call.write() = Some(call);
        debug!("Reproductor conectado a la llamada");
    }

    pub fn detach(&self) {
        self.call.write().take();
        self.current.write().take();
    }

    pub fn is_attached(&self) -> bool {
        self.call.read().is_some()
    }

    fn input_for(&self, source: &PlaybackSource) -> Input {
        match source.source {
            AudioSource::Local => File::new(source.url.clone()).into(),
            AudioSource::Url | AudioSource::ExternalCatalog => {
                HttpRequest::new(self.http.clone(), source.url.clone()).into()
            }
        }
    }

    fn register_events(&self, handle: &TrackHandle, serial: u64) -> Result<()> {
        for (event, failed) in [(TrackEvent::End, false), (TrackEvent::Error, true)] {
            handle
                .add_event(
                    Event::Track(event),
                    TrackSignalHandler {
                        serial,
                        failed,
                        signals: self.signals.clone(),
                    },
                )
                .map_err(|e| Error::Player(format!("Error al agregar event handler: {}", e)))?;
        }
        Ok(())
    }
}

#[async_trait]
impl PlayerBackend for SongbirdPlayer {
    async fn start(&self, source: &PlaybackSource, serial: u64, volume: f32) -> Result<()> {
        let call = self
            .call
            .read()
            .clone()
            .ok_or_else(|| Error::Player("el bot no está en un canal de voz".into()))?;

        let input = self.input_for(source);

        // Detener track actual
        if let Some(previous) = self.current.write().take() {
            let _ = previous.stop();
        }

        let handle = {
            let mut call = call.lock().await;
            call.play(Track::from(input).volume(volume))
        };

        // sin eventos el controlador nunca sabría que terminó: se corta ya
        let handle = armed_or_stopped(
            handle,
            |handle| self.register_events(handle, serial),
            |handle| {
                if let Err(e) = handle.stop() {
                    warn!("⚠️ No se pudo detener el track sin eventos: {}", e);
                }
            },
        )?;

        if let Some(offset) = source.start_offset {
            // el resultado llega de forma asíncrona; un seek fallido no corta la canción
            let _ = handle.seek(offset);
        }

        *self.current.write() = Some(handle);
        info!("🔊 Reproduciendo (serial {}) a volumen {:.2}", serial, volume);
        Ok(())
    }

    async fn set_paused(&self, paused: bool) -> Result<()> {
        let current = self.current.read().clone();
        let Some(track) = current else {
            return Ok(());
        };

        let result = if paused { track.pause() } else { track.play() };
        result.map_err(|e| Error::Player(e.to_string()))
    }

    async fn stop(&self) -> Result<()> {
        if let Some(track) = self.current.write().take() {
            if let Err(e) = track.stop() {
                warn!("⚠️ El track ya había terminado: {}", e);
            }
        }
        Ok(())
    }
}

/// Devuelve el track solo si `arm` tuvo éxito; si no lo detiene con `discard`
fn armed_or_stopped<H>(
    handle: H,
    arm: impl FnOnce(&H) -> Result<()>,
    discard: impl FnOnce(&H),
) -> Result<H> {
    match arm(&handle) {
        Ok(()) => Ok(handle),
        Err(e) => {
            discard(&handle);
            Err(e)
        }
    }
}

/// Reenvía fin y error de un track al controlador
struct TrackSignalHandler {
    serial: u64,
    failed: bool,
    signals: UnboundedSender<PlayerSignal>,
}

#[async_trait]
impl VoiceEventHandler for TrackSignalHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let signal = if self.failed {
            let reason = match ctx {
                EventContext::Track(tracks) => tracks
                    .first()
                    .map(|(state, _)| format!("{:?}", state.playing))
                    .unwrap_or_default(),
                _ => String::new(),
            };
            PlayerSignal::TrackFailed {
                serial: self.serial,
                reason,
            }
        } else {
            PlayerSignal::TrackEnded {
                serial: self.serial,
            }
        };

        if self.signals.send(signal).is_err() {
            debug!("Controlador cerrado, señal {} descartada", self.serial);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_track_without_events_is_stopped() {
        let stopped = Cell::new(false);
        let result = armed_or_stopped(
            "track",
            |_| Err(Error::Player("sin eventos".into())),
            |_| stopped.set(true),
        );

        assert!(matches!(result, Err(Error::Player(_))));
        assert!(stopped.get());
    }

    #[test]
    fn test_armed_track_keeps_playing() {
        let stopped = Cell::new(false);
        let result = armed_or_stopped("track", |_| Ok(()), |_| stopped.set(true));

        assert_eq!(result.unwrap(), "track");
        assert!(!stopped.get());
    }
}
