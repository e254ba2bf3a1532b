//! Resolution and playback pipeline.
//!
//! [`PlaybackController`] owns one guild's queue, play mode, presence and
//! current playback record behind a single async mutex. Resolving a track and
//! starting it on the player happen outside that lock; every skip cascade
//! gets a fresh [`CancellationToken`] so a newer request (or an explicit stop)
//! supersedes whatever is still resolving.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    mode::{PlayMode, PlayModeState},
    presence::{ListenerId, PresenceEvent, PresenceTracker, Roster},
    queue::{MusicQueue, RestoreMode},
    track::{AudioSource, PlaylistMeta, TrackDescriptor},
};
use crate::{
    config::{BotConfig, ConfigStore, VolumeConfig},
    error::{Error, Result},
    session::{SessionHandle, SessionHeaders},
};

/// Intentos máximos de `previous`
pub const MAX_PREVIOUS_ATTEMPTS: usize = 10;

/// Canción lista para reproducir
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTrack {
    /// Descriptor con los metadatos completos
    pub track: TrackDescriptor,
    pub stream_url: String,
}

/// Resuelve un descriptor a una URL reproducible
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// `Ok(None)` significa que el catálogo no tiene la canción disponible
    async fn resolve(
        &self,
        track: &TrackDescriptor,
        headers: &SessionHeaders,
    ) -> Result<Option<ResolvedTrack>>;
}

/// Lo que el reproductor necesita para empezar una canción
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSource {
    pub url: String,
    pub source: AudioSource,
    pub start_offset: Option<Duration>,
}

/// Reproductor externo
///
/// Las señales de fin de canción vuelven al controlador con el mismo `serial`
/// que se pasó a `start`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlayerBackend: Send + Sync {
    async fn start(&self, source: &PlaybackSource, serial: u64, volume: f32) -> Result<()>;
    async fn set_paused(&self, paused: bool) -> Result<()>;
    async fn stop(&self) -> Result<()>;
}

/// Datos de la canción que acaba de empezar
#[derive(Debug, Clone)]
pub struct NowPlaying {
    pub track: TrackDescriptor,
    /// `[playCount/len]` para canciones de playlist
    pub position: Option<(usize, usize)>,
    pub mode: PlayMode,
    pub playlist: Option<PlaylistMeta>,
}

/// Mensajes al canal de texto y estado del bot
#[async_trait]
pub trait Announcer: Send + Sync {
    async fn say(&self, message: String);
    async fn track_started(&self, now: NowPlaying);
}

#[derive(Debug, Clone)]
pub struct PlaybackRecord {
    pub track: TrackDescriptor,
    pub stream_url: String,
    pub paused: bool,
    /// Fallos previos en la cascada que terminó con esta canción
    pub retries: usize,
    pub serial: u64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    Started,
    Resumed,
    AlreadyPlaying,
    Queued { position: usize },
    Stopped,
    QueueEmpty,
    /// Toda la cascada falló sin vaciar la cola
    Exhausted,
    /// Una petición más nueva o un stop canceló esta
    Superseded,
}

/// Lista guardada en disco
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaylistSnapshot {
    #[serde(default)]
    pub mode: Option<PlayMode>,
    #[serde(rename = "MusicInfoList", alias = "MusicList", default)]
    pub tracks: Vec<TrackDescriptor>,
    #[serde(rename = "PlayListMeta", alias = "Meta", default)]
    pub meta: Option<PlaylistMeta>,
}

#[derive(Debug, Clone)]
pub struct QueueStatus {
    pub current: Option<PlaybackRecord>,
    pub mode: PlayMode,
    pub play_count: usize,
    pub queue_len: usize,
    pub upcoming: Vec<TrackDescriptor>,
    pub playlist: Option<PlaylistMeta>,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub volume: VolumeConfig,
    pub max_failure_reports: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            volume: config.volume.clone(),
            max_failure_reports: config.failure_reports.max_per_cascade,
        }
    }

    fn start_volume(&self) -> f32 {
        self.volume.default.max(self.volume.min).min(self.volume.max)
    }
}

/// Colaboradores externos del controlador
pub struct ControllerParts {
    pub resolver: Arc<dyn TrackResolver>,
    pub player: Arc<dyn PlayerBackend>,
    pub announcer: Arc<dyn Announcer>,
    pub session: SessionHandle,
    pub config: Arc<ConfigStore>,
}

struct ControllerState {
    queue: MusicQueue,
    mode: PlayModeState,
    presence: PresenceTracker,
    record: Option<PlaybackRecord>,
    playlist: Option<PlaylistMeta>,
    rng: StdRng,
    /// Cascada en curso que todavía no terminó
    cascade: Option<u64>,
    cascade_seq: u64,
    /// Cambia cada vez que la cola se reemplaza entera
    generation: u64,
}

impl ControllerState {
    /// Nada suena y ninguna cascada está buscando canción
    fn idle(&self) -> bool {
        self.record.is_none() && self.cascade.is_none()
    }

    /// Cierra la cascada
    ///
    /// Si la abrió el fin de una canción y esa canción sigue en el registro
    /// (no arrancó otra), pasa al historial y el controlador queda libre.
    fn close_cascade(&mut self, cascade: &Cascade) {
        if self.cascade == Some(cascade.id) {
            self.cascade = None;
        }

        let current = self.record.as_ref().map(|record| record.serial);
        if cascade.ended.is_some() && current == cascade.ended {
            if let Some(record) = self.record.take() {
                self.queue.push_history(record.track);
            }
        }
    }
}

/// Una cascada abierta
struct Cascade {
    id: u64,
    token: CancellationToken,
    /// Serial de la canción cuyo fin natural abrió la cascada
    ended: Option<u64>,
}

/// Qué hacer con la canción que estaba sonando cuando empieza otra
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Displaced {
    ToHistory,
    ToQueueHead,
}

enum StartResult {
    Started,
    Superseded,
}

/// Limita los mensajes de fallo de una cascada
#[derive(Debug)]
struct FailureReporter {
    limit: usize,
    reported: usize,
    suppressed: usize,
}

impl FailureReporter {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            reported: 0,
            suppressed: 0,
        }
    }

    fn record(&mut self, track: &TrackDescriptor, err: &Error) -> Option<String> {
        if self.reported < self.limit {
            self.reported += 1;
            Some(format!("❌ No se pudo reproducir {}: {}", track.full_name(), err))
        } else {
            self.suppressed += 1;
            None
        }
    }

    fn summary(&self) -> Option<String> {
        (self.suppressed > 0)
            .then(|| format!("⚠️ Otras {} canciones también fallaron", self.suppressed))
    }
}

pub struct PlaybackController {
    state: Mutex<ControllerState>,
    resolver: Arc<dyn TrackResolver>,
    player: Arc<dyn PlayerBackend>,
    announcer: Arc<dyn Announcer>,
    session: SessionHandle,
    config: Arc<ConfigStore>,
    settings: PipelineSettings,
    cascade: parking_lot::Mutex<CancellationToken>,
    // Serializa el arranque del reproductor, el registro y el stop explícito
    start_gate: Mutex<()>,
    serial: AtomicU64,
}

impl PlaybackController {
    pub fn new(parts: ControllerParts, self_id: ListenerId) -> Self {
        let config = parts.config.snapshot();

        Self {
            state: Mutex::new(ControllerState {
                queue: MusicQueue::new(),
                mode: PlayModeState::new(config.play_mode),
                presence: PresenceTracker::new(self_id, config.auto_pause_enabled),
                record: None,
                playlist: None,
                rng: StdRng::from_entropy(),
                cascade: None,
                cascade_seq: 0,
                generation: 0,
            }),
            resolver: parts.resolver,
            player: parts.player,
            announcer: parts.announcer,
            session: parts.session,
            config: parts.config,
            settings: PipelineSettings::from_config(&config),
            cascade: parking_lot::Mutex::new(CancellationToken::new()),
            start_gate: Mutex::new(()),
            serial: AtomicU64::new(0),
        }
    }

    /// Fija la semilla del generador aleatorio
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.state.get_mut().rng = rng;
        self
    }

    /// Reproduce la siguiente canción de la cola, saltando las que fallan
    pub async fn play_next(&self) -> Result<PlayOutcome> {
        let cascade = self.open_cascade(&mut *self.state.lock().await);
        self.run_cascade(&cascade).await
    }

    /// `play` sin argumentos: arranca la cola si no suena nada, si no reanuda
    pub async fn play(&self) -> Result<PlayOutcome> {
        {
            let mut state = self.state.lock().await;
            if let Some(record) = state.record.as_mut() {
                if !record.paused {
                    return Ok(PlayOutcome::AlreadyPlaying);
                }
                self.player.set_paused(false).await?;
                record.paused = false;
                info!("▶️ Reproducción reanudada");
                return Ok(PlayOutcome::Resumed);
            }
        }

        self.play_next().await
    }

    /// Reproduce una canción ya mismo, sin pasar por la cola
    pub async fn play_track(
        &self,
        track: TrackDescriptor,
        start_offset: Option<Duration>,
    ) -> Result<PlayOutcome> {
        let cascade = self.open_cascade(&mut *self.state.lock().await);

        let result = self
            .try_start(&track, start_offset, 0, &cascade.token, Displaced::ToHistory)
            .await;
        self.state.lock().await.close_cascade(&cascade);

        match result {
            Ok(StartResult::Started) => Ok(PlayOutcome::Started),
            Ok(StartResult::Superseded) => Ok(PlayOutcome::Superseded),
            Err(e) => {
                self.announcer
                    .say(format!("❌ No se pudo reproducir {}: {}", track.full_name(), e))
                    .await;
                Err(e)
            }
        }
    }

    /// Agrega a la cola y arranca si no suena nada
    ///
    /// Con una cascada todavía resolviendo la canción solo se encola: esa
    /// cascada ya es el arranque pendiente.
    pub async fn enqueue(&self, track: TrackDescriptor) -> Result<PlayOutcome> {
        let (cascade, position) = {
            let mut state = self.state.lock().await;
            state.queue.add_track(track.with_in_playlist(true), None);
            let cascade = state.idle().then(|| self.open_cascade(&mut state));
            (cascade, state.queue.len())
        };

        match cascade {
            Some(cascade) => self.run_cascade(&cascade).await,
            None => Ok(PlayOutcome::Queued { position }),
        }
    }

    /// Vuelve a la canción anterior
    ///
    /// Prueba como mucho [`MAX_PREVIOUS_ATTEMPTS`] canciones del historial,
    /// de la más reciente a la más antigua. La que sonaba vuelve al principio
    /// de la cola.
    pub async fn previous(&self) -> Result<PlayOutcome> {
        let cascade = self.open_cascade(&mut *self.state.lock().await);
        let result = self.previous_steps(&cascade.token).await;
        self.state.lock().await.close_cascade(&cascade);
        result
    }

    async fn previous_steps(&self, token: &CancellationToken) -> Result<PlayOutcome> {
        let mut attempts = 0;

        while attempts < MAX_PREVIOUS_ATTEMPTS {
            let candidate = self.state.lock().await.queue.pop_history();
            let Some(track) = candidate else {
                if attempts == 0 {
                    return Err(Error::NoPreviousTrack);
                }
                break;
            };

            attempts += 1;
            match self
                .try_start(&track, None, attempts - 1, token, Displaced::ToQueueHead)
                .await
            {
                Ok(StartResult::Started) => return Ok(PlayOutcome::Started),
                Ok(StartResult::Superseded) => {
                    // no llegó a sonar, sigue siendo la anterior
                    self.state.lock().await.queue.push_history(track);
                    return Ok(PlayOutcome::Superseded);
                }
                Err(e) => warn!(
                    "⚠️ Anterior {} falló (intento {}): {}",
                    track.display_name(),
                    attempts,
                    e
                ),
            }
        }

        Err(Error::ExhaustedRetries(attempts))
    }

    /// Detiene la reproducción
    ///
    /// `by_system` indica fin natural de la canción y equivale a pedir la
    /// siguiente. Un stop explícito corta el reproductor y borra el registro
    /// sin avanzar.
    pub async fn stop(&self, by_system: bool) -> Result<PlayOutcome> {
        if by_system {
            let cascade = {
                let mut state = self.state.lock().await;
                let ended = state.record.as_ref().map(|record| record.serial);
                let mut cascade = self.open_cascade(&mut state);
                cascade.ended = ended;
                cascade
            };
            return self.run_cascade(&cascade).await;
        }

        // cancela cualquier cascada pendiente antes de tomar la compuerta
        {
            let mut state = self.state.lock().await;
            state.cascade = None;
            self.begin_cascade();
        }
        let _gate = self.start_gate.lock().await;

        self.retire_current().await;
        if let Err(e) = self.player.stop().await {
            warn!("⚠️ Error deteniendo el reproductor: {}", e);
        }

        info!("⏹️ Reproducción detenida");
        Ok(PlayOutcome::Stopped)
    }

    /// Señal de fin natural del reproductor
    pub async fn on_track_end(&self, serial: u64) -> Result<PlayOutcome> {
        let Some((cascade, _)) = self.claim_end(serial).await else {
            debug!("Fin de canción obsoleto (serial {}), ignorado", serial);
            return Ok(PlayOutcome::Superseded);
        };
        self.run_cascade(&cascade).await
    }

    /// Error del reproductor durante la canción
    pub async fn on_track_failed(&self, serial: u64, reason: &str) -> Result<PlayOutcome> {
        let Some((cascade, name)) = self.claim_end(serial).await else {
            debug!("Error de canción obsoleto (serial {}), ignorado", serial);
            return Ok(PlayOutcome::Superseded);
        };

        error!("❌ Error reproduciendo {}: {}", name, reason);
        self.announcer
            .say(format!("❌ Falló la reproducción de {}, saltando", name))
            .await;
        self.run_cascade(&cascade).await
    }

    /// Comprueba que `serial` sigue sonando y abre la cascada siguiente sin
    /// soltar el estado, así ninguna canción nueva se cuela entre medio
    async fn claim_end(&self, serial: u64) -> Option<(Cascade, String)> {
        let mut state = self.state.lock().await;
        let name = state
            .record
            .as_ref()
            .filter(|record| record.serial == serial)
            .map(|record| record.track.full_name())?;
        let mut cascade = self.open_cascade(&mut state);
        cascade.ended = Some(serial);
        Some((cascade, name))
    }

    /// Pausa manual; devuelve el nuevo estado o `None` si no suena nada
    pub async fn toggle_pause(&self) -> Result<Option<bool>> {
        let mut state = self.state.lock().await;
        let Some(record) = state.record.as_mut() else {
            return Ok(None);
        };

        let paused = !record.paused;
        self.player.set_paused(paused).await?;
        record.paused = paused;
        info!("{} Pausa manual: {}", if paused { "⏸️" } else { "▶️" }, paused);
        Ok(Some(paused))
    }

    /// Aplica un evento de presencia y pausa o reanuda según los oyentes
    pub async fn presence_event(&self, event: PresenceEvent, roster: &Roster) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(paused) = state.presence.apply(event, roster) else {
            return Ok(());
        };

        if let Some(record) = state.record.as_mut() {
            if record.paused != paused {
                self.player.set_paused(paused).await?;
                record.paused = paused;
                info!(
                    "{} Pausa automática: {}",
                    if paused { "⏸️" } else { "▶️" },
                    paused
                );
            }
        }
        Ok(())
    }

    /// El bot perdió su canal de voz
    pub async fn detach(&self) -> Result<()> {
        self.state.lock().await.presence.reset();
        self.stop(false).await.map(|_| ())
    }

    /// Cambia el modo y lo guarda en la configuración; no toca la cola
    pub async fn set_mode(&self, mode: PlayMode) -> PlayMode {
        self.state.lock().await.mode.mode = mode;
        if let Err(e) = self.config.update_mode(mode) {
            warn!("⚠️ No se pudo guardar el modo: {}", e);
        }
        info!("🔁 Modo de reproducción: {}", mode);
        mode
    }

    pub async fn mode(&self) -> PlayMode {
        self.state.lock().await.mode.mode
    }

    pub async fn move_track(&self, from: usize, to: usize) -> Result<()> {
        self.state.lock().await.queue.move_track(from, to)
    }

    pub async fn remove_track(&self, index: usize) -> Result<TrackDescriptor> {
        self.state.lock().await.queue.remove_track(index)
    }

    pub async fn shuffle(&self) {
        let mut state = self.state.lock().await;
        let ControllerState { queue, rng, .. } = &mut *state;
        queue.shuffle(rng);
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.queue.clear();
        state.playlist = None;
        state.mode.play_count = 0;
        state.generation += 1;
    }

    pub async fn queue_item(&self, index: usize) -> Option<TrackDescriptor> {
        self.state.lock().await.queue.get(index).cloned()
    }

    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn snapshot(&self) -> PlaylistSnapshot {
        let state = self.state.lock().await;
        PlaylistSnapshot {
            mode: Some(state.mode.mode),
            tracks: state.queue.snapshot(),
            meta: state.playlist.clone(),
        }
    }

    /// Carga una lista guardada
    ///
    /// `Replace` también reemplaza los metadatos de la playlist y reinicia el
    /// contador; el modo actual se mantiene.
    pub async fn restore(&self, snapshot: PlaylistSnapshot, mode: RestoreMode) -> usize {
        let mut state = self.state.lock().await;
        let count = snapshot.tracks.len();
        state.queue.restore(snapshot.tracks, mode);
        if mode == RestoreMode::Replace {
            state.playlist = snapshot.meta;
            state.mode.play_count = 0;
            state.generation += 1;
        }
        count
    }

    /// Reemplaza la cola por una playlist y empieza a reproducirla
    pub async fn set_playlist(
        &self,
        meta: PlaylistMeta,
        tracks: Vec<TrackDescriptor>,
    ) -> Result<PlayOutcome> {
        let cascade = {
            let mut state = self.state.lock().await;
            let ControllerState {
                queue,
                mode,
                playlist,
                rng,
                generation,
                ..
            } = &mut *state;

            queue.restore(tracks, RestoreMode::Replace);
            *playlist = Some(meta);
            mode.play_count = 0;
            *generation += 1;
            if mode.mode.is_random() {
                queue.shuffle(rng);
            }
            self.open_cascade(&mut state)
        };

        self.run_cascade(&cascade).await
    }

    /// Agrega las canciones de una playlist al final de la cola
    pub async fn add_playlist(&self, tracks: Vec<TrackDescriptor>) -> Result<PlayOutcome> {
        let (cascade, position) = {
            let mut state = self.state.lock().await;
            state.queue.add_tracks(tracks);
            let cascade = state.idle().then(|| self.open_cascade(&mut state));
            (cascade, state.queue.len())
        };

        match cascade {
            Some(cascade) => self.run_cascade(&cascade).await,
            None => Ok(PlayOutcome::Queued { position }),
        }
    }

    pub async fn status(&self, limit: usize) -> QueueStatus {
        let state = self.state.lock().await;
        QueueStatus {
            current: state.record.clone(),
            mode: state.mode.mode,
            play_count: state.mode.play_count,
            queue_len: state.queue.len(),
            upcoming: state.queue.peek(limit),
            playlist: state.playlist.clone(),
        }
    }

    pub async fn is_idle(&self) -> bool {
        self.state.lock().await.record.is_none()
    }

    fn begin_cascade(&self) -> CancellationToken {
        let mut current = self.cascade.lock();
        current.cancel();
        *current = CancellationToken::new();
        current.clone()
    }

    /// Abre una cascada nueva y cancela la anterior
    ///
    /// Siempre con el estado bloqueado: abrir cascadas queda serializado con
    /// las comprobaciones de `enqueue` y del fin de canción.
    fn open_cascade(&self, state: &mut ControllerState) -> Cascade {
        state.cascade_seq += 1;
        state.cascade = Some(state.cascade_seq);
        Cascade {
            id: state.cascade_seq,
            token: self.begin_cascade(),
            ended: None,
        }
    }

    async fn run_cascade(&self, cascade: &Cascade) -> Result<PlayOutcome> {
        let result = self.cascade_steps(cascade).await;
        self.state.lock().await.close_cascade(cascade);
        result
    }

    /// Cascada acotada por la longitud de la cola al empezar
    async fn cascade_steps(&self, cascade: &Cascade) -> Result<PlayOutcome> {
        let token = &cascade.token;
        let budget = self.state.lock().await.queue.len().max(1);
        let mut reporter = FailureReporter::new(self.settings.max_failure_reports);
        let mut outcome = PlayOutcome::Exhausted;

        for attempt in 0..budget {
            if token.is_cancelled() {
                return Ok(PlayOutcome::Superseded);
            }

            let (next, generation) = {
                let mut state = self.state.lock().await;
                let ControllerState {
                    queue,
                    mode,
                    rng,
                    generation,
                    ..
                } = &mut *state;
                match queue.next_track(mode, rng) {
                    Ok(track) => (track, *generation),
                    Err(Error::EmptyQueue) => {
                        // se cierra aquí para que un enqueue posterior arranque solo
                        state.close_cascade(cascade);
                        outcome = PlayOutcome::QueueEmpty;
                        break;
                    }
                    Err(e) => return Err(e),
                }
            };

            match self
                .try_start(&next, None, attempt, token, Displaced::ToHistory)
                .await
            {
                Ok(StartResult::Started) => {
                    outcome = PlayOutcome::Started;
                    break;
                }
                Ok(StartResult::Superseded) => {
                    // la canción sacada no llegó a sonar, vuelve a la cabeza
                    let mut state = self.state.lock().await;
                    if state.generation == generation {
                        state.queue.add_track(next, Some(0));
                    }
                    return Ok(PlayOutcome::Superseded);
                }
                Err(e) => {
                    warn!("⚠️ Saltando {}: {}", next.display_name(), e);
                    if let Some(message) = reporter.record(&next, &e) {
                        self.announcer.say(message).await;
                    }
                }
            }
        }

        if let Some(summary) = reporter.summary() {
            self.announcer.say(summary).await;
        }
        {
            let mut state = self.state.lock().await;
            state.close_cascade(cascade);
            if outcome == PlayOutcome::Exhausted && state.queue.is_empty() {
                outcome = PlayOutcome::QueueEmpty;
            }
        }
        match outcome {
            PlayOutcome::QueueEmpty => {
                info!("📭 Cola vacía");
                self.announcer.say("📭 La cola está vacía".to_string()).await;
            }
            PlayOutcome::Exhausted => {
                warn!("⚠️ Cascada agotada tras {} intentos", budget);
                self.announcer
                    .say("⚠️ Ninguna canción de la cola se pudo reproducir".to_string())
                    .await;
            }
            _ => {}
        }

        Ok(outcome)
    }

    async fn resolve(&self, track: &TrackDescriptor) -> Result<ResolvedTrack> {
        if let Some(link) = track.direct_url.as_deref().filter(|l| !l.is_empty()) {
            return Ok(ResolvedTrack {
                track: track.clone(),
                stream_url: link.to_string(),
            });
        }

        let headers = self.session.headers();
        self.resolver
            .resolve(track, &headers)
            .await?
            .ok_or_else(|| Error::Resolution(format!("{} no está disponible", track.display_name())))
    }

    async fn try_start(
        &self,
        track: &TrackDescriptor,
        start_offset: Option<Duration>,
        retries: usize,
        token: &CancellationToken,
        displaced: Displaced,
    ) -> Result<StartResult> {
        let resolved = tokio::select! {
            _ = token.cancelled() => return Ok(StartResult::Superseded),
            resolved = self.resolve(track) => resolved?,
        };

        let _gate = self.start_gate.lock().await;
        if token.is_cancelled() {
            debug!("Cascada cancelada antes de iniciar {}", track.display_name());
            return Ok(StartResult::Superseded);
        }

        let serial = self.serial.fetch_add(1, Ordering::SeqCst) + 1;
        let source = PlaybackSource {
            url: resolved.stream_url.clone(),
            source: track.source(),
            start_offset,
        };

        // El registro nuevo entra antes de arrancar: el fin de la canción
        // reemplazada llega con un serial viejo y se ignora.
        let (previous, auto_paused) = {
            let mut state = self.state.lock().await;
            let auto_paused = state.presence.own_channel().is_some()
                && state.presence.decision() == Some(true);
            let record = PlaybackRecord {
                track: resolved.track.clone(),
                stream_url: resolved.stream_url.clone(),
                paused: auto_paused,
                retries,
                serial,
                started_at: Utc::now(),
            };
            (state.record.replace(record), auto_paused)
        };

        if let Err(e) = self
            .player
            .start(&source, serial, self.settings.start_volume())
            .await
        {
            self.state.lock().await.record = previous;
            return Err(e);
        }

        if auto_paused {
            if let Err(e) = self.player.set_paused(true).await {
                warn!("⚠️ No se pudo pausar sin oyentes: {}", e);
            }
        }

        let now = {
            let mut state = self.state.lock().await;
            state.queue.update_track(&resolved.track);

            if let Some(previous) = previous {
                match displaced {
                    Displaced::ToHistory => state.queue.push_history(previous.track),
                    Displaced::ToQueueHead => state.queue.add_track(previous.track, Some(0)),
                }
            }

            NowPlaying {
                position: resolved
                    .track
                    .in_playlist
                    .then(|| (state.mode.play_count, state.queue.len())),
                track: resolved.track,
                mode: state.mode.mode,
                playlist: state.playlist.clone(),
            }
        };

        info!("🎵 Reproduciendo: {}", now.track.full_name());
        self.announcer.track_started(now).await;
        Ok(StartResult::Started)
    }

    /// Saca la canción actual del registro y la guarda en el historial
    async fn retire_current(&self) {
        let mut state = self.state.lock().await;
        if let Some(record) = state.record.take() {
            state.queue.push_history(record.track);
        }
    }
}
