use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, fmt, str::FromStr};

use super::track::TrackDescriptor;
use crate::error::{Error, Result};

/// Modo de reproducción
///
/// Acepta también los nombres antiguos (`SeqPlay`, ...) al deserializar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayMode {
    #[default]
    #[serde(alias = "SeqPlay")]
    Sequential,
    #[serde(alias = "SeqLoopPlay")]
    SequentialLoop,
    #[serde(alias = "RandomPlay")]
    Random,
    #[serde(alias = "RandomLoopPlay")]
    RandomLoop,
}

impl PlayMode {
    pub const ALL: [PlayMode; 4] = [
        PlayMode::Sequential,
        PlayMode::SequentialLoop,
        PlayMode::Random,
        PlayMode::RandomLoop,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Los modos en bucle vuelven a poner la canción al final de la cola
    pub fn is_loop(self) -> bool {
        matches!(self, PlayMode::SequentialLoop | PlayMode::RandomLoop)
    }

    pub fn is_random(self) -> bool {
        matches!(self, PlayMode::Random | PlayMode::RandomLoop)
    }

    pub fn label(self) -> &'static str {
        match self {
            PlayMode::Sequential => "Secuencial",
            PlayMode::SequentialLoop => "Secuencial en bucle",
            PlayMode::Random => "Aleatorio",
            PlayMode::RandomLoop => "Aleatorio en bucle",
        }
    }
}

impl fmt::Display for PlayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PlayMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(index) = s.parse::<usize>() {
            return Self::from_index(index)
                .ok_or_else(|| Error::Config(format!("modo desconocido: {}", index)));
        }

        match s.to_lowercase().as_str() {
            "sequential" | "seqplay" => Ok(PlayMode::Sequential),
            "sequentialloop" | "seqloopplay" => Ok(PlayMode::SequentialLoop),
            "random" | "randomplay" => Ok(PlayMode::Random),
            "randomloop" | "randomloopplay" => Ok(PlayMode::RandomLoop),
            other => Err(Error::Config(format!("modo desconocido: {}", other))),
        }
    }
}

/// Modo actual más el contador de la vuelta en curso
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlayModeState {
    pub mode: PlayMode,
    pub play_count: usize,
}

impl PlayModeState {
    pub fn new(mode: PlayMode) -> Self {
        Self {
            mode,
            play_count: 0,
        }
    }
}

/// Resultado de avanzar la cola un paso
#[derive(Debug)]
pub struct Advanced {
    pub track: TrackDescriptor,
    pub queue: VecDeque<TrackDescriptor>,
    pub play_count: usize,
    pub reshuffled: bool,
}

/// Decide la siguiente canción
///
/// Saca la cabeza de la cola. En los modos en bucle la vuelve a poner al
/// final y cuenta la reproducción; en `RandomLoop` la cola se vuelve a mezclar
/// cuando el contador alcanza su longitud (una vuelta completa).
pub fn advance<R: Rng + ?Sized>(
    mut queue: VecDeque<TrackDescriptor>,
    mode: PlayMode,
    play_count: usize,
    rng: &mut R,
) -> Result<Advanced> {
    let track = queue.pop_front().ok_or(Error::EmptyQueue)?;

    let mut play_count = if mode.is_loop() {
        queue.push_back(track.clone());
        play_count + 1
    } else {
        // fuera de bucle siempre estamos en la primera canción restante
        1
    };

    let mut reshuffled = false;
    if mode == PlayMode::RandomLoop && play_count >= queue.len() {
        shuffle(queue.make_contiguous(), rng);
        play_count = 1;
        reshuffled = true;
    }

    Ok(Advanced {
        track,
        queue,
        play_count,
        reshuffled,
    })
}

/// Permutación uniforme (Fisher–Yates)
pub fn shuffle<T, R: Rng + ?Sized>(items: &mut [T], rng: &mut R) {
    items.shuffle(rng);
}
