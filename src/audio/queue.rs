use rand::Rng;
use std::collections::VecDeque;
use tracing::{debug, info};

use super::{
    mode::{self, PlayModeState},
    track::TrackDescriptor,
};
use crate::error::{Error, Result};

/// Cuántas canciones reproducidas se recuerdan para `previous`
const MAX_HISTORY: usize = 50;

/// Cómo aplicar una lista restaurada sobre la cola actual
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMode {
    Replace,
    Append,
}

/// Cola de reproducción sin duplicados más el historial reciente
#[derive(Debug, Default)]
pub struct MusicQueue {
    items: VecDeque<TrackDescriptor>,
    history: VecDeque<TrackDescriptor>,
}

impl MusicQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega un track a la cola
    ///
    /// Cualquier entrada con la misma identidad se elimina primero, así que
    /// agregar equivale a mover la canción a `insert_at` (o al final).
    pub fn add_track(&mut self, track: TrackDescriptor, insert_at: Option<usize>) {
        self.items.retain(|existing| !existing.same_track(&track));

        match insert_at {
            Some(index) if index < self.items.len() => {
                debug!("➕ Insertado en posición {}: {}", index, track.display_name());
                self.items.insert(index, track);
            }
            _ => {
                debug!("➕ Agregado a la cola: {}", track.display_name());
                self.items.push_back(track);
            }
        }
    }

    /// Agrega múltiples tracks (playlist)
    pub fn add_tracks(&mut self, tracks: impl IntoIterator<Item = TrackDescriptor>) -> usize {
        let mut added = 0;
        for track in tracks {
            self.add_track(track, None);
            added += 1;
        }
        info!("➕ Agregadas {} canciones a la cola", added);
        added
    }

    /// Elimina un track específico
    pub fn remove_track(&mut self, index: usize) -> Result<TrackDescriptor> {
        let len = self.items.len();
        let removed = self.items.remove(index).ok_or(Error::Index { index, len })?;
        debug!("❌ Track eliminado en posición {}", index);
        Ok(removed)
    }

    /// Intercambia dos posiciones de la cola
    pub fn move_track(&mut self, from: usize, to: usize) -> Result<()> {
        let len = self.items.len();
        if from >= len {
            return Err(Error::Index { index: from, len });
        }
        if to >= len {
            return Err(Error::Index { index: to, len });
        }

        self.items.swap(from, to);
        debug!("📍 Track intercambiado de posición {} a {}", from, to);
        Ok(())
    }

    /// Limpia la cola
    pub fn clear(&mut self) {
        self.items.clear();
        info!("🗑️ Cola limpiada");
    }

    /// Mezcla la cola
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        mode::shuffle(self.items.make_contiguous(), rng);
        info!("🔀 Cola mezclada");
    }

    /// Copia ordenada para persistir
    pub fn snapshot(&self) -> Vec<TrackDescriptor> {
        self.items.iter().cloned().collect()
    }

    pub fn restore(&mut self, tracks: Vec<TrackDescriptor>, mode: RestoreMode) {
        if mode == RestoreMode::Replace {
            self.items.clear();
        }
        self.add_tracks(tracks);
    }

    /// Obtiene el siguiente track según el modo de reproducción
    pub fn next_track<R: Rng + ?Sized>(
        &mut self,
        state: &mut PlayModeState,
        rng: &mut R,
    ) -> Result<TrackDescriptor> {
        // advance solo falla con la cola vacía, no se pierde nada
        let items = std::mem::take(&mut self.items);
        let advanced = mode::advance(items, state.mode, state.play_count, rng)?;

        self.items = advanced.queue;
        state.play_count = advanced.play_count;
        if advanced.reshuffled {
            info!("🔀 Vuelta completa, cola mezclada de nuevo");
        }
        Ok(advanced.track)
    }

    /// Copia los metadatos resueltos sobre la entrada con la misma identidad
    pub fn update_track(&mut self, resolved: &TrackDescriptor) {
        if let Some(entry) = self.items.iter_mut().find(|t| t.same_track(resolved)) {
            let in_playlist = entry.in_playlist;
            *entry = resolved.clone();
            entry.in_playlist = in_playlist;
        }
    }

    /// Las próximas `limit` canciones
    pub fn peek(&self, limit: usize) -> Vec<TrackDescriptor> {
        self.items.iter().take(limit).cloned().collect()
    }

    pub fn get(&self, index: usize) -> Option<&TrackDescriptor> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push_history(&mut self, track: TrackDescriptor) {
        self.history.push_back(track);

        // Mantener solo los últimos N items
        while self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }
    }

    /// La canción reproducida más recientemente
    pub fn pop_history(&mut self) -> Option<TrackDescriptor> {
        self.history.pop_back()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(queue: &MusicQueue) -> Vec<String> {
        queue
            .snapshot()
            .into_iter()
            .map(|t| t.remote_id.unwrap_or_default())
            .collect()
    }

    fn track(id: &str) -> TrackDescriptor {
        TrackDescriptor::remote(id)
    }

    #[test]
    fn test_add_never_duplicates() {
        let mut queue = MusicQueue::new();
        let sequence = ["1", "2", "3", "2", "1", "4", "3", "3"];
        for (i, id) in sequence.iter().enumerate() {
            let insert_at = if i % 3 == 0 { Some(0) } else { None };
            queue.add_track(track(id), insert_at);

            let snapshot = queue.snapshot();
            for (a, first) in snapshot.iter().enumerate() {
                for second in snapshot.iter().skip(a + 1) {
                    assert!(!first.same_track(second));
                }
            }
        }
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn test_add_moves_existing_entry() {
        let mut queue = MusicQueue::new();
        queue.add_tracks(vec![track("a"), track("b"), track("c")]);

        queue.add_track(track("a"), None);
        assert_eq!(ids(&queue), vec!["b", "c", "a"]);

        queue.add_track(track("a"), Some(1));
        assert_eq!(ids(&queue), vec!["b", "a", "c"]);

        // posiciones más allá del final agregan al final
        queue.add_track(track("d"), Some(99));
        assert_eq!(ids(&queue), vec!["b", "a", "c", "d"]);

        let by_link = TrackDescriptor::direct("/tmp/x.mp3");
        queue.add_track(by_link.clone(), Some(0));
        queue.add_track(by_link, None);
        assert_eq!(queue.len(), 5);
    }

    #[test]
    fn test_remove_out_of_range() {
        let mut queue = MusicQueue::new();
        queue.add_tracks(vec![track("a"), track("b")]);

        let err = queue.remove_track(2).unwrap_err();
        assert!(matches!(err, Error::Index { index: 2, len: 2 }));

        let removed = queue.remove_track(0).unwrap();
        assert_eq!(removed.remote_id.as_deref(), Some("a"));
        assert_eq!(ids(&queue), vec!["b"]);
    }

    #[test]
    fn test_move_bounds_leave_queue_unchanged() {
        let mut queue = MusicQueue::new();
        queue.add_tracks(vec![track("a"), track("b"), track("c")]);

        assert!(matches!(queue.move_track(3, 0), Err(Error::Index { index: 3, .. })));
        assert!(matches!(queue.move_track(0, 7), Err(Error::Index { index: 7, .. })));
        assert_eq!(ids(&queue), vec!["a", "b", "c"]);

        queue.move_track(0, 2).unwrap();
        assert_eq!(ids(&queue), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_restore_replace_and_append() {
        let mut queue = MusicQueue::new();
        queue.add_tracks(vec![track("a"), track("b")]);

        queue.restore(vec![track("b"), track("c")], RestoreMode::Append);
        assert_eq!(ids(&queue), vec!["a", "b", "c"]);

        queue.restore(vec![track("z")], RestoreMode::Replace);
        assert_eq!(ids(&queue), vec!["z"]);

        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_update_track_keeps_position() {
        let mut queue = MusicQueue::new();
        queue.add_tracks(vec![track("a"), track("b")]);

        queue.update_track(&track("a").with_name("Song A").with_in_playlist(false));
        let first = queue.get(0).unwrap();
        assert_eq!(first.name, "Song A");
        assert!(first.in_playlist);
        assert_eq!(ids(&queue), vec!["a", "b"]);
    }

    #[test]
    fn test_history_is_bounded_and_lifo() {
        let mut queue = MusicQueue::new();
        for i in 0..(MAX_HISTORY + 5) {
            queue.push_history(track(&i.to_string()));
        }
        assert_eq!(queue.history_len(), MAX_HISTORY);

        let last = queue.pop_history().unwrap();
        assert_eq!(last.remote_id.as_deref(), Some("54"));
    }
}
