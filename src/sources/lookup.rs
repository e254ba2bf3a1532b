use std::sync::Arc;
use tracing::{debug, info};

use super::{catalog::CatalogClient, direct};
use crate::{
    audio::track::{AudioSource, TrackDescriptor},
    error::{Error, Result},
};

/// Qué eligió el usuario con su consulta
#[derive(Debug, Clone, PartialEq)]
pub enum LookupTarget {
    Track(TrackDescriptor),
    /// Posición 0-based de una canción que ya está en la cola
    QueueItem(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    pub target: LookupTarget,
    /// Avisos para el canal de texto
    pub notices: Vec<String>,
}

/// Convierte el texto de `play`/`add` en una canción
pub struct TrackLookup {
    catalog: Arc<CatalogClient>,
}

impl TrackLookup {
    pub fn new(catalog: Arc<CatalogClient>) -> Self {
        Self { catalog }
    }

    /// Con `#fuente` explícita solo se prueba esa fuente. Sin ella se intenta
    /// archivo o URL, luego un número de la cola y por último el catálogo.
    pub async fn lookup(
        &self,
        query: &str,
        source: Option<AudioSource>,
        queue_len: usize,
    ) -> Result<Lookup> {
        let mut notices = Vec::new();
        if query.contains('#') {
            notices.push(
                "ℹ️ Se detectó \"#\" en el nombre; para elegir la fuente usa `play <canción> #n`"
                    .to_string(),
            );
        }

        let target = match source {
            Some(AudioSource::ExternalCatalog) => self.catalog_lookup(query).await?,
            Some(AudioSource::Local) | Some(AudioSource::Url) => self
                .direct_lookup(query)
                .await
                .ok_or_else(|| Error::NotFound(query.to_string()))?,
            None => match self.default_lookup(query, queue_len, &mut notices).await {
                Some(target) => target,
                None => {
                    notices.push("🔍 No es un archivo ni un enlace, buscando en el catálogo".to_string());
                    self.catalog_lookup(query).await?
                }
            },
        };

        Ok(Lookup { target, notices })
    }

    async fn default_lookup(
        &self,
        query: &str,
        queue_len: usize,
        notices: &mut Vec<String>,
    ) -> Option<LookupTarget> {
        if let Some(target) = self.direct_lookup(query).await {
            return Some(target);
        }

        let plain = direct::plain_url(query)?;
        if direct::is_number(&plain) {
            if let Some(index) = queue_position(&plain, queue_len) {
                return Some(LookupTarget::QueueItem(index));
            }
            notices.push(format!(
                "⚠️ La cola no tiene la posición {}; si es un id del catálogo usa `#n`",
                plain
            ));
        }
        None
    }

    async fn direct_lookup(&self, query: &str) -> Option<LookupTarget> {
        let plain = direct::plain_url(query)?;
        if !direct::is_valid_path_or_url(self.catalog.http(), &plain).await {
            debug!("{} no es un archivo ni una URL válida", plain);
            return None;
        }
        Some(LookupTarget::Track(
            TrackDescriptor::direct(plain).with_in_playlist(false),
        ))
    }

    async fn catalog_lookup(&self, query: &str) -> Result<LookupTarget> {
        let id = match direct::extract_id(query) {
            Some(id) => id,
            None => {
                info!("🔍 Buscando en el catálogo: {}", query);
                self.catalog
                    .search_song(query)
                    .await?
                    .ok_or_else(|| Error::NotFound(query.to_string()))?
            }
        };

        Ok(LookupTarget::Track(
            TrackDescriptor::remote(id).with_in_playlist(false),
        ))
    }
}

/// `n` en `[1, len]` a posición 0-based
fn queue_position(raw: &str, queue_len: usize) -> Option<usize> {
    let n = raw.parse::<usize>().ok()?;
    (1..=queue_len).contains(&n).then(|| n - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{LoginMode, SessionHandle, SessionState};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup() -> TrackLookup {
        let session = SessionHandle::new(SessionState {
            headers: HashMap::new(),
            login_mode: LoginMode::Password,
            refresh_interval_minutes: 0,
        });
        // puerto cerrado: cualquier llamada al catálogo fallaría
        let catalog = CatalogClient::new("http://127.0.0.1:9", session).unwrap();
        TrackLookup::new(Arc::new(catalog))
    }

    #[test]
    fn test_queue_position_is_one_based() {
        assert_eq!(queue_position("1", 3), Some(0));
        assert_eq!(queue_position("3", 3), Some(2));
        assert_eq!(queue_position("0", 3), None);
        assert_eq!(queue_position("4", 3), None);
    }

    #[tokio::test]
    async fn test_local_file_is_played_directly() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_string_lossy().to_string();

        let result = lookup().lookup(&path, None, 0).await.unwrap();
        match result.target {
            LookupTarget::Track(track) => {
                assert_eq!(track.direct_url.as_deref(), Some(path.as_str()));
                assert_eq!(track.source(), AudioSource::Local);
                assert!(!track.in_playlist);
            }
            other => panic!("se esperaba una canción, llegó {:?}", other),
        }
        assert!(result.notices.is_empty());
    }

    #[tokio::test]
    async fn test_number_selects_queue_item() {
        let result = lookup().lookup("2", None, 5).await.unwrap();
        assert_eq!(result.target, LookupTarget::QueueItem(1));
    }

    #[tokio::test]
    async fn test_catalog_id_skips_search() {
        let result = lookup()
            .lookup("https://music.163.com/#/song?id=186016", Some(AudioSource::ExternalCatalog), 0)
            .await
            .unwrap();
        assert_eq!(
            result.target,
            LookupTarget::Track(TrackDescriptor::remote("186016").with_in_playlist(false))
        );
        assert_eq!(result.notices.len(), 1);
    }

    #[tokio::test]
    async fn test_forced_local_source_must_exist() {
        let err = lookup()
            .lookup("/no/existe.mp3", Some(AudioSource::Local), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
