use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use tracing::debug;

/// Origen del audio de una canción
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioSource {
    /// Archivo en el disco del bot
    Local,
    /// URL http(s) reproducible directamente
    Url,
    /// Canción del catálogo externo, se resuelve por id
    ExternalCatalog,
}

impl AudioSource {
    /// Interpreta la etiqueta de un atributo `#fuente`
    ///
    /// `l`/`b` seleccionan archivos locales, `n`/`w` el catálogo y `u` una URL.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim().trim_start_matches('#').to_lowercase();
        match tag.chars().next()? {
            'l' | 'b' => Some(Self::Local),
            'n' | 'w' => Some(Self::ExternalCatalog),
            'u' => Some(Self::Url),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Artist {
    pub name: String,
    #[serde(default)]
    pub id: Option<u64>,
}

/// Descriptor de una canción en la cola
///
/// La identidad es el id del catálogo o el enlace directo; el resto son
/// metadatos que la resolución completa de forma perezosa.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TrackDescriptor {
    #[serde(alias = "NCMId")]
    pub remote_id: Option<String>,
    pub name: String,
    pub image: Option<String>,
    pub detail_url: Option<String>,
    pub direct_url: Option<String>,
    #[serde(alias = "InPlayList")]
    pub in_playlist: bool,
    pub artists: Vec<Artist>,
}

impl TrackDescriptor {
    /// Canción del catálogo identificada por su id
    pub fn remote(id: impl Into<String>) -> Self {
        Self {
            remote_id: Some(id.into()),
            in_playlist: true,
            ..Default::default()
        }
    }

    /// Archivo local o URL que se reproduce tal cual
    pub fn direct(link: impl Into<String>) -> Self {
        Self {
            direct_url: Some(link.into()),
            ..Default::default()
        }
    }

    pub fn with_in_playlist(mut self, in_playlist: bool) -> Self {
        self.in_playlist = in_playlist;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Dos descriptores son la misma canción si coinciden sus ids (no vacíos)
    /// o sus enlaces directos.
    pub fn same_track(&self, other: &TrackDescriptor) -> bool {
        let same_id = match (non_empty(&self.remote_id), non_empty(&other.remote_id)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
        let same_link = match (non_empty(&self.direct_url), non_empty(&other.direct_url)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
        same_id || same_link
    }

    pub fn source(&self) -> AudioSource {
        match non_empty(&self.direct_url) {
            Some(link) if is_http(link) => AudioSource::Url,
            Some(_) => AudioSource::Local,
            None => AudioSource::ExternalCatalog,
        }
    }

    pub fn local_path(&self) -> Option<&Path> {
        match self.source() {
            AudioSource::Local => self.direct_url.as_deref().map(Path::new),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !self.name.is_empty()
    }

    pub fn artist_line(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(" / ")
    }

    /// Nombre visible: el título, el nombre del archivo o el id
    pub fn display_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }

        if let Some(link) = non_empty(&self.direct_url) {
            let file_name = if is_http(link) {
                link.rsplit('/').next().unwrap_or(link).to_string()
            } else {
                Path::new(link)
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| link.to_string())
            };
            debug!("Usando nombre de archivo ({}) en lugar del título", file_name);
            return file_name;
        }

        match non_empty(&self.remote_id) {
            Some(id) => format!("#{}", id),
            None => "Desconocido".to_string(),
        }
    }

    /// `Título - Artista1 / Artista2`
    pub fn full_name(&self) -> String {
        let artists = self.artist_line();
        if artists.is_empty() {
            self.display_name()
        } else {
            format!("{} - {}", self.display_name(), artists)
        }
    }
}

/// Metadatos de una playlist importada del catálogo
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PlaylistMeta {
    #[serde(alias = "NCMId")]
    pub id: Option<String>,
    pub name: Option<String>,
    pub image: Option<String>,
    pub direct_url: Option<String>,
}

/// Atributos opcionales de `play`/`add`: `@1m30s` y `#fuente`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayAttributes {
    pub start_offset: Option<Duration>,
    pub source: Option<AudioSource>,
}

impl PlayAttributes {
    pub fn parse<S: AsRef<str>>(attrs: &[S]) -> Self {
        let mut parsed = Self::default();

        for attr in attrs {
            let attr = attr.as_ref().trim();
            if let Some(offset) = attr.strip_prefix('@') {
                parsed.start_offset = parse_offset(offset);
            } else if let Some(tag) = attr.strip_prefix('#') {
                parsed.source = AudioSource::from_tag(tag);
            }
        }

        parsed
    }

    pub fn is_empty(&self) -> bool {
        self.start_offset.is_none() && self.source.is_none()
    }
}

fn parse_offset(raw: &str) -> Option<Duration> {
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw).ok()
}

pub(crate) fn is_http(link: &str) -> bool {
    let lower = link.to_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_identity_by_remote_id_or_direct_link() {
        let a = TrackDescriptor::remote("186016").with_name("晴天");
        let b = TrackDescriptor::remote("186016");
        let c = TrackDescriptor::remote("5257138");
        assert!(a.same_track(&b));
        assert!(!a.same_track(&c));

        let file = TrackDescriptor::direct("/music/song.mp3");
        assert!(file.same_track(&TrackDescriptor::direct("/music/song.mp3")));
        assert!(!file.same_track(&TrackDescriptor::direct("/music/other.mp3")));

        // ids vacíos no cuentan como identidad
        let empty_a = TrackDescriptor::remote("");
        let empty_b = TrackDescriptor::remote("");
        assert!(!empty_a.same_track(&empty_b));
    }

    #[test]
    fn test_source_classification() {
        assert_eq!(TrackDescriptor::remote("1").source(), AudioSource::ExternalCatalog);
        assert_eq!(
            TrackDescriptor::direct("https://example.com/a.mp3").source(),
            AudioSource::Url
        );
        let local = TrackDescriptor::direct("/srv/music/a.flac");
        assert_eq!(local.source(), AudioSource::Local);
        assert_eq!(local.local_path(), Some(Path::new("/srv/music/a.flac")));
    }

    #[test]
    fn test_display_names() {
        assert_eq!(TrackDescriptor::direct("/srv/music/intro.flac").display_name(), "intro");
        assert_eq!(
            TrackDescriptor::direct("https://example.com/audio/track.mp3").display_name(),
            "track.mp3"
        );
        assert_eq!(TrackDescriptor::remote("42").display_name(), "#42");

        let mut track = TrackDescriptor::remote("42").with_name("Song");
        track.artists = vec![
            Artist { name: "A".into(), id: Some(1) },
            Artist { name: "B".into(), id: None },
        ];
        assert_eq!(track.full_name(), "Song - A / B");
    }

    #[test]
    fn test_attribute_parsing() {
        let attrs = PlayAttributes::parse(&["@1m30s", "#n"]);
        assert_eq!(attrs.start_offset, Some(Duration::from_secs(90)));
        assert_eq!(attrs.source, Some(AudioSource::ExternalCatalog));

        let attrs = PlayAttributes::parse(&["@45", "#local"]);
        assert_eq!(attrs.start_offset, Some(Duration::from_secs(45)));
        assert_eq!(attrs.source, Some(AudioSource::Local));

        assert_eq!(AudioSource::from_tag("url"), Some(AudioSource::Url));
        assert_eq!(AudioSource::from_tag("x"), None);
        assert!(PlayAttributes::parse::<&str>(&[]).is_empty());
    }

    #[test]
    fn test_legacy_field_names_deserialize() {
        let json = r#"{"NCMId":"77","Name":"x","InPlayList":true,"DirectUrl":null}"#;
        let track: TrackDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(track.remote_id.as_deref(), Some("77"));
        assert!(track.in_playlist);
    }
}
