use std::{
    future::Future,
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::{error, info, warn};

use crate::{
    audio::pipeline::PlaylistSnapshot,
    error::{Error, Result},
};

const EXTENSION: &str = "json";
const BACKUP_DIR: &str = "deleted";

/// Listas de reproducción guardadas como JSON
///
/// Al sobrescribir una lista la versión anterior se mueve a `deleted/`.
#[derive(Debug, Clone)]
pub struct PlaylistStore {
    dir: PathBuf,
}

impl PlaylistStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, EXTENSION))
    }

    fn backup_path(&self, name: &str) -> PathBuf {
        self.dir
            .join(BACKUP_DIR)
            .join(format!("{}.{}", name, EXTENSION))
    }

    /// Guarda la cola con el nombre dado
    pub async fn export(&self, name: &str, snapshot: &PlaylistSnapshot) -> Result<PathBuf> {
        let name = validate_name(name)?;
        if snapshot.tracks.is_empty() {
            return Err(Error::Storage("la lista está vacía, no se exporta".into()));
        }

        let content = serde_json::to_string_pretty(snapshot)
            .map_err(|e| Error::Storage(e.to_string()))?;

        fs::create_dir_all(self.dir.join(BACKUP_DIR))
            .await
            .map_err(storage_error)?;

        let path = self.file_path(name);
        let backup = self.backup_path(name);
        write_with_backup(&path, &backup, || fs::write(&path, content)).await?;

        info!("💾 Lista exportada: {} ({} canciones)", name, snapshot.tracks.len());
        Ok(path)
    }

    pub async fn import(&self, name: &str) -> Result<PlaylistSnapshot> {
        let name = validate_name(name)?;
        let path = self.file_path(name);

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("lista {}", name)));
            }
            Err(e) => return Err(storage_error(e)),
        };

        let snapshot: PlaylistSnapshot = serde_json::from_str(&content)
            .map_err(|e| Error::Storage(format!("{}: {}", path.display(), e)))?;

        info!("📂 Lista importada: {} ({} canciones)", name, snapshot.tracks.len());
        Ok(snapshot)
    }

    /// Nombres guardados, filtrados por prefijo sin distinguir mayúsculas
    pub async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_error(e)),
        };

        let prefix = prefix.map(str::to_lowercase).unwrap_or_default();
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(storage_error)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem.to_lowercase().starts_with(&prefix) {
                names.push(stem.to_string());
            }
        }

        names.sort();
        Ok(names)
    }
}

/// Mueve `path` a `backup` y escribe el contenido nuevo
///
/// Si la escritura falla la copia vuelve a su sitio.
async fn write_with_backup<F, Fut>(path: &Path, backup: &Path, write: F) -> Result<()>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    let had_previous = fs::try_exists(path).await.map_err(storage_error)?;

    if had_previous {
        if fs::try_exists(backup).await.map_err(storage_error)? {
            fs::remove_file(backup).await.map_err(storage_error)?;
        }
        fs::rename(path, backup).await.map_err(storage_error)?;
    }

    if let Err(e) = write().await {
        error!("❌ Error escribiendo {}: {}", path.display(), e);
        if had_previous {
            if let Err(restore) = fs::rename(backup, path).await {
                warn!("⚠️ No se pudo restaurar la copia de {}: {}", path.display(), restore);
            }
        }
        return Err(storage_error(e));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Storage("falta el nombre de la lista".into()));
    }
    if name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(Error::Storage(format!("nombre de lista inválido: {}", name)));
    }
    Ok(name)
}

fn storage_error(err: std::io::Error) -> Error {
    Error::Storage(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{mode::PlayMode, track::TrackDescriptor};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn snapshot(ids: &[&str]) -> PlaylistSnapshot {
        PlaylistSnapshot {
            mode: Some(PlayMode::SequentialLoop),
            tracks: ids.iter().map(|id| TrackDescriptor::remote(*id)).collect(),
            meta: None,
        }
    }

    #[tokio::test]
    async fn test_export_import_and_backup() {
        let dir = TempDir::new().unwrap();
        let store = PlaylistStore::new(dir.path());

        store.export("chill", &snapshot(&["1", "2"])).await.unwrap();
        store.export("chill", &snapshot(&["3"])).await.unwrap();

        let current = store.import("chill").await.unwrap();
        assert_eq!(current, snapshot(&["3"]));

        let backup = fs::read_to_string(dir.path().join("deleted").join("chill.json"))
            .await
            .unwrap();
        let backup: PlaylistSnapshot = serde_json::from_str(&backup).unwrap();
        assert_eq!(backup.tracks.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_write_restores_previous_list() {
        let dir = TempDir::new().unwrap();
        let store = PlaylistStore::new(dir.path());
        store.export("chill", &snapshot(&["1", "2"])).await.unwrap();

        let path = store.file_path("chill");
        let backup = store.backup_path("chill");
        let result = write_with_backup(&path, &backup, || async {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disco lleno"))
        })
        .await;

        assert!(matches!(result, Err(Error::Storage(_))));
        assert_eq!(store.import("chill").await.unwrap(), snapshot(&["1", "2"]));
        assert!(!fs::try_exists(&backup).await.unwrap());
    }

    #[tokio::test]
    async fn test_export_refuses_empty_list_before_touching_disk() {
        let dir = TempDir::new().unwrap();
        let store = PlaylistStore::new(dir.path().join("songlists"));

        let err = store.export("vacia", &snapshot(&[])).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(!dir.path().join("songlists").exists());

        assert!(store.export("", &snapshot(&["1"])).await.is_err());
        assert!(store.export("../fuera", &snapshot(&["1"])).await.is_err());
    }

    #[tokio::test]
    async fn test_import_missing_and_legacy_keys() {
        let dir = TempDir::new().unwrap();
        let store = PlaylistStore::new(dir.path());

        assert!(matches!(store.import("nada").await, Err(Error::NotFound(_))));

        let legacy = r#"{"Meta":{"NCMId":"24381616","Name":"Lista"},"MusicList":[{"NCMId":"1","InPlayList":true}]}"#;
        fs::write(dir.path().join("vieja.json"), legacy).await.unwrap();

        let imported = store.import("vieja").await.unwrap();
        assert_eq!(imported.tracks.len(), 1);
        assert_eq!(imported.meta.unwrap().name.as_deref(), Some("Lista"));
        assert_eq!(imported.mode, None);
    }

    #[tokio::test]
    async fn test_list_filters_by_prefix() {
        let dir = TempDir::new().unwrap();
        let store = PlaylistStore::new(dir.path());
        assert!(store.list(None).await.unwrap().is_empty());

        for name in ["Rock", "rap", "jazz"] {
            store.export(name, &snapshot(&["1"])).await.unwrap();
        }
        fs::write(dir.path().join("notas.txt"), "x").await.unwrap();

        assert_eq!(store.list(None).await.unwrap(), vec!["Rock", "jazz", "rap"]);
        assert_eq!(store.list(Some("R")).await.unwrap(), vec!["Rock", "rap"]);
    }
}
