use anyhow::Context;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

use crate::{
    audio::mode::PlayMode,
    error::{Error, Result},
};

/// Versión actual del formato del archivo de configuración
pub const CONFIG_VERSION: u32 = 2;

const DEFAULT_CONFIG_PATH: &str = "config/bot.yml";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36 Edg/122.0.0.0";

/// Variables de entorno del proceso
#[derive(Debug, Clone)]
pub struct AppEnv {
    pub discord_token: String,
    pub config_path: PathBuf,
}

impl AppEnv {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            discord_token: std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN no definido")?,
            config_path: std::env::var("BOT_CONFIG_PATH")
                .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
                .into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VolumeConfig {
    pub default: f32,
    pub min: f32,
    pub max: f32,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            default: 0.5,
            min: 0.0,
            max: 1.0,
        }
    }
}

/// Cuántos fallos se anuncian en el chat por cada cascada de saltos
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FailureReportPolicy {
    pub max_per_cascade: usize,
}

impl Default for FailureReportPolicy {
    fn default() -> Self {
        Self { max_per_cascade: 3 }
    }
}

/// Archivo de configuración YAML del bot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BotConfig {
    // Sin versión en el archivo = formato antiguo
    #[serde(default)]
    pub version: u32,
    pub play_mode: PlayMode,
    pub api_base_url: String,
    pub is_qr_login: bool,
    pub cookie_refresh_interval_minutes: i64,
    pub auto_pause_enabled: bool,
    pub header: HashMap<String, String>,
    pub default_image_url: String,

    pub command_prefix: String,
    pub song_lists_dir: PathBuf,
    pub volume: VolumeConfig,
    pub failure_reports: FailureReportPolicy,
}

impl Default for BotConfig {
    fn default() -> Self {
        let header = HashMap::from([
            ("Cookie".to_string(), String::new()),
            ("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string()),
        ]);

        Self {
            version: CONFIG_VERSION,
            play_mode: PlayMode::Sequential,
            api_base_url: "http://127.0.0.1:3000".to_string(),
            is_qr_login: false,
            cookie_refresh_interval_minutes: 30,
            auto_pause_enabled: true,
            header,
            default_image_url: "https://cataas.com/cat/says/GoodMusic?fontSize=32&fontColor=gold&width=256&height=256".to_string(),
            command_prefix: "!".to_string(),
            song_lists_dir: "./songlists".into(),
            volume: VolumeConfig::default(),
            failure_reports: FailureReportPolicy::default(),
        }
    }
}

impl BotConfig {
    /// Corrige valores fuera de rango y devuelve un aviso por cada corrección
    pub fn validate(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();
        let defaults = BotConfig::default();

        if self.api_base_url.trim().is_empty() {
            warnings.push("apiBaseUrl vacío, usando el valor por defecto".to_string());
            self.api_base_url = defaults.api_base_url;
        }
        self.api_base_url = self.api_base_url.trim_end_matches('/').to_string();

        if self.command_prefix.is_empty() {
            warnings.push("commandPrefix vacío, usando '!'".to_string());
            self.command_prefix = defaults.command_prefix;
        }

        let volume = &mut self.volume;
        // NaN no pasa ninguna comparación, hay que descartarlo antes del clamp
        if !volume.min.is_finite()
            || !volume.max.is_finite()
            || volume.min < 0.0
            || volume.max > 2.0
            || volume.min > volume.max
        {
            warnings.push(format!(
                "Rango de volumen inválido [{}, {}], usando [0, 1]",
                volume.min, volume.max
            ));
            *volume = VolumeConfig {
                default: volume.default,
                ..VolumeConfig::default()
            };
        }
        if !volume.default.is_finite() {
            warnings.push(format!("Volumen por defecto {} inválido", volume.default));
            volume.default = VolumeConfig::default().default;
        }
        if !(volume.min..=volume.max).contains(&volume.default) {
            warnings.push(format!("Volumen por defecto {} fuera de rango", volume.default));
            volume.default = volume.default.clamp(volume.min, volume.max);
        }

        if !self.header.contains_key("Cookie") {
            self.header.insert("Cookie".to_string(), String::new());
        }

        warnings
    }

    pub fn cookie(&self) -> &str {
        self.header.get("Cookie").map(String::as_str).unwrap_or_default()
    }

    /// Resumen apto para logs, sin la cookie
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            API: {}\n  \
            Modo: {}\n  \
            Login QR: {}, refresco de cookie: {}\n  \
            Pausa automática: {}\n  \
            Volumen: {} en [{}, {}]\n  \
            Playlists: {}",
            self.api_base_url,
            self.play_mode,
            self.is_qr_login,
            if self.cookie_refresh_interval_minutes <= 0 {
                "desactivado".to_string()
            } else {
                format!("cada {} min", self.cookie_refresh_interval_minutes)
            },
            self.auto_pause_enabled,
            self.volume.default,
            self.volume.min,
            self.volume.max,
            self.song_lists_dir.display(),
        )
    }
}

/// Configuración compartida con escritura de vuelta al archivo
///
/// Solo se modifica a través de `update_mode` y `update_session`.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<BotConfig>,
}

impl ConfigStore {
    /// Carga el archivo; nunca falla
    ///
    /// Si no existe se crea uno por defecto. Si está mal formado se usan los
    /// valores por defecto sin tocar el archivo.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let (mut config, needs_save) = match read_config(&path) {
            Ok(Some(config)) => {
                let outdated = config.version < CONFIG_VERSION;
                (config, outdated)
            }
            Ok(None) => {
                warn!("⚠️ No existe {}, se generó una configuración nueva", path.display());
                (BotConfig::default(), true)
            }
            Err(e) => {
                warn!("⚠️ {} - usando valores por defecto", e);
                (BotConfig::default(), false)
            }
        };

        for warning in config.validate() {
            warn!("⚠️ {}", warning);
        }

        if config.version < CONFIG_VERSION {
            info!("📝 Actualizando configuración de v{} a v{}", config.version, CONFIG_VERSION);
            config.version = CONFIG_VERSION;
        }

        let store = Self {
            path,
            current: RwLock::new(config),
        };

        if needs_save {
            if let Err(e) = store.save() {
                warn!("⚠️ No se pudo guardar la configuración: {}", e);
            }
        }

        store
    }

    pub fn snapshot(&self) -> BotConfig {
        self.current.read().clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<()> {
        let config = self.current.read().clone();
        write_config(&self.path, &config)
    }

    /// Cambia el modo de reproducción y lo persiste
    pub fn update_mode(&self, mode: PlayMode) -> Result<()> {
        self.current.write().play_mode = mode;
        self.save()
    }

    /// Guarda la cookie de sesión actual y el tipo de login
    pub fn update_session(&self, cookie: &str, is_qr_login: bool) -> Result<()> {
        {
            let mut config = self.current.write();
            config.header.insert("Cookie".to_string(), cookie.to_string());
            config.is_qr_login = is_qr_login;
        }
        self.save()
    }
}

fn read_config(path: &Path) -> Result<Option<BotConfig>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Config(format!("{}: {}", path.display(), e))),
    };

    serde_yaml::from_str(&content)
        .map(Some)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

fn write_config(path: &Path, config: &BotConfig) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::Config(e.to_string()))?;
    }

    let content = serde_yaml::to_string(config).map_err(|e| Error::Config(e.to_string()))?;
    fs::write(path, content).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_creates_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config").join("bot.yml");

        let store = ConfigStore::load(&path);
        assert!(path.exists());
        assert_eq!(store.snapshot(), BotConfig::default());

        let reloaded = ConfigStore::load(&path);
        assert_eq!(reloaded.snapshot(), BotConfig::default());
    }

    #[test]
    fn test_malformed_file_falls_back_without_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bot.yml");
        fs::write(&path, "playMode: [esto no es un modo").unwrap();

        let store = ConfigStore::load(&path);
        assert_eq!(store.snapshot().play_mode, PlayMode::Sequential);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "playMode: [esto no es un modo"
        );
    }

    #[test]
    fn test_legacy_file_is_upgraded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bot.yml");
        fs::write(
            &path,
            "playMode: RandomLoopPlay\napiBaseUrl: http://api.local:3000/\nautoPauseEnabled: false\n",
        )
        .unwrap();

        let config = ConfigStore::load(&path).snapshot();
        assert_eq!(config.version, CONFIG_VERSION);
        assert_eq!(config.play_mode, PlayMode::RandomLoop);
        assert_eq!(config.api_base_url, "http://api.local:3000");
        assert!(!config.auto_pause_enabled);
        assert_eq!(config.cookie(), "");

        let saved = fs::read_to_string(&path).unwrap();
        assert!(saved.contains(&format!("version: {}", CONFIG_VERSION)));
    }

    #[test]
    fn test_updates_are_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bot.yml");
        let store = ConfigStore::load(&path);

        store.update_mode(PlayMode::Random).unwrap();
        store.update_session("MUSIC_U=abc", true).unwrap();

        let reloaded = ConfigStore::load(&path).snapshot();
        assert_eq!(reloaded.play_mode, PlayMode::Random);
        assert_eq!(reloaded.cookie(), "MUSIC_U=abc");
        assert!(reloaded.is_qr_login);
    }

    #[test]
    fn test_validate_clamps_volume() {
        let mut config = BotConfig {
            volume: VolumeConfig {
                default: 1.8,
                min: 0.2,
                max: 1.2,
            },
            ..BotConfig::default()
        };
        let warnings = config.validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(config.volume.default, 1.2);
    }

    #[test]
    fn test_validate_rejects_nan_volume_bounds() {
        let mut config = BotConfig {
            volume: VolumeConfig {
                default: f32::NAN,
                min: f32::NAN,
                max: 1.0,
            },
            ..BotConfig::default()
        };
        let warnings = config.validate();
        assert_eq!(warnings.len(), 2);
        assert_eq!(config.volume, VolumeConfig::default());

        let mut inverted = BotConfig {
            volume: VolumeConfig {
                default: 0.5,
                min: 1.5,
                max: 0.5,
            },
            ..BotConfig::default()
        };
        inverted.validate();
        assert_eq!(inverted.volume, VolumeConfig::default());
    }
}
