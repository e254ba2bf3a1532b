//! Tipos de error del controlador de reproducción

/// Errores del dominio del bot
///
/// Los errores de la cola se devuelven al usuario como texto, los del pipeline
/// se convierten en un mensaje más un salto automático y los del scheduler se
/// registran y se descartan.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("La cola está vacía")]
    EmptyQueue,

    #[error("No se pudo resolver la canción: {0}")]
    Resolution(String),

    #[error("Posición fuera de rango: {index} (la cola tiene {len} canciones)")]
    Index { index: usize, len: usize },

    #[error("No hay canción anterior")]
    NoPreviousTrack,

    #[error("Fallaron demasiadas canciones seguidas ({0} intentos)")]
    ExhaustedRetries(usize),

    #[error("Configuración inválida: {0}")]
    Config(String),

    #[error("El inicio de sesión expiró tras {0} intentos")]
    AuthTimeout(u32),

    #[error("Inicio de sesión fallido: {0}")]
    Login(String),

    #[error("El reproductor no pudo iniciar la canción: {0}")]
    Player(String),

    #[error("No se encontró: {0}")]
    NotFound(String),

    #[error("Error de almacenamiento: {0}")]
    Storage(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Resolution(err.to_string())
    }
}

/// Resultado especializado del bot
pub type Result<T> = std::result::Result<T, Error>;
