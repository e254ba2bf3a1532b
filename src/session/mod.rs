//! Session state shared between the catalog client and the refresh scheduler.

pub mod cookie;
pub mod login;
pub mod refresh;

use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::info;

use crate::config::BotConfig;

pub use refresh::{RefreshOutcome, RefreshScheduler, SessionRefresher};

/// Cabeceras HTTP que acompañan cada petición al catálogo
pub type SessionHeaders = HashMap<String, String>;

pub const COOKIE_HEADER: &str = "Cookie";

/// Periodo máximo de refresco de la cookie (un año)
const MAX_REFRESH_MINUTES: u64 = 60 * 24 * 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginMode {
    /// Cookie configurada a mano o login por SMS
    Password,
    /// Sesión iniciada con código QR; no se refresca
    Qr,
}

impl LoginMode {
    pub fn is_qr(self) -> bool {
        self == LoginMode::Qr
    }
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub headers: SessionHeaders,
    pub login_mode: LoginMode,
    pub refresh_interval_minutes: i64,
}

impl SessionState {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            headers: config.header.clone(),
            login_mode: if config.is_qr_login {
                LoginMode::Qr
            } else {
                LoginMode::Password
            },
            refresh_interval_minutes: config.cookie_refresh_interval_minutes,
        }
    }

    pub fn cookie(&self) -> &str {
        self.headers
            .get(COOKIE_HEADER)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// `None` si el refresco periódico está desactivado; el periodo se limita
    /// a un año para que el temporizador no desborde
    pub fn refresh_interval(&self) -> Option<Duration> {
        u64::try_from(self.refresh_interval_minutes)
            .ok()
            .filter(|minutes| *minutes > 0)
            .map(|minutes| Duration::from_secs(minutes.min(MAX_REFRESH_MINUTES) * 60))
    }
}

/// Acceso compartido a la sesión
///
/// Los lectores clonan el mapa completo bajo el lock de lectura, así que
/// siempre ven la cookie anterior o la nueva, nunca una mezcla.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<RwLock<SessionState>>,
}

impl SessionHandle {
    pub fn new(state: SessionState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    pub fn headers(&self) -> SessionHeaders {
        self.inner.read().headers.clone()
    }

    pub fn snapshot(&self) -> SessionState {
        self.inner.read().clone()
    }

    pub fn cookie(&self) -> String {
        self.inner.read().cookie().to_string()
    }

    pub fn login_mode(&self) -> LoginMode {
        self.inner.read().login_mode
    }

    /// Combina un fragmento de cookie devuelto por el refresco
    ///
    /// Devuelve la cookie resultante para persistirla.
    pub fn refresh_session(&self, fragment: &str) -> String {
        let mut state = self.inner.write();
        let merged = cookie::merge_cookie(state.cookie(), fragment);
        state
            .headers
            .insert(COOKIE_HEADER.to_string(), merged.clone());
        merged
    }

    /// Reemplaza la cookie tras un login correcto
    pub fn complete_login(&self, raw_cookie: &str, mode: LoginMode) -> String {
        let normalized = cookie::normalize_cookie(raw_cookie);
        let mut state = self.inner.write();
        state
            .headers
            .insert(COOKIE_HEADER.to_string(), normalized.clone());
        state.login_mode = mode;
        info!("🔑 Sesión iniciada ({:?})", mode);
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn state(cookie: &str, minutes: i64) -> SessionState {
        SessionState {
            headers: HashMap::from([(COOKIE_HEADER.to_string(), cookie.to_string())]),
            login_mode: LoginMode::Password,
            refresh_interval_minutes: minutes,
        }
    }

    #[test]
    fn test_refresh_interval_disabled_when_not_positive() {
        assert_eq!(state("", 0).refresh_interval(), None);
        assert_eq!(state("", -5).refresh_interval(), None);
        assert_eq!(
            state("", 30).refresh_interval(),
            Some(Duration::from_secs(1800))
        );
    }

    #[test]
    fn test_refresh_interval_is_capped() {
        assert_eq!(
            state("", i64::MAX).refresh_interval(),
            Some(Duration::from_secs(MAX_REFRESH_MINUTES * 60))
        );
    }

    #[test]
    fn test_refresh_merges_in_place() {
        let handle = SessionHandle::new(state("a=1; b=2", 30));
        let reader = handle.clone();

        let merged = handle.refresh_session("b=3; Path=/; c=4");
        assert_eq!(merged, "a=1; b=3; c=4");
        assert_eq!(reader.cookie(), "a=1; b=3; c=4");
        assert_eq!(reader.login_mode(), LoginMode::Password);
    }

    #[test]
    fn test_complete_login_replaces_cookie() {
        let handle = SessionHandle::new(state("old=1", 30));
        handle.complete_login("MUSIC_U=new; Max-Age=10", LoginMode::Qr);

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.cookie(), "MUSIC_U=new");
        assert!(snapshot.login_mode.is_qr());
    }
}
