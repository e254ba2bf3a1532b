use async_trait::async_trait;
use std::sync::Arc;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{SessionHandle, SessionHeaders};
use crate::{config::ConfigStore, error::Result};

/// Endpoint de refresco de la sesión en el catálogo
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionRefresher: Send + Sync {
    /// Devuelve el fragmento de cookie nuevo, o `None` si el API rechazó el
    /// refresco
    async fn refresh(&self, headers: &SessionHeaders) -> Result<Option<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    Rejected,
    Failed,
    Skipped,
}

/// Tarea periódica que mantiene viva la cookie de sesión
pub struct RefreshScheduler {
    session: SessionHandle,
    config: Arc<ConfigStore>,
    refresher: Arc<dyn SessionRefresher>,
}

impl RefreshScheduler {
    pub fn new(
        session: SessionHandle,
        config: Arc<ConfigStore>,
        refresher: Arc<dyn SessionRefresher>,
    ) -> Self {
        Self {
            session,
            config,
            refresher,
        }
    }

    /// Lanza el temporizador; el primer tick es inmediato
    ///
    /// Devuelve `None` si el intervalo configurado es ≤ 0.
    pub fn spawn(self, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        let Some(period) = self.session.snapshot().refresh_interval() else {
            info!("⏸️ Refresco de cookie desactivado");
            return None;
        };

        info!("🔄 Refresco de cookie cada {:?}", period);

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Scheduler de sesión detenido");
                        break;
                    }
                    _ = interval.tick() => {
                        self.tick().await;
                    }
                }
            }
        }))
    }

    pub async fn tick(&self) -> RefreshOutcome {
        let state = self.session.snapshot();

        if state.login_mode.is_qr() {
            debug!("Sesión QR activa, se omite el refresco");
            return RefreshOutcome::Skipped;
        }
        if state.cookie().is_empty() {
            debug!("Sin cookie, nada que refrescar");
            return RefreshOutcome::Skipped;
        }

        match self.refresher.refresh(&state.headers).await {
            Ok(Some(fragment)) => {
                let cookie = self.session.refresh_session(&fragment);
                if let Err(e) = self.config.update_session(&cookie, false) {
                    warn!("⚠️ Cookie refrescada pero no guardada: {}", e);
                }
                info!("✅ Cookie actualizada");
                RefreshOutcome::Refreshed
            }
            Ok(None) => {
                warn!("⚠️ El catálogo rechazó el refresco de la cookie");
                RefreshOutcome::Rejected
            }
            Err(e) => {
                error!("❌ Error refrescando la cookie: {}", e);
                RefreshOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::Error,
        session::{LoginMode, SessionState, COOKIE_HEADER},
    };
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn fixture(
        cookie: &str,
        mode: LoginMode,
        refresher: MockSessionRefresher,
    ) -> (RefreshScheduler, SessionHandle, Arc<ConfigStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = Arc::new(ConfigStore::load(dir.path().join("bot.yml")));
        let session = SessionHandle::new(SessionState {
            headers: HashMap::from([(COOKIE_HEADER.to_string(), cookie.to_string())]),
            login_mode: mode,
            refresh_interval_minutes: 30,
        });
        let scheduler = RefreshScheduler::new(session.clone(), config.clone(), Arc::new(refresher));
        (scheduler, session, config, dir)
    }

    #[tokio::test]
    async fn test_successful_refresh_merges_and_persists() {
        let mut refresher = MockSessionRefresher::new();
        refresher
            .expect_refresh()
            .times(1)
            .returning(|_| Ok(Some("b=3; Path=/; c=4".to_string())));

        let (scheduler, session, config, _dir) = fixture("a=1; b=2", LoginMode::Password, refresher);

        assert_eq!(scheduler.tick().await, RefreshOutcome::Refreshed);
        assert_eq!(session.cookie(), "a=1; b=3; c=4");
        assert_eq!(config.snapshot().cookie(), "a=1; b=3; c=4");
    }

    #[tokio::test]
    async fn test_failures_leave_session_untouched() {
        let mut refresher = MockSessionRefresher::new();
        let mut calls = 0;
        refresher.expect_refresh().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(Error::Resolution("timeout".into()))
            } else {
                Ok(None)
            }
        });

        let (scheduler, session, _config, _dir) = fixture("a=1", LoginMode::Password, refresher);

        assert_eq!(scheduler.tick().await, RefreshOutcome::Failed);
        assert_eq!(scheduler.tick().await, RefreshOutcome::Rejected);
        assert_eq!(session.cookie(), "a=1");
    }

    #[tokio::test]
    async fn test_skips_qr_sessions_and_empty_cookie() {
        let mut refresher = MockSessionRefresher::new();
        refresher.expect_refresh().never();
        let (scheduler, _, _, _dir) = fixture("a=1", LoginMode::Qr, refresher);
        assert_eq!(scheduler.tick().await, RefreshOutcome::Skipped);

        let mut refresher = MockSessionRefresher::new();
        refresher.expect_refresh().never();
        let (scheduler, _, _, _dir) = fixture("", LoginMode::Password, refresher);
        assert_eq!(scheduler.tick().await, RefreshOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_spawn_fires_immediately_and_stops() {
        let mut refresher = MockSessionRefresher::new();
        refresher
            .expect_refresh()
            .times(1)
            .returning(|_| Ok(Some("c=4".to_string())));

        let (scheduler, session, _config, _dir) = fixture("a=1", LoginMode::Password, refresher);
        let shutdown = CancellationToken::new();
        let handle = scheduler.spawn(shutdown.clone()).unwrap();

        for _ in 0..50 {
            if session.cookie() == "a=1; c=4" {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(session.cookie(), "a=1; c=4");

        shutdown.cancel();
        handle.await.unwrap();
    }
}
