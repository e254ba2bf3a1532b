//! QR and SMS login against the catalog API.
//!
//! Both flows end by replacing the session cookie and writing it back to the
//! config file. Nothing here touches the Discord profile.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use super::{LoginMode, SessionHandle};
use crate::{
    config::ConfigStore,
    error::{Error, Result},
};

pub const QR_POLL_ATTEMPTS: u32 = 120;
const QR_POLL_INTERVAL: Duration = Duration::from_secs(1);

const QR_EXPIRED: i64 = 800;
const QR_WAITING: i64 = 801;
const QR_SCANNED: i64 = 802;
const QR_CONFIRMED: i64 = 803;
const API_OK: i64 = 200;

/// Respuesta genérica `{code, message, cookie}` del API
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ApiStatus {
    pub code: i64,
    #[serde(default, alias = "msg")]
    pub message: Option<String>,
    #[serde(default)]
    pub cookie: Option<String>,
}

impl ApiStatus {
    fn describe(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| format!("código {}", self.code))
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LoginApi: Send + Sync {
    async fn qr_key(&self) -> Result<String>;
    /// Imagen del QR como data URL (`data:image/png;base64,...`)
    async fn qr_image(&self, key: &str) -> Result<String>;
    async fn qr_check(&self, key: &str) -> Result<ApiStatus>;
    async fn send_captcha(&self, phone: &str) -> Result<ApiStatus>;
    async fn verify_captcha(&self, phone: &str, code: &str) -> Result<ApiStatus>;
    async fn login_cellphone(&self, phone: &str, code: &str) -> Result<ApiStatus>;
}

#[derive(Debug, Clone)]
pub struct QrChallenge {
    pub key: String,
    pub png: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmsStep {
    CodeSent,
    LoggedIn,
}

pub struct LoginFlow {
    api: Arc<dyn LoginApi>,
    session: SessionHandle,
    config: Arc<ConfigStore>,
    poll_interval: Duration,
    max_attempts: u32,
}

impl LoginFlow {
    pub fn new(api: Arc<dyn LoginApi>, session: SessionHandle, config: Arc<ConfigStore>) -> Self {
        Self {
            api,
            session,
            config,
            poll_interval: QR_POLL_INTERVAL,
            max_attempts: QR_POLL_ATTEMPTS,
        }
    }

    pub fn with_polling(mut self, interval: Duration, attempts: u32) -> Self {
        self.poll_interval = interval;
        self.max_attempts = attempts;
        self
    }

    pub async fn start_qr(&self) -> Result<QrChallenge> {
        let key = self.api.qr_key().await?;
        let data_url = self.api.qr_image(&key).await?;
        let png = decode_qr_image(&data_url)?;
        info!("📱 Código QR generado");
        Ok(QrChallenge { key, png })
    }

    /// Espera a que el usuario confirme el QR
    ///
    /// Los errores de red durante el sondeo no cortan la espera.
    pub async fn wait_qr(&self, key: &str) -> Result<()> {
        for attempt in 1..=self.max_attempts {
            match self.api.qr_check(key).await {
                Ok(status) => match status.code {
                    QR_CONFIRMED => {
                        let cookie = status
                            .cookie
                            .filter(|c| !c.is_empty())
                            .ok_or_else(|| Error::Login("el API no devolvió cookie".into()))?;
                        self.finish(&cookie, LoginMode::Qr);
                        return Ok(());
                    }
                    QR_EXPIRED => return Err(Error::AuthTimeout(attempt)),
                    QR_WAITING | QR_SCANNED => debug!("QR {}: {}", status.code, status.describe()),
                    other => warn!("⚠️ Estado de QR inesperado: {}", other),
                },
                Err(e) => warn!("⚠️ Error consultando el QR (intento {}): {}", attempt, e),
            }

            tokio::time::sleep(self.poll_interval).await;
        }

        Err(Error::AuthTimeout(self.max_attempts))
    }

    /// Sin código envía el SMS; con código verifica e inicia sesión
    pub async fn sms(&self, phone: &str, code: Option<&str>) -> Result<SmsStep> {
        if phone.is_empty() || !phone.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::Login(format!("teléfono inválido: {}", phone)));
        }

        let Some(code) = code else {
            let status = self.api.send_captcha(phone).await?;
            if status.code != API_OK {
                return Err(Error::Login(status.describe()));
            }
            info!("📨 Código SMS enviado");
            return Ok(SmsStep::CodeSent);
        };

        if code.len() != 4 || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::Login("el código debe tener 4 dígitos".into()));
        }

        let verified = self.api.verify_captcha(phone, code).await?;
        if verified.code != API_OK {
            return Err(Error::Login(verified.describe()));
        }

        let login = self.api.login_cellphone(phone, code).await?;
        match login.cookie.as_deref().filter(|c| !c.is_empty()) {
            Some(cookie) if login.code == API_OK => {
                self.finish(cookie, LoginMode::Password);
                Ok(SmsStep::LoggedIn)
            }
            _ => Err(Error::Login(login.describe())),
        }
    }

    fn finish(&self, raw_cookie: &str, mode: LoginMode) {
        let cookie = self.session.complete_login(raw_cookie, mode);
        if let Err(e) = self.config.update_session(&cookie, mode.is_qr()) {
            warn!("⚠️ Sesión iniciada pero no guardada: {}", e);
        }
    }
}

/// Decodifica `data:image/png;base64,...` (o base64 sin prefijo)
pub fn decode_qr_image(data_url: &str) -> Result<Vec<u8>> {
    let encoded = data_url
        .split_once(',')
        .map(|(_, data)| data)
        .unwrap_or(data_url);

    STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::Login(format!("imagen QR inválida: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionState, COOKIE_HEADER};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn status(code: i64, cookie: Option<&str>) -> ApiStatus {
        ApiStatus {
            code,
            message: None,
            cookie: cookie.map(str::to_string),
        }
    }

    fn flow(api: MockLoginApi) -> (LoginFlow, SessionHandle, Arc<ConfigStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = Arc::new(ConfigStore::load(dir.path().join("bot.yml")));
        let session = SessionHandle::new(SessionState {
            headers: HashMap::from([(COOKIE_HEADER.to_string(), "old=1".to_string())]),
            login_mode: LoginMode::Password,
            refresh_interval_minutes: 30,
        });
        let flow = LoginFlow::new(Arc::new(api), session.clone(), config.clone())
            .with_polling(Duration::ZERO, 5);
        (flow, session, config, dir)
    }

    #[test]
    fn test_decode_qr_image() {
        let png = decode_qr_image("data:image/png;base64,iVBORw0K").unwrap();
        assert_eq!(&png[..4], &[0x89, b'P', b'N', b'G']);
        assert!(decode_qr_image("data:image/png;base64,@@@").is_err());
    }

    #[tokio::test]
    async fn test_qr_confirmed_after_polling() {
        let mut api = MockLoginApi::new();
        let mut polls = 0;
        api.expect_qr_check().times(3).returning(move |_| {
            polls += 1;
            Ok(match polls {
                1 => status(QR_WAITING, None),
                2 => status(QR_SCANNED, None),
                _ => status(QR_CONFIRMED, Some("MUSIC_U=qr; Path=/")),
            })
        });

        let (flow, session, config, _dir) = flow(api);
        flow.wait_qr("key").await.unwrap();

        assert_eq!(session.cookie(), "MUSIC_U=qr");
        assert!(session.login_mode().is_qr());
        assert!(config.snapshot().is_qr_login);
    }

    #[tokio::test]
    async fn test_qr_times_out() {
        let mut api = MockLoginApi::new();
        api.expect_qr_check()
            .times(5)
            .returning(|_| Ok(status(QR_WAITING, None)));

        let (flow, session, _config, _dir) = flow(api);
        let err = flow.wait_qr("key").await.unwrap_err();
        assert!(matches!(err, Error::AuthTimeout(5)));
        assert_eq!(session.cookie(), "old=1");
    }

    #[tokio::test]
    async fn test_qr_expired_stops_early() {
        let mut api = MockLoginApi::new();
        api.expect_qr_check()
            .times(1)
            .returning(|_| Ok(status(QR_EXPIRED, None)));

        let (flow, _, _, _dir) = flow(api);
        assert!(matches!(flow.wait_qr("key").await, Err(Error::AuthTimeout(1))));
    }

    #[tokio::test]
    async fn test_sms_flow() {
        let mut api = MockLoginApi::new();
        api.expect_send_captcha()
            .times(1)
            .returning(|_| Ok(status(API_OK, None)));
        api.expect_verify_captcha()
            .times(1)
            .returning(|_, _| Ok(status(API_OK, None)));
        api.expect_login_cellphone()
            .times(1)
            .returning(|_, _| Ok(status(API_OK, Some("MUSIC_U=sms"))));

        let (flow, session, _config, _dir) = flow(api);

        assert_eq!(flow.sms("13800000000", None).await.unwrap(), SmsStep::CodeSent);
        assert!(matches!(
            flow.sms("13800000000", Some("12a4")).await,
            Err(Error::Login(_))
        ));
        assert_eq!(
            flow.sms("13800000000", Some("1234")).await.unwrap(),
            SmsStep::LoggedIn
        );
        assert_eq!(session.cookie(), "MUSIC_U=sms");
        assert_eq!(session.login_mode(), LoginMode::Password);
    }
}
