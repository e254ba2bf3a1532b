//! Client for a NetEase-Cloud-Music-compatible HTTP API.
//!
//! Every request carries the session headers and a `timestamp` parameter so
//! the API's response cache never serves a stale login state.

use async_trait::async_trait;
use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::direct;
use crate::{
    audio::{
        pipeline::{ResolvedTrack, TrackResolver},
        track::{Artist, PlaylistMeta, TrackDescriptor},
    },
    error::{Error, Result},
    session::{
        login::{ApiStatus, LoginApi},
        SessionHandle, SessionHeaders, SessionRefresher,
    },
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const SONG_PAGE: &str = "https://music.163.com/#/song?id=";
const SEARCH_TYPE_PLAYLIST: &str = "1000";

#[derive(Debug, Deserialize)]
struct SongDetailResponse {
    #[serde(default)]
    songs: Vec<SongDetail>,
}

#[derive(Debug, Deserialize)]
struct SongDetail {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    ar: Vec<ArtistRef>,
    #[serde(default)]
    al: Option<AlbumRef>,
}

#[derive(Debug, Deserialize)]
struct ArtistRef {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlbumRef {
    #[serde(rename = "picUrl", default)]
    pic_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SongUrlResponse {
    #[serde(default)]
    data: Vec<SongUrl>,
}

#[derive(Debug, Deserialize)]
struct SongUrl {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Option<SearchResult>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResult {
    #[serde(default)]
    songs: Vec<IdOnly>,
    #[serde(default)]
    playlists: Vec<IdOnly>,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct PlaylistDetailResponse {
    playlist: Option<PlaylistDetail>,
}

#[derive(Debug, Deserialize)]
struct PlaylistDetail {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "coverImgUrl", default)]
    cover_img_url: Option<String>,
    #[serde(rename = "trackCount", default)]
    track_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PlaylistTracksResponse {
    #[serde(default)]
    songs: Vec<IdOnly>,
}

#[derive(Debug, Deserialize)]
struct QrKeyResponse {
    data: QrKeyData,
}

#[derive(Debug, Deserialize)]
struct QrKeyData {
    unikey: String,
}

#[derive(Debug, Deserialize)]
struct QrImageResponse {
    data: QrImageData,
}

#[derive(Debug, Deserialize)]
struct QrImageData {
    qrimg: String,
}

/// Cliente del catálogo de música
pub struct CatalogClient {
    http: reqwest::Client,
    base_url: String,
    session: SessionHandle,
}

impl CatalogClient {
    pub fn new(base_url: impl Into<String>, session: SessionHandle) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("cliente HTTP: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        })
    }

    /// Cliente HTTP compartido (también valida enlaces directos)
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        headers: &SessionHeaders,
    ) -> Result<T> {
        let timestamp = Utc::now().timestamp().to_string();
        let mut request = self
            .http
            .get(self.endpoint(path))
            .query(query)
            .query(&[("timestamp", timestamp.as_str())]);

        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        debug!("GET {}", path);
        let response = request.send().await?.error_for_status()?;
        Ok(response.json::<T>().await?)
    }

    async fn get_with_session<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let headers = self.session.headers();
        self.get_json(path, query, &headers).await
    }

    /// Id de la primera canción que coincide con la búsqueda
    pub async fn search_song(&self, keywords: &str) -> Result<Option<String>> {
        let response: SearchResponse = self
            .get_with_session("/search", &[("keywords", keywords), ("limit", "1")])
            .await?;

        Ok(response
            .result
            .unwrap_or_default()
            .songs
            .first()
            .map(|song| song.id.to_string()))
    }

    pub async fn search_playlist(&self, keywords: &str) -> Result<Option<String>> {
        let response: SearchResponse = self
            .get_with_session(
                "/search",
                &[
                    ("keywords", keywords),
                    ("limit", "1"),
                    ("type", SEARCH_TYPE_PLAYLIST),
                ],
            )
            .await?;

        Ok(response
            .result
            .unwrap_or_default()
            .playlists
            .first()
            .map(|playlist| playlist.id.to_string()))
    }

    /// Metadatos y canciones de una playlist por id, enlace o nombre
    pub async fn playlist(&self, id_or_name: &str) -> Result<(PlaylistMeta, Vec<TrackDescriptor>)> {
        let id = match direct::extract_id(id_or_name) {
            Some(id) => id,
            None => self
                .search_playlist(id_or_name)
                .await?
                .ok_or_else(|| Error::NotFound(format!("playlist {}", id_or_name)))?,
        };

        let detail: PlaylistDetailResponse =
            self.get_with_session("/playlist/detail", &[("id", id.as_str())]).await?;
        let detail = detail
            .playlist
            .ok_or_else(|| Error::NotFound(format!("playlist {}", id)))?;

        let meta = PlaylistMeta {
            id: Some(detail.id.to_string()),
            name: detail.name.clone(),
            image: detail.cover_img_url.clone(),
            direct_url: None,
        };

        if detail.track_count == Some(0) {
            return Ok((meta, Vec::new()));
        }

        let playlist_id = detail.id.to_string();
        let tracks: PlaylistTracksResponse = self
            .get_with_session("/playlist/track/all", &[("id", playlist_id.as_str())])
            .await?;

        let tracks: Vec<TrackDescriptor> = tracks
            .songs
            .iter()
            .filter(|song| song.id > 0)
            .map(|song| TrackDescriptor::remote(song.id.to_string()))
            .collect();

        info!(
            "📋 Playlist {} con {} canciones",
            detail.name.as_deref().unwrap_or("?"),
            tracks.len()
        );
        Ok((meta, tracks))
    }

    async fn song_detail(&self, id: &str, headers: &SessionHeaders) -> Result<Option<SongDetail>> {
        let response: SongDetailResponse = self
            .get_json("/song/detail", &[("ids", id)], headers)
            .await?;
        Ok(response.songs.into_iter().next())
    }

    async fn song_url(&self, id: &str, headers: &SessionHeaders) -> Result<Option<String>> {
        let response: SongUrlResponse = self.get_json("/song/url", &[("id", id)], headers).await?;
        Ok(response
            .data
            .into_iter()
            .next()
            .and_then(|entry| entry.url)
            .filter(|url| !url.is_empty()))
    }
}

fn apply_detail(track: &mut TrackDescriptor, id: &str, detail: SongDetail) {
    track.name = detail.name.filter(|n| !n.is_empty()).unwrap_or_else(|| "_".to_string());
    track.image = detail.al.and_then(|album| album.pic_url);
    track.detail_url = Some(format!("{}{}", SONG_PAGE, id));
    track.artists = detail
        .ar
        .into_iter()
        .filter_map(|artist| {
            let name = artist.name.filter(|n| !n.is_empty())?;
            Some(Artist {
                name,
                id: artist.id,
            })
        })
        .collect();
}

#[async_trait]
impl TrackResolver for CatalogClient {
    async fn resolve(
        &self,
        track: &TrackDescriptor,
        headers: &SessionHeaders,
    ) -> Result<Option<ResolvedTrack>> {
        let id = track
            .remote_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::Resolution("canción sin id ni enlace".into()))?;

        let mut resolved = track.clone();
        if !resolved.is_resolved() {
            match self.song_detail(id, headers).await? {
                Some(detail) => apply_detail(&mut resolved, id, detail),
                None => warn!("⚠️ Sin detalles para la canción {}", id),
            }
        }

        let Some(stream_url) = self.song_url(id, headers).await? else {
            return Ok(None);
        };

        Ok(Some(ResolvedTrack {
            track: resolved,
            stream_url,
        }))
    }
}

#[async_trait]
impl SessionRefresher for CatalogClient {
    async fn refresh(&self, headers: &SessionHeaders) -> Result<Option<String>> {
        let status: ApiStatus = self.get_json("/login/refresh", &[], headers).await?;
        if status.code != 200 {
            return Ok(None);
        }
        Ok(Some(status.cookie.unwrap_or_default()))
    }
}

#[async_trait]
impl LoginApi for CatalogClient {
    async fn qr_key(&self) -> Result<String> {
        let response: QrKeyResponse = self.get_with_session("/login/qr/key", &[]).await?;
        Ok(response.data.unikey)
    }

    async fn qr_image(&self, key: &str) -> Result<String> {
        let response: QrImageResponse = self
            .get_with_session("/login/qr/create", &[("key", key), ("qrimg", "true")])
            .await?;
        Ok(response.data.qrimg)
    }

    async fn qr_check(&self, key: &str) -> Result<ApiStatus> {
        self.get_with_session("/login/qr/check", &[("key", key)]).await
    }

    async fn send_captcha(&self, phone: &str) -> Result<ApiStatus> {
        self.get_with_session("/captcha/sent", &[("phone", phone)]).await
    }

    async fn verify_captcha(&self, phone: &str, code: &str) -> Result<ApiStatus> {
        self.get_with_session("/captcha/verify", &[("phone", phone), ("captcha", code)])
            .await
    }

    async fn login_cellphone(&self, phone: &str, code: &str) -> Result<ApiStatus> {
        self.get_with_session("/login/cellphone", &[("phone", phone), ("captcha", code)])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{LoginMode, SessionState};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn client() -> CatalogClient {
        let session = SessionHandle::new(SessionState {
            headers: HashMap::new(),
            login_mode: LoginMode::Password,
            refresh_interval_minutes: 0,
        });
        CatalogClient::new("http://127.0.0.1:3000/", session).unwrap()
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        assert_eq!(client().endpoint("/song/url"), "http://127.0.0.1:3000/song/url");
    }

    #[test]
    fn test_song_detail_fills_metadata() {
        let json = r#"{
            "songs": [{
                "name": "晴天",
                "id": 186016,
                "ar": [{"id": 6452, "name": "周杰伦"}, {"id": null, "name": ""}],
                "al": {"picUrl": "https://p1.music.126.net/x.jpg"}
            }],
            "code": 200
        }"#;
        let response: SongDetailResponse = serde_json::from_str(json).unwrap();
        let mut track = TrackDescriptor::remote("186016");
        apply_detail(&mut track, "186016", response.songs.into_iter().next().unwrap());

        assert_eq!(track.full_name(), "晴天 - 周杰伦");
        assert_eq!(track.image.as_deref(), Some("https://p1.music.126.net/x.jpg"));
        assert_eq!(
            track.detail_url.as_deref(),
            Some("https://music.163.com/#/song?id=186016")
        );
        assert_eq!(track.artists.len(), 1);
    }

    #[test]
    fn test_responses_tolerate_missing_fields() {
        let url: SongUrlResponse = serde_json::from_str(r#"{"data":[{"id":1,"url":null}]}"#).unwrap();
        assert!(url.data[0].url.is_none());

        let search: SearchResponse = serde_json::from_str(r#"{"result":{}}"#).unwrap();
        assert!(search.result.unwrap().songs.is_empty());

        let playlists: SearchResponse =
            serde_json::from_str(r#"{"result":{"playlists":[{"id":24381616,"name":"x"}]}}"#).unwrap();
        assert_eq!(playlists.result.unwrap().playlists[0].id, 24381616);

        let status: ApiStatus =
            serde_json::from_str(r#"{"code":803,"message":"授权登陆成功","cookie":"MUSIC_U=a;"}"#).unwrap();
        assert_eq!(status.code, 803);
        assert_eq!(status.cookie.as_deref(), Some("MUSIC_U=a;"));
    }
}
