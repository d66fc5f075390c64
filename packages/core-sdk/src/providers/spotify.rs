use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::{classify_status, map_transport, require, MusicProvider};
use crate::credentials::CredentialStore;
use crate::error::SearchError;
use crate::models::{
    CredentialKey, OAuthToken, ProviderChoice, SearchPage, SearchQuery, SongResult,
};

const TRACK_URL: &str = "https://open.spotify.com/track/";
/** \brief 搜索接口 limit 上限 */
const MAX_LIMIT: usize = 50;
const PREFERRED_ARTWORK_WIDTH: i64 = 300;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchResponse {
    tracks: Option<TrackPage>,
}

#[derive(Debug, Deserialize)]
struct TrackPage {
    #[serde(default)]
    items: Vec<Track>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Track {
    id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    artists: Vec<Artist>,
    album: Option<Album>,
    external_urls: Option<ExternalUrls>,
}

#[derive(Debug, Deserialize)]
struct Artist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Album {
    #[serde(default)]
    images: Vec<Image>,
}

#[derive(Debug, Deserialize)]
struct Image {
    url: String,
    width: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

struct CachedToken {
    client_id: String,
    token: OAuthToken,
}

/**
 * \brief 流媒体目录搜索。
 * \details 令牌按实例缓存，过期前复用；锁在刷新期间持有，保证同一时刻只有一次换取请求。
 */
pub struct SpotifyProvider {
    client: reqwest::Client,
    accounts_base: String,
    api_base: String,
    token: Mutex<Option<CachedToken>>,
}

impl SpotifyProvider {
    pub fn new(client: reqwest::Client, accounts_base: &str, api_base: &str) -> Self {
        Self {
            client,
            accounts_base: accounts_base.trim_end_matches('/').to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token: Mutex::new(None),
        }
    }

    /**
     * \brief client-credentials 换取 Bearer 令牌。
     */
    pub async fn fetch_token(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<OAuthToken, SearchError> {
        tracing::debug!("requesting spotify access token");
        let resp = self
            .client
            .post(format!("{}/api/token", self.accounts_base))
            .basic_auth(client_id, Some(client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(map_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            // invalid_client comes back as 400
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    SearchError::Unauthorized(format!("token request: {} -> {}", status, text))
                }
                _ => classify_status(status, text),
            });
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| SearchError::Malformed(format!("token response: {}", e)))?;
        Ok(OAuthToken::new(
            body.access_token,
            Duration::from_secs(body.expires_in),
        ))
    }

    /**
     * \brief 返回有效令牌；缺失、过期或换了 client id 时重新换取。
     */
    async fn bearer(&self, client_id: &str, client_secret: &str) -> Result<String, SearchError> {
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.client_id == client_id && !cached.token.needs_refresh() {
                return Ok(cached.token.access_token.clone());
            }
            tracing::debug!(
                expired = cached.token.is_expired(),
                "cached spotify token no longer usable"
            );
        }
        let token = self.fetch_token(client_id, client_secret).await?;
        let value = token.access_token.clone();
        *guard = Some(CachedToken {
            client_id: client_id.to_string(),
            token,
        });
        Ok(value)
    }

    async fn invalidate(&self) {
        *self.token.lock().await = None;
    }

    async fn send_search(
        &self,
        bearer: &str,
        query: &SearchQuery,
        limit: &str,
        offset: &str,
    ) -> Result<reqwest::Response, SearchError> {
        self.client
            .get(format!("{}/search", self.api_base))
            .bearer_auth(bearer)
            .query(&[
                ("q", query.as_str()),
                ("type", "track"),
                ("limit", limit),
                ("offset", offset),
            ])
            .send()
            .await
            .map_err(map_transport)
    }
}

#[async_trait]
impl MusicProvider for SpotifyProvider {
    fn choice(&self) -> ProviderChoice {
        ProviderChoice::Spotify
    }

    fn required_credentials(&self) -> &'static [CredentialKey] {
        &[
            CredentialKey::SpotifyClientId,
            CredentialKey::SpotifyClientSecret,
        ]
    }

    async fn search(
        &self,
        query: &SearchQuery,
        credentials: &dyn CredentialStore,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<SearchPage, SearchError> {
        let client_id = require(credentials, CredentialKey::SpotifyClientId)?;
        let client_secret = require(credentials, CredentialKey::SpotifyClientSecret)?;

        let offset: usize = match cursor {
            Some(c) => c
                .parse()
                .map_err(|_| SearchError::Malformed(format!("bad page cursor: {}", c)))?,
            None => 0,
        };
        let limit = limit.clamp(1, MAX_LIMIT).to_string();
        let offset_param = offset.to_string();

        tracing::debug!(query = %query, offset, "searching spotify");

        let bearer = self.bearer(&client_id, &client_secret).await?;
        let mut resp = self
            .send_search(&bearer, query, &limit, &offset_param)
            .await?;

        // A rejected cached token gets exactly one refresh.
        if resp.status() == StatusCode::UNAUTHORIZED {
            tracing::info!("spotify token rejected, refreshing once");
            self.invalidate().await;
            let bearer = self.bearer(&client_id, &client_secret).await?;
            resp = self
                .send_search(&bearer, query, &limit, &offset_param)
                .await?;
        }

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, text));
        }

        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| SearchError::Malformed(e.to_string()))?;
        let page = normalize(body, offset);
        tracing::info!(results = page.results.len(), "spotify search complete");
        Ok(page)
    }
}

/**
 * \brief 映射为统一结构；续页标记为下一页的 offset。
 */
pub(crate) fn normalize(body: SearchResponse, offset: usize) -> SearchPage {
    let Some(page) = body.tracks else {
        return SearchPage::default();
    };
    let fetched = page.items.len();
    let results = page
        .items
        .into_iter()
        .filter_map(|track| {
            let id = track.id.filter(|id| !id.trim().is_empty())?;
            let title = track.name.trim().to_string();
            if title.is_empty() {
                return None;
            }
            let playback_url = track
                .external_urls
                .and_then(|u| u.spotify)
                .filter(|u| !u.trim().is_empty())
                .unwrap_or_else(|| format!("{}{}", TRACK_URL, id));
            let thumbnail_url = track.album.and_then(|a| pick_artwork(a.images));
            Some(SongResult {
                id,
                title,
                artists: track
                    .artists
                    .into_iter()
                    .map(|a| a.name)
                    .filter(|n| !n.trim().is_empty())
                    .collect(),
                thumbnail_url,
                playback_url,
                source: ProviderChoice::Spotify,
            })
        })
        .collect();
    SearchPage {
        results,
        next_cursor: page.next.map(|_| (offset + fetched).to_string()),
    }
}

fn pick_artwork(images: Vec<Image>) -> Option<String> {
    images
        .into_iter()
        .min_by_key(|img| (img.width.unwrap_or(0) - PREFERRED_ARTWORK_WIDTH).abs())
        .map(|img| img.url)
}
