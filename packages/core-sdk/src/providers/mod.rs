use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::config::AppConfig;
use crate::credentials::CredentialStore;
use crate::error::SearchError;
use crate::models::{CredentialKey, ProviderChoice, SearchPage, SearchQuery};

pub mod spotify;
pub mod youtube;

pub use spotify::SpotifyProvider;
pub use youtube::YouTubeProvider;

/**
 * \brief 音乐搜索能力。各实现在边界处把自身响应映射为统一的 `SongResult`。
 */
#[async_trait]
pub trait MusicProvider: Send + Sync {
    fn choice(&self) -> ProviderChoice;

    /** \brief 搜索前必须存在的凭据，只包含本服务商签发的密钥。 */
    fn required_credentials(&self) -> &'static [CredentialKey];

    /**
     * \brief 按短语搜索，最多返回 `limit` 条；`cursor` 为上一页返回的续页标记。
     */
    async fn search(
        &self,
        query: &SearchQuery,
        credentials: &dyn CredentialStore,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<SearchPage, SearchError>;
}

/**
 * \brief 根据配置构建服务商实例，是唯一按服务商身份分支的地方。
 */
pub fn build_provider(
    choice: ProviderChoice,
    config: &AppConfig,
) -> reqwest::Result<Arc<dyn MusicProvider>> {
    let client = config.http_client()?;
    Ok(match choice {
        ProviderChoice::YouTube => Arc::new(YouTubeProvider::new(
            client,
            &config.youtube_api_base,
            &config.youtube_category_id,
        )),
        ProviderChoice::Spotify => Arc::new(SpotifyProvider::new(
            client,
            &config.spotify_accounts_base,
            &config.spotify_api_base,
        )),
    })
}

fn require(credentials: &dyn CredentialStore, key: CredentialKey) -> Result<String, SearchError> {
    credentials.get(key).ok_or(SearchError::NoCredential(key))
}

fn map_transport(err: reqwest::Error) -> SearchError {
    SearchError::Network(err.to_string())
}

/**
 * \brief 非 2xx 状态的统一归类。
 */
fn classify_status(status: StatusCode, body: String) -> SearchError {
    let key_rejected = body.contains("keyInvalid") || body.contains("API key not valid");
    // YouTube reports exhausted quota as 403; the key itself is fine.
    let quota_exhausted =
        body.contains("quotaExceeded") || body.contains("rateLimitExceeded");
    match status {
        StatusCode::FORBIDDEN if quota_exhausted => {
            SearchError::Network(format!("quota exhausted: {} -> {}", status, body))
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SearchError::Unauthorized(format!("{} -> {}", status, body))
        }
        StatusCode::BAD_REQUEST if key_rejected => {
            SearchError::Unauthorized(format!("{} -> {}", status, body))
        }
        _ => SearchError::Network(format!("request failed: {} -> {}", status, body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SongResult;
    use serde_json::Value;
    use std::collections::BTreeSet;

    fn field_names(song: &SongResult) -> BTreeSet<String> {
        match serde_json::to_value(song).unwrap() {
            Value::Object(map) => map.keys().cloned().collect(),
            _ => panic!("song should serialize to an object"),
        }
    }

    #[test]
    fn test_both_schemas_normalize_to_same_shape() {
        let yt: youtube::SearchResponse = serde_json::from_str(
            r#"{"items":[{"id":{"kind":"youtube#video","videoId":"vid42"},
                "snippet":{"title":"Tum Hi Ho","channelTitle":"T-Series",
                "thumbnails":{"medium":{"url":"https://i.ytimg.com/vi/vid42/mqdefault.jpg"}}}}]}"#,
        )
        .unwrap();
        let sp: spotify::SearchResponse = serde_json::from_str(
            r#"{"tracks":{"items":[{"id":"trk42","name":"Tum Hi Ho",
                "artists":[{"name":"Arijit Singh"}],
                "album":{"images":[{"url":"https://i.scdn.co/image/big","width":640,"height":640},
                                   {"url":"https://i.scdn.co/image/mid","width":300,"height":300}]},
                "external_urls":{"spotify":"https://open.spotify.com/track/trk42"}}],
                "offset":0,"next":null}}"#,
        )
        .unwrap();

        let yt_songs = youtube::normalize(yt).results;
        let sp_songs = spotify::normalize(sp, 0).results;
        assert_eq!(yt_songs.len(), 1);
        assert_eq!(sp_songs.len(), 1);
        assert_eq!(field_names(&yt_songs[0]), field_names(&sp_songs[0]));
        for song in yt_songs.iter().chain(sp_songs.iter()) {
            assert_eq!(song.title, "Tum Hi Ho");
            assert!(song.playback_url.starts_with("https://"));
        }
        assert_eq!(sp_songs[0].thumbnail_url.as_deref(), Some("https://i.scdn.co/image/mid"));
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, String::new()),
            SearchError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, r#"{"reason":"keyInvalid"}"#.into()),
            SearchError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, String::new()),
            SearchError::Network(_)
        ));
    }

    #[test]
    fn test_quota_exhaustion_is_not_a_credential_error() {
        let body = r#"{"error":{"code":403,"errors":[{"domain":"youtube.quota","reason":"quotaExceeded"}]}}"#;
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, body.into()),
            SearchError::Network(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, r#"{"reason":"forbidden"}"#.into()),
            SearchError::Unauthorized(_)
        ));
    }

    #[test]
    fn test_build_provider_selects_variant() {
        let cfg = AppConfig::default();
        let yt = build_provider(ProviderChoice::YouTube, &cfg).unwrap();
        let sp = build_provider(ProviderChoice::Spotify, &cfg).unwrap();
        assert_eq!(yt.choice(), ProviderChoice::YouTube);
        assert_eq!(sp.choice(), ProviderChoice::Spotify);
        assert_eq!(yt.required_credentials(), &[CredentialKey::YoutubeApiKey]);
        assert_eq!(
            sp.required_credentials(),
            &[CredentialKey::SpotifyClientId, CredentialKey::SpotifyClientSecret]
        );
    }
}
