use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/**
 * \brief 凭据键名，一个键对应一个服务商密钥。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialKey {
    GeminiApiKey,
    YoutubeApiKey,
    SpotifyClientId,
    SpotifyClientSecret,
}

impl CredentialKey {
    pub const ALL: [CredentialKey; 4] = [
        CredentialKey::GeminiApiKey,
        CredentialKey::YoutubeApiKey,
        CredentialKey::SpotifyClientId,
        CredentialKey::SpotifyClientSecret,
    ];

    /** \brief 持久化使用的键名。 */
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKey::GeminiApiKey => "gemini-api-key",
            CredentialKey::YoutubeApiKey => "youtube-api-key",
            CredentialKey::SpotifyClientId => "spotify-client-id",
            CredentialKey::SpotifyClientSecret => "spotify-client-secret",
        }
    }

    /** \brief 内置凭据来源读取的环境变量名。 */
    pub fn env_var(&self) -> &'static str {
        match self {
            CredentialKey::GeminiApiKey => "VIBETUNE_GEMINI_API_KEY",
            CredentialKey::YoutubeApiKey => "VIBETUNE_YOUTUBE_API_KEY",
            CredentialKey::SpotifyClientId => "VIBETUNE_SPOTIFY_CLIENT_ID",
            CredentialKey::SpotifyClientSecret => "VIBETUNE_SPOTIFY_CLIENT_SECRET",
        }
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for CredentialKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        CredentialKey::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| format!("unknown credential key: {}", s))
    }
}

/**
 * \brief 音乐服务商选择。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderChoice {
    YouTube,
    Spotify,
}

impl ProviderChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderChoice::YouTube => "youtube",
            ProviderChoice::Spotify => "spotify",
        }
    }
}

impl fmt::Display for ProviderChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ProviderChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "youtube" | "yt" => Ok(ProviderChoice::YouTube),
            "spotify" => Ok(ProviderChoice::Spotify),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/**
 * \brief 用户选择的图片。
 * \details `preview` 为本地可寻址的预览句柄，替换选择时随资产一起释放。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    /** \brief 原始字节 */
    pub bytes: Vec<u8>,
    /** \brief MIME 类型，如 image/jpeg */
    pub mime_type: String,
    /** \brief 预览句柄（源文件路径） */
    pub preview: PathBuf,
}

/**
 * \brief 可直接放入请求体的图片编码。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodedPayload {
    pub mime_type: String,
    /** \brief 标准 base64 */
    pub data: String,
}

impl EncodedPayload {
    pub fn from_bytes(mime_type: &str, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            data: STANDARD.encode(bytes),
        }
    }
}

/**
 * \brief 手动搜索时可选的预设心情。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Happy,
    Sad,
    Romantic,
    Chill,
    Energetic,
    Melancholy,
    Motivational,
}

impl Mood {
    pub const ALL: [Mood; 7] = [
        Mood::Happy,
        Mood::Sad,
        Mood::Romantic,
        Mood::Chill,
        Mood::Energetic,
        Mood::Melancholy,
        Mood::Motivational,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mood::Happy => "Happy",
            Mood::Sad => "Sad",
            Mood::Romantic => "Romantic",
            Mood::Chill => "Chill",
            Mood::Energetic => "Energetic",
            Mood::Melancholy => "Melancholy",
            Mood::Motivational => "Motivational",
        }
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Mood {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Mood::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown mood: {}", s))
    }
}

/**
 * \brief 从推理结果中提取的搜索短语，构造时保证去空白后非空。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SearchQuery(String);

impl SearchQuery {
    /** \brief 去除首尾空白；结果为空时返回 None。 */
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /**
     * \brief 不经图片分析，直接由描述或预设心情拼出短语：`<描述|心情> <语言> song`。
     * \details 非空描述优先于心情；二者皆无或语言为空时返回 None。
     */
    pub fn from_mood(description: Option<&str>, mood: Option<Mood>, language: &str) -> Option<Self> {
        let language = language.trim();
        if language.is_empty() {
            return None;
        }
        let subject = match description.map(str::trim).filter(|d| !d.is_empty()) {
            Some(description) => description,
            None => mood?.as_str(),
        };
        Self::new(&format!("{} {} song", subject, language))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/**
 * \brief 统一后的歌曲结果，两个服务商字段名完全一致。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongResult {
    pub id: String,
    pub title: String,
    pub artists: Vec<String>,
    pub thumbnail_url: Option<String>,
    pub playback_url: String,
    pub source: ProviderChoice,
}

/**
 * \brief 一页搜索结果；`next_cursor` 用于“更多推荐”。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub results: Vec<SongResult>,
    pub next_cursor: Option<String>,
}

/**
 * \brief 流媒体目录的 Bearer 令牌。
 * \details `expires_at` 为服务端声明的过期时刻；`refresh_at` 略早于它，
 * 提前量取 30 秒与一半有效期中的较小者，有效令牌不会被提前丢弃太多。
 */
#[derive(Debug, Clone)]
pub struct OAuthToken {
    pub access_token: String,
    pub expires_at: Instant,
    refresh_at: Instant,
}

impl OAuthToken {
    const MAX_REFRESH_MARGIN: Duration = Duration::from_secs(30);

    pub fn new(access_token: String, expires_in: Duration) -> Self {
        let now = Instant::now();
        let margin = Self::MAX_REFRESH_MARGIN.min(expires_in / 2);
        Self {
            access_token,
            expires_at: now + expires_in,
            refresh_at: now + (expires_in - margin),
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /** \brief 是否应在下一次请求前重新换取。 */
    pub fn needs_refresh(&self) -> bool {
        Instant::now() >= self.refresh_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_query_trims_and_rejects_blank() {
        let q = SearchQuery::new("  calm hindi sunset ballad \n").expect("non-empty");
        assert_eq!(q.as_str(), "calm hindi sunset ballad");
        assert!(SearchQuery::new("   \n\t").is_none());
        assert!(SearchQuery::new("").is_none());
    }

    #[test]
    fn test_mood_query_composition() {
        let q = SearchQuery::from_mood(None, Some(Mood::Chill), " Hindi ").expect("mood query");
        assert_eq!(q.as_str(), "Chill Hindi song");

        let q = SearchQuery::from_mood(Some("  rainy evening chai "), Some(Mood::Happy), "Punjabi")
            .expect("description query");
        assert_eq!(q.as_str(), "rainy evening chai Punjabi song");

        let q = SearchQuery::from_mood(Some("   "), Some(Mood::Sad), "English").expect("blank description");
        assert_eq!(q.as_str(), "Sad English song");
    }

    #[test]
    fn test_mood_query_needs_subject_and_language() {
        assert!(SearchQuery::from_mood(None, None, "Hindi").is_none());
        assert!(SearchQuery::from_mood(Some(""), None, "Hindi").is_none());
        assert!(SearchQuery::from_mood(None, Some(Mood::Romantic), "  ").is_none());
    }

    #[test]
    fn test_mood_parse_ignores_case() {
        assert_eq!("melancholy".parse::<Mood>().unwrap(), Mood::Melancholy);
        assert_eq!(" ENERGETIC ".parse::<Mood>().unwrap(), Mood::Energetic);
        assert!("angry".parse::<Mood>().is_err());
    }

    #[test]
    fn test_credential_key_parse() {
        for key in CredentialKey::ALL {
            assert_eq!(key.as_str().parse::<CredentialKey>().unwrap(), key);
        }
        assert!("openai-key".parse::<CredentialKey>().is_err());
    }

    #[test]
    fn test_zero_lifetime_token_is_expired() {
        let token = OAuthToken::new("t".into(), Duration::ZERO);
        assert!(token.is_expired());
        assert!(token.needs_refresh());
        let token = OAuthToken::new("t".into(), Duration::from_secs(3600));
        assert!(!token.is_expired());
        assert!(!token.needs_refresh());
    }

    #[test]
    fn test_short_token_keeps_half_its_lifetime() {
        let token = OAuthToken::new("t".into(), Duration::from_secs(25));
        assert!(!token.needs_refresh());
        assert!(token.expires_at - Instant::now() > Duration::from_secs(24));
    }

    #[test]
    fn test_song_result_serializes_camel_case() {
        let song = SongResult {
            id: "abc".into(),
            title: "Song".into(),
            artists: vec!["A".into()],
            thumbnail_url: None,
            playback_url: "https://example.com/abc".into(),
            source: ProviderChoice::Spotify,
        };
        let v = serde_json::to_value(&song).unwrap();
        assert_eq!(v["playbackUrl"], "https://example.com/abc");
        assert_eq!(v["source"], "spotify");
        assert!(v.get("thumbnailUrl").is_some());
    }
}
