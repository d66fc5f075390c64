use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::ProviderChoice;

/**
 * \brief 凭据来源：部署时内置，或由用户录入并持久化。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialSource {
    Embedded,
    UserSupplied,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Embedded => f.write_str("embedded"),
            CredentialSource::UserSupplied => f.write_str("user-supplied"),
        }
    }
}

impl FromStr for CredentialSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "embedded" | "env" => Ok(CredentialSource::Embedded),
            "user-supplied" | "user" => Ok(CredentialSource::UserSupplied),
            other => Err(format!("unknown credential source: {}", other)),
        }
    }
}

/**
 * \brief 应用配置，默认值可被 `VIBETUNE_*` 环境变量覆盖。
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub gemini_api_base: String,
    pub gemini_model: String,
    pub youtube_api_base: String,
    /** \brief YouTube 视频分类，10 为 Music */
    pub youtube_category_id: String,
    pub spotify_accounts_base: String,
    pub spotify_api_base: String,
    pub provider: ProviderChoice,
    pub credential_source: CredentialSource,
    pub result_limit: usize,
    pub request_timeout_secs: u64,
    pub max_network_retries: u32,
    pub retry_backoff_ms: u64,
    /** \brief 凭据数据库与遥测日志所在目录 */
    pub data_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gemini_api_base: "https://generativelanguage.googleapis.com".to_string(),
            gemini_model: "gemini-2.0-flash".to_string(),
            youtube_api_base: "https://www.googleapis.com/youtube/v3".to_string(),
            youtube_category_id: "10".to_string(),
            spotify_accounts_base: "https://accounts.spotify.com".to_string(),
            spotify_api_base: "https://api.spotify.com/v1".to_string(),
            provider: ProviderChoice::YouTube,
            credential_source: CredentialSource::UserSupplied,
            result_limit: 5,
            request_timeout_secs: 30,
            max_network_retries: 2,
            retry_backoff_ms: 200,
            data_dir: PathBuf::from("."),
        }
    }
}

impl AppConfig {
    /**
     * \brief 读取 `.env`（若存在）后，用环境变量覆盖默认配置。
     */
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /**
     * \brief 以任意查找函数构建配置，便于测试。
     */
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("VIBETUNE_GEMINI_API_BASE") {
            cfg.gemini_api_base = v;
        }
        if let Some(v) = get("VIBETUNE_GEMINI_MODEL") {
            cfg.gemini_model = v;
        }
        if let Some(v) = get("VIBETUNE_YOUTUBE_API_BASE") {
            cfg.youtube_api_base = v;
        }
        if let Some(v) = get("VIBETUNE_YOUTUBE_CATEGORY_ID") {
            cfg.youtube_category_id = v;
        }
        if let Some(v) = get("VIBETUNE_SPOTIFY_ACCOUNTS_BASE") {
            cfg.spotify_accounts_base = v;
        }
        if let Some(v) = get("VIBETUNE_SPOTIFY_API_BASE") {
            cfg.spotify_api_base = v;
        }
        if let Some(v) = get("VIBETUNE_PROVIDER") {
            cfg.provider = v.parse().map_err(|e: String| anyhow!(e))?;
        }
        if let Some(v) = get("VIBETUNE_CREDENTIAL_SOURCE") {
            cfg.credential_source = v.parse().map_err(|e: String| anyhow!(e))?;
        }
        if let Some(v) = get("VIBETUNE_RESULT_LIMIT") {
            cfg.result_limit = v
                .trim()
                .parse()
                .with_context(|| format!("invalid VIBETUNE_RESULT_LIMIT: {}", v))?;
        }
        if let Some(v) = get("VIBETUNE_REQUEST_TIMEOUT_SECS") {
            cfg.request_timeout_secs = v
                .trim()
                .parse()
                .with_context(|| format!("invalid VIBETUNE_REQUEST_TIMEOUT_SECS: {}", v))?;
        }
        if let Some(v) = get("VIBETUNE_MAX_NETWORK_RETRIES") {
            cfg.max_network_retries = v
                .trim()
                .parse()
                .with_context(|| format!("invalid VIBETUNE_MAX_NETWORK_RETRIES: {}", v))?;
        }
        if let Some(v) = get("VIBETUNE_RETRY_BACKOFF_MS") {
            cfg.retry_backoff_ms = v
                .trim()
                .parse()
                .with_context(|| format!("invalid VIBETUNE_RETRY_BACKOFF_MS: {}", v))?;
        }
        if let Some(v) = get("VIBETUNE_DATA_DIR") {
            cfg.data_dir = PathBuf::from(v);
        }
        if cfg.result_limit == 0 {
            return Err(anyhow!("VIBETUNE_RESULT_LIMIT must be at least 1"));
        }
        Ok(cfg)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("vibetune.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /**
     * \brief 构建带超时的 HTTP 客户端，各适配器共用同一设置。
     */
    pub fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.request_timeout())
            .user_agent(concat!("vibetune/", env!("CARGO_PKG_VERSION")))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let cfg = AppConfig::from_lookup(|_| None).expect("defaults");
        assert_eq!(cfg.provider, ProviderChoice::YouTube);
        assert_eq!(cfg.credential_source, CredentialSource::UserSupplied);
        assert_eq!(cfg.result_limit, 5);
        assert_eq!(cfg.youtube_category_id, "10");
    }

    #[test]
    fn test_env_overrides() {
        let cfg = AppConfig::from_lookup(lookup_from(&[
            ("VIBETUNE_PROVIDER", "spotify"),
            ("VIBETUNE_CREDENTIAL_SOURCE", "embedded"),
            ("VIBETUNE_RESULT_LIMIT", "8"),
            ("VIBETUNE_DATA_DIR", "/tmp/vt"),
        ]))
        .expect("config");
        assert_eq!(cfg.provider, ProviderChoice::Spotify);
        assert_eq!(cfg.credential_source, CredentialSource::Embedded);
        assert_eq!(cfg.result_limit, 8);
        assert_eq!(cfg.database_path(), PathBuf::from("/tmp/vt/vibetune.db"));
    }

    #[test]
    fn test_invalid_values_fail() {
        assert!(AppConfig::from_lookup(lookup_from(&[("VIBETUNE_RESULT_LIMIT", "lots")])).is_err());
        assert!(AppConfig::from_lookup(lookup_from(&[("VIBETUNE_RESULT_LIMIT", "0")])).is_err());
        assert!(AppConfig::from_lookup(lookup_from(&[("VIBETUNE_PROVIDER", "napster")])).is_err());
    }
}
