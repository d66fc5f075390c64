use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::config::AppConfig;
use crate::credentials::CredentialStore;
use crate::error::InferenceError;
use crate::models::{CredentialKey, EncodedPayload, SearchQuery};

/**
 * \brief 把图片转成“氛围短语”的多模态推理能力。
 */
#[async_trait]
pub trait VibeDescriber: Send + Sync {
    /** \brief 调用前必须存在的凭据。 */
    fn required_credentials(&self) -> &'static [CredentialKey];

    /**
     * \brief 发送一次请求（指令 + 内联图片），返回去空白后的搜索短语。
     */
    async fn describe(
        &self,
        payload: &EncodedPayload,
        language: &str,
        credentials: &dyn CredentialStore,
    ) -> Result<SearchQuery, InferenceError>;
}

/**
 * \brief 生成指令文本，只依赖语言偏好。
 */
pub fn build_vibe_prompt(language: &str) -> String {
    let language = match language.trim() {
        "" => "any language",
        lang => lang,
    };
    format!(
        "Look at this photo and feel its mood. Reply with one short music search phrase \
         (3 to 6 words) for a {language} song that matches the vibe and would suit this photo \
         as an Instagram post soundtrack. Reply with the phrase only, without quotes or any \
         other text."
    )
}

/**
 * \brief Gemini generateContent 实现。
 */
pub struct GeminiDescriber {
    client: reqwest::Client,
    api_base: String,
    model: String,
}

impl GeminiDescriber {
    pub fn new(client: reqwest::Client, api_base: &str, model: &str) -> Self {
        Self {
            client,
            api_base: normalize_gemini_base(api_base),
            model: model.to_string(),
        }
    }

    pub fn from_config(config: &AppConfig) -> reqwest::Result<Self> {
        Ok(Self::new(
            config.http_client()?,
            &config.gemini_api_base,
            &config.gemini_model,
        ))
    }
}

#[async_trait]
impl VibeDescriber for GeminiDescriber {
    fn required_credentials(&self) -> &'static [CredentialKey] {
        &[CredentialKey::GeminiApiKey]
    }

    async fn describe(
        &self,
        payload: &EncodedPayload,
        language: &str,
        credentials: &dyn CredentialStore,
    ) -> Result<SearchQuery, InferenceError> {
        let api_key = credentials
            .get(CredentialKey::GeminiApiKey)
            .ok_or_else(|| {
                InferenceError::Unauthorized(format!("{} is not set", CredentialKey::GeminiApiKey))
            })?;

        let url = format!("{}/models/{}:generateContent", self.api_base, self.model);
        let body = gemini_vision_payload(&build_vibe_prompt(language), payload);

        tracing::debug!(model = %self.model, mime = %payload.mime_type, "requesting vibe phrase");

        let resp = self
            .client
            .post(url)
            .query(&[("key", api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_failure(status, text));
        }

        // A 200 body that is not JSON is never retried.
        let v: Value = resp.json().await.map_err(|e| {
            tracing::warn!(error = %e, "gemini response is not valid json");
            InferenceError::EmptyResult
        })?;

        if let Some(reason) = v
            .get("promptFeedback")
            .and_then(|f| f.get("blockReason"))
            .and_then(|r| r.as_str())
        {
            tracing::warn!(reason, "vibe request blocked by the model");
        }

        let query = SearchQuery::new(&extract_first_text(&v)).ok_or(InferenceError::EmptyResult)?;
        tracing::info!(query = %query, "vibe phrase derived");
        Ok(query)
    }
}

fn gemini_vision_payload(prompt: &str, image: &EncodedPayload) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [
                {"text": prompt},
                {"inline_data": {"mime_type": image.mime_type, "data": image.data}}
            ]
        }]
    })
}

fn classify_failure(status: StatusCode, text: String) -> InferenceError {
    let key_rejected = text.contains("API_KEY_INVALID") || text.contains("API key not valid");
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN || key_rejected {
        InferenceError::Unauthorized(format!("{} -> {}", status, text))
    } else {
        InferenceError::Network(format!("gemini request failed: {} -> {}", status, text))
    }
}

/**
 * \brief 读取第一个候选的第一个文本片段。
 */
fn extract_first_text(v: &Value) -> String {
    v.get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|first| first.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(|p| p.as_array())
        .and_then(|parts| {
            parts
                .iter()
                .find_map(|p| p.get("text").and_then(|t| t.as_str()))
        })
        .unwrap_or("")
        .to_string()
}

fn normalize_gemini_base(api_base: &str) -> String {
    let trimmed = api_base.trim_end_matches('/');
    if trimmed.ends_with("/v1")
        || trimmed.ends_with("/v1beta")
        || trimmed.contains("/v1/")
        || trimmed.contains("/v1beta/")
    {
        trimmed.to_string()
    } else {
        format!("{}/v1beta", trimmed)
    }
}
