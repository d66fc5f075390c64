use async_trait::async_trait;
use serde::Deserialize;

use super::{classify_status, map_transport, require, MusicProvider};
use crate::credentials::CredentialStore;
use crate::error::SearchError;
use crate::models::{CredentialKey, ProviderChoice, SearchPage, SearchQuery, SongResult};

const WATCH_URL: &str = "https://www.youtube.com/watch?v=";
/** \brief Data API 的 maxResults 上限 */
const MAX_RESULTS: usize = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SearchResponse {
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: ItemId,
    snippet: Option<Snippet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    #[serde(default)]
    title: String,
    channel_title: Option<String>,
    thumbnails: Option<Thumbnails>,
}

#[derive(Debug, Deserialize)]
struct Thumbnails {
    medium: Option<Thumbnail>,
    default: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

/**
 * \brief 视频平台搜索：单次 API Key 请求，限定视频分类以偏向音乐内容。
 */
pub struct YouTubeProvider {
    client: reqwest::Client,
    api_base: String,
    category_id: String,
}

impl YouTubeProvider {
    pub fn new(client: reqwest::Client, api_base: &str, category_id: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            category_id: category_id.to_string(),
        }
    }
}

#[async_trait]
impl MusicProvider for YouTubeProvider {
    fn choice(&self) -> ProviderChoice {
        ProviderChoice::YouTube
    }

    fn required_credentials(&self) -> &'static [CredentialKey] {
        &[CredentialKey::YoutubeApiKey]
    }

    async fn search(
        &self,
        query: &SearchQuery,
        credentials: &dyn CredentialStore,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<SearchPage, SearchError> {
        let api_key = require(credentials, CredentialKey::YoutubeApiKey)?;
        let max_results = limit.clamp(1, MAX_RESULTS).to_string();

        let mut params = vec![
            ("part", "snippet"),
            ("q", query.as_str()),
            ("type", "video"),
            ("videoCategoryId", self.category_id.as_str()),
            ("maxResults", max_results.as_str()),
            ("key", api_key.as_str()),
        ];
        if let Some(token) = cursor {
            params.push(("pageToken", token));
        }

        tracing::debug!(query = %query, limit, "searching youtube");

        let resp = self
            .client
            .get(format!("{}/search", self.api_base))
            .query(&params)
            .send()
            .await
            .map_err(map_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, text));
        }

        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| SearchError::Malformed(e.to_string()))?;
        let page = normalize(body);
        tracing::info!(results = page.results.len(), "youtube search complete");
        Ok(page)
    }
}

/**
 * \brief 丢弃缺少 videoId 或标题为空的条目。
 */
pub(crate) fn normalize(body: SearchResponse) -> SearchPage {
    let results = body
        .items
        .into_iter()
        .filter_map(|item| {
            let id = item.id.video_id.filter(|id| !id.trim().is_empty())?;
            let snippet = item.snippet?;
            let title = unescape_html(snippet.title.trim());
            if title.is_empty() {
                return None;
            }
            let thumbnail_url = snippet
                .thumbnails
                .and_then(|t| t.medium.or(t.default))
                .map(|t| t.url);
            Some(SongResult {
                playback_url: format!("{}{}", WATCH_URL, id),
                id,
                title,
                artists: snippet
                    .channel_title
                    .map(|c| unescape_html(c.trim()))
                    .filter(|c| !c.is_empty())
                    .into_iter()
                    .collect(),
                thumbnail_url,
                source: ProviderChoice::YouTube,
            })
        })
        .collect();
    SearchPage {
        results,
        next_cursor: body.next_page_token,
    }
}

// The search endpoint returns HTML-escaped snippet text.
fn unescape_html(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentialStore;
    use mockito::{Matcher, Server};

    fn query() -> SearchQuery {
        SearchQuery::new("calm hindi sunset ballad").unwrap()
    }

    #[test]
    fn test_normalize_skips_channels_and_blank_titles() {
        let body: SearchResponse = serde_json::from_str(
            r#"{"nextPageToken":"CAUQAA","items":[
                {"id":{"kind":"youtube#channel","channelId":"c1"},"snippet":{"title":"A channel"}},
                {"id":{"videoId":"v1"},"snippet":{"title":"   "}},
                {"id":{"videoId":"v2"},"snippet":{"title":"Rock &amp; Roll &#39;74","channelTitle":"Band",
                  "thumbnails":{"default":{"url":"https://i.ytimg.com/vi/v2/default.jpg"}}}}
            ]}"#,
        )
        .unwrap();
        let page = normalize(body);
        assert_eq!(page.next_cursor.as_deref(), Some("CAUQAA"));
        assert_eq!(page.results.len(), 1);
        let song = &page.results[0];
        assert_eq!(song.id, "v2");
        assert_eq!(song.title, "Rock & Roll '74");
        assert_eq!(song.artists, vec!["Band".to_string()]);
        assert_eq!(song.playback_url, "https://www.youtube.com/watch?v=v2");
        assert_eq!(
            song.thumbnail_url.as_deref(),
            Some("https://i.ytimg.com/vi/v2/default.jpg")
        );
    }

    #[tokio::test]
    async fn test_search_sends_filters_and_key() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/search")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("q".into(), "calm hindi sunset ballad".into()),
                Matcher::UrlEncoded("type".into(), "video".into()),
                Matcher::UrlEncoded("videoCategoryId".into(), "10".into()),
                Matcher::UrlEncoded("maxResults".into(), "5".into()),
                Matcher::UrlEncoded("key".into(), "yt-key".into()),
                Matcher::UrlEncoded("pageToken".into(), "NEXT".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"items":[{"id":{"videoId":"abc"},"snippet":{"title":"Song","channelTitle":"Artist",
                   "thumbnails":{"medium":{"url":"https://i.ytimg.com/vi/abc/mqdefault.jpg"}}}}]}"#,
            )
            .create_async()
            .await;

        let provider = YouTubeProvider::new(reqwest::Client::new(), &server.url(), "10");
        let store = MemoryCredentialStore::with(&[(CredentialKey::YoutubeApiKey, "yt-key")]);
        let page = provider
            .search(&query(), &store, 5, Some("NEXT"))
            .await
            .expect("search");
        mock.assert_async().await;
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.results[0].source, ProviderChoice::YouTube);
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_empty_items_is_not_an_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/search")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"items":[]}"#)
            .create_async()
            .await;
        let provider = YouTubeProvider::new(reqwest::Client::new(), &server.url(), "10");
        let store = MemoryCredentialStore::with(&[(CredentialKey::YoutubeApiKey, "k")]);
        let page = provider.search(&query(), &store, 5, None).await.expect("search");
        assert!(page.results.is_empty());
    }

    #[tokio::test]
    async fn test_failure_kinds() {
        let mut server = Server::new_async().await;
        let provider = YouTubeProvider::new(reqwest::Client::new(), &server.url(), "10");

        let err = provider
            .search(&query(), &MemoryCredentialStore::new(), 5, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::NoCredential(CredentialKey::YoutubeApiKey)));

        let store = MemoryCredentialStore::with(&[(CredentialKey::YoutubeApiKey, "k")]);
        let m = server
            .mock("GET", "/search")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>not json</html>")
            .create_async()
            .await;
        let err = provider.search(&query(), &store, 5, None).await.unwrap_err();
        assert!(matches!(err, SearchError::Malformed(_)));
        m.remove_async().await;

        let _m = server
            .mock("GET", "/search")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body(r#"{"error":{"code":403}}"#)
            .create_async()
            .await;
        let err = provider.search(&query(), &store, 5, None).await.unwrap_err();
        assert!(matches!(err, SearchError::Unauthorized(_)));
    }
}
