use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::credentials::CredentialStore;
use crate::encoder;
use crate::error::{FailureKind, InferenceError, MissingInput, PipelineError, SearchError};
use crate::llm::{GeminiDescriber, VibeDescriber};
use crate::models::{EncodedPayload, ImageAsset, SearchPage, SearchQuery, SongResult};
use crate::providers::{build_provider, MusicProvider};
use crate::telemetry;

/**
 * \brief 流水线状态机。Failed 携带失败类别。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "kebab-case")]
pub enum PipelineState {
    Idle,
    Encoding,
    Describing,
    Searching,
    Ready,
    Failed(FailureKind),
}

impl PipelineState {
    /** \brief 是否有步骤正在进行（即界面的加载标志）。 */
    pub fn is_loading(&self) -> bool {
        matches!(
            self,
            PipelineState::Encoding | PipelineState::Describing | PipelineState::Searching
        )
    }
}

/**
 * \brief 界面消费的只读快照。
 */
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
    pub state: PipelineState,
    pub query: Option<SearchQuery>,
    pub results: Vec<SongResult>,
    /** \brief 面向用户的错误提示 */
    pub error: Option<String>,
}

/**
 * \brief 单次运行的参数。
 */
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub result_limit: usize,
    pub max_network_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            result_limit: 5,
            max_network_retries: 2,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

impl From<&AppConfig> for PipelineOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            result_limit: config.result_limit,
            max_network_retries: config.max_network_retries,
            retry_backoff: config.retry_backoff(),
        }
    }
}

struct Inner {
    state: PipelineState,
    image: Option<Arc<ImageAsset>>,
    language: String,
    query: Option<SearchQuery>,
    results: Vec<SongResult>,
    next_cursor: Option<String>,
    error: Option<String>,
    generation: u64,
    cancel: Option<CancellationToken>,
}

/**
 * \brief 推荐流水线：编码 → 描述 → 搜索。
 * \details 同一时刻只允许一次运行；运行中再次提交会被拒绝（Busy），不会交错写入结果。
 */
pub struct Orchestrator {
    credentials: Arc<dyn CredentialStore>,
    describer: Arc<dyn VibeDescriber>,
    provider: Arc<dyn MusicProvider>,
    options: PipelineOptions,
    inner: Mutex<Inner>,
}

impl Orchestrator {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        describer: Arc<dyn VibeDescriber>,
        provider: Arc<dyn MusicProvider>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            credentials,
            describer,
            provider,
            options,
            inner: Mutex::new(Inner {
                state: PipelineState::Idle,
                image: None,
                language: String::new(),
                query: None,
                results: Vec::new(),
                next_cursor: None,
                error: None,
                generation: 0,
                cancel: None,
            }),
        }
    }

    /**
     * \brief 按配置装配 Gemini 与所选音乐服务商。
     */
    pub fn from_config(
        config: &AppConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> reqwest::Result<Self> {
        let describer = Arc::new(GeminiDescriber::from_config(config)?);
        let provider = build_provider(config.provider, config)?;
        Ok(Self::new(
            credentials,
            describer,
            provider,
            PipelineOptions::from(config),
        ))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.lock().state
    }

    pub fn query(&self) -> Option<SearchQuery> {
        self.lock().query.clone()
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        let inner = self.lock();
        PipelineSnapshot {
            state: inner.state,
            query: inner.query.clone(),
            results: inner.results.clone(),
            error: inner.error.clone(),
        }
    }

    /**
     * \brief 替换当前图片；旧图片随之释放。运行中不可替换。
     */
    pub fn select_image(&self, asset: ImageAsset) -> Result<(), PipelineError> {
        let mut inner = self.lock();
        if inner.state.is_loading() {
            return Err(PipelineError::Busy);
        }
        inner.image = Some(Arc::new(asset));
        Ok(())
    }

    pub fn set_language(&self, language: &str) {
        self.lock().language = language.trim().to_string();
    }

    /**
     * \brief 取消进行中的运行；运行会转入 Failed(Cancelled)。
     */
    pub fn cancel(&self) {
        if let Some(token) = self.lock().cancel.as_ref() {
            token.cancel();
        }
    }

    /**
     * \brief 完整运行一次流水线，返回本次结果。
     */
    pub async fn submit(&self) -> Result<Vec<SongResult>, PipelineError> {
        let (generation, token, image, language) = {
            let mut inner = self.lock();
            if inner.state.is_loading() {
                return Err(PipelineError::Busy);
            }
            let Some(image) = inner.image.clone() else {
                return Err(self.fail_locked(&mut inner, MissingInput::Image.into()));
            };
            let mut required = self.describer.required_credentials().to_vec();
            required.extend_from_slice(self.provider.required_credentials());
            if let Some(key) = self.credentials.first_missing(&required) {
                return Err(self.fail_locked(&mut inner, MissingInput::Credential(key).into()));
            }
            let token = self.begin_locked(&mut inner, PipelineState::Encoding);
            inner.query = None;
            inner.results.clear();
            inner.next_cursor = None;
            (inner.generation, token, image, inner.language.clone())
        };

        telemetry::log_event(
            "pipeline.submit",
            &format!(
                "provider={} mime={} language={}",
                self.provider.choice(),
                image.mime_type,
                language
            ),
        );

        let payload = match self.encode_step(&token, &image).await {
            Ok(payload) => payload,
            Err(err) => return Err(self.fail(generation, err)),
        };

        self.advance(generation, PipelineState::Describing);
        let query = match self.describe_step(&token, &payload, &language).await {
            Ok(query) => query,
            Err(err) => return Err(self.fail(generation, err)),
        };
        {
            let mut inner = self.lock();
            if inner.generation == generation {
                inner.query = Some(query.clone());
            }
        }

        self.advance(generation, PipelineState::Searching);
        self.search_step(generation, &token, &query, None).await
    }

    /**
     * \brief 复用上一次的搜索短语直接重新搜索，跳过编码与描述。
     * \details 可从 Ready 进入，也可在搜索失败后（短语已保留）重试。
     */
    pub async fn more_suggestions(&self) -> Result<Vec<SongResult>, PipelineError> {
        let (generation, token, query, cursor) = {
            let mut inner = self.lock();
            if inner.state.is_loading() {
                return Err(PipelineError::Busy);
            }
            let Some(query) = inner.query.clone() else {
                return Err(MissingInput::Query.into());
            };
            if let Some(key) = self
                .credentials
                .first_missing(self.provider.required_credentials())
            {
                return Err(self.fail_locked(&mut inner, MissingInput::Credential(key).into()));
            }
            let token = self.begin_locked(&mut inner, PipelineState::Searching);
            (inner.generation, token, query, inner.next_cursor.clone())
        };

        telemetry::log_event(
            "pipeline.more",
            &format!("provider={} paged={}", self.provider.choice(), cursor.is_some()),
        );
        self.search_step(generation, &token, &query, cursor).await
    }

    async fn encode_step(
        &self,
        token: &CancellationToken,
        image: &ImageAsset,
    ) -> Result<EncodedPayload, PipelineError> {
        cancellable(token, async {
            encoder::encode(image).await.map_err(PipelineError::from)
        })
        .await
    }

    async fn describe_step(
        &self,
        token: &CancellationToken,
        payload: &EncodedPayload,
        language: &str,
    ) -> Result<SearchQuery, PipelineError> {
        let describer = self.describer.as_ref();
        let credentials = self.credentials.as_ref();
        cancellable(token, async {
            self.with_retries(
                move || describer.describe(payload, language, credentials),
                InferenceError::is_retryable,
            )
            .await
            .map_err(PipelineError::from)
        })
        .await
    }

    async fn search_step(
        &self,
        generation: u64,
        token: &CancellationToken,
        query: &SearchQuery,
        cursor: Option<String>,
    ) -> Result<Vec<SongResult>, PipelineError> {
        let provider = self.provider.as_ref();
        let credentials = self.credentials.as_ref();
        let limit = self.options.result_limit;
        let cursor = cursor.as_deref();
        let outcome = cancellable(token, async {
            self.with_retries(
                move || provider.search(query, credentials, limit, cursor),
                SearchError::is_retryable,
            )
            .await
            .map_err(PipelineError::from)
        })
        .await;

        match outcome {
            Ok(page) => Ok(self.finish(generation, page)),
            Err(err) => Err(self.fail(generation, err)),
        }
    }

    /**
     * \brief 仅对网络类错误做有限次线性退避重试。
     */
    async fn with_retries<T, E, F, Fut>(
        &self,
        mut op: F,
        retryable: fn(&E) -> bool,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Err(err) if retryable(&err) && attempt < self.options.max_network_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %err, "network failure, retrying");
                    tokio::time::sleep(self.options.retry_backoff * attempt).await;
                }
                other => return other,
            }
        }
    }

    fn begin_locked(&self, inner: &mut Inner, state: PipelineState) -> CancellationToken {
        let token = CancellationToken::new();
        inner.generation += 1;
        inner.state = state;
        inner.error = None;
        inner.cancel = Some(token.clone());
        tracing::debug!(generation = inner.generation, ?state, "pipeline run started");
        token
    }

    fn advance(&self, generation: u64, state: PipelineState) {
        let mut inner = self.lock();
        if inner.generation == generation {
            tracing::debug!(?state, "pipeline advanced");
            inner.state = state;
        }
    }

    fn finish(&self, generation: u64, page: SearchPage) -> Vec<SongResult> {
        let mut inner = self.lock();
        // Stale runs never overwrite a newer result set.
        if inner.generation == generation {
            inner.state = PipelineState::Ready;
            inner.results = page.results.clone();
            inner.next_cursor = page.next_cursor;
            inner.cancel = None;
        }
        telemetry::log_event(
            "pipeline.ready",
            &format!("results={}", page.results.len()),
        );
        page.results
    }

    fn fail(&self, generation: u64, err: PipelineError) -> PipelineError {
        let mut inner = self.lock();
        if inner.generation != generation {
            return err;
        }
        inner.cancel = None;
        self.fail_locked(&mut inner, err)
    }

    fn fail_locked(&self, inner: &mut Inner, err: PipelineError) -> PipelineError {
        let kind = err.kind();
        inner.state = PipelineState::Failed(kind);
        inner.error = Some(err.user_notice());
        tracing::warn!(?kind, error = %err, "pipeline failed");
        telemetry::log_error("pipeline.failed", &format!("{:?}: {}", kind, err));
        err
    }
}

async fn cancellable<T, F>(token: &CancellationToken, fut: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(PipelineError::Cancelled),
        result = fut => result,
    }
}
