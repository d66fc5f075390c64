use thiserror::Error;

use crate::models::CredentialKey;

/**
 * \brief 图片读取或格式识别失败。
 */
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("failed to read image {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported image type: {0}")]
    UnsupportedType(String),
    #[error("image file is empty")]
    Empty,
}

/**
 * \brief 推理步骤错误；网络、鉴权、空结果三类须可区分。
 */
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference endpoint unreachable: {0}")]
    Network(String),
    #[error("inference request unauthorized: {0}")]
    Unauthorized(String),
    #[error("inference returned no usable text")]
    EmptyResult,
}

impl InferenceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, InferenceError::Network(_))
    }
}

/**
 * \brief 搜索步骤错误。空结果列表不是错误。
 */
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("missing credential: {0}")]
    NoCredential(CredentialKey),
    #[error("search request unauthorized: {0}")]
    Unauthorized(String),
    #[error("search endpoint unreachable: {0}")]
    Network(String),
    #[error("malformed search response: {0}")]
    Malformed(String),
}

impl SearchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SearchError::Network(_))
    }
}

/**
 * \brief 在发起任何网络请求前即缺失的输入。
 */
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MissingInput {
    #[error("no image selected")]
    Image,
    #[error("credential {0} is not set")]
    Credential(CredentialKey),
    #[error("no previous search phrase to continue from")]
    Query,
}

/**
 * \brief 流水线失败原因，对应状态机的 Failed 状态。
 */
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    MissingInput(#[from] MissingInput),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error("a pipeline run is already in flight")]
    Busy,
    #[error("pipeline run cancelled")]
    Cancelled,
}

impl PipelineError {
    /** \brief 面向用户的单条提示。 */
    pub fn user_notice(&self) -> String {
        match self {
            PipelineError::MissingInput(MissingInput::Image) => {
                "Please choose a photo first.".to_string()
            }
            PipelineError::MissingInput(MissingInput::Credential(key)) => {
                format!("Please enter your {} first.", key)
            }
            PipelineError::MissingInput(MissingInput::Query) => {
                "Upload a photo before asking for more suggestions.".to_string()
            }
            PipelineError::Encoding(_) => "That file could not be read as an image.".to_string(),
            PipelineError::Inference(InferenceError::Network(_)) => {
                "Could not reach the image analysis service. Please try again.".to_string()
            }
            PipelineError::Inference(InferenceError::Unauthorized(_)) => {
                "The image analysis key was rejected. Please check it.".to_string()
            }
            PipelineError::Inference(InferenceError::EmptyResult) => {
                "Could not work out a vibe for this photo. Try another one.".to_string()
            }
            PipelineError::Search(SearchError::NoCredential(key)) => {
                format!("Please enter your {} first.", key)
            }
            PipelineError::Search(SearchError::Unauthorized(_)) => {
                "The music service rejected your credentials. Please check them.".to_string()
            }
            PipelineError::Search(SearchError::Network(_)) => {
                "Failed to fetch songs. Please try again.".to_string()
            }
            PipelineError::Search(SearchError::Malformed(_)) => {
                "The music service sent an unexpected response.".to_string()
            }
            PipelineError::Busy => "Still working on the previous photo.".to_string(),
            PipelineError::Cancelled => "Cancelled.".to_string(),
        }
    }
}

/**
 * \brief 失败类别，可复制，供状态机与界面判断。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    MissingInput,
    Encoding,
    InferenceNetwork,
    InferenceUnauthorized,
    InferenceEmptyResult,
    SearchNoCredential,
    SearchUnauthorized,
    SearchNetwork,
    SearchMalformed,
    Busy,
    Cancelled,
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::MissingInput(_) => FailureKind::MissingInput,
            PipelineError::Encoding(_) => FailureKind::Encoding,
            PipelineError::Inference(InferenceError::Network(_)) => FailureKind::InferenceNetwork,
            PipelineError::Inference(InferenceError::Unauthorized(_)) => {
                FailureKind::InferenceUnauthorized
            }
            PipelineError::Inference(InferenceError::EmptyResult) => {
                FailureKind::InferenceEmptyResult
            }
            PipelineError::Search(SearchError::NoCredential(_)) => FailureKind::SearchNoCredential,
            PipelineError::Search(SearchError::Unauthorized(_)) => FailureKind::SearchUnauthorized,
            PipelineError::Search(SearchError::Network(_)) => FailureKind::SearchNetwork,
            PipelineError::Search(SearchError::Malformed(_)) => FailureKind::SearchMalformed,
            PipelineError::Busy => FailureKind::Busy,
            PipelineError::Cancelled => FailureKind::Cancelled,
        }
    }
}
