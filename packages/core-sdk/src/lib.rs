pub mod config;
pub mod credentials;
pub mod encoder;
pub mod error;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod providers;
pub mod telemetry;

/**
 * \brief SDK 预导入集合，方便外部引用常用类型。
 */
pub mod prelude {
    pub use crate::config::{AppConfig, CredentialSource};
    pub use crate::credentials::{
        CredentialStore, EmbeddedCredentialStore, MemoryCredentialStore, SqliteCredentialStore,
    };
    pub use crate::error::{FailureKind, PipelineError};
    pub use crate::llm::{GeminiDescriber, VibeDescriber};
    pub use crate::models::{
        CredentialKey, ImageAsset, Mood, ProviderChoice, SearchQuery, SongResult,
    };
    pub use crate::pipeline::{Orchestrator, PipelineOptions, PipelineSnapshot, PipelineState};
    pub use crate::providers::{build_provider, MusicProvider};
    pub use crate::telemetry;
}
