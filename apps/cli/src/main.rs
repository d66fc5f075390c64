use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vibetune_core_sdk::credentials;
use vibetune_core_sdk::error::{MissingInput, PipelineError};
use vibetune_core_sdk::prelude::*;

/**
 * \brief CLI 程序入口：上传照片，按氛围推荐歌曲。
 */
#[derive(Parser, Debug)]
#[command(name = "vibetune", version, about = "Photo vibe to song suggestions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 管理服务商密钥。
     */
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },

    /**
     * \brief 分析照片并推荐歌曲。
     * \param image    图片路径
     * \param language 偏好语言，如 Hindi、English
     * \param more     额外请求“更多推荐”的轮数
     */
    Suggest {
        #[arg(long)]
        image: PathBuf,
        #[arg(long, default_value = "")]
        language: String,
        #[arg(long)]
        provider: Option<ProviderChoice>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value_t = 0)]
        more: usize,
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /**
     * \brief 跳过图片分析直接搜索。
     * \details 用 `--query` 给出完整短语，或用 `--description`/`--mood` 加 `--language` 拼出短语，
     *          描述优先于心情。
     */
    Search {
        #[arg(long, conflicts_with_all = ["description", "mood"])]
        query: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        mood: Option<Mood>,
        #[arg(long, default_value = "")]
        language: String,
        #[arg(long)]
        provider: Option<ProviderChoice>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /**
     * \brief 开关本地遥测日志。
     */
    Telemetry {
        #[arg(value_parser = ["on", "off"])]
        state: String,
    },
}

#[derive(Subcommand, Debug)]
enum KeysAction {
    /** \brief 写入密钥；空字符串表示清除。 */
    Set { key: CredentialKey, value: String },
    /** \brief 列出已配置的密钥（打码显示）。 */
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env().context("load configuration failed")?;

    let settings = Arc::new(
        SqliteCredentialStore::open(&config.database_path())
            .context("open credential store failed")?,
    );
    telemetry::set_log_dir(config.log_dir());
    telemetry::set_enabled(settings.telemetry_enabled().unwrap_or(false));

    match cli.command {
        Commands::Keys { action } => {
            let store = credentials::open_store(&config, settings);
            match action {
                KeysAction::Set { key, value } => {
                    store.set(key, &value);
                    if config.credential_source == CredentialSource::Embedded {
                        println!("Set {} for this session only (embedded credentials)", key);
                    } else {
                        println!("Saved {}", key);
                    }
                }
                KeysAction::List => {
                    for key in CredentialKey::ALL {
                        let shown = store
                            .get(key)
                            .map(|v| mask(&v))
                            .unwrap_or_else(|| "(not set)".to_string());
                        println!("{:<22} {}", key, shown);
                    }
                }
            }
        }
        Commands::Suggest {
            image,
            language,
            provider,
            limit,
            more,
            json,
        } => {
            apply_overrides(&mut config, provider, limit)?;
            let store = credentials::open_store(&config, settings);
            let orchestrator = Orchestrator::from_config(&config, store)
                .context("build http client failed")?;

            let asset = ImageAsset::load(&image)
                .await
                .map_err(PipelineError::from)
                .map_err(notice)?;
            orchestrator.select_image(asset).map_err(notice)?;
            orchestrator.set_language(&language);

            let results = orchestrator.submit().await.map_err(notice)?;
            if let Some(query) = orchestrator.query() {
                if !json {
                    println!("Vibe: {}", query);
                }
            }
            print_results(&results, json)?;

            for _ in 0..more {
                let results = orchestrator.more_suggestions().await.map_err(notice)?;
                print_results(&results, json)?;
            }
        }
        Commands::Search {
            query,
            description,
            mood,
            language,
            provider,
            limit,
            json,
        } => {
            apply_overrides(&mut config, provider, limit)?;
            let store = credentials::open_store(&config, settings);
            let query = manual_query(query.as_deref(), description.as_deref(), mood, &language)?;
            if !json {
                println!("Searching: {}", query);
            }
            let provider =
                build_provider(config.provider, &config).context("build http client failed")?;
            if let Some(key) = store.first_missing(provider.required_credentials()) {
                return Err(notice(MissingInput::Credential(key).into()));
            }
            let page = provider
                .search(&query, store.as_ref(), config.result_limit, None)
                .await
                .map_err(PipelineError::from)
                .map_err(notice)?;
            print_results(&page.results, json)?;
        }
        Commands::Telemetry { state } => {
            let enabled = state == "on";
            settings
                .set_telemetry_enabled(enabled)
                .context("save telemetry failed")?;
            telemetry::set_enabled(enabled);
            println!("Telemetry {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    Ok(())
}

fn apply_overrides(
    config: &mut AppConfig,
    provider: Option<ProviderChoice>,
    limit: Option<usize>,
) -> Result<()> {
    if let Some(provider) = provider {
        config.provider = provider;
    }
    if let Some(limit) = limit {
        if limit == 0 {
            return Err(anyhow!("--limit must be at least 1"));
        }
        config.result_limit = limit;
    }
    Ok(())
}

fn manual_query(
    query: Option<&str>,
    description: Option<&str>,
    mood: Option<Mood>,
    language: &str,
) -> Result<SearchQuery> {
    if let Some(query) = query {
        return SearchQuery::new(query).ok_or_else(|| anyhow!("--query must not be empty"));
    }
    if language.trim().is_empty() {
        return Err(anyhow!("--language is required with --description or --mood"));
    }
    SearchQuery::from_mood(description, mood, language).ok_or_else(|| {
        let moods: Vec<&str> = Mood::ALL.iter().map(|m| m.as_str()).collect();
        anyhow!(
            "give --query, --description, or --mood ({})",
            moods.join(", ")
        )
    })
}

fn notice(err: PipelineError) -> anyhow::Error {
    tracing::debug!(error = %err, "command failed");
    anyhow!(err.user_notice())
}

fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

fn print_results(results: &[SongResult], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("No songs found.");
    }
    for (i, song) in results.iter().enumerate() {
        let artists = if song.artists.is_empty() {
            String::new()
        } else {
            format!(" - {}", song.artists.join(", "))
        };
        println!("{}. {}{}", i + 1, song.title, artists);
        println!("   {}", song.playback_url);
    }
    Ok(())
}
