use anyhow::Result;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::{thread, time::Duration};

use crate::config::{AppConfig, CredentialSource};
use crate::models::CredentialKey;

/**
 * \brief 服务商密钥的键值存储。
 * \details 缺失是正常状态；写入失败只记录日志，不向调用方报错。空字符串等同于清除。
 */
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: CredentialKey) -> Option<String>;
    fn set(&self, key: CredentialKey, secret: &str);

    /** \brief 返回第一个缺失的键。 */
    fn first_missing(&self, keys: &[CredentialKey]) -> Option<CredentialKey> {
        keys.iter().copied().find(|k| self.get(*k).is_none())
    }
}

/**
 * \brief 仅存在于内存的存储，用于测试或临时会话。
 */
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    values: RwLock<HashMap<CredentialKey, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(pairs: &[(CredentialKey, &str)]) -> Self {
        let store = Self::new();
        for (k, v) in pairs {
            store.set(*k, v);
        }
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: CredentialKey) -> Option<String> {
        self.values.read().ok()?.get(&key).cloned()
    }

    fn set(&self, key: CredentialKey, secret: &str) {
        if let Ok(mut guard) = self.values.write() {
            if secret.is_empty() {
                guard.remove(&key);
            } else {
                guard.insert(key, secret.to_string());
            }
        }
    }
}

/**
 * \brief 部署内置的凭据：启动时从环境变量快照，修改仅在本次会话有效。
 */
#[derive(Debug, Default)]
pub struct EmbeddedCredentialStore {
    inner: MemoryCredentialStore,
}

impl EmbeddedCredentialStore {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let inner = MemoryCredentialStore::new();
        for key in CredentialKey::ALL {
            if let Some(value) = lookup(key.env_var()) {
                inner.set(key, value.trim());
            }
        }
        Self { inner }
    }
}

impl CredentialStore for EmbeddedCredentialStore {
    fn get(&self, key: CredentialKey) -> Option<String> {
        self.inner.get(key)
    }

    fn set(&self, key: CredentialKey, secret: &str) {
        self.inner.set(key, secret);
    }
}

/**
 * \brief 用户录入的凭据，持久化到本地 SQLite 文件，每次修改即写回。
 */
pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
}

impl SqliteCredentialStore {
    /**
     * \brief 打开（必要时创建）数据库文件并执行迁移。
     */
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn try_get(&self, key: CredentialKey) -> Result<Option<String>> {
        let conn = self.lock();
        let value = conn
            .query_row(
                "SELECT value FROM credentials WHERE key=?1",
                params![key.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value.filter(|v| !v.is_empty()))
    }

    fn try_set(&self, key: CredentialKey, secret: &str) -> Result<()> {
        let conn = self.lock();
        if secret.is_empty() {
            retry_on_locked(|| {
                conn.execute(
                    "DELETE FROM credentials WHERE key=?1",
                    params![key.as_str()],
                )
            })?;
        } else {
            retry_on_locked(|| {
                conn.execute(
                    "INSERT INTO credentials (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value=excluded.value",
                    params![key.as_str(), secret],
                )
            })?;
        }
        Ok(())
    }

    /** \brief 读取遥测开关。 */
    pub fn telemetry_enabled(&self) -> Result<bool> {
        get_bool_config(&self.lock(), "telemetry_enabled", false)
    }

    /** \brief 持久化遥测开关。 */
    pub fn set_telemetry_enabled(&self, enabled: bool) -> Result<()> {
        set_bool_config(&self.lock(), "telemetry_enabled", enabled)
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn get(&self, key: CredentialKey) -> Option<String> {
        match self.try_get(key) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "credential read failed");
                None
            }
        }
    }

    fn set(&self, key: CredentialKey, secret: &str) {
        if let Err(err) = self.try_set(key, secret) {
            tracing::warn!(key = %key, error = %err, "credential write failed");
        }
    }
}

/**
 * \brief 按配置的凭据来源构建存储。`settings` 为用户录入模式下复用的数据库。
 */
pub fn open_store(
    config: &AppConfig,
    settings: Arc<SqliteCredentialStore>,
) -> Arc<dyn CredentialStore> {
    match config.credential_source {
        CredentialSource::Embedded => Arc::new(EmbeddedCredentialStore::from_env()),
        CredentialSource::UserSupplied => settings,
    }
}

/**
 * \brief 创建凭据表与配置表。
 */
fn migrate(conn: &Connection) -> Result<()> {
    retry_on_locked(|| {
        conn.execute_batch(
            r#"
        CREATE TABLE IF NOT EXISTS credentials (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS app_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
        )
    })?;
    Ok(())
}

fn set_bool_config(conn: &Connection, key: &str, value: bool) -> Result<()> {
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO app_config (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, if value { "1" } else { "0" }],
        )
    })?;
    Ok(())
}

fn get_bool_config(conn: &Connection, key: &str, default: bool) -> Result<bool> {
    let val = conn
        .query_row(
            "SELECT value FROM app_config WHERE key=?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(val.map(|s| s == "1").unwrap_or(default))
}

/**
 * \brief 针对 SQLite 锁冲突的重试助手，线性退避，最多尝试 6 次。
 */
fn retry_on_locked<T, F>(mut action: F) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    const MAX_RETRIES: usize = 5;
    let mut attempt = 0;
    loop {
        match action() {
            Ok(value) => return Ok(value),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) && attempt < MAX_RETRIES =>
            {
                attempt += 1;
                thread::sleep(Duration::from_millis(200 * attempt as u64));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_store_roundtrip_and_clear() {
        let store = SqliteCredentialStore::open_in_memory().expect("open store");
        assert_eq!(store.get(CredentialKey::GeminiApiKey), None);

        store.set(CredentialKey::GeminiApiKey, "g-1");
        store.set(CredentialKey::GeminiApiKey, "g-2");
        assert_eq!(store.get(CredentialKey::GeminiApiKey).as_deref(), Some("g-2"));
        assert_eq!(store.get(CredentialKey::YoutubeApiKey), None);

        store.set(CredentialKey::GeminiApiKey, "");
        assert_eq!(store.get(CredentialKey::GeminiApiKey), None);
    }

    #[test]
    fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("vibetune.db");
        {
            let store = SqliteCredentialStore::open(&path).expect("open");
            store.set(CredentialKey::SpotifyClientId, "client-id");
            store.set_telemetry_enabled(true).expect("telemetry");
        }
        let store = SqliteCredentialStore::open(&path).expect("reopen");
        assert_eq!(
            store.get(CredentialKey::SpotifyClientId).as_deref(),
            Some("client-id")
        );
        assert!(store.telemetry_enabled().expect("read telemetry"));
    }

    #[test]
    fn test_any_string_is_accepted() {
        let store = MemoryCredentialStore::new();
        store.set(CredentialKey::YoutubeApiKey, "  not a real key ✓ ");
        assert_eq!(
            store.get(CredentialKey::YoutubeApiKey).as_deref(),
            Some("  not a real key ✓ ")
        );
    }

    #[test]
    fn test_embedded_store_reads_env_snapshot() {
        let store = EmbeddedCredentialStore::from_lookup(|name| match name {
            "VIBETUNE_GEMINI_API_KEY" => Some(" g-key ".to_string()),
            "VIBETUNE_YOUTUBE_API_KEY" => Some("".to_string()),
            _ => None,
        });
        assert_eq!(store.get(CredentialKey::GeminiApiKey).as_deref(), Some("g-key"));
        assert_eq!(store.get(CredentialKey::YoutubeApiKey), None);
        assert_eq!(
            store.first_missing(&[CredentialKey::GeminiApiKey, CredentialKey::YoutubeApiKey]),
            Some(CredentialKey::YoutubeApiKey)
        );
    }
}
