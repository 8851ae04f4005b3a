//! 🗂️ Import sessions — the gateway's one and only piece of memory between requests.
//!
//! 🎬 *[a batch arrives. it asks: "is a run already going?"]*
//! *[the session store checks its notes. "yes. and the last finished index was idx1."]*
//! *["cool," says the batch, and gets to work.]*
//!
//! There is exactly ONE session, process-wide, keyed by nothing at all. Two
//! callers importing at once share it, race on it, and lose. That's the
//! single-writer contract: callers serialize batches of a run, the store only
//! promises that each individual load/save is whole.
//!
//! A session that sits untouched for longer than `ttl_secs` is considered
//! stale and loads as empty. Default: a month (2 678 400 s). 🦆

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

/// 📅 One month, in seconds. Long enough for a slow import. Short enough to forget eventually.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 2_678_400;

fn default_ttl_secs() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}

/// 📦 What the import protocol remembers between batches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSession {
    /// The index the alias points at after the last completed run. `None` before the first.
    pub old_index_name: Option<String>,
    /// True between the first batch of a run and its cutover.
    pub import_in_progress: bool,
    /// Unix seconds of the last save. Drives idle expiry.
    #[serde(default)]
    pub touched_at: u64,
}

impl ImportSession {
    fn is_stale(&self, ttl_secs: u64, now: u64) -> bool {
        now.saturating_sub(self.touched_at) > ttl_secs
    }
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// 🔧 Where the session lives.
#[derive(Debug, Deserialize, Clone)]
pub enum SessionConfig {
    File(FileSessionConfig),
    InMemory(InMemorySessionConfig),
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig::InMemory(InMemorySessionConfig::default())
    }
}

impl SessionConfig {
    pub fn ttl_secs(&self) -> u64 {
        match self {
            SessionConfig::File(file) => file.ttl_secs,
            SessionConfig::InMemory(mem) => mem.ttl_secs,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FileSessionConfig {
    pub path: PathBuf,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InMemorySessionConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for InMemorySessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_SESSION_TTL_SECS,
        }
    }
}

/// 🗂️ Load, save, forget. The whole contract.
///
/// - `load` returns an empty session when nothing was saved or the saved one went stale.
/// - `save` stamps `touched_at` and persists.
/// - `clear` forgets everything. Used by the reset operation.
#[async_trait]
pub trait SessionStore: std::fmt::Debug + Send + Sync {
    async fn load(&self) -> Result<ImportSession>;
    async fn save(&self, session: &ImportSession) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

/// 🧠 RAM-resident session. Gone on restart, which is sometimes exactly what you want.
#[derive(Debug, Clone)]
pub struct InMemorySessionStore {
    slot: Arc<Mutex<Option<ImportSession>>>,
    ttl_secs: u64,
}

impl InMemorySessionStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            ttl_secs,
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self) -> Result<ImportSession> {
        let slot = self.slot.lock().await;
        Ok(slot
            .as_ref()
            .filter(|session| !session.is_stale(self.ttl_secs, now_unix_secs()))
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, session: &ImportSession) -> Result<()> {
        let mut stamped = session.clone();
        stamped.touched_at = now_unix_secs();
        *self.slot.lock().await = Some(stamped);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.slot.lock().await = None;
        Ok(())
    }
}

/// 💾 JSON-file session. Survives restarts, deploys, and the occasional kernel panic.
///
/// Writes go to a sibling `.tmp` file first and are renamed into place,
/// so a crash mid-write leaves the previous session intact.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
    ttl_secs: u64,
    io_lock: Arc<Mutex<()>>,
}

impl FileSessionStore {
    pub fn new(path: PathBuf, ttl_secs: u64) -> Self {
        Self {
            path,
            ttl_secs,
            io_lock: Arc::new(Mutex::new(())),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        PathBuf::from(temp)
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> Result<ImportSession> {
        let _guard = self.io_lock.lock().await;
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("🗂️ No session file at '{}' yet. Fresh start.", self.path.display());
                return Ok(ImportSession::default());
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("💀 Could not read the import session from '{}'", self.path.display())
                });
            }
        };
        let session: ImportSession = serde_json::from_str(&raw).with_context(|| {
            format!(
                "💀 The import session file '{}' is not a session anymore. Somebody edited it by hand, didn't they.",
                self.path.display()
            )
        })?;
        if session.is_stale(self.ttl_secs, now_unix_secs()) {
            debug!("🗂️ Session at '{}' went stale. Treating it as empty.", self.path.display());
            return Ok(ImportSession::default());
        }
        Ok(session)
    }

    async fn save(&self, session: &ImportSession) -> Result<()> {
        let _guard = self.io_lock.lock().await;
        let mut stamped = session.clone();
        stamped.touched_at = now_unix_secs();
        let raw = serde_json::to_vec_pretty(&stamped).context("💀 Could not serialize the import session")?;

        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("💀 Could not create the session directory '{}'", parent.display())
            })?;
        }
        let temp = self.temp_path();
        tokio::fs::write(&temp, raw)
            .await
            .with_context(|| format!("💀 Could not write the session to '{}'", temp.display()))?;
        tokio::fs::rename(&temp, &self.path).await.with_context(|| {
            format!("💀 Could not move the session into place at '{}'", self.path.display())
        })?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.io_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| {
                format!("💀 Could not delete the session file '{}'", self.path.display())
            }),
        }
    }
}

/// 🎭 Session store dispatch, same trick as the search backends.
#[derive(Debug)]
pub enum SessionBackend {
    InMemory(InMemorySessionStore),
    File(FileSessionStore),
}

impl SessionBackend {
    pub fn from_config(config: &SessionConfig) -> Self {
        match config {
            SessionConfig::File(file) => {
                SessionBackend::File(FileSessionStore::new(file.path.clone(), file.ttl_secs))
            }
            SessionConfig::InMemory(mem) => SessionBackend::InMemory(InMemorySessionStore::new(mem.ttl_secs)),
        }
    }
}

#[async_trait]
impl SessionStore for SessionBackend {
    async fn load(&self) -> Result<ImportSession> {
        match self {
            SessionBackend::InMemory(store) => store.load().await,
            SessionBackend::File(store) => store.load().await,
        }
    }

    async fn save(&self, session: &ImportSession) -> Result<()> {
        match self {
            SessionBackend::InMemory(store) => store.save(session).await,
            SessionBackend::File(store) => store.save(session).await,
        }
    }

    async fn clear(&self) -> Result<()> {
        match self {
            SessionBackend::InMemory(store) => store.clear().await,
            SessionBackend::File(store) => store.clear().await,
        }
    }
}
