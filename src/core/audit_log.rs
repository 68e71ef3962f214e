//! Append-only audit log.
//!
//! Events are stored as newline-delimited JSON (JSONL) for simplicity
//! and easy inspection. Each event carries a digest chained to the
//! previous one, so edits to past lines are detectable.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use fs2::FileExt;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::AuditEvent;

/// Sink accepting audit events
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append an event; the sink assigns its chained digest
    async fn append(&self, event: AuditEvent) -> Result<AuditEvent>;

    /// All events in append order
    async fn replay(&self) -> Result<Vec<AuditEvent>>;

    /// Events about `id`, directly or through their scope
    async fn list_for(&self, id: Uuid) -> Result<Vec<AuditEvent>> {
        let events = self.replay().await?;
        Ok(events.into_iter().filter(|e| e.concerns(id)).collect())
    }
}

/// Digest of `event` chained to `previous` (first 16 hex chars of SHA256)
pub fn chain_digest(previous: Option<&str>, event: &AuditEvent) -> Result<String> {
    let mut unsealed = event.clone();
    unsealed.digest = None;
    let json = serde_json::to_string(&unsealed).context("Failed to serialize event")?;

    let mut hasher = Sha256::new();
    hasher.update(previous.unwrap_or_default().as_bytes());
    hasher.update(json.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(&result[..8]))
}

/// Result of checking a log's digest chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStatus {
    Intact { events: usize },
    Broken { index: usize, event_id: Uuid },
}

/// Walk `events` recomputing every digest
pub fn verify_chain(events: &[AuditEvent]) -> Result<ChainStatus> {
    let mut previous: Option<String> = None;
    for (index, event) in events.iter().enumerate() {
        let expected = chain_digest(previous.as_deref(), event)?;
        if event.digest.as_deref() != Some(expected.as_str()) {
            return Ok(ChainStatus::Broken {
                index,
                event_id: event.id,
            });
        }
        previous = Some(expected);
    }
    Ok(ChainStatus::Intact {
        events: events.len(),
    })
}

/// File-based audit log using JSONL format
pub struct JsonlAuditLog {
    path: PathBuf,
}

impl JsonlAuditLog {
    /// Open (creating parent directories) the log at `path`
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create audit directory: {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    /// Open the log at the configured location
    pub async fn open_default() -> Result<Self> {
        Self::open(crate::config::audit_log_path()?).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check the digest chain of the whole file
    pub async fn verify(&self) -> Result<ChainStatus> {
        let events = self.replay().await?;
        verify_chain(&events)
    }
}

fn read_events(path: &Path) -> Result<Vec<AuditEvent>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open audit log: {}", path.display()))?;
    let mut events = Vec::new();

    for line in BufReader::new(file).lines() {
        let line = line.context("Failed to read audit log")?;
        if line.trim().is_empty() {
            continue;
        }
        let event: AuditEvent = serde_json::from_str(&line)
            .with_context(|| format!("Failed to parse audit event: {}", line))?;
        events.push(event);
    }

    Ok(events)
}

/// Append under an exclusive lock so concurrent writers keep the chain intact
fn append_locked(path: &Path, mut event: AuditEvent) -> Result<AuditEvent> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open audit log: {}", path.display()))?;

    file.lock_exclusive()
        .context("Failed to acquire file lock on audit log")?;

    let mut previous: Option<String> = None;
    for line in BufReader::new(&file).lines() {
        let line = line.context("Failed to read audit log")?;
        if line.trim().is_empty() {
            continue;
        }
        let sealed: AuditEvent = serde_json::from_str(&line)
            .with_context(|| format!("Failed to parse audit event: {}", line))?;
        previous = sealed.digest;
    }

    event.digest = Some(chain_digest(previous.as_deref(), &event)?);
    let json = serde_json::to_string(&event).context("Failed to serialize event")?;

    let mut writer = &file;
    writeln!(writer, "{}", json).context("Failed to write audit event")?;
    writer.flush().context("Failed to flush audit event")?;

    // Lock is released when file is dropped
    Ok(event)
}

#[async_trait]
impl AuditSink for JsonlAuditLog {
    async fn append(&self, event: AuditEvent) -> Result<AuditEvent> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || append_locked(&path, event))
            .await
            .context("Audit append task panicked")?
    }

    async fn replay(&self) -> Result<Vec<AuditEvent>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_events(&path))
            .await
            .context("Audit replay task panicked")?
    }
}

/// In-process audit log
#[derive(Default)]
pub struct MemoryAuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn append(&self, mut event: AuditEvent) -> Result<AuditEvent> {
        let mut events = self.events.lock().await;
        let previous = events.last().and_then(|e| e.digest.clone());
        event.digest = Some(chain_digest(previous.as_deref(), &event)?);
        events.push(event.clone());
        Ok(event)
    }

    async fn replay(&self) -> Result<Vec<AuditEvent>> {
        Ok(self.events.lock().await.clone())
    }
}
