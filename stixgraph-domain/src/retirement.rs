//! Bulk retirement of indicators
//!
//! Walks every indicator page by page in creation order and deletes each
//! page concurrently before fetching the next one. The cursor of the last
//! completed page can be kept in a [`CursorCheckpoint`] so an interrupted
//! run resumes where it stopped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use stixgraph_core::{system_clock, EntityType, PagingArgs, SharedClock, DEFAULT_PAGE_SIZE};
use stixgraph_store::{SharedStore, StoreError};

use crate::{DomainError, INDICATOR_SEARCH_FIELDS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetirementConfig {
    /// Indicators fetched and deleted per page
    pub page_size: usize,
}

impl Default for RetirementConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Where the pump keeps the cursor of its last completed page
#[async_trait]
pub trait CursorCheckpoint: Send + Sync {
    async fn load(&self) -> Result<Option<String>, DomainError>;

    async fn save(&self, cursor: &str) -> Result<(), DomainError>;

    async fn clear(&self) -> Result<(), DomainError>;
}

/// Thread-safe reference to a checkpoint
pub type SharedCheckpoint = Arc<dyn CursorCheckpoint>;

/// Keeps nothing; every run starts from the beginning
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCheckpoint;

#[async_trait]
impl CursorCheckpoint for NoCheckpoint {
    async fn load(&self) -> Result<Option<String>, DomainError> {
        Ok(None)
    }

    async fn save(&self, _cursor: &str) -> Result<(), DomainError> {
        Ok(())
    }

    async fn clear(&self) -> Result<(), DomainError> {
        Ok(())
    }
}

/// Checkpoint living as long as the process
#[derive(Debug, Default)]
pub struct MemoryCheckpoint {
    cursor: Mutex<Option<String>>,
}

impl MemoryCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<String> {
        self.cursor.lock().clone()
    }
}

#[async_trait]
impl CursorCheckpoint for MemoryCheckpoint {
    async fn load(&self) -> Result<Option<String>, DomainError> {
        Ok(self.current())
    }

    async fn save(&self, cursor: &str) -> Result<(), DomainError> {
        *self.cursor.lock() = Some(cursor.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<(), DomainError> {
        self.cursor.lock().take();
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointRecord {
    cursor: String,
    saved_at: DateTime<Utc>,
}

/// Checkpoint stored as a small JSON file
#[derive(Clone)]
pub struct FileCheckpoint {
    path: PathBuf,
    clock: SharedClock,
}

impl FileCheckpoint {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling of the checkpoint with `.tmp` appended to the full file name
    fn staging_path(&self) -> PathBuf {
        let mut staging = OsString::from(self.path.as_os_str());
        staging.push(".tmp");
        PathBuf::from(staging)
    }

    fn checkpoint_error(&self, action: &str, e: impl std::fmt::Display) -> DomainError {
        DomainError::Checkpoint(format!(
            "cannot {} {}: {}",
            action,
            self.path.display(),
            e
        ))
    }
}

#[async_trait]
impl CursorCheckpoint for FileCheckpoint {
    async fn load(&self) -> Result<Option<String>, DomainError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.checkpoint_error("read", e)),
        };
        let record: CheckpointRecord =
            serde_json::from_str(&content).map_err(|e| self.checkpoint_error("parse", e))?;
        Ok(Some(record.cursor))
    }

    async fn save(&self, cursor: &str) -> Result<(), DomainError> {
        let record = CheckpointRecord {
            cursor: cursor.to_string(),
            saved_at: self.clock.now(),
        };
        let body =
            serde_json::to_vec_pretty(&record).map_err(|e| self.checkpoint_error("encode", e))?;

        // Replaced atomically via rename
        let staging = self.staging_path();
        tokio::fs::write(&staging, body)
            .await
            .map_err(|e| self.checkpoint_error("write", e))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|e| self.checkpoint_error("replace", e))
    }

    async fn clear(&self) -> Result<(), DomainError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.checkpoint_error("remove", e)),
        }
    }
}

/// Outcome of one retirement run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetirementReport {
    pub pages: usize,
    pub deleted: usize,
    /// Entities that were already gone when their delete ran
    pub already_missing: usize,
    pub resumed_from: Option<String>,
}

pub struct RetirementPump {
    store: SharedStore,
    config: RetirementConfig,
    checkpoint: SharedCheckpoint,
    running: AsyncMutex<()>,
}

impl RetirementPump {
    pub fn new(store: SharedStore, config: RetirementConfig, checkpoint: SharedCheckpoint) -> Self {
        Self {
            store,
            config,
            checkpoint,
            running: AsyncMutex::new(()),
        }
    }

    /// Delete every indicator
    ///
    /// A failed fetch or delete aborts the run; the checkpoint then holds
    /// the cursor of the last page that was fully deleted.
    pub async fn clear(&self) -> Result<RetirementReport, DomainError> {
        if self.config.page_size == 0 {
            return Err(DomainError::InvalidInput(
                "retirement page size must be at least 1".to_string(),
            ));
        }
        let _running = self.running.lock().await;

        let resumed_from = self.checkpoint.load().await?;
        if let Some(cursor) = &resumed_from {
            info!("Resuming retirement after cursor {}", cursor);
        }

        let mut report = RetirementReport {
            resumed_from: resumed_from.clone(),
            ..Default::default()
        };
        let mut cursor = resumed_from;

        loop {
            let args = PagingArgs::default()
                .first(self.config.page_size)
                .after(cursor.clone());
            let page = self
                .store
                .list_entities(&[EntityType::Indicator], INDICATOR_SEARCH_FIELDS, &args)
                .await?;

            if page.edges.is_empty() {
                debug!("Empty page, retirement done");
                break;
            }

            let outcomes =
                try_join_all(page.edges.iter().map(|edge| self.retire(edge.node.id()))).await?;
            let deleted = outcomes.iter().filter(|d| **d).count();
            report.deleted += deleted;
            report.already_missing += outcomes.len() - deleted;
            report.pages += 1;

            cursor = page.last_cursor().map(str::to_string);
            if let Some(cursor) = &cursor {
                self.checkpoint.save(cursor).await?;
            }
            debug!(
                "Retired page {} ({} indicators, {} so far)",
                report.pages,
                outcomes.len(),
                report.deleted
            );

            if !page.page_info.has_next_page {
                break;
            }
        }

        self.checkpoint.clear().await?;
        info!(
            "Retired {} indicators over {} pages ({} already missing)",
            report.deleted, report.pages, report.already_missing
        );
        Ok(report)
    }

    /// `false` when the entity was already gone
    async fn retire(&self, id: &str) -> Result<bool, DomainError> {
        match self.store.delete_entity_by_id(id).await {
            Ok(()) => Ok(true),
            Err(StoreError::NotFound(_)) => {
                debug!("Indicator {} already deleted", id);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
