//! # History Store
//!
//! Registro durevole delle conversioni completate, con statistiche aggregate.
//!
//! ## Responsabilità:
//! - `HistoryItem` creato una sola volta, al successo di un job
//! - Append-only, salvo cancellazione esplicita (`remove`, `clear`)
//! - Ordine di inserimento su disco, visualizzazione dal più recente
//! - Aggregati come fold puri sugli elementi, senza cache
//! - Persistenza atomica (file temporaneo + rename)
//! - Migrazione automatica del vecchio formato `processed_files`
//!
//! ## Concorrenza:
//! `tokio::sync::RwLock`: letture concorrenti, scritture serializzate. Il
//! lock in scrittura resta acquisito fino al termine del salvataggio.
//!
//! ## Formato su disco (versione 2):
//! ```json
//! {
//!   "version": 2,
//!   "items": [
//!     {
//!       "id": "6f1c…",
//!       "file_name": "scan.pdf",
//!       "original_size": 300000000,
//!       "compressed_size": 92000000,
//!       "savings_percent": 69,
//!       "processed_at": "2024-05-01T10:00:00Z",
//!       "preset_used": "mail"
//!     }
//!   ]
//! }
//! ```

use crate::error::{OptimizeError, Result};
use crate::options::Preset;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

const FORMAT_VERSION: u32 = 2;

/// `round(100 * (1 - compressed / original))`, clamped to [0, 100]
pub fn savings_percent(original_size: u64, compressed_size: u64) -> u8 {
    if original_size == 0 {
        return 0;
    }
    let ratio = compressed_size as f64 / original_size as f64;
    (100.0 * (1.0 - ratio)).round().clamp(0.0, 100.0) as u8
}

/// One completed conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: Uuid,
    pub file_name: String,
    pub original_size: u64,
    pub compressed_size: u64,
    pub savings_percent: u8,
    pub processed_at: DateTime<Utc>,
    pub preset_used: Preset,
}

impl HistoryItem {
    pub fn new(file_name: impl Into<String>, original_size: u64, compressed_size: u64, preset_used: Preset) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_name: file_name.into(),
            original_size,
            compressed_size,
            savings_percent: savings_percent(original_size, compressed_size),
            processed_at: Utc::now(),
            preset_used,
        }
    }

    pub fn saved_bytes(&self) -> u64 {
        self.original_size.saturating_sub(self.compressed_size)
    }

    /// Recompute the savings of a record read from disk. Sizes are the
    /// source of truth; without an original size the stored value is clamped.
    fn normalized(mut self) -> Self {
        self.savings_percent = if self.original_size > 0 {
            savings_percent(self.original_size, self.compressed_size)
        } else {
            self.savings_percent.min(100)
        };
        self
    }
}

/// Σ max(0, original - compressed)
pub fn total_saved_bytes(items: &[HistoryItem]) -> u64 {
    items.iter().map(HistoryItem::saved_bytes).sum()
}

/// Rounded mean of the savings, or `empty_default` with no items
pub fn average_savings_percent(items: &[HistoryItem], empty_default: u8) -> u8 {
    if items.is_empty() {
        return empty_default;
    }
    let sum: f64 = items.iter().map(|item| item.savings_percent as f64).sum();
    (sum / items.len() as f64).round() as u8
}

pub fn best_savings_percent(items: &[HistoryItem]) -> Option<u8> {
    items.iter().map(|item| item.savings_percent).max()
}

/// Aggregate view used by reports
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryStats {
    pub count: usize,
    pub total_saved_bytes: u64,
    pub average_savings_percent: u8,
    pub best_savings_percent: Option<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct HistoryDocument {
    version: u32,
    items: Vec<HistoryItem>,
}

/// Record of the original state-file format
#[derive(Debug, Deserialize)]
struct LegacyRecord {
    path: PathBuf,
    original_size: u64,
    optimized_size: u64,
    #[serde(default)]
    reduction_percent: f64,
    processed_at: i64,
}

#[derive(Debug, Deserialize)]
struct LegacyDocument {
    processed_files: HashMap<String, LegacyRecord>,
}

impl LegacyRecord {
    fn into_item(self) -> HistoryItem {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string());
        let savings = if self.original_size > 0 {
            savings_percent(self.original_size, self.optimized_size)
        } else {
            self.reduction_percent.round().clamp(0.0, 100.0) as u8
        };
        HistoryItem {
            id: Uuid::new_v4(),
            file_name,
            original_size: self.original_size,
            compressed_size: self.optimized_size,
            savings_percent: savings,
            processed_at: DateTime::from_timestamp(self.processed_at, 0).unwrap_or_default(),
            preset_used: Preset::Custom,
        }
    }
}

/// Parse either format. The flag is set when a version-1 document was
/// migrated.
fn parse_document(content: &str) -> Result<(Vec<HistoryItem>, bool)> {
    let value: serde_json::Value =
        serde_json::from_str(content).map_err(|e| OptimizeError::History(format!("invalid history file: {}", e)))?;

    if value.get("processed_files").is_some() {
        let legacy: LegacyDocument = serde_json::from_value(value)
            .map_err(|e| OptimizeError::History(format!("invalid legacy history: {}", e)))?;
        let mut records: Vec<LegacyRecord> = legacy.processed_files.into_values().collect();
        records.sort_by_key(|record| record.processed_at);
        info!("📦 Migrating {} legacy history records", records.len());
        let items = records
            .into_iter()
            .map(|record| record.into_item().normalized())
            .collect();
        return Ok((items, true));
    }

    let document: HistoryDocument = serde_json::from_value(value)
        .map_err(|e| OptimizeError::History(format!("invalid history file: {}", e)))?;
    if document.version > FORMAT_VERSION {
        return Err(OptimizeError::History(format!(
            "history version {} is newer than supported version {}",
            document.version, FORMAT_VERSION
        )));
    }
    let items = document.items.into_iter().map(HistoryItem::normalized).collect();
    Ok((items, false))
}

/// Write `items` next to `path` and rename over it
fn persist_atomically(path: &Path, items: &[HistoryItem]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let document = HistoryDocument {
        version: FORMAT_VERSION,
        items: items.to_vec(),
    };
    let content = serde_json::to_vec_pretty(&document)
        .map_err(|e| OptimizeError::History(e.to_string()))?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(&content)?;
    temp.as_file().sync_all()?;
    temp.persist(path)
        .map_err(|e| OptimizeError::History(format!("could not replace {}: {}", path.display(), e)))?;
    Ok(())
}

/// Durable, queryable log of completed conversions
#[derive(Debug)]
pub struct HistoryStore {
    /// None keeps the store in memory only
    path: Option<PathBuf>,
    items: RwLock<Vec<HistoryItem>>,
    empty_average_percent: u8,
}

impl HistoryStore {
    /// Load the store at `path`. A missing file is an empty history; a
    /// legacy file is migrated and rewritten in the current format.
    pub async fn open(path: &Path, empty_average_percent: u8) -> Result<Self> {
        let (items, migrated) = match fs::read_to_string(path).await {
            Ok(content) => parse_document(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (Vec::new(), false),
            Err(e) => return Err(e.into()),
        };
        debug!("Loaded {} history items from {}", items.len(), path.display());

        let store = Self {
            path: Some(path.to_path_buf()),
            items: RwLock::new(items),
            empty_average_percent,
        };
        if migrated {
            let items = store.items.read().await;
            store.persist(&items).await?;
        }
        Ok(store)
    }

    pub fn in_memory(empty_average_percent: u8) -> Self {
        Self {
            path: None,
            items: RwLock::new(Vec::new()),
            empty_average_percent,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn persist(&self, items: &[HistoryItem]) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        let items = items.to_vec();
        tokio::task::spawn_blocking(move || persist_atomically(&path, &items)).await?
    }

    /// Append a record. Nothing is kept if it cannot be persisted.
    pub async fn append(&self, item: HistoryItem) -> Result<()> {
        let mut items = self.items.write().await;
        items.push(item);
        if let Err(e) = self.persist(&items).await {
            items.pop();
            return Err(e);
        }
        Ok(())
    }

    /// Every record, most recent first
    pub async fn all(&self) -> Vec<HistoryItem> {
        self.items.read().await.iter().rev().cloned().collect()
    }

    pub async fn recent(&self, limit: usize) -> Vec<HistoryItem> {
        self.items.read().await.iter().rev().take(limit).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Delete one record. Returns false when `id` is unknown.
    pub async fn remove(&self, id: Uuid) -> Result<bool> {
        let mut items = self.items.write().await;
        let Some(index) = items.iter().position(|item| item.id == id) else {
            return Ok(false);
        };
        let removed = items.remove(index);
        if let Err(e) = self.persist(&items).await {
            items.insert(index, removed);
            return Err(e);
        }
        Ok(true)
    }

    /// Delete every record, returning how many were removed
    pub async fn clear(&self) -> Result<usize> {
        let mut items = self.items.write().await;
        let previous = std::mem::take(&mut *items);
        if let Err(e) = self.persist(&items).await {
            *items = previous;
            return Err(e);
        }
        Ok(previous.len())
    }

    pub async fn total_saved_bytes(&self) -> u64 {
        total_saved_bytes(&self.items.read().await)
    }

    pub async fn average_savings_percent(&self) -> u8 {
        average_savings_percent(&self.items.read().await, self.empty_average_percent)
    }

    pub async fn best_savings_percent(&self) -> Option<u8> {
        best_savings_percent(&self.items.read().await)
    }

    pub async fn stats(&self) -> HistoryStats {
        let items = self.items.read().await;
        HistoryStats {
            count: items.len(),
            total_saved_bytes: total_saved_bytes(&items),
            average_savings_percent: average_savings_percent(&items, self.empty_average_percent),
            best_savings_percent: best_savings_percent(&items),
        }
    }
}
