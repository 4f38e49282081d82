use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{Duration as ChronoDuration, Utc};
use thiserror::Error;

use crate::item::{CatalogItem, ExtractionStatus, ItemKind, NewItem, QueuePolicy};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog document error: {0}")]
    Document(#[from] serde_json::Error),

    #[error("no catalog document for item '{0}'")]
    UnknownItem(String),
}

/// Result of a metadata upsert during a library scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Added,
    Updated,
    /// The reported source file does not exist here; nothing was written.
    SkippedMissingSource,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogStats {
    pub total: usize,
    pub extracted: usize,
    pub failed: usize,
    pub pending: usize,
}

/// Disk usage summary of the data directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageInfo {
    pub binary_count: usize,
    pub binary_bytes: u64,
    pub item_count: usize,
}

/// Enumeration parameters for [`Catalog::items_needing_extraction`].
#[derive(Debug, Clone, Copy)]
pub struct QueueFilter {
    pub policy: QueuePolicy,
    pub limit: Option<usize>,
    /// Exclude items the server added more than this many days ago.
    pub max_age_days: Option<f64>,
}

/// Directory-backed item store.
pub struct Catalog {
    items_dir: PathBuf,
    binaries_dir: PathBuf,
}

impl Catalog {
    /// Open (creating directories as needed) the catalog under `data_dir`.
    ///
    /// # Errors
    ///
    /// Fails if the directories cannot be created.
    pub fn open(data_dir: &Path) -> Result<Self, CatalogError> {
        let items_dir = data_dir.join("items");
        let binaries_dir = data_dir.join("binaries");
        fs::create_dir_all(&items_dir)?;
        fs::create_dir_all(&binaries_dir)?;
        Ok(Self {
            items_dir,
            binaries_dir,
        })
    }

    #[must_use]
    pub fn binary_path(&self, item_id: &str) -> PathBuf {
        self.binaries_dir.join(format!("{item_id}.bin"))
    }

    #[must_use]
    pub fn item_path(&self, item_id: &str) -> PathBuf {
        self.items_dir.join(format!("{item_id}.json"))
    }

    /// Load one document; `Ok(None)` when it does not exist, an error only
    /// for i/o or an unparseable document.
    pub fn load_item(&self, item_id: &str) -> Result<Option<CatalogItem>, CatalogError> {
        let path = self.item_path(item_id);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Create or refresh an item document from a library scan.
    ///
    /// Extraction state and the first-seen time of an existing document
    /// survive the refresh; a scan can never un-fail or un-complete an
    /// item.
    pub fn upsert_item(&self, incoming: &NewItem) -> Result<UpsertOutcome, CatalogError> {
        if !Path::new(&incoming.filepath).exists() {
            return Ok(UpsertOutcome::SkippedMissingSource);
        }

        let existing = self.load_item(&incoming.id).unwrap_or_else(|e| {
            tracing::warn!(item_id = %incoming.id, "replacing unreadable document: {e}");
            None
        });
        let outcome = if existing.is_some() {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Added
        };

        let now = Utc::now();
        let item = CatalogItem {
            id: incoming.id.clone(),
            library_id: incoming.library_id.clone(),
            name: incoming.name.clone(),
            item_type: incoming.item_type.clone(),
            kind: ItemKind::from_server_type(&incoming.item_type),
            filepath: incoming.filepath.clone(),
            jellyfin_date_created: incoming
                .jellyfin_date_created
                .clone()
                .or_else(|| existing.as_ref().and_then(|e| e.jellyfin_date_created.clone())),
            created_at: existing.as_ref().map_or(now, |e| e.created_at),
            updated_at: now,
            extraction_status: existing
                .as_ref()
                .map_or(ExtractionStatus::Pending, |e| e.extraction_status),
            extraction_error: existing.as_ref().and_then(|e| e.extraction_error.clone()),
            extraction_attempts: existing.as_ref().map_or(0, |e| e.extraction_attempts),
        };

        self.write_item(&item)?;
        Ok(outcome)
    }

    /// Record a successful extraction.
    pub fn mark_completed(&self, item_id: &str) -> Result<(), CatalogError> {
        self.update_status(item_id, ExtractionStatus::Completed, None)
    }

    /// Record a failed extraction; the item will not be retried.
    pub fn mark_failed(&self, item_id: &str, error: &str) -> Result<(), CatalogError> {
        self.update_status(item_id, ExtractionStatus::Failed, Some(error.to_string()))
    }

    /// Put a completed item back in the queue (stale-binary invalidation).
    pub fn mark_pending(&self, item_id: &str) -> Result<(), CatalogError> {
        let mut item = self
            .load_item(item_id)?
            .ok_or_else(|| CatalogError::UnknownItem(item_id.to_string()))?;
        item.extraction_status = ExtractionStatus::Pending;
        item.extraction_error = None;
        item.updated_at = Utc::now();
        self.write_item(&item)
    }

    fn update_status(
        &self,
        item_id: &str,
        status: ExtractionStatus,
        error: Option<String>,
    ) -> Result<(), CatalogError> {
        let mut item = self
            .load_item(item_id)?
            .ok_or_else(|| CatalogError::UnknownItem(item_id.to_string()))?;
        item.extraction_status = status;
        item.extraction_error = error;
        item.extraction_attempts += 1;
        item.updated_at = Utc::now();
        self.write_item(&item)
    }

    fn write_item(&self, item: &CatalogItem) -> Result<(), CatalogError> {
        let path = self.item_path(&item.id);
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(item)?;
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Is the binary for `item` present and at least as new as its source?
    #[must_use]
    pub fn binary_up_to_date(&self, item: &CatalogItem) -> bool {
        let Ok(bin_meta) = fs::metadata(self.binary_path(&item.id)) else {
            return false;
        };
        let Ok(src_meta) = fs::metadata(&item.filepath) else {
            // Source vanished; whatever binary exists is all we have.
            return true;
        };
        let bin_mtime = bin_meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let src_mtime = src_meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        bin_mtime >= src_mtime
    }

    /// Walk every document, skipping unreadable ones with a warning.
    fn scan_items(&self) -> Vec<CatalogItem> {
        let mut items = Vec::new();
        let entries = match fs::read_dir(&self.items_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("cannot read items directory: {e}");
                return items;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match fs::read_to_string(&path).map_err(CatalogError::from).and_then(|c| {
                serde_json::from_str::<CatalogItem>(&c).map_err(CatalogError::from)
            }) {
                Ok(item) => items.push(item),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "skipping unreadable document: {e}");
                }
            }
        }
        items
    }

    /// Items the scheduler should extract, ordered by policy.
    ///
    /// Skips failed items, items whose source file is gone, items outside
    /// the age window, and items whose binary is already up to date.
    #[must_use]
    pub fn items_needing_extraction(&self, filter: &QueueFilter) -> Vec<CatalogItem> {
        let now = Utc::now();
        let mut queue: Vec<CatalogItem> = self
            .scan_items()
            .into_iter()
            .filter(|item| item.extraction_status != ExtractionStatus::Failed)
            .filter(|item| Path::new(&item.filepath).exists())
            .filter(|item| {
                let Some(max_age_days) = filter.max_age_days else {
                    return true;
                };
                if max_age_days <= 0.0 {
                    return true;
                }
                let age = now.signed_duration_since(item.library_date());
                age <= ChronoDuration::seconds((max_age_days * 86_400.0) as i64)
            })
            .filter(|item| !self.binary_up_to_date(item))
            .collect();

        filter.policy.order(&mut queue);
        if let Some(limit) = filter.limit {
            queue.truncate(limit);
        }
        queue
    }

    /// Progress counters for the scheduler's status log.
    #[must_use]
    pub fn stats(&self) -> CatalogStats {
        let mut stats = CatalogStats::default();
        for item in self.scan_items() {
            if !Path::new(&item.filepath).exists() {
                continue;
            }
            stats.total += 1;
            match item.extraction_status {
                ExtractionStatus::Failed => stats.failed += 1,
                _ if self.binary_path(&item.id).exists() => stats.extracted += 1,
                _ => stats.pending += 1,
            }
        }
        stats
    }

    /// Disk usage of binaries and documents.
    #[must_use]
    pub fn storage_info(&self) -> StorageInfo {
        let mut info = StorageInfo::default();
        if let Ok(entries) = fs::read_dir(&self.binaries_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "bin") {
                    info.binary_count += 1;
                    info.binary_bytes += entry.metadata().map_or(0, |m| m.len());
                }
            }
        }
        if let Ok(entries) = fs::read_dir(&self.items_dir) {
            info.item_count = entries
                .flatten()
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
                .count();
        }
        info
    }

    /// Delete binaries left behind by an interrupted extraction: any
    /// `.bin` whose magic does not parse and any stray `.tmp`. Returns the
    /// number of files removed.
    pub fn sweep_orphan_binaries(&self) -> usize {
        let mut removed = 0;
        let Ok(entries) = fs::read_dir(&self.binaries_dir) else {
            return 0;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_tmp = path.extension().is_some_and(|ext| ext == "tmp");
            let is_bad_bin = path.extension().is_some_and(|ext| ext == "bin")
                && !ambi_codec::probe_magic(&path);
            if is_tmp || is_bad_bin {
                match fs::remove_file(&path) {
                    Ok(()) => {
                        tracing::info!(path = %path.display(), "removed orphan binary");
                        removed += 1;
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), "cannot remove orphan: {e}");
                    }
                }
            }
        }
        removed
    }
}
