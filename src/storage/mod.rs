use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::{StatsError, StatsResult};

pub mod resolver;

use resolver::{default_strategies, ResolveStrategy};

pub const META_SUFFIX: &str = ".meta.json";
const DATASET_EXTENSIONS: [&str; 3] = ["xlsx", "xls", "csv"];

/// Sidecar describing one uploaded dataset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetadataRecord {
    pub id: String,
    pub filename: String,
    pub path: PathBuf,
    /// Absent in records written by older uploaders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl MetadataRecord {
    pub fn new(id: &str, filename: &str, path: PathBuf) -> Self {
        Self {
            id: id.to_string(),
            filename: filename.to_string(),
            path,
            uploaded_at: Some(Utc::now()),
        }
    }

    pub fn read_from(path: &Path) -> StatsResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| StatsError::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| {
            StatsError::parse(format!("malformed metadata {}: {}", path.display(), e))
        })
    }

    /// Write `{id}.meta.json` in `dir`.
    ///
    /// Atomic write pattern: write to a temp file, then rename over the final
    /// name, so a concurrent reader sees either the old or the new record.
    pub fn write_atomic(&self, dir: &Path) -> StatsResult<PathBuf> {
        let final_path = dir.join(format!("{}{}", self.id, META_SUFFIX));
        let temp_path = dir.join(format!("{}{}.tmp", self.id, META_SUFFIX));

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| StatsError::parse(format!("cannot encode metadata: {}", e)))?;
        std::fs::write(&temp_path, json).map_err(|e| StatsError::io(&temp_path, e))?;
        std::fs::rename(&temp_path, &final_path).map_err(|e| StatsError::io(&final_path, e))?;

        debug!("Metadata written to {}", final_path.display());
        Ok(final_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntryInfo {
    pub name: String,
    pub is_file: bool,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetFileInfo {
    pub name: String,
    pub stem: String,
    pub suffix: String,
}

/// Diagnostic snapshot of the data directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugInfo {
    pub data_dir: String,
    pub exists: bool,
    pub files: Vec<DirEntryInfo>,
    pub metadata_files: Vec<String>,
    pub dataset_files: Vec<DatasetFileInfo>,
}

/// File-backed dataset storage rooted at the configured data directory
pub struct DatasetStore {
    base_dir: PathBuf,
    strategies: Vec<Box<dyn ResolveStrategy>>,
}

impl DatasetStore {
    pub fn new(config: &ServerConfig) -> Self {
        Self::with_strategies(config.data_dir.clone(), default_strategies())
    }

    pub fn with_strategies(base_dir: PathBuf, strategies: Vec<Box<dyn ResolveStrategy>>) -> Self {
        Self { base_dir, strategies }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Map a dataset identifier to the file holding its data
    pub fn resolve(&self, dataset_id: &str) -> StatsResult<PathBuf> {
        validate_id(dataset_id)?;

        if !self.base_dir.is_dir() {
            return Err(StatsError::not_found(format!(
                "dataset '{}' not found: data directory {} does not exist",
                dataset_id,
                self.base_dir.display()
            )));
        }

        for strategy in &self.strategies {
            if let Some(path) = strategy.resolve(&self.base_dir, dataset_id)? {
                debug!(
                    "Resolved dataset {} via {} strategy: {}",
                    dataset_id,
                    strategy.name(),
                    path.display()
                );
                return Ok(path);
            }
        }

        Err(StatsError::not_found(format!("dataset '{}' not found", dataset_id)))
    }

    /// Store raw upload bytes as `{base}/{id}_{filename}` and record its metadata
    pub fn store(&self, dataset_id: &str, bytes: &[u8], filename: &str) -> StatsResult<PathBuf> {
        validate_id(dataset_id)?;
        let filename = sanitize_filename(filename)?;

        std::fs::create_dir_all(&self.base_dir).map_err(|e| StatsError::io(&self.base_dir, e))?;

        let dest = self.base_dir.join(format!("{}_{}", dataset_id, filename));
        std::fs::write(&dest, bytes).map_err(|e| StatsError::io(&dest, e))?;

        MetadataRecord::new(dataset_id, &filename, dest.clone()).write_atomic(&self.base_dir)?;

        info!("📥 Stored dataset {} ({} bytes) at {}", dataset_id, bytes.len(), dest.display());
        Ok(dest)
    }

    /// Store an upload under a freshly generated identifier
    pub fn upload(&self, bytes: &[u8], filename: &str) -> StatsResult<String> {
        let dataset_id = Uuid::new_v4().to_string();
        self.store(&dataset_id, bytes, filename)?;
        Ok(dataset_id)
    }

    /// Every readable metadata record, sorted by id.
    ///
    /// Unreadable sidecars are skipped so one bad file never hides the rest.
    pub fn list_metadata(&self) -> Vec<MetadataRecord> {
        let entries = match list_entries(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("No metadata available: {}", e);
                return Vec::new();
            }
        };

        let mut records: Vec<MetadataRecord> = entries
            .into_iter()
            .filter(|(name, _)| name.ends_with(META_SUFFIX))
            .filter_map(|(_, path)| match MetadataRecord::read_from(&path) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping metadata {}: {}", path.display(), e);
                    None
                }
            })
            .collect();

        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Identifiers of every known dataset
    pub fn dataset_ids(&self) -> Vec<String> {
        self.list_metadata().into_iter().map(|r| r.id).collect()
    }

    /// Fresh `{id}_{random}.png` path for a rendered plot
    pub fn plot_path(&self, dataset_id: &str) -> StatsResult<PathBuf> {
        validate_id(dataset_id)?;
        std::fs::create_dir_all(&self.base_dir).map_err(|e| StatsError::io(&self.base_dir, e))?;
        Ok(self
            .base_dir
            .join(format!("{}_{}.png", dataset_id, Uuid::new_v4().simple())))
    }

    pub fn debug_info(&self) -> StatsResult<DebugInfo> {
        let mut info = DebugInfo {
            data_dir: self.base_dir.display().to_string(),
            exists: self.base_dir.exists(),
            files: Vec::new(),
            metadata_files: Vec::new(),
            dataset_files: Vec::new(),
        };

        if !info.exists {
            return Ok(info);
        }

        for (name, path) in list_entries(&self.base_dir)? {
            let metadata = std::fs::metadata(&path).map_err(|e| StatsError::io(&path, e))?;
            info.files.push(DirEntryInfo {
                name: name.clone(),
                is_file: metadata.is_file(),
                size: metadata.is_file().then(|| metadata.len()),
            });

            if name.ends_with(META_SUFFIX) {
                info.metadata_files.push(name);
                continue;
            }

            let extension = path.extension().and_then(|e| e.to_str());
            if let Some(ext) =
                extension.filter(|e| DATASET_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            {
                let stem = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_string();
                info.dataset_files.push(DatasetFileInfo {
                    name,
                    stem,
                    suffix: format!(".{}", ext),
                });
            }
        }

        Ok(info)
    }
}

/// Directory entries as `(file name, path)`, sorted by name
pub(crate) fn list_entries(dir: &Path) -> StatsResult<Vec<(String, PathBuf)>> {
    let read_dir = std::fs::read_dir(dir).map_err(|e| StatsError::io(dir, e))?;

    let mut entries = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|e| StatsError::io(dir, e))?;
        if let Some(name) = entry.file_name().to_str() {
            entries.push((name.to_string(), entry.path()));
        }
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

/// Identifiers are single path components; anything else could escape the
/// data directory.
fn validate_id(dataset_id: &str) -> StatsResult<()> {
    let trimmed = dataset_id.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || dataset_id.contains(['/', '\\', '\0'])
    {
        return Err(StatsError::bad_input(format!(
            "invalid dataset id '{}'",
            dataset_id
        )));
    }
    Ok(())
}

fn sanitize_filename(filename: &str) -> StatsResult<String> {
    let name = Path::new(filename.trim())
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .filter(|n| !n.is_empty());
    name.ok_or_else(|| StatsError::bad_input(format!("invalid filename '{}'", filename)))
}
