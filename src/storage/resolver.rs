use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{list_entries, MetadataRecord, META_SUFFIX};
use crate::error::StatsResult;

/// One way of mapping a dataset identifier to a file in the data directory.
///
/// Strategies are tried in order by [`super::DatasetStore::resolve`]; the
/// first one returning `Some` wins.
pub trait ResolveStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn resolve(&self, dir: &Path, dataset_id: &str) -> StatsResult<Option<PathBuf>>;
}

/// The default resolution order
pub fn default_strategies() -> Vec<Box<dyn ResolveStrategy>> {
    vec![
        Box::new(MetadataSidecar),
        Box::new(ExactName),
        Box::new(UploadPrefix),
        Box::new(MatchingStem),
        Box::new(KnownExtension),
    ]
}

/// `{id}.meta.json` pointing at a path that still exists
pub struct MetadataSidecar;

impl ResolveStrategy for MetadataSidecar {
    fn name(&self) -> &'static str {
        "metadata"
    }

    fn resolve(&self, dir: &Path, dataset_id: &str) -> StatsResult<Option<PathBuf>> {
        let meta_path = dir.join(format!("{}{}", dataset_id, META_SUFFIX));
        if !meta_path.is_file() {
            return Ok(None);
        }

        // A broken sidecar is not fatal: the filename conventions still apply
        let record = match MetadataRecord::read_from(&meta_path) {
            Ok(record) => record,
            Err(e) => {
                warn!("Ignoring unreadable metadata {}: {}", meta_path.display(), e);
                return Ok(None);
            }
        };

        if record.path.is_file() {
            Ok(Some(record.path))
        } else {
            debug!(
                "Metadata for {} points at missing file {}",
                dataset_id,
                record.path.display()
            );
            Ok(None)
        }
    }
}

/// A file literally named `{id}`
pub struct ExactName;

impl ResolveStrategy for ExactName {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn resolve(&self, dir: &Path, dataset_id: &str) -> StatsResult<Option<PathBuf>> {
        let candidate = dir.join(dataset_id);
        Ok(candidate.is_file().then_some(candidate))
    }
}

/// `{id}_{original filename}`, the layout written by uploads
pub struct UploadPrefix;

impl ResolveStrategy for UploadPrefix {
    fn name(&self) -> &'static str {
        "prefix"
    }

    fn resolve(&self, dir: &Path, dataset_id: &str) -> StatsResult<Option<PathBuf>> {
        let prefix = format!("{}_", dataset_id);
        // Entries come back sorted, so the first hit is deterministic
        let found = list_entries(dir)?.into_iter().find(|(name, path)| {
            name.starts_with(&prefix) && path.is_file() && !is_generated_artifact(name)
        });
        Ok(found.map(|(_, path)| path))
    }
}

/// Any file whose stem is `{id}`, whatever its extension
pub struct MatchingStem;

impl ResolveStrategy for MatchingStem {
    fn name(&self) -> &'static str {
        "stem"
    }

    fn resolve(&self, dir: &Path, dataset_id: &str) -> StatsResult<Option<PathBuf>> {
        let found = list_entries(dir)?.into_iter().find(|(name, path)| {
            path.is_file()
                && !is_generated_artifact(name)
                && path.file_stem().and_then(|s| s.to_str()) == Some(dataset_id)
        });
        Ok(found.map(|(_, path)| path))
    }
}

/// `{id}.xlsx`, `{id}.xls`, `{id}.csv`, in that order
pub struct KnownExtension;

impl KnownExtension {
    const EXTENSIONS: [&'static str; 3] = ["xlsx", "xls", "csv"];
}

impl ResolveStrategy for KnownExtension {
    fn name(&self) -> &'static str {
        "extension"
    }

    fn resolve(&self, dir: &Path, dataset_id: &str) -> StatsResult<Option<PathBuf>> {
        Ok(Self::EXTENSIONS
            .iter()
            .map(|ext| dir.join(format!("{}.{}", dataset_id, ext)))
            .find(|candidate| candidate.is_file()))
    }
}

/// Plots, sidecars and in-flight temp files share the `{id}` prefix but are
/// never datasets.
fn is_generated_artifact(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".png") || lower.ends_with(META_SUFFIX) || lower.ends_with(".tmp")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"x").unwrap();
        path
    }

    #[test]
    fn test_metadata_sidecar_uses_recorded_path() {
        let dir = TempDir::new().unwrap();
        let target = touch(dir.path(), "elsewhere.csv");
        let record = MetadataRecord::new("abc", "survey.csv", target.clone());
        record.write_atomic(dir.path()).unwrap();

        let found = MetadataSidecar.resolve(dir.path(), "abc").unwrap();
        assert_eq!(found, Some(target));
    }

    #[test]
    fn test_metadata_sidecar_stale_path_falls_through() {
        let dir = TempDir::new().unwrap();
        let record = MetadataRecord::new("abc", "survey.csv", dir.path().join("gone.csv"));
        record.write_atomic(dir.path()).unwrap();

        assert_eq!(MetadataSidecar.resolve(dir.path(), "abc").unwrap(), None);
    }

    #[test]
    fn test_metadata_sidecar_malformed_falls_through() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("abc.meta.json"), b"{not json").unwrap();

        assert_eq!(MetadataSidecar.resolve(dir.path(), "abc").unwrap(), None);
    }

    #[test]
    fn test_exact_name() {
        let dir = TempDir::new().unwrap();
        let path = touch(dir.path(), "abc");
        assert_eq!(ExactName.resolve(dir.path(), "abc").unwrap(), Some(path));
        assert_eq!(ExactName.resolve(dir.path(), "abd").unwrap(), None);
    }

    #[test]
    fn test_upload_prefix_skips_plots_and_picks_first() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "abc_0f0f0f.png");
        let first = touch(dir.path(), "abc_a.xlsx");
        touch(dir.path(), "abc_b.csv");
        touch(dir.path(), "abcd_c.csv");

        assert_eq!(UploadPrefix.resolve(dir.path(), "abc").unwrap(), Some(first));
    }

    #[test]
    fn test_matching_stem() {
        let dir = TempDir::new().unwrap();
        let path = touch(dir.path(), "abc.tsv");
        touch(dir.path(), "abc.meta.json");

        assert_eq!(MatchingStem.resolve(dir.path(), "abc").unwrap(), Some(path));
    }

    #[test]
    fn test_known_extension_order() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "abc.csv");
        let xls = touch(dir.path(), "abc.xls");

        assert_eq!(KnownExtension.resolve(dir.path(), "abc").unwrap(), Some(xls));
    }

    #[test]
    fn test_default_order() {
        let names: Vec<&str> = default_strategies().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["metadata", "exact", "prefix", "stem", "extension"]);
    }
}
