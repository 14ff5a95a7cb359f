//! The drive scanner: discovers candidate files and materializes file
//! objects, deterministically and without duplicating work.
//!
//! A pass walks every configured storage root, pruning ignored directory
//! names before descent and filtering files through the extension
//! allow-list derived from the type registry. Each surviving file is keyed
//! by its stable identity; identities already present among objects or
//! ignored files are skipped as duplicates. Cancellation is observed at
//! directory and file boundaries, never mid-operation.

pub mod media;

use crate::config::{AppConfig, FileTypeConfig};
use crate::error::{MediaError, Result};
use crate::store::{ErrorEvent, IgnoreReason, NewFileObject, Store};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::watch;

/// Counters from one complete scan pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassSummary {
    pub saved: u64,
    pub duplicates: u64,
    pub ignored: u64,
    pub elapsed_secs: f64,
}

enum FileOutcome {
    Saved,
    Duplicate,
    Ignored,
}

/// Walks local storage and populates the object store.
pub struct Scanner {
    store: Store,
    roots: Vec<PathBuf>,
    ignored_directories: HashSet<String>,
    rules: HashMap<String, FileTypeConfig>,
    max_decode_pixels: u64,
}

impl Scanner {
    pub fn new(store: Store, config: &AppConfig) -> Self {
        Self {
            store,
            roots: config.storage.roots.clone(),
            ignored_directories: config.ignored_directory_set(),
            rules: config.extension_rules(),
            max_decode_pixels: config.media.max_decode_pixels,
        }
    }

    /// Run one full pass over all configured storage roots, or until the
    /// shutdown signal flips.
    pub async fn run_pass(&self, shutdown: &watch::Receiver<bool>) -> Result<PassSummary> {
        let started = Instant::now();
        let mut summary = PassSummary::default();

        if self.roots.is_empty() {
            tracing::warn!("no storage roots configured, scan pass is a no-op");
        }

        for root in &self.roots {
            let candidates = self.collect_candidates(root, shutdown);
            for path in candidates {
                if *shutdown.borrow() {
                    tracing::info!("stopping scan pass");
                    summary.elapsed_secs = started.elapsed().as_secs_f64();
                    return Ok(summary);
                }

                let Some(rule) = self.classify(&path).cloned() else {
                    continue;
                };
                match self.evaluate_file(&path, rule).await? {
                    FileOutcome::Saved => summary.saved += 1,
                    FileOutcome::Duplicate => summary.duplicates += 1,
                    FileOutcome::Ignored => summary.ignored += 1,
                }
            }
        }

        summary.elapsed_secs = started.elapsed().as_secs_f64();
        Ok(summary)
    }

    /// Record a failed pass in the error log. Best effort: a store that is
    /// itself down should not mask the original failure.
    pub async fn record_pass_failure(&self, error: &crate::Error) {
        if let Err(log_error) = self
            .store
            .record_error(
                ErrorEvent::ScanPassFailed,
                "Scan pass failed",
                Some("the pass was aborted, the next scheduled pass will retry"),
                Some(&error.to_string()),
                None,
            )
            .await
        {
            tracing::warn!(error = %log_error, "failed to record scan pass failure");
        }
    }

    /// Depth-first walk of one root, collecting allow-listed files and
    /// pruning ignored directory names before descent.
    fn collect_candidates(&self, root: &Path, shutdown: &watch::Receiver<bool>) -> Vec<PathBuf> {
        let mut stack = vec![root.to_path_buf()];
        let mut files = Vec::new();

        while let Some(dir) = stack.pop() {
            if *shutdown.borrow() {
                break;
            }

            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(error) => {
                    tracing::warn!(path = %dir.display(), %error, "failed to read directory");
                    continue;
                }
            };

            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    if self.is_ignored_directory(&path) {
                        continue;
                    }
                    stack.push(path);
                } else if self.classify(&path).is_some() {
                    files.push(path);
                }
            }
        }

        files
    }

    fn is_ignored_directory(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.ignored_directories.contains(&name.to_lowercase()))
    }

    fn classify(&self, path: &Path) -> Option<&FileTypeConfig> {
        let extension = path.extension().and_then(|e| e.to_str())?;
        self.rules.get(&extension.to_lowercase())
    }

    async fn evaluate_file(&self, path: &Path, rule: FileTypeConfig) -> Result<FileOutcome> {
        let file_id = file_identity(path)?;
        if self.store.object_exists_by_file_id(&file_id).await?
            || self.store.ignored_exists(&file_id).await?
        {
            return Ok(FileOutcome::Duplicate);
        }

        let fs_metadata = std::fs::metadata(path)?;
        let mut metadata = serde_json::json!({ "file_size": fs_metadata.len() });

        if rule.requires_resolution {
            match media::probe_dimensions(path, self.max_decode_pixels) {
                Ok((width, height)) => {
                    metadata["resolution"] = serde_json::json!({
                        "width": width,
                        "height": height,
                        "total": width + height,
                    });
                }
                Err(error @ MediaError::TooLarge { .. }) => {
                    self.ignore_file(
                        path,
                        &file_id,
                        IgnoreReason::DecompressionBomb,
                        ErrorEvent::DecompressionBombError,
                        &error,
                    )
                    .await?;
                    return Ok(FileOutcome::Ignored);
                }
                Err(error) => {
                    self.ignore_file(
                        path,
                        &file_id,
                        IgnoreReason::InvalidFile,
                        ErrorEvent::ResolutionNotFound,
                        &error,
                    )
                    .await?;
                    return Ok(FileOutcome::Ignored);
                }
            }
        }

        let file_created_at = file_creation_time(&fs_metadata);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let object = self
            .store
            .insert_object(NewFileObject {
                object_type: rule.tag,
                path: path.display().to_string(),
                name,
                file_id,
                file_created_at,
                metadata,
            })
            .await?;

        tracing::debug!(id = %object.id, path = %object.path, "saved new object");
        Ok(FileOutcome::Saved)
    }

    async fn ignore_file(
        &self,
        path: &Path,
        file_id: &str,
        reason: IgnoreReason,
        event: ErrorEvent,
        error: &MediaError,
    ) -> Result<()> {
        tracing::info!(
            path = %path.display(),
            reason = reason.as_str(),
            "adding file to the ignore list"
        );

        self.store
            .record_error(
                event,
                "Metadata extraction failed",
                Some(&format!("not saving '{}' as an object", path.display())),
                Some(&error.to_string()),
                Some(serde_json::json!({ "path": path.display().to_string() })),
            )
            .await?;
        self.store.insert_ignored(file_id, reason).await?;
        Ok(())
    }
}

/// Stable identity for a physical file: device + inode on Unix, a hash of
/// the canonical path elsewhere.
pub fn file_identity(path: &Path) -> std::io::Result<String> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let metadata = std::fs::metadata(path)?;
        Ok(format!("{}-{}", metadata.dev(), metadata.ino()))
    }
    #[cfg(not(unix))]
    {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let canonical = std::fs::canonicalize(path)?;
        let mut hasher = DefaultHasher::new();
        canonical.to_string_lossy().hash(&mut hasher);
        Ok(format!("path-{:016x}", hasher.finish()))
    }
}

fn file_creation_time(metadata: &std::fs::Metadata) -> DateTime<Utc> {
    metadata
        .created()
        .or_else(|_| metadata.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn write_png(path: &Path) {
        let img = image::ImageBuffer::from_fn(2, 2, |x, y| {
            if (x + y) % 2 == 0 {
                image::Rgba([255u8, 0, 0, 255])
            } else {
                image::Rgba([0u8, 0, 255, 255])
            }
        });
        img.save(path).expect("write png");
    }

    async fn scanner_over(root: &Path) -> (Scanner, Store) {
        let store = Store::open_in_memory().await.expect("open store");
        let mut config = AppConfig::default();
        config.storage.roots = vec![root.to_path_buf()];
        (Scanner::new(store.clone(), &config), store)
    }

    fn no_shutdown() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn second_pass_finds_only_duplicates() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_png(&dir.path().join("one.png"));
        write_png(&dir.path().join("two.png"));
        std::fs::write(dir.path().join("notes.txt"), "not indexable").expect("write txt");

        let (scanner, store) = scanner_over(dir.path()).await;
        let (_tx, shutdown) = no_shutdown();

        let first = scanner.run_pass(&shutdown).await.expect("first pass");
        assert_eq!(first.saved, 2);
        assert_eq!(first.duplicates, 0);

        let second = scanner.run_pass(&shutdown).await.expect("second pass");
        assert_eq!(second.saved, 0);
        assert_eq!(second.duplicates, 2);

        assert_eq!(store.count_objects().await.expect("count"), 2);
        assert_eq!(store.count_ignored().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn ignored_directories_are_pruned() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_png(&dir.path().join("keep.png"));
        let hidden = dir.path().join("Node_Modules").join("deep");
        std::fs::create_dir_all(&hidden).expect("mkdir");
        write_png(&hidden.join("skip.png"));

        let (scanner, store) = scanner_over(dir.path()).await;
        let (_tx, shutdown) = no_shutdown();
        let summary = scanner.run_pass(&shutdown).await.expect("pass");

        assert_eq!(summary.saved, 1);
        assert_eq!(store.count_objects().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn undecodable_image_is_ignored_permanently() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("fake.png"), b"not an image").expect("write garbage");

        let (scanner, store) = scanner_over(dir.path()).await;
        let (_tx, shutdown) = no_shutdown();

        let first = scanner.run_pass(&shutdown).await.expect("first pass");
        assert_eq!(first.saved, 0);
        assert_eq!(first.ignored, 1);
        assert_eq!(store.count_ignored().await.expect("count"), 1);
        assert_eq!(
            store
                .count_errors(ErrorEvent::ResolutionNotFound)
                .await
                .expect("errors"),
            1
        );

        // Never re-evaluated: the identity now counts as a duplicate.
        let second = scanner.run_pass(&shutdown).await.expect("second pass");
        assert_eq!(second.ignored, 0);
        assert_eq!(second.duplicates, 1);
        assert_eq!(store.count_ignored().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn oversized_image_is_tagged_as_bomb() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_png(&dir.path().join("big.png"));

        let store = Store::open_in_memory().await.expect("open store");
        let mut config = AppConfig::default();
        config.storage.roots = vec![dir.path().to_path_buf()];
        config.media.max_decode_pixels = 1;
        let scanner = Scanner::new(store.clone(), &config);

        let (_tx, shutdown) = no_shutdown();
        let summary = scanner.run_pass(&shutdown).await.expect("pass");
        assert_eq!(summary.ignored, 1);
        assert_eq!(
            store
                .count_errors(ErrorEvent::DecompressionBombError)
                .await
                .expect("errors"),
            1
        );
    }

    #[tokio::test]
    async fn cancellation_ends_the_pass_without_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_png(&dir.path().join("one.png"));

        let (scanner, store) = scanner_over(dir.path()).await;
        let (tx, rx) = watch::channel(true);
        drop(tx);

        let summary = scanner.run_pass(&rx).await.expect("cancelled pass");
        assert_eq!(summary.saved, 0);
        assert_eq!(store.count_objects().await.expect("count"), 0);
    }
}
