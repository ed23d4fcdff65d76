use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use walkdir::WalkDir;
use crate::command::is_temp_output;
use crate::config::TranscodeConfig;
use crate::heuristics::should_skip_for_size;
use crate::postprocess::is_backup;
use crate::sidecar;
use log::{debug, info, warn};

/// Result of scanning a file
#[derive(Debug, Clone, PartialEq)]
pub enum ScanResult {
    /// File should be processed (path, size in bytes)
    Candidate(PathBuf, u64),
    /// File should be skipped (path, reason)
    Skipped(PathBuf, String),
}

impl ScanResult {
    pub fn path(&self) -> &Path {
        match self {
            ScanResult::Candidate(p, _) | ScanResult::Skipped(p, _) => p,
        }
    }
}

/// Classify one path without waiting for it to settle.
/// `None` means the path is not media at all (or is one of our own artifacts).
pub fn classify_path(cfg: &TranscodeConfig, path: &Path) -> Result<Option<ScanResult>> {
    if !path.is_file() || is_temp_output(path) || is_backup(path) || sidecar::is_sidecar(path) {
        return Ok(None);
    }

    let allowed = path
        .extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| cfg.allows_extension(ext));
    if !allowed {
        return Ok(None);
    }

    if sidecar::has_skip_marker(path) {
        return Ok(Some(ScanResult::Skipped(
            path.to_path_buf(),
            "skip marker (.av1skip) exists".to_string(),
        )));
    }

    let size = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat file: {}", path.display()))?
        .len();

    if should_skip_for_size(size, cfg.min_bytes) {
        return Ok(Some(ScanResult::Skipped(
            path.to_path_buf(),
            format!("file < {} bytes", cfg.min_bytes),
        )));
    }

    Ok(Some(ScanResult::Candidate(path.to_path_buf(), size)))
}

/// Drop candidates whose size changed across the stability window
async fn settle(results: Vec<ScanResult>, wait: Duration) -> Vec<ScanResult> {
    if wait.is_zero() || !results.iter().any(|r| matches!(r, ScanResult::Candidate(..))) {
        return results;
    }

    debug!("Waiting {:?} for candidate sizes to settle", wait);
    tokio::time::sleep(wait).await;

    results
        .into_iter()
        .map(|r| match r {
            ScanResult::Candidate(path, size0) => match std::fs::metadata(&path).map(|m| m.len()) {
                Ok(size1) if size1 == size0 => ScanResult::Candidate(path, size1),
                Ok(_) => ScanResult::Skipped(path, "file still copying".to_string()),
                Err(e) => ScanResult::Skipped(path, format!("file vanished: {}", e)),
            },
            other => other,
        })
        .collect()
}

/// Scan library roots for candidate media files
pub async fn scan_library(cfg: &TranscodeConfig) -> Result<Vec<ScanResult>> {
    let mut results = Vec::new();
    let mut files_checked = 0;

    for root in &cfg.library_roots {
        if !root.exists() {
            warn!("Library root does not exist: {}", root.display());
            continue;
        }

        info!("Scanning directory: {}", root.display());

        let mut entry_count = 0;
        for entry in WalkDir::new(root).follow_links(false) {
            entry_count += 1;
            if entry_count % 1000 == 0 {
                info!("Scanned {} entries so far in {}...", entry_count, root.display());
            }

            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Error reading directory entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            files_checked += 1;

            match classify_path(cfg, entry.path()) {
                Ok(Some(result)) => {
                    debug!("{:?}", result);
                    results.push(result);
                }
                Ok(None) => {}
                Err(e) => warn!("Skipping {}: {:#}", entry.path().display(), e),
            }
        }
    }

    let results = settle(results, Duration::from_secs(cfg.stability_wait_secs)).await;
    let candidates = results.iter().filter(|r| matches!(r, ScanResult::Candidate(..))).count();
    info!(
        "Scan complete: checked {} files, {} candidates, {} skipped",
        files_checked,
        candidates,
        results.len() - candidates
    );
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    fn config(root: &Path) -> TranscodeConfig {
        TranscodeConfig {
            library_roots: vec![root.to_path_buf()],
            min_bytes: 1000,
            stability_wait_secs: 0,
            ..Default::default()
        }
    }

    fn sized(path: &Path, len: u64) {
        File::create(path).unwrap().set_len(len).unwrap();
    }

    #[tokio::test]
    async fn test_scan_classifies_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir(root.join("season 1")).unwrap();
        sized(&root.join("big.mkv"), 5000);
        sized(&root.join("season 1/ep.MP4"), 2000);
        sized(&root.join("small.mkv"), 999);
        sized(&root.join("notes.txt"), 5000);
        sized(&root.join("big.av1-tmp.1234abcd.mkv"), 5000);
        sized(&root.join("old.mkv.bak-67e55044-10b1-426f-9247-bb680e5fe0c8"), 5000);
        sized(&root.join("Holiday.bak-up.mkv"), 5000);
        sized(&root.join("done.mkv"), 5000);
        sidecar::write_skip_marker(&root.join("done.mkv"), "already av1").unwrap();

        let mut results = scan_library(&config(root)).await.unwrap();
        results.sort_by(|a, b| a.path().cmp(b.path()));

        assert_eq!(
            results,
            vec![
                ScanResult::Candidate(root.join("Holiday.bak-up.mkv"), 5000),
                ScanResult::Candidate(root.join("big.mkv"), 5000),
                ScanResult::Skipped(root.join("done.mkv"), "skip marker (.av1skip) exists".into()),
                ScanResult::Candidate(root.join("season 1/ep.MP4"), 2000),
                ScanResult::Skipped(root.join("small.mkv"), "file < 1000 bytes".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_exact_minimum_is_candidate() {
        let dir = TempDir::new().unwrap();
        sized(&dir.path().join("edge.mkv"), 1000);
        let results = scan_library(&config(dir.path())).await.unwrap();
        assert_eq!(results, vec![ScanResult::Candidate(dir.path().join("edge.mkv"), 1000)]);
    }

    #[tokio::test]
    async fn test_missing_root_is_not_an_error() {
        let cfg = config(Path::new("/nonexistent/library/root"));
        assert!(scan_library(&cfg).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_growing_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("copying.mkv");
        sized(&path, 5000);

        let grower = {
            let path = path.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                File::options().write(true).open(&path).unwrap().set_len(9000).unwrap();
            })
        };
        let results = settle(
            vec![ScanResult::Candidate(path.clone(), 5000)],
            Duration::from_millis(500),
        )
        .await;
        grower.await.unwrap();

        assert_eq!(results, vec![ScanResult::Skipped(path, "file still copying".into())]);
    }

    #[test]
    fn test_classify_ignores_artifacts() {
        let dir = TempDir::new().unwrap();
        let tmp = dir.path().join("a.av1-tmp.deadbeef.mkv");
        sized(&tmp, 5000);
        assert_eq!(classify_path(&config(dir.path()), &tmp).unwrap(), None);
        assert_eq!(classify_path(&config(dir.path()), &dir.path().join("missing.mkv")).unwrap(), None);
    }
}
