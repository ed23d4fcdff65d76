use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use crate::command::is_temp_output;
use crate::postprocess::is_backup;
use crate::sidecar::is_sidecar;

/// Keeps the OS watch alive; dropping it stops events
pub struct LibraryWatcher {
    _watcher: RecommendedWatcher,
}

/// Whether a change event for `path` is worth a look
fn is_interesting(path: &Path) -> bool {
    !(is_temp_output(path) || is_backup(path) || is_sidecar(path))
}

/// Watch every existing root recursively and forward created/modified paths.
/// Events are dropped when the channel is full; the periodic scan picks
/// those files up later.
pub fn watch_roots(roots: &[PathBuf], capacity: usize) -> Result<(LibraryWatcher, mpsc::Receiver<PathBuf>)> {
    let (tx, rx) = mpsc::channel::<PathBuf>(capacity.max(1));

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) if event.kind.is_create() || event.kind.is_modify() => {
                for path in event.paths.into_iter().filter(|p| is_interesting(p)) {
                    if let Err(e) = tx.try_send(path) {
                        debug!("Dropping watch event: {}", e);
                    }
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Filesystem watcher error: {}", e),
        },
        Config::default(),
    )
    .context("Failed to create file watcher")?;

    for root in roots {
        if root.exists() {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .with_context(|| format!("Failed to watch path: {}", root.display()))?;
            info!("👀 Watching directory: {}", root.display());
        } else {
            warn!("Watch path does not exist: {}", root.display());
        }
    }

    Ok((LibraryWatcher { _watcher: watcher }, rx))
}

/// Holds watch events back until a path has been quiet for the settle window
#[derive(Debug)]
pub struct SettleTracker {
    pending: HashMap<PathBuf, Instant>,
    settle: Duration,
}

impl SettleTracker {
    pub fn new(settle: Duration) -> Self {
        Self { pending: HashMap::new(), settle }
    }

    /// Record that a file was modified
    pub fn file_changed(&mut self, path: PathBuf) {
        self.pending.insert(path, Instant::now());
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Remove and return every path quiet for at least the settle window
    pub fn take_settled(&mut self, now: Instant) -> Vec<PathBuf> {
        let settle = self.settle;
        let mut settled: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) >= settle)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &settled {
            self.pending.remove(path);
        }
        settled.sort();
        settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_artifacts_are_filtered() {
        assert!(is_interesting(Path::new("/m/movie.mkv")));
        assert!(!is_interesting(Path::new("/m/movie.av1-tmp.0a1b2c3d.mkv")));
        assert!(!is_interesting(Path::new("/m/movie.mkv.bak-67e55044-10b1-426f-9247-bb680e5fe0c8")));
        assert!(is_interesting(Path::new("/m/Holiday.bak-up.mkv")));
        assert!(!is_interesting(Path::new("/m/movie.mkv.why.txt")));
    }

    #[test]
    fn test_settle_waits_for_quiet_period() {
        let mut tracker = SettleTracker::new(Duration::from_secs(10));
        let start = Instant::now();
        tracker.file_changed(PathBuf::from("/m/a.mkv"));
        tracker.file_changed(PathBuf::from("/m/b.mkv"));

        assert!(tracker.take_settled(start).is_empty());
        let later = start + Duration::from_secs(11);
        assert_eq!(
            tracker.take_settled(later),
            vec![PathBuf::from("/m/a.mkv"), PathBuf::from("/m/b.mkv")]
        );
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_zero_window_settles_immediately() {
        let mut tracker = SettleTracker::new(Duration::ZERO);
        tracker.file_changed(PathBuf::from("/m/a.mkv"));
        assert_eq!(tracker.take_settled(Instant::now()).len(), 1);
    }

    #[tokio::test]
    async fn test_new_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let (_watcher, mut rx) = watch_roots(&[dir.path().to_path_buf()], 16).unwrap();

        let file = dir.path().join("new.mkv");
        std::fs::write(&file, b"data").unwrap();

        let got = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Some(p) if p.file_name() == file.file_name() => return Some(p),
                    Some(_) => continue,
                    None => return None,
                }
            }
        })
        .await
        .unwrap();
        assert!(got.is_some());
    }
}
