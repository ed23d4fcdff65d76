use std::fs;
use std::path::PathBuf;
use anyhow::Result;
use log::{error, info, warn};
use walkdir::WalkDir;
use crate::command::is_temp_output;
use crate::config::TranscodeConfig;
use crate::job::JobStatus;
use crate::postprocess::{backup_origin, is_backup};
use crate::store::JobStore;

/// Reason recorded on jobs that were Running when the daemon died
pub const INTERRUPTED_REASON: &str = "interrupted by daemon restart";

/// What startup reconciliation changed
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RecoveryReport {
    pub interrupted_jobs: usize,
    pub removed_temp_files: Vec<PathBuf>,
    pub restored_backups: Vec<PathBuf>,
}

/// Mark Running records as Failed. Must run before any worker starts.
pub fn recover_interrupted_jobs(store: &JobStore) -> Result<usize> {
    let mut recovered = 0;
    for mut job in store.load_all_jobs()? {
        let stuck = match job.status {
            JobStatus::Running => true,
            // A Pending record never got a worker
            JobStatus::Pending => {
                job.start()?;
                true
            }
            _ => false,
        };
        if !stuck {
            continue;
        }
        job.fail(INTERRUPTED_REASON)?;
        store.save_job(&job)?;
        warn!("Job {}: {} marked FAILED ({})", job.id, job.source_path.display(), INTERRUPTED_REASON);
        recovered += 1;
    }
    Ok(recovered)
}

/// Delete leftover temp outputs and put orphaned backups back under their
/// original name. Only safe while no job is running.
pub fn cleanup_artifacts(cfg: &TranscodeConfig, report: &mut RecoveryReport) {
    for root in &cfg.library_roots {
        if !root.exists() {
            continue;
        }
        for entry in WalkDir::new(root).follow_links(false).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();

            if is_temp_output(path) {
                match fs::remove_file(path) {
                    Ok(()) => {
                        info!("🗑️ Removed orphaned temp output: {}", path.display());
                        report.removed_temp_files.push(path.to_path_buf());
                    }
                    Err(e) => warn!("Failed to remove orphaned temp output {}: {}", path.display(), e),
                }
            } else if is_backup(path) {
                let Some(origin) = backup_origin(path) else {
                    continue;
                };
                if origin.exists() {
                    warn!(
                        "Leaving backup {} alone: {} already exists",
                        path.display(),
                        origin.display()
                    );
                    continue;
                }
                match fs::rename(path, &origin) {
                    Ok(()) => {
                        warn!("Restored {} from backup", origin.display());
                        report.restored_backups.push(origin);
                    }
                    Err(e) => error!(
                        "CRITICAL: cannot restore {} from {}: {}",
                        origin.display(),
                        path.display(),
                        e
                    ),
                }
            }
        }
    }
}

/// Startup reconciliation of job records and the library
pub fn recover(store: &JobStore, cfg: &TranscodeConfig) -> Result<RecoveryReport> {
    let mut report = RecoveryReport {
        interrupted_jobs: recover_interrupted_jobs(store)?,
        ..Default::default()
    };
    cleanup_artifacts(cfg, &mut report);

    if report != RecoveryReport::default() {
        info!(
            "Recovery: {} interrupted jobs, {} temp files removed, {} backups restored",
            report.interrupted_jobs,
            report.removed_temp_files.len(),
            report.restored_backups.len()
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;
    use crate::postprocess::backup_path;
    use tempfile::TempDir;

    #[test]
    fn test_running_and_pending_jobs_fail() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).unwrap();

        let mut running = Job::new(PathBuf::from("/m/a.mkv"), 1, 10);
        running.start().unwrap();
        store.save_job(&running).unwrap();

        let pending = Job::new(PathBuf::from("/m/b.mkv"), 1, 10);
        store.save_job(&pending).unwrap();

        let mut done = Job::new(PathBuf::from("/m/c.mkv"), 1, 10);
        done.start().unwrap();
        done.succeed(PathBuf::from("/m/c.mkv"), 5).unwrap();
        store.save_job(&done).unwrap();

        assert_eq!(recover_interrupted_jobs(&store).unwrap(), 2);

        let a = store.load_job(&running.id).unwrap();
        assert_eq!(a.status, JobStatus::Failed);
        assert_eq!(a.reason.as_deref(), Some(INTERRUPTED_REASON));
        assert_eq!(store.load_job(&pending.id).unwrap().status, JobStatus::Failed);
        assert_eq!(store.load_job(&done.id).unwrap(), done);
    }

    #[test]
    fn test_artifact_cleanup() {
        let lib = TempDir::new().unwrap();
        let root = lib.path();
        fs::write(root.join("a.av1-tmp.12345678.mkv"), b"partial").unwrap();
        fs::write(backup_path(&root.join("b.mkv")), b"original b").unwrap();
        fs::write(root.join("c.mkv"), b"new c").unwrap();
        let c_backup = backup_path(&root.join("c.mkv"));
        fs::write(&c_backup, b"original c").unwrap();

        let cfg = TranscodeConfig { library_roots: vec![root.to_path_buf()], ..Default::default() };
        let mut report = RecoveryReport::default();
        cleanup_artifacts(&cfg, &mut report);

        assert_eq!(report.removed_temp_files, vec![root.join("a.av1-tmp.12345678.mkv")]);
        assert_eq!(report.restored_backups, vec![root.join("b.mkv")]);
        assert_eq!(fs::read(root.join("b.mkv")).unwrap(), b"original b");
        assert_eq!(fs::read(root.join("c.mkv")).unwrap(), b"new c");
        assert!(c_backup.exists());
    }

    #[test]
    fn test_user_files_resembling_artifacts_are_untouched() {
        let lib = TempDir::new().unwrap();
        let root = lib.path();
        let names = [
            "Holiday.bak-up.mkv",
            "Talk.av1-tmp.notes.mp4",
            "Show.av1-tmp.final.mkv",
            "movie.mkv.bak-2019",
        ];
        for name in names {
            fs::write(root.join(name), name.as_bytes()).unwrap();
        }

        let cfg = TranscodeConfig { library_roots: vec![root.to_path_buf()], ..Default::default() };
        let mut report = RecoveryReport::default();
        cleanup_artifacts(&cfg, &mut report);

        assert_eq!(report, RecoveryReport::default());
        for name in names {
            assert_eq!(fs::read(root.join(name)).unwrap(), name.as_bytes());
        }
        assert!(!root.join("Holiday").exists());
        assert!(!root.join("movie.mkv").exists());
    }
}
