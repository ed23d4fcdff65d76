use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use log::warn;
use crate::job::{Job, JobStatus};

/// Durable job records, one `<id>.json` file per job.
///
/// Records are written to `<id>.json.tmp` and renamed into place so a
/// concurrent reader (the dashboard) never sees a half-written file. Each
/// worker only ever writes its own job id.
#[derive(Debug, Clone)]
pub struct JobStore {
    dir: PathBuf,
}

/// Per-source summary of past attempts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceHistory {
    pub attempts: u32,
    /// Attempts that ended Failed or Skipped (every Skipped counts)
    pub failures: u32,
    pub last_status: Option<JobStatus>,
}

impl SourceHistory {
    /// Fold one job record into the summary
    pub fn observe(&mut self, job: &Job) {
        if job.attempt >= self.attempts {
            self.attempts = job.attempt;
            self.last_status = Some(job.status);
        }
        if matches!(job.status, JobStatus::Failed | JobStatus::Skipped) {
            self.failures += 1;
        }
    }
}

impl JobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the store directory if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(dir);
        fs::create_dir_all(&store.dir)
            .with_context(|| format!("Failed to create job state directory: {}", store.dir.display()))?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Persist a job record (temp file + rename)
    pub fn save_job(&self, job: &Job) -> Result<()> {
        let final_path = self.record_path(&job.id);
        let tmp_path = self.dir.join(format!("{}.json.tmp", job.id));

        let json = serde_json::to_string_pretty(job)
            .with_context(|| format!("Failed to serialize job {}", job.id))?;
        fs::write(&tmp_path, json)
            .with_context(|| format!("Failed to write job record: {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &final_path)
            .with_context(|| format!("Failed to move job record into place: {}", final_path.display()))?;
        Ok(())
    }

    pub fn load_job(&self, id: &str) -> Result<Job> {
        let path = self.record_path(id);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read job record: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse job record: {}", path.display()))
    }

    /// Load every readable record. Corrupt files are logged and skipped.
    pub fn load_all_jobs(&self) -> Result<Vec<Job>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut jobs = Vec::new();
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list job directory: {}", self.dir.display()))?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|c| serde_json::from_str::<Job>(&c).map_err(anyhow::Error::from))
            {
                Ok(job) => jobs.push(job),
                Err(e) => warn!("Skipping unreadable job record {}: {}", path.display(), e),
            }
        }

        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    /// Attempt/failure counts per source path
    pub fn history(&self) -> Result<HashMap<PathBuf, SourceHistory>> {
        let mut map: HashMap<PathBuf, SourceHistory> = HashMap::new();
        for job in self.load_all_jobs()? {
            map.entry(job.source_path.clone()).or_default().observe(&job);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_job() {
        let temp_dir = TempDir::new().unwrap();
        let store = JobStore::open(temp_dir.path().join("jobs")).unwrap();

        let mut job = Job::new(PathBuf::from("/media/test.mkv"), 1, 1_000_000);
        job.start().unwrap();
        job.succeed(PathBuf::from("/media/test.mkv"), 800_000).unwrap();
        store.save_job(&job).unwrap();

        let loaded = store.load_all_jobs().unwrap();
        assert_eq!(loaded, vec![job.clone()]);
        assert_eq!(store.load_job(&job.id).unwrap(), job);

        // no temp file left behind
        let names: Vec<_> = fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![format!("{}.json", job.id)]);
    }

    #[test]
    fn test_overwrite_keeps_single_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = JobStore::open(temp_dir.path()).unwrap();

        let mut job = Job::new(PathBuf::from("/media/a.mkv"), 1, 10);
        store.save_job(&job).unwrap();
        job.start().unwrap();
        store.save_job(&job).unwrap();

        let loaded = store.load_all_jobs().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].status, JobStatus::Running);
    }

    #[test]
    fn test_corrupt_record_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let store = JobStore::open(temp_dir.path()).unwrap();
        fs::write(temp_dir.path().join("garbage.json"), "{not json").unwrap();
        store.save_job(&Job::new(PathBuf::from("/media/a.mkv"), 1, 10)).unwrap();

        assert_eq!(store.load_all_jobs().unwrap().len(), 1);
    }

    #[test]
    fn test_history_counts_failures() {
        let temp_dir = TempDir::new().unwrap();
        let store = JobStore::open(temp_dir.path()).unwrap();
        let src = PathBuf::from("/media/a.mkv");

        for attempt in 1..=2 {
            let mut job = Job::new(src.clone(), attempt, 10);
            job.start().unwrap();
            job.fail("encoder exited with code 1").unwrap();
            store.save_job(&job).unwrap();
        }

        let history = store.history().unwrap();
        let h = &history[&src];
        assert_eq!(h.attempts, 2);
        assert_eq!(h.failures, 2);
        assert_eq!(h.last_status, Some(JobStatus::Failed));
    }

    #[test]
    fn test_history_counts_skips_as_failures() {
        let temp_dir = TempDir::new().unwrap();
        let store = JobStore::open(temp_dir.path()).unwrap();
        let src = PathBuf::from("/media/b.mkv");

        let mut failed = Job::new(src.clone(), 1, 10);
        failed.start().unwrap();
        failed.fail("encoder exited with code 1").unwrap();
        store.save_job(&failed).unwrap();

        let mut skipped = Job::new(src.clone(), 2, 10);
        skipped.start().unwrap();
        skipped.skip("probe failed: no such file").unwrap();
        store.save_job(&skipped).unwrap();

        let h = &store.history().unwrap()[&src];
        assert_eq!(h.failures, 2);
        assert_eq!(h.last_status, Some(JobStatus::Skipped));
    }

    #[test]
    fn test_load_nonexistent_directory() {
        let store = JobStore::new("/nonexistent/path/12345");
        assert!(store.load_all_jobs().unwrap().is_empty());
    }
}
