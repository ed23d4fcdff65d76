use std::fmt;
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::error::TransitionError;

/// Status of a re-encode attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed | JobStatus::Skipped)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failed => "FAILED",
            JobStatus::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// Last progress sample seen from the encoder
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub frame: u64,
    pub fps: Option<f64>,
    pub speed: Option<f64>,
    pub output_bytes: Option<u64>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One attempt at re-encoding one source file.
///
/// Only the worker that owns the job mutates it, and only through the
/// transition methods below: Pending -> Running -> {Success, Failed, Skipped}.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub attempt: u32,
    pub source_path: PathBuf,
    pub output_path: Option<PathBuf>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub original_bytes: u64,
    pub new_bytes: Option<u64>,
    pub reason: Option<String>,
    #[serde(default)]
    pub is_web_rip_like: bool,
    #[serde(default)]
    pub quality: Option<u8>,
    #[serde(default)]
    pub surface: Option<String>,
    #[serde(default)]
    pub progress: Option<JobProgress>,
}

/// Deterministic id for (source path, attempt)
pub fn job_id_for(source_path: &Path, attempt: u32) -> String {
    let key = format!("{}\u{0}{}", source_path.to_string_lossy(), attempt);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()).to_string()
}

impl Job {
    /// New pending job for the given attempt number (1-based)
    pub fn new(source_path: PathBuf, attempt: u32, original_bytes: u64) -> Self {
        Self {
            id: job_id_for(&source_path, attempt),
            attempt,
            source_path,
            output_path: None,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            original_bytes,
            new_bytes: None,
            reason: None,
            is_web_rip_like: false,
            quality: None,
            surface: None,
            progress: None,
        }
    }

    /// Short id used in temp file names and log lines
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }

    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.check(JobStatus::Pending, JobStatus::Running)?;
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn succeed(&mut self, output_path: PathBuf, new_bytes: u64) -> Result<(), TransitionError> {
        self.check(JobStatus::Running, JobStatus::Success)?;
        self.status = JobStatus::Success;
        self.output_path = Some(output_path);
        self.new_bytes = Some(new_bytes);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.finish_with_reason(JobStatus::Failed, reason.into())
    }

    pub fn skip(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.finish_with_reason(JobStatus::Skipped, reason.into())
    }

    /// Terminal transition for a non-success outcome
    pub fn finish_with_reason(&mut self, to: JobStatus, reason: String) -> Result<(), TransitionError> {
        debug_assert!(to == JobStatus::Failed || to == JobStatus::Skipped);
        self.check(JobStatus::Running, to)?;
        if reason.trim().is_empty() {
            return Err(TransitionError::MissingReason { id: self.id.clone(), to });
        }
        self.status = to;
        self.reason = Some(reason);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    fn check(&self, expected: JobStatus, to: JobStatus) -> Result<(), TransitionError> {
        if self.status != expected {
            return Err(TransitionError::Illegal {
                id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        Ok(())
    }

    /// Fraction of the original size saved, e.g. 0.14 for 14%
    pub fn savings_ratio(&self) -> Option<f64> {
        let new = self.new_bytes? as f64;
        if self.original_bytes == 0 {
            return None;
        }
        Some(1.0 - new / self.original_bytes as f64)
    }
}
