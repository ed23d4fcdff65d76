use std::time::Duration;
use thiserror::Error;
use crate::job::JobStatus;

/// Everything that can end a single job early. None of these escape the
/// worker that owns the job; the scheduler keeps running.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("probe failed: {0}")]
    Probe(String),

    #[error("unsupported media: {0}")]
    UnsupportedMedia(String),

    #[error("already {0}")]
    AlreadyTargetCodec(String),

    #[error("source too small: {size} < {min} bytes")]
    TooSmall { size: u64, min: u64 },

    #[error("cannot build encoder command: {0}")]
    Command(String),

    #[error("failed to start encoder: {0}")]
    Spawn(String),

    #[error("encode timed out after {}s", .0.as_secs())]
    EncodeTimeout(Duration),

    #[error("encoder exited with code {code:?}: {tail}")]
    EncodeProcess { code: Option<i32>, tail: String },

    #[error("encoder reported success but produced no usable output: {0}")]
    MissingOutput(String),

    #[error("size gate: output is {:.1}% of source (limit {:.1}%)", .ratio * 100.0, .threshold * 100.0)]
    SizeGateRejected {
        ratio: f64,
        threshold: f64,
        original_bytes: u64,
        new_bytes: u64,
    },

    #[error("atomic replace failed: {0}")]
    AtomicReplace(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl JobError {
    /// Terminal status a job ends in when this error stops it
    pub fn terminal_status(&self) -> JobStatus {
        match self {
            JobError::Probe(_)
            | JobError::UnsupportedMedia(_)
            | JobError::AlreadyTargetCodec(_)
            | JobError::TooSmall { .. }
            | JobError::SizeGateRejected { .. } => JobStatus::Skipped,
            JobError::Command(_)
            | JobError::Spawn(_)
            | JobError::EncodeTimeout(_)
            | JobError::EncodeProcess { .. }
            | JobError::MissingOutput(_)
            | JobError::AtomicReplace(_)
            | JobError::Io(_) => JobStatus::Failed,
        }
    }

    /// Whether a `.av1skip` marker should stop future scans from picking the
    /// source up again
    pub fn writes_skip_marker(&self) -> bool {
        matches!(
            self,
            JobError::UnsupportedMedia(_)
                | JobError::AlreadyTargetCodec(_)
                | JobError::SizeGateRejected { .. }
        )
    }
}

impl From<std::io::Error> for JobError {
    fn from(e: std::io::Error) -> Self {
        JobError::Io(e.to_string())
    }
}

/// Job record transition that would break the lifecycle rules
#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("job {id}: cannot move from {from} to {to}")]
    Illegal { id: String, from: JobStatus, to: JobStatus },
    #[error("job {id}: {to} requires a non-empty reason")]
    MissingReason { id: String, to: JobStatus },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(JobError::Probe("x".into()).terminal_status(), JobStatus::Skipped);
        assert_eq!(
            JobError::EncodeTimeout(Duration::from_secs(5)).terminal_status(),
            JobStatus::Failed
        );
        assert_eq!(
            JobError::AtomicReplace("x".into()).terminal_status(),
            JobStatus::Failed
        );
    }

    #[test]
    fn test_marker_only_for_permanent_skips() {
        assert!(JobError::UnsupportedMedia("no video".into()).writes_skip_marker());
        assert!(!JobError::Probe("broken pipe".into()).writes_skip_marker());
        assert!(!JobError::EncodeProcess { code: Some(1), tail: String::new() }.writes_skip_marker());
    }

    #[test]
    fn test_gate_message_formats_percentages() {
        let e = JobError::SizeGateRejected {
            ratio: 0.94,
            threshold: 0.9,
            original_bytes: 100,
            new_bytes: 94,
        };
        assert_eq!(e.to_string(), "size gate: output is 94.0% of source (limit 90.0%)");
    }
}
