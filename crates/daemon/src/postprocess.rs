use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use log::{error, info, warn};
use uuid::Uuid;
use crate::error::JobError;

/// Infix of backup names: `<file>.bak-<uuid>`
pub const BACKUP_MARKER: &str = ".bak-";

/// The two filesystem calls the replace sequence depends on
pub trait FileOps: Send + Sync {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RealFileOps;

impl FileOps for RealFileOps {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

/// Accepted encode
#[derive(Debug, Clone, PartialEq)]
pub struct GatePass {
    pub ratio: f64,
    pub new_bytes: u64,
}

/// Accept iff `new / original <= threshold`. Exactly at the threshold passes.
pub fn check_size_gate(original_bytes: u64, new_bytes: u64, threshold: f64) -> Result<GatePass, JobError> {
    if original_bytes == 0 {
        return Err(JobError::MissingOutput("source size is zero".to_string()));
    }
    let ratio = new_bytes as f64 / original_bytes as f64;
    if ratio > threshold {
        return Err(JobError::SizeGateRejected {
            ratio,
            threshold,
            original_bytes,
            new_bytes,
        });
    }
    Ok(GatePass { ratio, new_bytes })
}

/// Collision-free backup name in the source's directory
pub fn backup_path(source: &Path) -> PathBuf {
    let mut name: OsString = source.file_name().map(OsString::from).unwrap_or_default();
    name.push(format!("{}{}", BACKUP_MARKER, Uuid::new_v4()));
    source.with_file_name(name)
}

/// True only for names produced by [`backup_path`]
pub fn is_backup(path: &Path) -> bool {
    backup_origin(path).is_some()
}

/// Original file name a backup was made from
pub fn backup_origin(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let (original, suffix) = name.rsplit_once(BACKUP_MARKER)?;
    if original.is_empty() || Uuid::parse_str(suffix).is_err() {
        return None;
    }
    Some(path.with_file_name(original))
}

/// Remove a temp output if it is still there
pub fn cleanup_temp(ops: &dyn FileOps, temp: &Path) {
    match ops.remove_file(temp) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove temp output {}: {}", temp.display(), e),
    }
}

/// Swap `temp` into `source`'s place.
///
/// source -> backup, temp -> source, then drop the backup. If the second
/// rename fails the backup is moved back and the temp output removed, so the
/// source name always ends up holding either the original or the new file.
pub fn replace_file_atomic(ops: &dyn FileOps, source: &Path, temp: &Path) -> Result<(), JobError> {
    let backup = backup_path(source);

    if let Err(e) = ops.rename(source, &backup) {
        cleanup_temp(ops, temp);
        return Err(JobError::AtomicReplace(format!(
            "cannot move {} aside: {}",
            source.display(),
            e
        )));
    }

    if let Err(e) = ops.rename(temp, source) {
        if let Err(rollback) = ops.rename(&backup, source) {
            error!(
                "CRITICAL: rollback failed, original is at {} and {} is missing: {}",
                backup.display(),
                source.display(),
                rollback
            );
        } else {
            warn!("Restored {} after failed replace", source.display());
        }
        cleanup_temp(ops, temp);
        return Err(JobError::AtomicReplace(format!(
            "cannot move {} into place: {}",
            temp.display(),
            e
        )));
    }

    if let Err(e) = ops.remove_file(&backup) {
        warn!("Replaced {} but could not delete backup {}: {}", source.display(), backup.display(), e);
    }

    info!("🔁 Replaced {}", source.display());
    Ok(())
}
