use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use humansize::{format_size, BINARY};

/// Suffix of the rejection marker
pub const SKIP_SUFFIX: &str = ".av1skip";
/// Suffix of the human-readable explanation
pub const WHY_SUFFIX: &str = ".why.txt";

/// Sidecar names are appended to the full file name (`movie.mkv.av1skip`)
/// so `movie.mkv` and `movie.mp4` in one folder never share a marker.
fn with_suffix(file_path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = file_path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    file_path.with_file_name(name)
}

/// Get the path to the skip marker file for a given media file
pub fn skip_marker_path(file_path: &Path) -> PathBuf {
    with_suffix(file_path, SKIP_SUFFIX)
}

/// Get the path to the why.txt file for a given media file
pub fn why_txt_path(file_path: &Path) -> PathBuf {
    with_suffix(file_path, WHY_SUFFIX)
}

/// Check if a skip marker (.av1skip) exists for a file
pub fn has_skip_marker(file_path: &Path) -> bool {
    skip_marker_path(file_path).exists()
}

pub fn is_sidecar(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy())
        .is_some_and(|n| n.ends_with(SKIP_SUFFIX) || n.ends_with(WHY_SUFFIX))
}

/// Write the skip marker and the explanation beside the source
pub fn write_skip_marker(file_path: &Path, reason: &str) -> Result<()> {
    let skip_path = skip_marker_path(file_path);
    fs::write(&skip_path, "")
        .with_context(|| format!("Failed to write skip marker: {}", skip_path.display()))?;
    write_why_txt(file_path, reason)
}

/// Write a why.txt file explaining why a file was skipped
pub fn write_why_txt(file_path: &Path, reason: &str) -> Result<()> {
    let why_path = why_txt_path(file_path);
    let body = if reason.ends_with('\n') { reason.to_string() } else { format!("{}\n", reason) };
    fs::write(&why_path, body)
        .with_context(|| format!("Failed to write why.txt: {}", why_path.display()))?;
    Ok(())
}

/// Explanation text for a size-gate rejection
pub fn size_gate_explanation(original_bytes: u64, new_bytes: u64, ratio: f64, threshold: f64) -> String {
    format!(
        "Re-encode rejected by size gate.\n\
         Original: {} ({} bytes)\n\
         Encoded:  {} ({} bytes)\n\
         Ratio:    {:.4} ({:.1}% of original)\n\
         Limit:    {:.4} (output must be at most {:.1}% of original)\n\
         The original file was left untouched. Delete this marker to retry.\n",
        format_size(original_bytes, BINARY),
        original_bytes,
        format_size(new_bytes, BINARY),
        new_bytes,
        ratio,
        ratio * 100.0,
        threshold,
        threshold * 100.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_marker_names_keep_extension() {
        let p = Path::new("/media/Show/ep01.mkv");
        assert_eq!(skip_marker_path(p), PathBuf::from("/media/Show/ep01.mkv.av1skip"));
        assert_eq!(why_txt_path(p), PathBuf::from("/media/Show/ep01.mkv.why.txt"));
        assert_ne!(skip_marker_path(p), skip_marker_path(Path::new("/media/Show/ep01.mp4")));
        assert!(is_sidecar(&skip_marker_path(p)));
        assert!(!is_sidecar(p));
    }

    #[test]
    fn test_write_marker_and_explanation() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("movie.mkv");
        fs::write(&src, b"x").unwrap();

        assert!(!has_skip_marker(&src));
        write_skip_marker(&src, "already av1").unwrap();
        assert!(has_skip_marker(&src));
        assert_eq!(fs::read_to_string(why_txt_path(&src)).unwrap(), "already av1\n");
    }

    #[test]
    fn test_gate_explanation_mentions_numbers() {
        let text = size_gate_explanation(5 * 1024 * 1024 * 1024, 4_831_838_208, 0.9, 0.9);
        assert!(text.contains("5 GiB"));
        assert!(text.contains("4831838208 bytes"));
        assert!(text.contains("0.9000"));
        assert!(text.contains("90.0%"));
    }
}
