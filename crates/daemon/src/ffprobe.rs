use std::path::Path;
use std::collections::HashMap;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use tokio::process::Command;
use crate::metadata::StreamMetadata;

/// Complete ffprobe output structure
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeData {
    #[serde(default)]
    pub streams: Vec<FFProbeStream>,
    pub format: FFProbeFormat,
}

/// Format-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeFormat {
    pub format_name: String,
    pub size: Option<String>,
    pub bit_rate: Option<String>,
    pub tags: Option<HashMap<String, String>>,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FFProbeStream {
    pub index: i32,
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub avg_frame_rate: Option<String>,
    pub r_frame_rate: Option<String>,
    pub tags: Option<HashMap<String, String>>,
    pub disposition: Option<HashMap<String, i32>>,
    pub pix_fmt: Option<String>,
    pub bits_per_raw_sample: Option<String>,
    pub color_transfer: Option<String>,
}

impl FFProbeStream {
    /// Detect bit depth from stream metadata.
    /// Checks bits_per_raw_sample first, then the pixel format, then HDR transfer.
    pub fn detect_bit_depth(&self) -> u8 {
        if let Some(bits) = self.bits_per_raw_sample.as_deref().and_then(|b| b.parse::<u8>().ok()) {
            if bits > 0 {
                return bits;
            }
        }

        if let Some(ref pix_fmt) = self.pix_fmt {
            let fmt = pix_fmt.to_lowercase();
            if fmt.contains("12le") || fmt.contains("12be") || fmt.contains("p012") {
                return 12;
            }
            if fmt.contains("10le") || fmt.contains("10be") || fmt.contains("p010") {
                return 10;
            }
        }

        // PQ / HLG transfer implies 10-bit content
        if let Some(ref transfer) = self.color_transfer {
            let t = transfer.to_lowercase();
            if t.contains("smpte2084") || t.contains("arib-std-b67") {
                return 10;
            }
        }

        8
    }

    pub fn flag(&self, name: &str) -> bool {
        self.disposition
            .as_ref()
            .and_then(|d| d.get(name))
            .is_some_and(|v| *v == 1)
    }

    pub fn language(&self) -> Option<String> {
        self.tags
            .as_ref()
            .and_then(|t| t.get("language").or_else(|| t.get("LANGUAGE")))
            .map(|l| l.to_lowercase())
    }
}

/// Anything that can turn a file into [`StreamMetadata`]
#[async_trait]
pub trait MediaProber: Send + Sync {
    async fn probe(&self, file_path: &Path) -> Result<StreamMetadata>;
}

/// Runs the real ffprobe binary
#[derive(Debug, Clone)]
pub struct FFProbe {
    pub ffprobe_bin: std::path::PathBuf,
}

impl FFProbe {
    pub fn new(ffprobe_bin: impl Into<std::path::PathBuf>) -> Self {
        Self { ffprobe_bin: ffprobe_bin.into() }
    }
}

#[async_trait]
impl MediaProber for FFProbe {
    async fn probe(&self, file_path: &Path) -> Result<StreamMetadata> {
        let data = probe_file(&self.ffprobe_bin, file_path).await?;
        let size = tokio::fs::metadata(file_path)
            .await
            .with_context(|| format!("Failed to stat file: {}", file_path.display()))?
            .len();
        Ok(StreamMetadata::from_probe(&data, size))
    }
}

/// Run ffprobe and parse the JSON output
pub async fn probe_file(ffprobe_bin: &Path, file_path: &Path) -> Result<FFProbeData> {
    // Verify file exists before trying to probe
    if !file_path.exists() {
        anyhow::bail!("File does not exist: {}", file_path.display());
    }

    debug!("ffprobe: probing {}", file_path.display());

    let output = Command::new(ffprobe_bin)
        .arg("-v")
        .arg("error")
        .arg("-print_format")
        .arg("json")
        .arg("-show_streams")
        .arg("-show_format")
        .arg(file_path)
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!(
            "Failed to execute ffprobe ({}) for: {}",
            ffprobe_bin.display(),
            file_path.display()
        ))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);
        anyhow::bail!(
            "ffprobe failed (exit code {}) for {}: {}",
            exit_code,
            file_path.display(),
            stderr.trim()
        );
    }

    parse_probe_json(&output.stdout)
        .with_context(|| format!("Failed to parse ffprobe JSON for: {}", file_path.display()))
}

pub fn parse_probe_json(bytes: &[u8]) -> Result<FFProbeData> {
    let json_str = std::str::from_utf8(bytes).context("ffprobe output is not valid UTF-8")?;
    Ok(serde_json::from_str(json_str)?)
}
