use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::toolchain::detect_hw_device;

pub const KIB: u64 = 1024;
pub const MIB: u64 = KIB * 1024;
pub const GIB: u64 = MIB * 1024;

/// Extensions scanned when the config does not name any
pub const DEFAULT_MEDIA_EXTENSIONS: &[&str] = &["mkv", "mp4", "m4v", "avi", "mov", "webm"];

/// Rejected configuration. Only raised at startup (or on reload, where the
/// previous snapshot is kept).
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("size gate ratio must be in (0, 1], got {0}")]
    InvalidGateRatio(f64),
    #[error("minimum source size must be greater than zero")]
    ZeroMinimumSize,
    #[error("at least one library root is required")]
    NoLibraryRoots,
    #[error("extension allow-list is empty")]
    NoExtensions,
    #[error("quality value {value} for {tier} is outside 1..=51")]
    QualityOutOfRange { tier: &'static str, value: u8 },
    #[error("quality table must satisfy tier_a <= tier_b <= tier_c (got {a}/{b}/{c})")]
    QualityNotOrdered { a: u8, b: u8, c: u8 },
    #[error("max_concurrent_jobs must be at least 1")]
    ZeroConcurrency,
    #[error("encode timeout must be greater than zero")]
    ZeroTimeout,
}

/// Encoder quality per resolution tier.
///
/// The encoder's `global_quality` scale is inverted: a LOWER number means
/// HIGHER visual fidelity (and a bigger file). Tier A is the high-resolution
/// tier and therefore carries the smallest value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityTable {
    /// Height >= 1440
    pub tier_a: u8,
    /// Height >= 1080
    pub tier_b: u8,
    /// Everything below 1080
    pub tier_c: u8,
}

impl Default for QualityTable {
    fn default() -> Self {
        Self {
            tier_a: 23,
            tier_b: 24,
            tier_c: 25,
        }
    }
}

/// Configuration for the AV1 re-encode daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Library root directories to scan for media files
    pub library_roots: Vec<PathBuf>,
    /// Files strictly smaller than this are never turned into jobs
    pub min_bytes: u64,
    /// Maximum output/source ratio accepted by the size gate (e.g. 0.90)
    pub max_size_ratio: f64,
    /// Lower-cased extensions considered media
    pub media_extensions: Vec<String>,
    /// Per-resolution quality values
    pub quality: QualityTable,
    /// Directory where job state JSON files are stored
    pub job_state_dir: PathBuf,
    /// Interval in seconds between library scans in continuous mode
    pub scan_interval_secs: u64,
    /// Path to the ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// Path to the ffprobe binary
    pub ffprobe_bin: PathBuf,
    /// Argument passed to `-init_hw_device`. Unset means detect from `dri_dir`.
    pub hw_device: Option<String>,
    /// Where DRM render nodes are looked up
    pub dri_dir: PathBuf,
    /// Encoder preset
    pub encoder_preset: String,
    /// Encoder lookahead depth in frames
    pub look_ahead_depth: u32,
    /// Audio/subtitle languages dropped from the output
    pub excluded_languages: Vec<String>,
    /// Wall-clock limit for one encode
    pub encode_timeout_secs: u64,
    /// Number of diagnostic lines retained per encode
    pub diagnostic_tail_lines: usize,
    /// Seconds between the two size samples of the stability check (0 disables it)
    pub stability_wait_secs: u64,
    /// Worker pool size
    pub max_concurrent_jobs: usize,
    /// A source with this many failed attempts is no longer dispatched (0 = unlimited)
    pub max_failed_attempts: u32,
    /// React to filesystem change events between scans
    pub watch_enabled: bool,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl TranscodeConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            library_roots: vec![PathBuf::from("/media")],
            min_bytes: 2 * GIB,
            max_size_ratio: 0.90,
            media_extensions: DEFAULT_MEDIA_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            quality: QualityTable::default(),
            job_state_dir: PathBuf::from("/var/lib/av1janitor/jobs"),
            scan_interval_secs: 60,
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            hw_device: None,
            dri_dir: PathBuf::from("/dev/dri"),
            encoder_preset: "medium".to_string(),
            look_ahead_depth: 40,
            excluded_languages: vec!["rus".to_string(), "ru".to_string()],
            encode_timeout_secs: 4 * 60 * 60,
            diagnostic_tail_lines: 1000,
            stability_wait_secs: 10,
            max_concurrent_jobs: 1,
            max_failed_attempts: 3,
            watch_enabled: true,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                config = if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?
                } else {
                    serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?
                };
            }
        }

        config.media_extensions = config
            .media_extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect();

        Ok(config)
    }

    /// Reject values the engine cannot run with. Called before any scan starts.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(self.max_size_ratio > 0.0 && self.max_size_ratio <= 1.0) {
            return Err(ConfigError::InvalidGateRatio(self.max_size_ratio));
        }
        if self.min_bytes == 0 {
            return Err(ConfigError::ZeroMinimumSize);
        }
        if self.library_roots.is_empty() {
            return Err(ConfigError::NoLibraryRoots);
        }
        if self.media_extensions.is_empty() {
            return Err(ConfigError::NoExtensions);
        }

        let q = self.quality;
        for (tier, value) in [("tier_a", q.tier_a), ("tier_b", q.tier_b), ("tier_c", q.tier_c)] {
            if !(1..=51).contains(&value) {
                return Err(ConfigError::QualityOutOfRange { tier, value });
            }
        }
        if !(q.tier_a <= q.tier_b && q.tier_b <= q.tier_c) {
            return Err(ConfigError::QualityNotOrdered {
                a: q.tier_a,
                b: q.tier_b,
                c: q.tier_c,
            });
        }

        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.encode_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Configured hardware device, or one chosen from the render nodes present
    pub fn hw_device_arg(&self) -> String {
        match &self.hw_device {
            Some(device) => device.clone(),
            None => detect_hw_device(&self.dri_dir).to_string(),
        }
    }

    pub fn encode_timeout(&self) -> Duration {
        Duration::from_secs(self.encode_timeout_secs)
    }

    /// Whether `ext` (without the dot, any case) is on the allow-list
    pub fn allows_extension(&self, ext: &str) -> bool {
        let ext = ext.to_lowercase();
        self.media_extensions.iter().any(|e| *e == ext)
    }
}
