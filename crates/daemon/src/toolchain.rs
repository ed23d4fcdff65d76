use std::fs;
use std::path::{Path, PathBuf};
use log::info;
use thiserror::Error;
use tokio::process::Command;
use crate::command::ENCODER;
use crate::config::TranscodeConfig;

/// Oldest ffmpeg major release the command grammar is written for
pub const MIN_FFMPEG_MAJOR: u32 = 8;

/// Quick Sync initialised directly
pub const QSV_DEVICE: &str = "qsv=hw";

/// Quick Sync layered on VA-API. Required when only DRM render nodes are
/// exposed, as inside LXC/Docker containers.
pub const QSV_VAAPI_DEVICE: &str = "qsv=hw,child_device_type=vaapi";

/// First `renderD*` node in `dri_dir`, if any
pub fn find_render_device(dri_dir: &Path) -> Option<PathBuf> {
    let mut nodes: Vec<PathBuf> = fs::read_dir(dri_dir)
        .ok()?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("renderD"))
        .map(|e| e.path())
        .collect();
    nodes.sort();
    nodes.into_iter().next()
}

/// `-init_hw_device` argument for the render nodes present in `dri_dir`
pub fn detect_hw_device(dri_dir: &Path) -> &'static str {
    match find_render_device(dri_dir) {
        Some(_) => QSV_VAAPI_DEVICE,
        None => QSV_DEVICE,
    }
}

/// Startup toolchain problems. All of them stop the daemon.
#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("failed to run {}: {reason}", .bin.display())]
    NotRunnable { bin: PathBuf, reason: String },
    #[error("cannot parse ffmpeg version from {0:?}")]
    UnknownVersion(String),
    #[error("ffmpeg {found} is too old (need >= {}.0)", MIN_FFMPEG_MAJOR)]
    TooOld { found: FfmpegVersion },
    #[error("ffmpeg does not provide the {} encoder (Intel Quick Sync AV1)", ENCODER)]
    MissingEncoder,
}

/// FFmpeg version information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FfmpegVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl std::fmt::Display for FfmpegVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FfmpegVersion {
    pub fn meets_requirement(&self) -> bool {
        self.major >= MIN_FFMPEG_MAJOR
    }

    /// Parse the first line of `ffmpeg -version`.
    /// "ffmpeg version 8.0.1 Copyright ..." and "ffmpeg version n8.0-12-gabc" both work.
    pub fn parse(first_line: &str) -> Result<Self, ToolchainError> {
        let unknown = || ToolchainError::UnknownVersion(first_line.to_string());

        let token = first_line
            .split_whitespace()
            .skip_while(|t| *t != "version")
            .nth(1)
            .ok_or_else(unknown)?;
        let token = token.strip_prefix('n').unwrap_or(token);
        let numeric: String = token
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();

        let mut parts = numeric.split('.').filter(|p| !p.is_empty()).map(|p| p.parse::<u32>());
        let major = parts.next().ok_or_else(unknown)?.map_err(|_| unknown())?;
        let minor = parts.next().transpose().map_err(|_| unknown())?.unwrap_or(0);
        let patch = parts.next().transpose().map_err(|_| unknown())?.unwrap_or(0);

        Ok(FfmpegVersion { major, minor, patch })
    }
}

/// Verified encoder toolchain
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
    pub version: FfmpegVersion,
    pub hw_device: String,
}

async fn run_stdout(bin: &Path, args: &[&str]) -> Result<String, ToolchainError> {
    let output = Command::new(bin)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ToolchainError::NotRunnable { bin: bin.to_path_buf(), reason: e.to_string() })?;
    if !output.status.success() {
        return Err(ToolchainError::NotRunnable {
            bin: bin.to_path_buf(),
            reason: format!("exit code {}", output.status.code().unwrap_or(-1)),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

pub fn encoder_listed(encoders_output: &str) -> bool {
    encoders_output
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(ENCODER))
}

impl Toolchain {
    /// Check ffmpeg version, the hardware AV1 encoder and ffprobe
    pub async fn detect(config: &TranscodeConfig) -> Result<Self, ToolchainError> {
        let version_out = run_stdout(&config.ffmpeg_bin, &["-version"]).await?;
        let first_line = version_out.lines().next().unwrap_or_default();
        let version = FfmpegVersion::parse(first_line)?;
        if !version.meets_requirement() {
            return Err(ToolchainError::TooOld { found: version });
        }

        let encoders = run_stdout(&config.ffmpeg_bin, &["-hide_banner", "-encoders"]).await?;
        if !encoder_listed(&encoders) {
            return Err(ToolchainError::MissingEncoder);
        }

        run_stdout(&config.ffprobe_bin, &["-version"]).await?;

        let hw_device = config.hw_device_arg();
        info!("🎬 ffmpeg {} with {} at {}", version, ENCODER, config.ffmpeg_bin.display());
        match (&config.hw_device, find_render_device(&config.dri_dir)) {
            (Some(_), _) => info!("   Hardware device (configured): {}", hw_device),
            (None, Some(node)) => info!("   Hardware device: {} (render node {})", hw_device, node.display()),
            (None, None) => info!("   Hardware device: {} (no render node in {})", hw_device, config.dri_dir.display()),
        }
        Ok(Toolchain {
            ffmpeg_bin: config.ffmpeg_bin.clone(),
            ffprobe_bin: config.ffprobe_bin.clone(),
            version,
            hw_device,
        })
    }
}
