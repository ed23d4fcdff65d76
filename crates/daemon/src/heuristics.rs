use std::fmt;
use crate::config::QualityTable;
use crate::metadata::StreamMetadata;

/// Codec name the library is being converted to
pub const TARGET_CODEC: &str = "av1";

/// Container tokens that indicate a streaming/download origin
const WEB_CONTAINERS: &[&str] = &["mov", "mp4", "m4a", "3gp", "3g2", "mj2", "flv"];

/// Resolution tier. `A` is the highest resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QualityTier {
    /// Height >= 1440
    A,
    /// Height >= 1080
    B,
    C,
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QualityTier::A => "A",
            QualityTier::B => "B",
            QualityTier::C => "C",
        };
        f.write_str(s)
    }
}

/// Hardware upload surface format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Nv12,
    P010,
}

impl Surface {
    pub fn as_str(self) -> &'static str {
        match self {
            Surface::Nv12 => "nv12",
            Surface::P010 => "p010",
        }
    }
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Size filter. Strictly below the minimum is skipped.
pub fn should_skip_for_size(size: u64, min_bytes: u64) -> bool {
    size < min_bytes
}

pub fn is_already_target_codec(meta: &StreamMetadata) -> bool {
    meta.selected_video()
        .is_some_and(|v| v.codec.eq_ignore_ascii_case(TARGET_CODEC))
}

/// Whether the container name alone marks the file as a web download.
/// `matroska,webm` is the generic Matroska demuxer and does not count.
fn is_web_container(format_name: &str) -> bool {
    let name = format_name.to_lowercase();
    if name == "webm" {
        return true;
    }
    name.split(',').any(|token| WEB_CONTAINERS.contains(&token.trim()))
}

/// Web-download traits: web container, variable frame rate, or odd
/// dimensions on the selected stream. Any one is enough.
pub fn is_web_rip_like(meta: &StreamMetadata) -> bool {
    if is_web_container(&meta.format_name) {
        return true;
    }
    meta.selected_video()
        .is_some_and(|v| v.is_vfr() || v.has_odd_dimensions())
}

pub fn quality_tier(height: u32) -> QualityTier {
    if height >= 1440 {
        QualityTier::A
    } else if height >= 1080 {
        QualityTier::B
    } else {
        QualityTier::C
    }
}

/// Encoder `global_quality` for a frame height.
///
/// The scale is inverted: a lower value keeps more detail, so the value never
/// increases as height grows.
pub fn choose_quality(height: u32, table: &QualityTable) -> (QualityTier, u8) {
    let tier = quality_tier(height);
    let value = match tier {
        QualityTier::A => table.tier_a,
        QualityTier::B => table.tier_b,
        QualityTier::C => table.tier_c,
    };
    (tier, value)
}

pub fn choose_surface(bit_depth: u8) -> Surface {
    if bit_depth > 8 {
        Surface::P010
    } else {
        Surface::Nv12
    }
}

/// Everything the command builder needs to know about a source
#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicDecision {
    pub tier: QualityTier,
    pub quality: u8,
    pub surface: Surface,
    pub web_rip_like: bool,
    /// Relative index of the video stream to encode
    pub video_index: usize,
}

impl HeuristicDecision {
    /// `None` when there is no encodable video stream
    pub fn evaluate(meta: &StreamMetadata, table: &QualityTable) -> Option<Self> {
        let video_index = meta.selected_video_index()?;
        let video = &meta.video[video_index];
        let (tier, quality) = choose_quality(video.height, table);
        Some(Self {
            tier,
            quality,
            surface: choose_surface(video.bit_depth),
            web_rip_like: is_web_rip_like(meta),
            video_index,
        })
    }
}
