use std::collections::HashMap;
use serde::{Deserialize, Serialize};
use crate::ffprobe::{FFProbeData, FFProbeStream};

/// One video stream as reported by the prober
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoStream {
    /// Absolute index in the container
    pub index: i32,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub avg_frame_rate: String,
    pub r_frame_rate: String,
    pub is_default: bool,
    pub is_attached_pic: bool,
}

impl VideoStream {
    /// Average and real frame rates disagree
    pub fn is_vfr(&self) -> bool {
        self.avg_frame_rate != self.r_frame_rate
    }

    pub fn has_odd_dimensions(&self) -> bool {
        self.width % 2 == 1 || self.height % 2 == 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioStream {
    pub codec: String,
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleStream {
    pub codec: String,
    pub language: Option<String>,
}

/// Everything the engine knows about a source file. Built once per attempt
/// and never mutated.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub video: Vec<VideoStream>,
    pub audio: Vec<AudioStream>,
    pub subtitles: Vec<SubtitleStream>,
    /// Comma-separated container names, e.g. `mov,mp4,m4a,3gp,3g2,mj2`
    pub format_name: String,
    pub tags: HashMap<String, String>,
    pub size: u64,
}

impl StreamMetadata {
    /// Convert a raw probe report. `size` is the on-disk size at probe time.
    pub fn from_probe(data: &FFProbeData, size: u64) -> Self {
        let mut meta = StreamMetadata {
            format_name: data.format.format_name.clone(),
            tags: data.format.tags.clone().unwrap_or_default(),
            size,
            ..Default::default()
        };

        for stream in &data.streams {
            match stream.codec_type.as_deref() {
                Some("video") => meta.video.push(video_from_probe(stream)),
                Some("audio") => meta.audio.push(AudioStream {
                    codec: codec_name(stream),
                    language: stream.language(),
                }),
                Some("subtitle") => meta.subtitles.push(SubtitleStream {
                    codec: codec_name(stream),
                    language: stream.language(),
                }),
                _ => {}
            }
        }

        meta
    }

    /// Position among video streams (the `N` in `0:v:N`) of the stream that
    /// gets encoded: the first default non-cover-art stream, else the first
    /// non-cover-art stream.
    pub fn selected_video_index(&self) -> Option<usize> {
        let candidates = || self.video.iter().enumerate().filter(|(_, v)| !v.is_attached_pic);
        candidates()
            .find(|(_, v)| v.is_default)
            .or_else(|| candidates().next())
            .map(|(i, _)| i)
    }

    pub fn selected_video(&self) -> Option<&VideoStream> {
        self.selected_video_index().map(|i| &self.video[i])
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

fn codec_name(stream: &FFProbeStream) -> String {
    stream.codec_name.clone().unwrap_or_else(|| "unknown".to_string())
}

fn video_from_probe(stream: &FFProbeStream) -> VideoStream {
    VideoStream {
        index: stream.index,
        codec: codec_name(stream),
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
        bit_depth: stream.detect_bit_depth(),
        avg_frame_rate: stream.avg_frame_rate.clone().unwrap_or_default(),
        r_frame_rate: stream.r_frame_rate.clone().unwrap_or_default(),
        is_default: stream.flag("default"),
        is_attached_pic: stream.flag("attached_pic"),
    }
}
