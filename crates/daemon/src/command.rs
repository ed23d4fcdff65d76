use std::path::{Path, PathBuf};
use crate::config::TranscodeConfig;
use crate::error::JobError;
use crate::heuristics::HeuristicDecision;

/// Hardware encoder used for every job
pub const ENCODER: &str = "av1_qsv";

/// Marker in temporary output names. Scans and recovery key on it.
pub const TEMP_MARKER: &str = ".av1-tmp.";

/// Encoder settings that come from configuration rather than from the source
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeParams {
    pub hw_device: String,
    pub preset: String,
    pub look_ahead_depth: u32,
    pub excluded_languages: Vec<String>,
}

impl EncodeParams {
    pub fn from_config(cfg: &TranscodeConfig) -> Self {
        Self {
            hw_device: cfg.hw_device_arg(),
            preset: cfg.encoder_preset.clone(),
            look_ahead_depth: cfg.look_ahead_depth,
            excluded_languages: cfg.excluded_languages.clone(),
        }
    }
}

/// Temporary output next to the source: `<stem>.av1-tmp.<id>.mkv`
pub fn temp_output_path(source: &Path, short_id: &str) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    source.with_file_name(format!("{}{}{}.mkv", stem, TEMP_MARKER, short_id))
}

/// Length of the job id fragment in temp output names
const TEMP_ID_LEN: usize = 8;

/// True only for names produced by [`temp_output_path`]
pub fn is_temp_output(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let Some((stem, id)) = name.strip_suffix(".mkv").and_then(|n| n.rsplit_once(TEMP_MARKER)) else {
        return false;
    };
    !stem.is_empty()
        && id.len() == TEMP_ID_LEN
        && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Assemble the encoder argument list.
///
/// Section order matters: ffmpeg resolves `-map` and per-stream options
/// positionally, so flags must not be reordered.
pub fn build_encode_args(
    input: &Path,
    output: &Path,
    decision: &HeuristicDecision,
    params: &EncodeParams,
) -> Result<Vec<String>, JobError> {
    if params.hw_device.trim().is_empty() {
        return Err(JobError::Command("hardware device is not configured".to_string()));
    }
    if !(1..=51).contains(&decision.quality) {
        return Err(JobError::Command(format!("quality {} outside 1..=51", decision.quality)));
    }

    let mut args: Vec<String> = Vec::with_capacity(64);
    let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

    // (a) global flags + hardware device
    push(&["-y", "-nostdin", "-hide_banner", "-loglevel", "info", "-stats"]);
    push(&["-init_hw_device", &params.hw_device, "-filter_hw_device", "hw"]);

    // (b) probing hints
    push(&["-analyzeduration", "50M", "-probesize", "50M"]);
    if decision.web_rip_like {
        push(&["-fflags", "+genpts", "-copyts", "-start_at_zero"]);
    }

    // (c) input
    push(&["-i", &input.to_string_lossy()]);

    // (d) stream selection
    // Drop every video, attachment and data track, then re-add the one video stream.
    push(&["-map", "0", "-map", "-0:v", "-map", "-0:t", "-map", "-0:d"]);
    push(&["-map", &format!("0:v:{}", decision.video_index)]);
    for lang in &params.excluded_languages {
        push(&["-map", &format!("-0:a:m:language:{}", lang)]);
        push(&["-map", &format!("-0:s:m:language:{}", lang)]);
    }
    push(&["-map_chapters", "0"]);

    // (e) sync correction
    if decision.web_rip_like {
        push(&["-fps_mode", "passthrough", "-avoid_negative_ts", "make_zero"]);
    }

    // (f) filter chain
    let filter = format!(
        "pad=ceil(iw/2)*2:ceil(ih/2)*2,setsar=1,format={},hwupload=extra_hw_frames=64",
        decision.surface
    );
    push(&["-filter:v:0", &filter]);

    // (g) encoder
    push(&["-c:v:0", ENCODER]);
    push(&["-global_quality:v:0", &decision.quality.to_string()]);
    push(&["-preset:v:0", &params.preset]);
    push(&["-extbrc", "1", "-look_ahead_depth", &params.look_ahead_depth.to_string()]);

    // (h) passthrough audio/subtitles
    push(&["-c:a", "copy", "-c:s", "copy"]);

    // (i) muxing
    push(&["-max_muxing_queue_size", "2048", "-map_metadata", "0", "-f", "matroska"]);

    // (j) output
    push(&[&output.to_string_lossy()]);

    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualityTable;
    use crate::heuristics::{HeuristicDecision, QualityTier, Surface};
    use crate::metadata::fixtures::{mkv_with, video};
    use crate::metadata::StreamMetadata;
    use proptest::prelude::*;

    fn params() -> EncodeParams {
        let cfg = TranscodeConfig {
            hw_device: Some("qsv=hw".to_string()),
            ..TranscodeConfig::default_config()
        };
        EncodeParams::from_config(&cfg)
    }

    fn decision(web: bool) -> HeuristicDecision {
        HeuristicDecision {
            tier: QualityTier::B,
            quality: 24,
            surface: Surface::Nv12,
            web_rip_like: web,
            video_index: 0,
        }
    }

    fn pos(args: &[String], needle: &str) -> usize {
        args.iter().position(|a| a == needle).unwrap()
    }

    #[test]
    fn test_temp_output_name() {
        let tmp = temp_output_path(Path::new("/media/Movie (2020).mp4"), "1a2b3c4d");
        assert_eq!(tmp, PathBuf::from("/media/Movie (2020).av1-tmp.1a2b3c4d.mkv"));
        assert!(is_temp_output(&tmp));
        assert!(!is_temp_output(Path::new("/media/Movie (2020).mp4")));
    }

    #[test]
    fn test_temp_output_needs_exact_shape() {
        assert!(!is_temp_output(Path::new("/m/Talk.av1-tmp.notes.mp4")));
        assert!(!is_temp_output(Path::new("/m/Talk.av1-tmp.notes.mkv")));
        assert!(!is_temp_output(Path::new("/m/Talk.av1-tmp.1a2b3c4d.mp4")));
        assert!(!is_temp_output(Path::new("/m/Talk.av1-tmp.1A2B3C4D.mkv")));
        assert!(!is_temp_output(Path::new("/m/.av1-tmp.1a2b3c4d.mkv")));
        assert!(is_temp_output(Path::new("/m/a.av1-tmp.b.av1-tmp.1a2b3c4d.mkv")));
    }

    #[test]
    fn test_full_command_plain_source() {
        let args = build_encode_args(
            Path::new("/m/in.mkv"),
            Path::new("/m/in.av1-tmp.x.mkv"),
            &decision(false),
            &params(),
        )
        .unwrap();

        let expected: Vec<String> = [
            "-y", "-nostdin", "-hide_banner", "-loglevel", "info", "-stats",
            "-init_hw_device", "qsv=hw", "-filter_hw_device", "hw",
            "-analyzeduration", "50M", "-probesize", "50M",
            "-i", "/m/in.mkv",
            "-map", "0", "-map", "-0:v", "-map", "-0:t", "-map", "-0:d", "-map", "0:v:0",
            "-map", "-0:a:m:language:rus", "-map", "-0:s:m:language:rus",
            "-map", "-0:a:m:language:ru", "-map", "-0:s:m:language:ru",
            "-map_chapters", "0",
            "-filter:v:0", "pad=ceil(iw/2)*2:ceil(ih/2)*2,setsar=1,format=nv12,hwupload=extra_hw_frames=64",
            "-c:v:0", "av1_qsv", "-global_quality:v:0", "24", "-preset:v:0", "medium",
            "-extbrc", "1", "-look_ahead_depth", "40",
            "-c:a", "copy", "-c:s", "copy",
            "-max_muxing_queue_size", "2048", "-map_metadata", "0", "-f", "matroska",
            "/m/in.av1-tmp.x.mkv",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        assert_eq!(args, expected);
    }

    #[test]
    fn test_web_rip_flags_placement() {
        let args = build_encode_args(Path::new("/m/in.mp4"), Path::new("/m/o.mkv"), &decision(true), &params()).unwrap();

        let input = pos(&args, "-i");
        assert!(pos(&args, "-fflags") < input);
        assert_eq!(args[pos(&args, "-fflags") + 1], "+genpts");
        assert!(pos(&args, "-copyts") < input);
        assert!(pos(&args, "-start_at_zero") < input);

        let chapters = pos(&args, "-map_chapters");
        let filter = pos(&args, "-filter:v:0");
        let fps = pos(&args, "-fps_mode");
        assert!(chapters < fps && fps < filter);
        assert_eq!(args[pos(&args, "-avoid_negative_ts") + 1], "make_zero");
    }

    #[test]
    fn test_selected_index_and_surface_flow_through() {
        let mut cover = video("mjpeg", 600, 600);
        cover.is_attached_pic = true;
        let mut main = video("hevc", 3840, 2160);
        main.bit_depth = 10;
        let meta = StreamMetadata { video: vec![cover, main], ..mkv_with(video("h264", 2, 2)) };

        let d = HeuristicDecision::evaluate(&meta, &QualityTable::default()).unwrap();
        let args = build_encode_args(Path::new("/m/a.mkv"), Path::new("/m/b.mkv"), &d, &params()).unwrap();

        assert!(args.contains(&"0:v:1".to_string()));
        assert!(args[pos(&args, "-filter:v:0") + 1].contains("format=p010"));
        assert_eq!(args[pos(&args, "-global_quality:v:0") + 1], "23");
    }

    #[test]
    fn test_invalid_preconditions_fail() {
        let mut p = params();
        p.hw_device.clear();
        assert!(matches!(
            build_encode_args(Path::new("/a"), Path::new("/b"), &decision(false), &p),
            Err(JobError::Command(_))
        ));

        let mut d = decision(false);
        d.quality = 0;
        assert!(build_encode_args(Path::new("/a"), Path::new("/b"), &d, &params()).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Input, stream selection, encoder and output always appear in this order
        #[test]
        fn test_section_order_is_fixed(
            web in any::<bool>(),
            index in 0usize..4,
            quality in 1u8..=51,
            surface in prop_oneof![Just(Surface::Nv12), Just(Surface::P010)],
            langs in proptest::collection::vec("[a-z]{2,3}", 0..4),
        ) {
            let d = HeuristicDecision { tier: QualityTier::C, quality, surface, web_rip_like: web, video_index: index };
            let mut p = params();
            p.excluded_languages = langs.clone();
            let args = build_encode_args(Path::new("/in.mkv"), Path::new("/out.mkv"), &d, &p).unwrap();

            let hw = pos(&args, "-init_hw_device");
            let input = pos(&args, "-i");
            let map_all = args.iter().position(|a| a == "0").unwrap();
            let chapters = pos(&args, "-map_chapters");
            let filter = pos(&args, "-filter:v:0");
            let encoder = pos(&args, "-c:v:0");
            let copy = pos(&args, "-c:a");
            let fmt = pos(&args, "-f");

            prop_assert!(hw < input && input < map_all && map_all < chapters);
            prop_assert!(chapters < filter && filter < encoder && encoder < copy && copy < fmt);
            prop_assert_eq!(args.last().unwrap(), "/out.mkv");
            let video_map = format!("0:v:{}", index);
            prop_assert!(args.contains(&video_map));
            prop_assert_eq!(args.iter().filter(|a| a.starts_with("-0:a:m:language:")).count(), langs.len());
            prop_assert_eq!(args.contains(&"-copyts".to_string()), web);
        }
    }
}
