//! Settings recommendation engine.
//!
//! [`SettingsRecommender::recommend`] maps a [`VideoAnalysis`] to a
//! [`HandbrakeSettings`] record without touching any store or the
//! filesystem. The tier is chosen from the vertical resolution; the
//! compression estimate comes from a static table keyed by tier and source
//! codec family.

use crate::encode::handbrake_args;
use crate::error::CoreResult;
use crate::models::{current_timestamp_ms, new_id, HandbrakeSettings, VideoAnalysis};
use std::path::{Path, PathBuf};

/// Resolution-based bucket for default encoder parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Uhd,
    FullHd,
    Hd,
    /// Below 720 lines, or resolution unavailable.
    Sd,
}

impl Tier {
    /// First match wins, top to bottom.
    pub fn for_height(height: Option<u32>) -> Self {
        match height {
            Some(h) if h >= 2160 => Tier::Uhd,
            Some(h) if h >= 1080 => Tier::FullHd,
            Some(h) if h >= 720 => Tier::Hd,
            _ => Tier::Sd,
        }
    }

    pub fn preset(self) -> &'static str {
        match self {
            Tier::Uhd => "very-slow",
            Tier::FullHd => "slow",
            Tier::Hd => "medium",
            Tier::Sd => "fast",
        }
    }

    pub fn video_encoder(self) -> &'static str {
        match self {
            Tier::Uhd => "x265",
            _ => "x264",
        }
    }

    pub fn crf(self) -> u8 {
        match self {
            Tier::Uhd => 20,
            Tier::FullHd => 22,
            Tier::Hd => 23,
            Tier::Sd => 25,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Tier::Uhd => "UHD",
            Tier::FullHd => "Full HD",
            Tier::Hd => "HD",
            Tier::Sd => "SD",
        }
    }

    fn rationale(self) -> &'static str {
        match self {
            Tier::Uhd => "maximum compression justified by high source bitrate",
            Tier::FullHd => "balanced quality and encode time",
            Tier::Hd => "fast encode with good-enough quality",
            Tier::Sd => "minimal processing time for a low-value source",
        }
    }

    /// Output/input ratio for a source that gains the most from re-encoding.
    fn aggressive_ratio(self) -> f64 {
        match self {
            Tier::Uhd => 0.40,
            Tier::FullHd => 0.50,
            Tier::Hd => 0.60,
            Tier::Sd => 0.70,
        }
    }
}

/// Source codec grouping used by the compression table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecFamily {
    Hevc,
    Avc,
    /// AV1 and VP9: at least as efficient as HEVC.
    Modern,
    Legacy,
    /// Intra-only or uncompressed mastering formats.
    Intermediate,
    Unknown,
}

impl CodecFamily {
    pub fn classify(codec: &str) -> Self {
        let codec = codec.trim().to_ascii_lowercase();
        match codec.as_str() {
            "hevc" | "h265" | "x265" => CodecFamily::Hevc,
            "h264" | "avc" | "avc1" | "x264" => CodecFamily::Avc,
            "av1" | "vp9" => CodecFamily::Modern,
            "mpeg1video" | "mpeg2video" | "mpeg4" | "msmpeg4v2" | "msmpeg4v3" | "xvid" | "divx"
            | "h263" | "wmv1" | "wmv2" | "wmv3" | "vc1" | "vp8" | "theora" | "flv1"
            | "rv40" => CodecFamily::Legacy,
            "rawvideo" | "prores" | "dnxhd" | "ffv1" | "mjpeg" | "huffyuv" | "utvideo"
            | "v210" | "cineform" => CodecFamily::Intermediate,
            _ => CodecFamily::Unknown,
        }
    }

    fn label(self) -> &'static str {
        match self {
            CodecFamily::Hevc => "HEVC",
            CodecFamily::Avc => "AVC",
            CodecFamily::Modern => "modern",
            CodecFamily::Legacy => "legacy",
            CodecFamily::Intermediate => "intermediate/uncompressed",
            CodecFamily::Unknown => "unrecognized",
        }
    }
}

/// Static compression table keyed by (tier, source family).
///
/// Returns the estimate and whether it is the aggressive branch.
pub fn estimate_compression(tier: Tier, family: CodecFamily) -> (f64, bool) {
    let base = tier.aggressive_ratio();
    let target_is_hevc = tier.video_encoder() == "x265";

    let (ratio, aggressive) = match family {
        CodecFamily::Intermediate => (base * 0.5, true),
        CodecFamily::Legacy => (base, true),
        CodecFamily::Avc if target_is_hevc => (base, true),
        CodecFamily::Avc => (0.90, false),
        CodecFamily::Hevc if target_is_hevc => (0.90, false),
        CodecFamily::Hevc | CodecFamily::Modern => (0.95, false),
        CodecFamily::Unknown => ((base + 0.85) / 2.0, false),
    };
    (ratio.clamp(0.05, 1.0), aggressive)
}

/// Preferred container for the source, and its audio policy.
fn container_for(source_container: &str) -> (&'static str, &'static str) {
    let source = source_container.trim().to_ascii_lowercase();
    match source.as_str() {
        "mkv" | "matroska" | "matroska,webm" => ("mkv", "copy"),
        _ => ("mp4", "av_aac"),
    }
}

/// `<output_dir>/<stem>.<ext>`, with `_optimized` appended to the stem if
/// that would overwrite the input.
pub fn derive_output_path(output_dir: &Path, input: &Path, filename: &str, ext: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .or_else(|| Path::new(filename).file_stem())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());

    let candidate = output_dir.join(format!("{}.{}", stem, ext));
    if candidate == input {
        output_dir.join(format!("{}_optimized.{}", stem, ext))
    } else {
        candidate
    }
}

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | '=' | ':' | ',' | '+' | '@' | '%')
}

/// Quote one argument for a POSIX shell.
pub fn shell_quote(arg: &str) -> String {
    if !arg.is_empty() && arg.chars().all(is_shell_safe) {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Pure decision function from analysis to encoder settings.
#[derive(Debug, Clone)]
pub struct SettingsRecommender {
    output_dir: PathBuf,
    handbrake_path: String,
}

impl SettingsRecommender {
    pub fn new(output_dir: impl Into<PathBuf>, handbrake_path: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            handbrake_path: handbrake_path.into(),
        }
    }

    /// Recommend settings (version 1) for `analysis`.
    ///
    /// Deterministic except for `id` and `created_at`.
    pub fn recommend(&self, analysis: &VideoAnalysis) -> CoreResult<HandbrakeSettings> {
        analysis.validate()?;

        let height = analysis.resolution.known_height();
        let tier = Tier::for_height(height);
        let family = CodecFamily::classify(&analysis.video_codec);
        let (estimated_compression, aggressive) = estimate_compression(tier, family);
        let (container, audio_encoder) = container_for(&analysis.container_format);

        let output_file = derive_output_path(
            &self.output_dir,
            &analysis.file_path,
            &analysis.filename,
            container,
        );

        let mut reasoning = match height {
            Some(h) => format!(
                "Resolution {} ({}p) selects the {} tier: {} {} at CRF {}, {}.",
                analysis.resolution,
                h,
                tier.label(),
                tier.preset(),
                tier.video_encoder(),
                tier.crf(),
                tier.rationale()
            ),
            None => format!(
                "Resolution unknown (unavailable from the probe), so the lowest tier applies: {} {} at CRF {}, {}.",
                tier.preset(),
                tier.video_encoder(),
                tier.crf(),
                tier.rationale()
            ),
        };
        reasoning.push_str(&format!(
            " Source codec {} ({}) to {}: {} size estimate of {:.0}%.",
            analysis.video_codec,
            family.label(),
            tier.video_encoder(),
            if aggressive { "aggressive" } else { "conservative" },
            estimated_compression * 100.0
        ));
        if container == "mkv" {
            reasoning.push_str(" Matroska container preserved with audio passthrough.");
        } else {
            reasoning.push_str(" MP4 container with AAC audio.");
        }

        let mut settings = HandbrakeSettings {
            id: new_id(),
            video_analysis_id: analysis.id.clone(),
            version: 1,
            preset: tier.preset().to_string(),
            video_encoder: tier.video_encoder().to_string(),
            quality: tier.crf(),
            container: container.to_string(),
            audio_encoder: audio_encoder.to_string(),
            estimated_compression,
            reasoning,
            output_file,
            full_command: String::new(),
            created_at: current_timestamp_ms(),
        };
        settings.full_command = self.render_command(&settings, &analysis.file_path);
        Ok(settings)
    }

    fn render_command(&self, settings: &HandbrakeSettings, input: &Path) -> String {
        let mut parts = vec![shell_quote(&self.handbrake_path)];
        parts.extend(
            handbrake_args(settings, input, &settings.output_file)
                .iter()
                .map(|arg| shell_quote(&arg.to_string_lossy())),
        );
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::models::fixtures::analysis;
    use proptest::prelude::*;

    fn recommender() -> SettingsRecommender {
        SettingsRecommender::new("/srv/optimized", "HandBrakeCLI")
    }

    fn tier_of(height: u32) -> HandbrakeSettings {
        recommender()
            .recommend(&analysis(1920, height, "h264", "mp4"))
            .unwrap()
    }

    #[test]
    fn test_tier_boundaries() {
        let s = tier_of(2160);
        assert_eq!((s.video_encoder.as_str(), s.preset.as_str(), s.quality), ("x265", "very-slow", 20));

        let s = tier_of(2159);
        assert_eq!((s.video_encoder.as_str(), s.preset.as_str(), s.quality), ("x264", "slow", 22));

        let s = tier_of(1080);
        assert_eq!((s.video_encoder.as_str(), s.preset.as_str(), s.quality), ("x264", "slow", 22));

        let s = tier_of(1079);
        assert_eq!((s.video_encoder.as_str(), s.preset.as_str(), s.quality), ("x264", "medium", 23));

        let s = tier_of(720);
        assert_eq!(s.preset, "medium");

        let s = tier_of(719);
        assert_eq!((s.video_encoder.as_str(), s.preset.as_str(), s.quality), ("x264", "fast", 25));
    }

    #[test]
    fn test_unknown_resolution_falls_to_lowest_tier() {
        let s = tier_of(0);
        assert_eq!((s.video_encoder.as_str(), s.preset.as_str(), s.quality), ("x264", "fast", 25));
        assert!(s.reasoning.contains("unknown"));
        assert!(s.reasoning.contains("unavailable"));
    }

    #[test]
    fn test_uhd_h264_mkv_scenario() {
        let a = analysis(3840, 2160, "h264", "mkv");
        let s = recommender().recommend(&a).unwrap();

        assert_eq!(s.preset, "very-slow");
        assert_eq!(s.video_encoder, "x265");
        assert_eq!(s.quality, 20);
        assert_eq!(s.container, "mkv");
        assert_eq!(s.audio_encoder, "copy");
        assert_eq!(s.video_analysis_id, a.id);

        let (same_family_ratio, _) = estimate_compression(Tier::Uhd, CodecFamily::Hevc);
        assert!(s.estimated_compression < same_family_ratio);
        assert!(s.estimated_compression > 0.0 && s.estimated_compression <= 1.0);
        assert!(s.reasoning.contains("aggressive"));
        assert!(s.reasoning.contains("2160p"));
    }

    #[test]
    fn test_matroska_names_preserve_mkv() {
        for name in ["mkv", "matroska", "matroska,webm"] {
            let s = recommender()
                .recommend(&analysis(1920, 1080, "h264", name))
                .unwrap();
            assert_eq!(s.container, "mkv", "{}", name);
        }
        let s = recommender()
            .recommend(&analysis(1920, 1080, "h264", "mov,mp4,m4a,3gp,3g2,mj2"))
            .unwrap();
        assert_eq!(s.container, "mp4");
        assert_eq!(s.audio_encoder, "av_aac");
    }

    #[test]
    fn test_full_command_and_output_path() {
        let s = recommender()
            .recommend(&analysis(1920, 1080, "mpeg2video", "mpegts"))
            .unwrap();
        assert_eq!(s.output_file, PathBuf::from("/srv/optimized/movie.mp4"));
        assert_eq!(
            s.full_command,
            "HandBrakeCLI -i /media/incoming/movie.mkv -o /srv/optimized/movie.mp4 \
             --format av_mp4 --encoder x264 --encoder-preset slow --quality 22 --aencoder av_aac"
        );
    }

    #[test]
    fn test_paths_with_spaces_and_quotes_are_quoted() {
        let mut a = analysis(1280, 720, "h264", "mp4");
        a.file_path = PathBuf::from("/media/it's a movie.mp4");
        a.filename = "it's a movie.mp4".to_string();
        let s = recommender().recommend(&a).unwrap();
        assert!(s
            .full_command
            .contains(r"-i '/media/it'\''s a movie.mp4'"));
        assert!(s
            .full_command
            .contains(r"-o '/srv/optimized/it'\''s a movie.mp4'"));
    }

    #[test]
    fn test_output_never_overwrites_input() {
        let mut a = analysis(1920, 1080, "h264", "mp4");
        a.file_path = PathBuf::from("/srv/optimized/movie.mp4");
        let s = recommender().recommend(&a).unwrap();
        assert_eq!(
            s.output_file,
            PathBuf::from("/srv/optimized/movie_optimized.mp4")
        );
    }

    #[test]
    fn test_invalid_analysis_is_rejected() {
        let mut a = analysis(1920, 1080, "h264", "mp4");
        a.duration = -5.0;
        assert!(matches!(
            recommender().recommend(&a),
            Err(CoreError::Validation(_))
        ));

        let mut a = analysis(1920, 1080, "h264", "mp4");
        a.filename.clear();
        assert!(matches!(
            recommender().recommend(&a),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_compression_table_is_bounded() {
        let tiers = [Tier::Uhd, Tier::FullHd, Tier::Hd, Tier::Sd];
        let families = [
            CodecFamily::Hevc,
            CodecFamily::Avc,
            CodecFamily::Modern,
            CodecFamily::Legacy,
            CodecFamily::Intermediate,
            CodecFamily::Unknown,
        ];
        for tier in tiers {
            for family in families {
                let (ratio, _) = estimate_compression(tier, family);
                assert!(ratio > 0.0 && ratio <= 1.0, "{:?} {:?}", tier, family);
            }
            let (legacy, _) = estimate_compression(tier, CodecFamily::Legacy);
            let (modern, _) = estimate_compression(tier, CodecFamily::Modern);
            assert!(legacy < modern);
        }
    }

    #[test]
    fn test_codec_family_classification() {
        assert_eq!(CodecFamily::classify("HEVC"), CodecFamily::Hevc);
        assert_eq!(CodecFamily::classify("h264"), CodecFamily::Avc);
        assert_eq!(CodecFamily::classify("vp9"), CodecFamily::Modern);
        assert_eq!(CodecFamily::classify("mpeg2video"), CodecFamily::Legacy);
        assert_eq!(CodecFamily::classify("prores"), CodecFamily::Intermediate);
        assert_eq!(CodecFamily::classify("unknown"), CodecFamily::Unknown);
    }

    fn shell_unquote(quoted: &str) -> String {
        // Inverse of shell_quote for the two forms it produces.
        if let Some(inner) = quoted.strip_prefix('\'').and_then(|q| q.strip_suffix('\'')) {
            inner.replace(r"'\''", "'")
        } else {
            quoted.to_string()
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_recommend_is_deterministic(
            width in 0u32..8000,
            height in 0u32..5000,
            codec in prop::sample::select(vec!["h264", "hevc", "av1", "mpeg2video", "prores", "weird"]),
            container in prop::sample::select(vec!["mkv", "mp4", "avi", "matroska,webm"]),
        ) {
            let a = analysis(width, height, codec, container);
            let first = recommender().recommend(&a).unwrap();
            let mut second = recommender().recommend(&a).unwrap();
            prop_assert_ne!(&first.id, &second.id);
            second.id = first.id.clone();
            second.created_at = first.created_at;
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_shell_quote_round_trips_and_is_safe(arg in ".{0,40}") {
            let quoted = shell_quote(&arg);
            prop_assert_eq!(shell_unquote(&quoted), arg.clone());
            if quoted.starts_with('\'') {
                // every single quote inside is part of an escape sequence
                let inner = &quoted[1..quoted.len() - 1];
                prop_assert!(!inner.replace(r"'\''", "").contains('\''));
            } else {
                prop_assert!(quoted.chars().all(is_shell_safe));
            }
        }
    }
}
