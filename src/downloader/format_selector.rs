// FormatSelector - turns a yt-dlp info document into selectable qualities
//
// Handles:
// - Video resolutions (one entry per height, mp4-family containers only)
// - Audio bitrates (audio-only streams in common containers)
// - Audio dubs (distinct languages on audio-only streams)
// - Size estimation from filesize, filesize_approx or tbr * duration
// - The yt-dlp selector strings each backend passes down

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::Value;

use super::models::{AudioDub, AudioFormat, ExtractedInfo};

const SUPPORTED_AUDIO_EXTS: &[&str] = &["m4a", "mp3", "aac", "opus"];
const MP4_EXTS: &[&str] = &["mp4", "m4v", "mov"];

/// The subset of a yt-dlp format entry we read
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtendedFormat {
    #[serde(default)]
    pub format_id: String,
    #[serde(default)]
    pub ext: String,
    pub height: Option<u32>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub filesize: Option<u64>,
    pub filesize_approx: Option<f64>,
    pub tbr: Option<f64>,
    pub abr: Option<f64>,
    pub language: Option<String>,
}

impl ExtendedFormat {
    pub fn has_video(&self) -> bool {
        self.vcodec.as_deref().map_or(false, |v| v != "none" && !v.is_empty())
    }

    pub fn has_audio(&self) -> bool {
        self.acodec.as_deref().map_or(false, |a| a != "none" && !a.is_empty())
    }

    /// Exact size, else approximate, else bitrate times duration
    pub fn estimated_size(&self, duration: f64) -> Option<u64> {
        self.filesize
            .or(self.filesize_approx.map(|s| s as u64))
            .or_else(|| {
                self.tbr
                    .filter(|_| duration > 0.0)
                    .map(|tbr| (tbr * 1000.0 / 8.0 * duration) as u64)
            })
            .filter(|s| *s > 0)
    }
}

fn size_label(bytes: Option<u64>) -> String {
    match bytes {
        Some(b) => format!("{:.2}MB", b as f64 / 1024.0 / 1024.0),
        None => "Unknown".to_string(),
    }
}

pub struct FormatSelector;

impl FormatSelector {
    /// Build an [`ExtractedInfo`] from a `yt-dlp --dump-json` document
    pub fn from_info_json(json: &Value) -> ExtractedInfo {
        let duration = json["duration"].as_f64();
        let formats: Vec<ExtendedFormat> = json["formats"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|f| serde_json::from_value(f.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();

        let mut info = Self::build_options(&formats, duration.unwrap_or(0.0));

        // Single-file posts (TikTok, Instagram) often have no formats array
        if info.resolutions.is_empty() && formats.is_empty() {
            if let Some(height) = json["height"].as_u64() {
                info.resolutions.push(format!("{}p", height));
                info.sizes.push(size_label(json["filesize"].as_u64()));
            }
        }

        info.title = json["title"].as_str().filter(|t| !t.trim().is_empty()).map(String::from);
        info.thumbnail = json["thumbnail"].as_str().map(String::from);
        info.uploader = json["uploader"].as_str().map(String::from);
        info.duration = duration;
        info.error = json["error"].as_str().map(String::from);
        info
    }

    /// Resolutions, sizes, audio bitrates and dubs from a format list
    pub fn build_options(formats: &[ExtendedFormat], duration: f64) -> ExtractedInfo {
        let mut info = ExtractedInfo::default();
        let mut seen_heights = HashSet::new();
        let mut seen_abr = HashSet::new();
        let mut seen_langs = HashSet::new();

        for f in formats {
            let audio_only = !f.has_video() && f.has_audio();

            if audio_only && SUPPORTED_AUDIO_EXTS.contains(&f.ext.as_str()) {
                if let Some(abr) = f.abr.filter(|a| *a > 0.0) {
                    let label = format!("{}K", abr as u32);
                    if seen_abr.insert(label.clone()) {
                        info.audio_formats.push(AudioFormat {
                            label,
                            abr: Some(abr),
                            size: size_label(f.estimated_size(duration)),
                        });
                    }
                }
            }

            if let Some(lang) = f.language.as_deref().filter(|l| !l.is_empty()) {
                if !f.has_video() && seen_langs.insert(lang.to_lowercase()) {
                    info.audio_dubs.push(AudioDub {
                        lang: lang.to_lowercase(),
                        label: lang.to_uppercase(),
                    });
                }
            }

            let height = match f.height {
                Some(h) if h > 0 && f.has_video() && MP4_EXTS.contains(&f.ext.as_str()) => h,
                _ => continue,
            };
            if seen_heights.insert(height) {
                info.resolutions.push(format!("{}p", height));
                info.sizes.push(size_label(f.estimated_size(duration)));
            }
        }

        info
    }

    /// Video selector for a resolution label such as `"720p"`
    pub fn video_selector(resolution: &str, audio_lang: Option<&str>) -> String {
        let height = resolution.trim().trim_end_matches(['p', 'P']);
        if height.parse::<u32>().is_err() {
            return "bv*+ba/b".to_string();
        }

        let audio = match audio_lang.filter(|l| !l.is_empty()) {
            Some(lang) => format!("ba[ext=m4a][language^={}]", lang),
            None => "ba[ext=m4a]".to_string(),
        };
        format!(
            "bv*[ext=mp4][height={h}]+{audio}/bv*[height={h}]+ba/b[height={h}]",
            h = height,
            audio = audio
        )
    }

    /// Audio selector for a bitrate such as `"192"` or `"192K"`
    pub fn audio_selector(bitrate: &str) -> String {
        let abr = bitrate.trim().trim_end_matches(['k', 'K']);
        if abr.parse::<f64>().is_err() {
            return "ba/b".to_string();
        }
        format!("ba[abr={}]/ba/b", abr)
    }

    /// Selector for a single pre-muxed file (no merge step)
    pub fn single_file_selector(resolution: &str) -> String {
        let height = resolution.trim().trim_end_matches(['p', 'P']);
        match height.parse::<u32>() {
            Ok(h) => format!("b[height={}][vcodec!=none][acodec!=none]/b[height<={}]", h, h),
            Err(_) => "b".to_string(),
        }
    }

    /// Normalised bitrate for yt-dlp's `--audio-quality`
    pub fn audio_quality(bitrate: &str) -> String {
        let abr = bitrate.trim().trim_end_matches(['k', 'K']);
        match abr.parse::<f64>() {
            Ok(v) if v > 0.0 => format!("{}K", v as u32),
            _ => "192K".to_string(),
        }
    }
}
