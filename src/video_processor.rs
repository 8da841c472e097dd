//! # Video Processing Module
//!
//! Questo modulo gestisce la conversione video con FFmpeg e l'analisi con ffprobe.
//!
//! ## Responsabilità:
//! - Analisi proprietà video con ffprobe (durata, bitrate, risoluzione, fps, frame)
//! - MP4/MOV: libx264 con CRF dal tier qualità, audio AAC
//! - GIF animate: palette ottimizzata, fps (5-30) e budget di frame
//! - Budget di dimensione: tetto al bitrate calcolato dalla durata
//!
//! ## Controllo qualità (CRF):
//! | Tier   | CRF | Audio |
//! |--------|-----|-------|
//! | low    | 32  | 96k   |
//! | medium | 26  | 128k  |
//! | high   | 20  | 192k  |
//!
//! ## Budget GIF:
//! `frame = fps × gif_max_seconds`, larghezza massima `gif_max_width`
//! (mai ingrandita).
//!
//! ## Dipendenze richieste:
//! - `ffmpeg`: conversione
//! - `ffprobe`: analisi
//!
//! ## Esempio:
//! ```rust,ignore
//! let processor = VideoProcessor::new(platform, &config);
//! let info = processor.probe(&path, &cancel).await?;
//! processor.convert(&path, &out, ConversionFormat::Gif, &options, &cancel).await?;
//! ```

use crate::args;
use crate::config::Config;
use crate::error::{OptimizeError, Result};
use crate::formats::{ConversionFormat, GIF_FRAME_RATE_RANGE};
use crate::options::ConversionOptions;
use crate::platform::PlatformCommands;
use crate::process::to_string_vec;
use std::path::Path;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Lowest video bitrate a size budget may impose
const MIN_VIDEO_KBPS: u64 = 100;

/// Video file information
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub duration: f64,
    /// Bits per second of the video stream (container bitrate as fallback)
    pub bitrate: u64,
    pub width: u32,
    pub height: u32,
    pub codec: String,
    pub frame_rate: f64,
    pub frame_count: u64,
}

impl VideoInfo {
    /// Parse `ffprobe -print_format json -show_format -show_streams` output
    pub fn from_ffprobe(info: &serde_json::Value) -> Option<Self> {
        let format = &info["format"];
        let video_stream = info["streams"]
            .as_array()?
            .iter()
            .find(|s| s["codec_type"] == "video")?;

        let parse_f64 = |v: &serde_json::Value| v.as_str().and_then(|s| s.parse::<f64>().ok());
        let parse_u64 = |v: &serde_json::Value| v.as_str().and_then(|s| s.parse::<u64>().ok());

        let duration = parse_f64(&video_stream["duration"])
            .or_else(|| parse_f64(&format["duration"]))
            .unwrap_or(0.0);
        let bitrate = parse_u64(&video_stream["bit_rate"])
            .or_else(|| parse_u64(&format["bit_rate"]))
            .unwrap_or(0);
        let frame_rate = video_stream["avg_frame_rate"]
            .as_str()
            .and_then(parse_rate)
            .or_else(|| video_stream["r_frame_rate"].as_str().and_then(parse_rate))
            .unwrap_or(0.0);
        let frame_count = parse_u64(&video_stream["nb_frames"])
            .unwrap_or_else(|| (duration * frame_rate).round() as u64);

        Some(Self {
            duration,
            bitrate,
            width: video_stream["width"].as_u64().unwrap_or(0) as u32,
            height: video_stream["height"].as_u64().unwrap_or(0) as u32,
            codec: video_stream["codec_name"].as_str().unwrap_or("unknown").to_string(),
            frame_rate,
            frame_count,
        })
    }

    /// Bits spent per pixel per frame, the density measure for video
    pub fn bits_per_pixel(&self) -> Option<f64> {
        let pixels_per_second = self.width as f64 * self.height as f64 * self.frame_rate;
        if self.bitrate == 0 || pixels_per_second <= 0.0 {
            None
        } else {
            Some(self.bitrate as f64 / pixels_per_second)
        }
    }
}

/// "30000/1001" or "25" → frames per second
fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num.parse::<f64>().ok()? / den
        }
        None => rate.parse().ok()?,
    };
    (value > 0.0).then_some(value)
}

/// Video bitrate (kbit/s) that fits `budget_bytes` over `duration` seconds
/// once audio is accounted for
pub fn budget_video_kbps(budget_bytes: u64, duration: f64, audio_kbps: u64) -> Option<u64> {
    if duration <= 0.0 {
        return None;
    }
    let total_kbps = (budget_bytes as f64 * 8.0 / 1000.0) / duration;
    let video_kbps = (total_kbps - audio_kbps as f64).floor();
    Some((video_kbps.max(0.0) as u64).max(MIN_VIDEO_KBPS))
}

fn audio_kbps(bitrate: &str) -> u64 {
    bitrate.trim_end_matches('k').parse().unwrap_or(128)
}

/// Handles video conversion
#[derive(Debug, Clone)]
pub struct VideoProcessor {
    platform: PlatformCommands,
    gif_max_seconds: u32,
    gif_max_width: u32,
}

impl VideoProcessor {
    pub fn new(platform: PlatformCommands, config: &Config) -> Self {
        Self {
            platform,
            gif_max_seconds: config.gif_max_seconds,
            gif_max_width: config.gif_max_width,
        }
    }

    /// Get video information using ffprobe
    pub async fn probe(&self, video_path: &Path, cancel: &CancellationToken) -> Result<VideoInfo> {
        let name = video_path.display().to_string();
        let args = args![
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
            video_path.display()
        ];

        let output = match self.platform.run("ffprobe", &args, cancel).await {
            Ok(output) => output,
            Err(OptimizeError::CodecFailure { cause, .. }) => {
                return Err(OptimizeError::unreadable(name, cause));
            }
            Err(e) => return Err(e),
        };

        let info: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| OptimizeError::unreadable(&name, e))?;
        VideoInfo::from_ffprobe(&info)
            .ok_or_else(|| OptimizeError::unreadable(name, "no video stream"))
    }

    /// ffmpeg arguments for one conversion
    pub fn encode_args(
        &self,
        input: &Path,
        output: &Path,
        format: ConversionFormat,
        options: &ConversionOptions,
        duration: Option<f64>,
    ) -> Result<Vec<String>> {
        let mut args = to_string_vec(["-hide_banner", "-loglevel", "error", "-nostdin", "-i"]);
        args.push(input.to_string_lossy().into_owned());

        match format {
            ConversionFormat::Mp4 | ConversionFormat::Mov => {
                let tier = options.video_quality;
                args.extend(args![
                    "-c:v",
                    "libx264",
                    "-preset",
                    "medium",
                    "-crf",
                    tier.crf(),
                    "-pix_fmt",
                    "yuv420p",
                    "-c:a",
                    "aac",
                    "-b:a",
                    tier.audio_bitrate(),
                    "-map_metadata",
                    0
                ]);

                if let (Some(budget), Some(duration)) = (options.size_budget, duration) {
                    if let Some(kbps) = budget_video_kbps(budget, duration, audio_kbps(tier.audio_bitrate())) {
                        debug!("Capping video bitrate at {} kbit/s for a {} byte budget", kbps, budget);
                        args.extend(args![
                            "-maxrate",
                            format!("{}k", kbps),
                            "-bufsize",
                            format!("{}k", kbps * 2)
                        ]);
                    }
                }

                if format == ConversionFormat::Mp4 {
                    args.extend(to_string_vec(["-movflags", "+faststart", "-f", "mp4"]));
                } else {
                    args.extend(to_string_vec(["-f", "mov"]));
                }
            }
            ConversionFormat::Gif => {
                let fps = options
                    .gif_frame_rate
                    .clamp(*GIF_FRAME_RATE_RANGE.start(), *GIF_FRAME_RATE_RANGE.end());
                let frame_budget = fps * self.gif_max_seconds;
                let filter = format!(
                    "fps={fps},scale='min({width},iw)':-2:flags=lanczos,split[a][b];\
                     [a]palettegen=stats_mode=diff[p];[b][p]paletteuse=dither=bayer:bayer_scale=3",
                    fps = fps,
                    width = self.gif_max_width
                );
                args.extend(args![
                    "-an",
                    "-vf",
                    filter,
                    "-frames:v",
                    frame_budget,
                    "-loop",
                    0,
                    "-f",
                    "gif"
                ]);
            }
            other => {
                return Err(OptimizeError::Validation(format!("{} is not a video format", other)));
            }
        }

        args.push("-y".to_string());
        args.push(output.to_string_lossy().into_owned());
        Ok(args)
    }

    /// Convert a staged video to `format`
    pub async fn convert(
        &self,
        input: &Path,
        output: &Path,
        format: ConversionFormat,
        options: &ConversionOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let duration = if options.size_budget.is_some() && format != ConversionFormat::Gif {
            Some(self.probe(input, cancel).await?.duration)
        } else {
            None
        };
        let args = self.encode_args(input, output, format, options, duration)?;

        info!("🎬 Starting FFmpeg conversion to {}", format);
        let start_time = Instant::now();
        self.platform.run("ffmpeg", &args, cancel).await?;
        info!("✅ Video conversion completed in {:.1}s", start_time.elapsed().as_secs_f64());
        Ok(())
    }
}
