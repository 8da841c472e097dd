//! # Conversion Options Module
//!
//! Questo modulo gestisce le opzioni di conversione di un singolo job e i
//! preset con nome.
//!
//! ## Responsabilità:
//! - `ConversionOptions`: qualità (0.10-1.00), tier qualità video, frame rate GIF
//! - Validazione contro i limiti del formato di destinazione (rifiuto, mai clamp)
//! - `Preset`: bundle con nome (`mail`, `whatsapp`, `quality`, `custom`)
//! - Risoluzione preset → opzioni come lookup puro
//!
//! ## Preset:
//! | Preset   | Qualità | Video  | FPS GIF | Budget   |
//! |----------|---------|--------|---------|----------|
//! | mail     | 0.60    | medium | 10      | 25 MB    |
//! | whatsapp | 0.50    | low    | 10      | 16 MB    |
//! | quality  | 1.00    | high   | 30      | -        |
//! | custom   | esplicita                            |

use crate::error::{OptimizeError, Result};
use crate::formats::ConversionFormat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MB: u64 = 1024 * 1024;

/// Ordered quality tier for video targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoQualityTier {
    Low,
    Medium,
    High,
}

impl VideoQualityTier {
    /// x264 constant rate factor for the tier (lower = better)
    pub fn crf(&self) -> u8 {
        match self {
            Self::Low => 32,
            Self::Medium => 26,
            Self::High => 20,
        }
    }

    pub fn audio_bitrate(&self) -> &'static str {
        match self {
            Self::Low => "96k",
            Self::Medium => "128k",
            Self::High => "192k",
        }
    }
}

impl FromStr for VideoQualityTier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown video quality '{}'", other)),
        }
    }
}

/// Options for one conversion job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionOptions {
    /// Quality for lossy targets (0.10-1.00); lossless targets ignore it
    pub quality: f64,
    pub video_quality: VideoQualityTier,
    /// Frames per second for animated GIF output (5-30)
    pub gif_frame_rate: u32,
    /// Upper bound for the artifact size in bytes, if any
    #[serde(default)]
    pub size_budget: Option<u64>,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            quality: 0.8,
            video_quality: VideoQualityTier::Medium,
            gif_frame_rate: 15,
            size_budget: None,
        }
    }
}

impl ConversionOptions {
    /// Reject values outside the bounds of `format`. Options that do not apply
    /// to the format are not checked.
    pub fn validate_for(&self, format: ConversionFormat) -> Result<()> {
        let bounds = format.option_bounds();

        if let Some(range) = bounds.quality {
            if !range.contains(&self.quality) {
                return Err(OptimizeError::OptionsOutOfRange {
                    option: "quality",
                    value: self.quality.to_string(),
                    range: "0.10..=1.00",
                });
            }
        }

        if let Some(range) = bounds.frame_rate {
            if !range.contains(&self.gif_frame_rate) {
                return Err(OptimizeError::OptionsOutOfRange {
                    option: "gif_frame_rate",
                    value: self.gif_frame_rate.to_string(),
                    range: "5..=30",
                });
            }
        }

        if self.size_budget == Some(0) {
            return Err(OptimizeError::OptionsOutOfRange {
                option: "size_budget",
                value: "0".to_string(),
                range: "1..",
            });
        }

        Ok(())
    }

    /// Quality as the 1-100 scale used by encoders
    pub fn quality_percent(&self) -> u8 {
        (self.quality * 100.0).round().clamp(1.0, 100.0) as u8
    }

    /// Rasterization/downsampling DPI derived from quality: 72 dpi at 0.10,
    /// 300 dpi at 1.00
    pub fn target_dpi(&self) -> u32 {
        let t = ((self.quality - 0.10) / 0.90).clamp(0.0, 1.0);
        (72.0 + t * 228.0).round() as u32
    }
}

/// Named option bundles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Mail,
    Whatsapp,
    Quality,
    Custom,
}

impl Preset {
    pub const ALL: [Preset; 4] = [Preset::Mail, Preset::Whatsapp, Preset::Quality, Preset::Custom];

    /// Options bundled with the preset; `None` for `Custom`
    pub fn options(&self) -> Option<ConversionOptions> {
        match self {
            Self::Mail => Some(ConversionOptions {
                quality: 0.6,
                video_quality: VideoQualityTier::Medium,
                gif_frame_rate: 10,
                size_budget: Some(25 * MB),
            }),
            Self::Whatsapp => Some(ConversionOptions {
                quality: 0.5,
                video_quality: VideoQualityTier::Low,
                gif_frame_rate: 10,
                size_budget: Some(16 * MB),
            }),
            Self::Quality => Some(ConversionOptions {
                quality: 1.0,
                video_quality: VideoQualityTier::High,
                gif_frame_rate: 30,
                size_budget: None,
            }),
            Self::Custom => None,
        }
    }

    /// Resolve to concrete options; `custom` supplies them for `Custom`
    pub fn resolve(&self, custom: ConversionOptions) -> ConversionOptions {
        self.options().unwrap_or(custom)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mail => "mail",
            Self::Whatsapp => "whatsapp",
            Self::Quality => "quality",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Preset::ALL
            .into_iter()
            .find(|p| p.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("unknown preset '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid_for_every_format() {
        let options = ConversionOptions::default();
        for format in ConversionFormat::ALL {
            assert!(options.validate_for(format).is_ok(), "{}", format);
        }
    }

    #[test]
    fn test_quality_out_of_range_is_rejected() {
        let options = ConversionOptions {
            quality: 1.5,
            ..Default::default()
        };
        let err = options.validate_for(ConversionFormat::Jpg).unwrap_err();
        assert!(matches!(err, OptimizeError::OptionsOutOfRange { option: "quality", .. }));

        let options = ConversionOptions {
            quality: 0.05,
            ..Default::default()
        };
        assert!(options.validate_for(ConversionFormat::Pdf).is_err());

        let options = ConversionOptions {
            quality: f64::NAN,
            ..Default::default()
        };
        assert!(options.validate_for(ConversionFormat::Webp).is_err());
    }

    #[test]
    fn test_quality_is_not_checked_for_video() {
        let options = ConversionOptions {
            quality: 7.0,
            ..Default::default()
        };
        assert!(options.validate_for(ConversionFormat::Mp4).is_ok());
    }

    #[test]
    fn test_frame_rate_bounds_only_for_gif() {
        let options = ConversionOptions {
            gif_frame_rate: 60,
            ..Default::default()
        };
        assert!(options.validate_for(ConversionFormat::Gif).is_err());
        assert!(options.validate_for(ConversionFormat::Mp4).is_ok());

        for fps in [5, 30] {
            let options = ConversionOptions {
                gif_frame_rate: fps,
                ..Default::default()
            };
            assert!(options.validate_for(ConversionFormat::Gif).is_ok());
        }
    }

    #[test]
    fn test_lossless_target_accepts_quality() {
        let options = ConversionOptions {
            quality: 0.3,
            ..Default::default()
        };
        assert!(options.validate_for(ConversionFormat::Png).is_ok());
        assert!(options.validate_for(ConversionFormat::Tiff).is_ok());
    }

    #[test]
    fn test_target_dpi_range() {
        let low = ConversionOptions {
            quality: 0.10,
            ..Default::default()
        };
        let high = ConversionOptions {
            quality: 1.0,
            ..Default::default()
        };
        assert_eq!(low.target_dpi(), 72);
        assert_eq!(high.target_dpi(), 300);
        assert_eq!(high.quality_percent(), 100);
    }

    #[test]
    fn test_preset_lookup_is_pure() {
        assert_eq!(Preset::Mail.options(), Preset::Mail.options());
        assert_eq!(Preset::Mail.options().unwrap().size_budget, Some(25 * 1024 * 1024));
        assert_eq!(Preset::Quality.options().unwrap().quality, 1.0);
        assert!(Preset::Custom.options().is_none());

        let custom = ConversionOptions {
            quality: 0.42,
            ..Default::default()
        };
        assert_eq!(Preset::Custom.resolve(custom.clone()), custom);
        assert_ne!(Preset::Whatsapp.resolve(custom.clone()), custom);
    }

    #[test]
    fn test_presets_are_valid() {
        for preset in [Preset::Mail, Preset::Whatsapp, Preset::Quality] {
            let options = preset.options().unwrap();
            for format in ConversionFormat::ALL {
                assert!(options.validate_for(format).is_ok());
            }
        }
    }

    #[test]
    fn test_preset_parsing() {
        assert_eq!("WhatsApp".parse::<Preset>(), Ok(Preset::Whatsapp));
        assert!("zip".parse::<Preset>().is_err());
        assert!(VideoQualityTier::Low < VideoQualityTier::High);
        assert_eq!(VideoQualityTier::High.crf(), 20);
    }
}
