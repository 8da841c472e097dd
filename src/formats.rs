//! # Format Model Module
//!
//! Questo modulo definisce l'insieme chiuso dei tipi di file riconosciuti e
//! dei formati di output, con le regole di legalità tra i due.
//!
//! ## Responsabilità:
//! - `FileKind`: tipo del file sorgente (documento, immagine, video, ...)
//! - `ConversionFormat`: formati di destinazione con categoria e limiti opzioni
//! - Rilevamento del tipo da firma binaria (magic bytes) ed estensione
//! - Tabella di legalità `is_reachable_from` e lista ordinata dei formati offerti
//! - Regola di merge: N immagini → 1 PDF
//!
//! ## Tabella di legalità:
//! | Sorgente     | Formati                          |
//! |--------------|----------------------------------|
//! | document     | pdf, jpg, png, tiff              |
//! | image        | pdf, jpg, png, heic, webp, tiff  |
//! | video        | mp4, mov, gif                    |
//! | presentation | pdf                              |
//! | spreadsheet  | pdf                              |
//! | unknown      | -                                |
//!
//! `available_formats` è costruita filtrando `ConversionFormat::ALL` con
//! `is_reachable_from`, quindi le due funzioni non possono divergere.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::path::Path;
use std::str::FromStr;

/// Kind of a source file, decided once at selection time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileKind {
    Document,
    Image,
    Video,
    Presentation,
    Spreadsheet,
    UnknownBinary,
}

impl FileKind {
    pub const ALL: [FileKind; 6] = [
        FileKind::Document,
        FileKind::Image,
        FileKind::Video,
        FileKind::Presentation,
        FileKind::Spreadsheet,
        FileKind::UnknownBinary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Image => "image",
            Self::Video => "video",
            Self::Presentation => "presentation",
            Self::Spreadsheet => "spreadsheet",
            Self::UnknownBinary => "unknownBinary",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of an output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatCategory {
    Document,
    Image,
    Video,
}

/// Option bounds a target format accepts. `None` means the option does not
/// apply to the format and is not validated.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionBounds {
    pub quality: Option<RangeInclusive<f64>>,
    pub frame_rate: Option<RangeInclusive<u32>>,
}

pub const QUALITY_RANGE: RangeInclusive<f64> = 0.10..=1.00;
pub const GIF_FRAME_RATE_RANGE: RangeInclusive<u32> = 5..=30;

/// Output formats the engine can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionFormat {
    Pdf,
    Jpg,
    Png,
    Heic,
    Webp,
    Tiff,
    Mp4,
    Mov,
    Gif,
}

impl ConversionFormat {
    /// Every format, in the order they are offered to callers
    pub const ALL: [ConversionFormat; 9] = [
        ConversionFormat::Pdf,
        ConversionFormat::Jpg,
        ConversionFormat::Png,
        ConversionFormat::Heic,
        ConversionFormat::Webp,
        ConversionFormat::Tiff,
        ConversionFormat::Mp4,
        ConversionFormat::Mov,
        ConversionFormat::Gif,
    ];

    pub fn category(&self) -> FormatCategory {
        match self {
            Self::Pdf => FormatCategory::Document,
            Self::Jpg | Self::Png | Self::Heic | Self::Webp | Self::Tiff => FormatCategory::Image,
            Self::Mp4 | Self::Mov | Self::Gif => FormatCategory::Video,
        }
    }

    /// Whether a file of `kind` may be converted to this format
    pub fn is_reachable_from(&self, kind: FileKind) -> bool {
        match kind {
            FileKind::Document => matches!(self, Self::Pdf | Self::Jpg | Self::Png | Self::Tiff),
            FileKind::Image => matches!(
                self,
                Self::Pdf | Self::Jpg | Self::Png | Self::Heic | Self::Webp | Self::Tiff
            ),
            FileKind::Video => matches!(self, Self::Mp4 | Self::Mov | Self::Gif),
            FileKind::Presentation | FileKind::Spreadsheet => matches!(self, Self::Pdf),
            FileKind::UnknownBinary => false,
        }
    }

    /// Lossy formats honour the quality option when re-encoding pixels
    pub fn is_lossy(&self) -> bool {
        matches!(self, Self::Jpg | Self::Webp | Self::Heic)
    }

    /// Formats able to hold several pages/frames in one file
    pub fn supports_multi_page(&self) -> bool {
        matches!(self, Self::Pdf | Self::Tiff | Self::Gif)
    }

    pub fn option_bounds(&self) -> OptionBounds {
        match self.category() {
            FormatCategory::Document | FormatCategory::Image => OptionBounds {
                quality: Some(QUALITY_RANGE),
                frame_rate: None,
            },
            FormatCategory::Video => OptionBounds {
                quality: None,
                frame_rate: matches!(self, Self::Gif).then_some(GIF_FRAME_RATE_RANGE),
            },
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Jpg => "jpg",
            Self::Png => "png",
            Self::Heic => "heic",
            Self::Webp => "webp",
            Self::Tiff => "tiff",
            Self::Mp4 => "mp4",
            Self::Mov => "mov",
            Self::Gif => "gif",
        }
    }
}

impl fmt::Display for ConversionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ConversionFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "jpg" | "jpeg" => Ok(Self::Jpg),
            "png" => Ok(Self::Png),
            "heic" | "heif" => Ok(Self::Heic),
            "webp" => Ok(Self::Webp),
            "tif" | "tiff" => Ok(Self::Tiff),
            "mp4" => Ok(Self::Mp4),
            "mov" => Ok(Self::Mov),
            "gif" => Ok(Self::Gif),
            other => Err(format!("unknown format '{}'", other)),
        }
    }
}

/// Ordered list of formats offered for a source of `kind`
pub fn available_formats(kind: FileKind) -> Vec<ConversionFormat> {
    ConversionFormat::ALL
        .into_iter()
        .filter(|format| format.is_reachable_from(kind))
        .collect()
}

/// True only when several image sources are collapsed into one PDF
pub fn is_multi_file_merge_eligible(target: ConversionFormat, sources: &[FileKind]) -> bool {
    target == ConversionFormat::Pdf
        && sources.len() > 1
        && sources.iter().all(|kind| *kind == FileKind::Image)
}

/// Detect the kind of a file from its leading bytes, falling back to the
/// extension. Never fails.
pub fn detect_kind(path: &Path, head: &[u8]) -> FileKind {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if let Some(kind) = sniff_signature(head, &ext) {
        return kind;
    }
    kind_from_extension(&ext)
}

fn sniff_signature(head: &[u8], ext: &str) -> Option<FileKind> {
    if head.starts_with(b"%PDF") {
        return Some(FileKind::Document);
    }
    if head.starts_with(&[0x89, b'P', b'N', b'G'])
        || head.starts_with(&[0xFF, 0xD8, 0xFF])
        || head.starts_with(b"GIF87a")
        || head.starts_with(b"GIF89a")
        || head.starts_with(b"BM")
        || head.starts_with(b"II*\0")
        || head.starts_with(b"MM\0*")
    {
        return Some(FileKind::Image);
    }
    if head.len() >= 12 && &head[0..4] == b"RIFF" {
        return match &head[8..12] {
            b"WEBP" => Some(FileKind::Image),
            b"AVI " => Some(FileKind::Video),
            _ => None,
        };
    }
    if head.len() >= 12 && &head[4..8] == b"ftyp" {
        return match &head[8..12] {
            b"heic" | b"heix" | b"hevc" | b"heim" | b"heis" | b"mif1" | b"msf1" | b"avif" => {
                Some(FileKind::Image)
            }
            _ => Some(FileKind::Video),
        };
    }
    if head.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some(FileKind::Video);
    }
    // ZIP (OOXML/ODF) and OLE containers carry office files of every kind
    if head.starts_with(b"PK\x03\x04") || head.starts_with(&[0xD0, 0xCF, 0x11, 0xE0]) {
        return match kind_from_extension(ext) {
            kind @ (FileKind::Document | FileKind::Presentation | FileKind::Spreadsheet) => {
                Some(kind)
            }
            _ => Some(FileKind::UnknownBinary),
        };
    }
    None
}

fn kind_from_extension(ext: &str) -> FileKind {
    match ext {
        "pdf" | "docx" | "doc" | "odt" => FileKind::Document,
        "jpg" | "jpeg" | "png" | "gif" | "bmp" | "tif" | "tiff" | "webp" | "heic" | "heif" => {
            FileKind::Image
        }
        "mp4" | "m4v" | "mov" | "avi" | "mkv" | "webm" | "3gp" => FileKind::Video,
        "pptx" | "ppt" | "key" | "odp" => FileKind::Presentation,
        "xlsx" | "xls" | "numbers" | "ods" | "csv" => FileKind::Spreadsheet,
        _ => FileKind::UnknownBinary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_formats_matches_reachability() {
        for kind in FileKind::ALL {
            let offered = available_formats(kind);
            for format in ConversionFormat::ALL {
                assert_eq!(
                    offered.contains(&format),
                    format.is_reachable_from(kind),
                    "{} / {}",
                    kind,
                    format
                );
            }
        }
    }

    #[test]
    fn test_available_formats_is_deterministic() {
        assert_eq!(
            available_formats(FileKind::Document),
            vec![
                ConversionFormat::Pdf,
                ConversionFormat::Jpg,
                ConversionFormat::Png,
                ConversionFormat::Tiff
            ]
        );
        assert_eq!(
            available_formats(FileKind::Video),
            vec![ConversionFormat::Mp4, ConversionFormat::Mov, ConversionFormat::Gif]
        );
        assert!(available_formats(FileKind::UnknownBinary).is_empty());
        assert_eq!(available_formats(FileKind::Image), available_formats(FileKind::Image));
    }

    #[test]
    fn test_detect_by_signature() {
        let p = Path::new("file.bin");
        assert_eq!(detect_kind(p, b"%PDF-1.7\n"), FileKind::Document);
        assert_eq!(detect_kind(p, &[0x89, b'P', b'N', b'G', 0x0D, 0x0A]), FileKind::Image);
        assert_eq!(detect_kind(p, &[0xFF, 0xD8, 0xFF, 0xE0]), FileKind::Image);
        assert_eq!(detect_kind(p, b"RIFF\0\0\0\0WEBPVP8 "), FileKind::Image);
        assert_eq!(detect_kind(p, b"\0\0\0\x18ftypheic\0\0\0\0"), FileKind::Image);
        assert_eq!(detect_kind(p, b"\0\0\0\x18ftypisom\0\0\0\0"), FileKind::Video);
        assert_eq!(detect_kind(p, b"\0\0\0\x14ftypqt  \0\0\0\0"), FileKind::Video);
        assert_eq!(detect_kind(p, b"random bytes"), FileKind::UnknownBinary);
    }

    #[test]
    fn test_signature_wins_over_extension() {
        assert_eq!(detect_kind(Path::new("scan.jpg"), b"%PDF-1.4"), FileKind::Document);
    }

    #[test]
    fn test_zip_containers_use_extension() {
        let zip = b"PK\x03\x04\x14\0\0\0";
        assert_eq!(detect_kind(Path::new("deck.PPTX"), zip), FileKind::Presentation);
        assert_eq!(detect_kind(Path::new("sheet.xlsx"), zip), FileKind::Spreadsheet);
        assert_eq!(detect_kind(Path::new("letter.docx"), zip), FileKind::Document);
        assert_eq!(detect_kind(Path::new("archive.zip"), zip), FileKind::UnknownBinary);
    }

    #[test]
    fn test_extension_fallback() {
        assert_eq!(detect_kind(Path::new("clip.MOV"), b""), FileKind::Video);
        assert_eq!(detect_kind(Path::new("noext"), b""), FileKind::UnknownBinary);
    }

    #[test]
    fn test_merge_eligibility() {
        let images = [FileKind::Image, FileKind::Image];
        assert!(is_multi_file_merge_eligible(ConversionFormat::Pdf, &images));
        assert!(!is_multi_file_merge_eligible(ConversionFormat::Pdf, &[FileKind::Image]));
        assert!(!is_multi_file_merge_eligible(ConversionFormat::Png, &images));
        assert!(!is_multi_file_merge_eligible(
            ConversionFormat::Pdf,
            &[FileKind::Image, FileKind::Document]
        ));
    }

    #[test]
    fn test_format_parsing_and_bounds() {
        assert_eq!("JPEG".parse::<ConversionFormat>(), Ok(ConversionFormat::Jpg));
        assert_eq!("tif".parse::<ConversionFormat>(), Ok(ConversionFormat::Tiff));
        assert!("bmp".parse::<ConversionFormat>().is_err());

        assert!(ConversionFormat::Jpg.is_lossy());
        assert!(!ConversionFormat::Png.is_lossy());
        assert_eq!(ConversionFormat::Gif.option_bounds().frame_rate, Some(5..=30));
        assert_eq!(ConversionFormat::Mp4.option_bounds().quality, None);
        assert_eq!(ConversionFormat::Webp.option_bounds().quality, Some(0.10..=1.00));
    }
}
