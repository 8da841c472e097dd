//! # Image Processing Module
//!
//! Questo modulo gestisce decodifica, codifica e metadata delle immagini.
//!
//! ## Strategia codec
//!
//! | Formato | Decodifica            | Codifica                     |
//! |---------|-----------------------|------------------------------|
//! | JPEG    | `image` (in-process)  | `image` JpegEncoder          |
//! | PNG     | `image`               | `image` PngEncoder (Best)    |
//! | TIFF    | `image`               | `tiff` (multi-pagina)        |
//! | WebP    | `image`               | cwebp                        |
//! | HEIC    | heif-convert → magick | heif-enc → magick            |
//!
//! Il lavoro CPU gira nel pool blocking di tokio; i tool esterni girano come
//! processi figli con timeout e cancellazione.
//!
//! ## Qualità
//!
//! - La qualità (0.10-1.00) è usata solo dai formati lossy (JPEG, WebP, HEIC)
//! - PNG e TIFF sono lossless e la ignorano
//! - Con un budget di dimensione, la qualità scende a passi di 0.1 (minimo
//!   0.10) finché il risultato non rientra
//!
//! ## Metadata
//!
//! - Dimensioni: header del formato (HEIC: box `ispe`)
//! - DPI: densità JFIF (JPEG) o chunk `pHYs` (PNG)

use crate::args;
use crate::error::{OptimizeError, Result};
use crate::file_manager::Container;
use crate::formats::ConversionFormat;
use crate::options::ConversionOptions;
use crate::platform::PlatformCommands;
use crate::process;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::{DynamicImage, Rgb, RgbImage};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tiff::encoder::{colortype, TiffEncoder};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Lowest quality the size budget may step down to
const QUALITY_FLOOR: f64 = 0.10;
const QUALITY_STEP: f64 = 0.10;

/// Dimensions and pixel density of an image file
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub dpi: Option<f64>,
}

/// Read dimensions and DPI from an image file without decoding pixels
pub fn read_info(path: &Path, container: Container) -> Result<ImageInfo> {
    let name = path.display().to_string();
    let bytes = std::fs::read(path).map_err(|e| OptimizeError::unreadable(&name, e))?;

    let (width, height) = if container == Container::Heif {
        heif_dimensions(&bytes)
            .ok_or_else(|| OptimizeError::unreadable(&name, "no image spatial extents in HEIF file"))?
    } else {
        image::ImageReader::new(Cursor::new(&bytes))
            .with_guessed_format()
            .map_err(|e| OptimizeError::unreadable(&name, e))?
            .into_dimensions()
            .map_err(|e| OptimizeError::unreadable(&name, e))?
    };

    Ok(ImageInfo {
        width,
        height,
        dpi: metadata_dpi(&bytes),
    })
}

/// DPI recorded in JFIF or PNG metadata
pub fn metadata_dpi(bytes: &[u8]) -> Option<f64> {
    jfif_dpi(bytes).or_else(|| png_phys_dpi(bytes))
}

fn be_u16(bytes: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_be_bytes(bytes.get(at..at + 2)?.try_into().ok()?))
}

fn be_u32(bytes: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_be_bytes(bytes.get(at..at + 4)?.try_into().ok()?))
}

fn jfif_dpi(bytes: &[u8]) -> Option<f64> {
    if !bytes.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    let mut pos = 2;
    while pos + 4 <= bytes.len() && bytes[pos] == 0xFF {
        let marker = bytes[pos + 1];
        let length = be_u16(bytes, pos + 2)? as usize;
        if marker == 0xDA {
            break;
        }
        if marker == 0xE0 && bytes.get(pos + 4..pos + 9) == Some(b"JFIF\0".as_slice()) {
            let units = *bytes.get(pos + 11)?;
            let density = be_u16(bytes, pos + 12)? as f64;
            if density == 0.0 {
                return None;
            }
            return match units {
                1 => Some(density),
                2 => Some(density * 2.54),
                _ => None,
            };
        }
        pos += 2 + length;
    }
    None
}

fn png_phys_dpi(bytes: &[u8]) -> Option<f64> {
    if !bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        return None;
    }
    let mut pos = 8;
    while pos + 8 <= bytes.len() {
        let length = be_u32(bytes, pos)? as usize;
        let chunk_type = bytes.get(pos + 4..pos + 8)?;
        match chunk_type {
            b"pHYs" if length >= 9 => {
                let per_unit_x = be_u32(bytes, pos + 8)? as f64;
                let unit = *bytes.get(pos + 16)?;
                return (unit == 1 && per_unit_x > 0.0).then_some(per_unit_x * 0.0254);
            }
            b"IDAT" | b"IEND" => break,
            _ => {}
        }
        pos += 12 + length;
    }
    None
}

/// Largest `ispe` extents in a HEIF file (the primary image; thumbnails are
/// smaller)
fn heif_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    bytes
        .windows(4)
        .enumerate()
        .filter(|(_, w)| *w == b"ispe")
        .filter_map(|(i, _)| Some((be_u32(bytes, i + 8)?, be_u32(bytes, i + 12)?)))
        .max_by_key(|(w, h)| *w as u64 * *h as u64)
}

/// Drop alpha by compositing onto a white background
fn flatten_on_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

/// Encode as baseline JPEG at `quality` (1-100). Transparency becomes white.
pub fn encode_jpeg(image: &DynamicImage, quality: u8, gray: bool) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    let opaque = DynamicImage::ImageRgb8(flatten_on_white(image));
    if gray {
        DynamicImage::ImageLuma8(opaque.to_luma8()).write_with_encoder(encoder)?;
    } else {
        opaque.write_with_encoder(encoder)?;
    }
    Ok(buf)
}

/// Encode as PNG with maximum compression, keeping alpha when present
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut buf, CompressionType::Best, PngFilterType::Adaptive);
    if image.color().has_alpha() {
        DynamicImage::ImageRgba8(image.to_rgba8()).write_with_encoder(encoder)?;
    } else {
        DynamicImage::ImageRgb8(image.to_rgb8()).write_with_encoder(encoder)?;
    }
    Ok(buf)
}

/// Encode every page into one multi-page TIFF, in order
pub fn encode_tiff_pages(pages: &[DynamicImage]) -> Result<Vec<u8>> {
    if pages.is_empty() {
        return Err(OptimizeError::Validation("a TIFF needs at least one page".to_string()));
    }
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut cursor)?;
        for page in pages {
            let rgb = page.to_rgb8();
            encoder.write_image::<colortype::RGB8>(rgb.width(), rgb.height(), rgb.as_raw())?;
        }
    }
    Ok(cursor.into_inner())
}

/// Quality on the 1-100 encoder scale
fn quality_percent(quality: f64) -> u8 {
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

/// Image codec front-end for one engine instance
#[derive(Debug, Clone)]
pub struct ImageProcessor {
    platform: PlatformCommands,
}

impl ImageProcessor {
    pub fn new(platform: PlatformCommands) -> Self {
        Self { platform }
    }

    /// Decode a staged image. HEIF goes through an external converter first.
    pub async fn decode(
        &self,
        path: &Path,
        container: Container,
        workspace: &Path,
        cancel: &CancellationToken,
    ) -> Result<DynamicImage> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let decodable = if container == Container::Heif {
            let png = workspace.join(format!("{}.decoded.png", name));
            let (tool, _) = self.platform.first_available(&["heif-convert", "magick"])?;
            debug!("Decoding HEIF {} with {}", name, tool);
            let args = args![path.display(), png.display()];
            self.platform.run(tool, &args, cancel).await?;
            png
        } else {
            path.to_path_buf()
        };

        process::blocking(cancel, move |_| {
            let bytes = std::fs::read(&decodable)?;
            image::load_from_memory(&bytes).map_err(|e| OptimizeError::unreadable(name, e))
        })
        .await
    }

    /// Encode one image in `format` at `quality` (ignored by lossless formats)
    pub async fn encode(
        &self,
        image: Arc<DynamicImage>,
        format: ConversionFormat,
        quality: f64,
        workspace: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let percent = quality_percent(quality);
        match format {
            ConversionFormat::Jpg => {
                process::blocking(cancel, move |_| encode_jpeg(&image, percent, false)).await
            }
            ConversionFormat::Png => process::blocking(cancel, move |_| encode_png(&image)).await,
            ConversionFormat::Tiff => {
                process::blocking(cancel, move |_| encode_tiff_pages(std::slice::from_ref(&*image))).await
            }
            ConversionFormat::Webp => {
                let input = self.stage_png(image, workspace, cancel).await?;
                let output = workspace.join("encoded.webp");
                let args = args!["-q", percent, "-m", 4, "-mt", input.display(), "-o", output.display()];
                self.platform.run("cwebp", &args, cancel).await?;
                Ok(tokio::fs::read(&output).await?)
            }
            ConversionFormat::Heic => {
                let input = self.stage_png(image, workspace, cancel).await?;
                let output = workspace.join("encoded.heic");
                let (tool, _) = self.platform.first_available(&["heif-enc", "magick"])?;
                let args = if tool == "heif-enc" {
                    args!["-q", percent, "-o", output.display(), input.display()]
                } else {
                    args![input.display(), "-quality", percent, output.display()]
                };
                self.platform.run(tool, &args, cancel).await?;
                Ok(tokio::fs::read(&output).await?)
            }
            other => Err(OptimizeError::Validation(format!("{} is not an image format", other))),
        }
    }

    /// Lossless intermediate handed to external encoders
    async fn stage_png(
        &self,
        image: Arc<DynamicImage>,
        workspace: &Path,
        cancel: &CancellationToken,
    ) -> Result<std::path::PathBuf> {
        let path = workspace.join("encoder-input.png");
        let staged = path.clone();
        process::blocking(cancel, move |cancel| {
            let png = encode_png(&image)?;
            process::checkpoint(cancel)?;
            std::fs::write(&staged, png)?;
            Ok(())
        })
        .await?;
        Ok(path)
    }

    /// Encode, stepping quality down for lossy formats until the result fits
    /// `options.size_budget`. The last attempt is returned even if it is
    /// still over budget.
    pub async fn encode_within_budget(
        &self,
        image: Arc<DynamicImage>,
        format: ConversionFormat,
        options: &ConversionOptions,
        workspace: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let mut quality = options.quality;
        loop {
            let bytes = self
                .encode(image.clone(), format, quality, workspace, cancel)
                .await?;
            match options.size_budget {
                Some(budget)
                    if format.is_lossy()
                        && bytes.len() as u64 > budget
                        && quality > QUALITY_FLOOR + f64::EPSILON =>
                {
                    quality = (quality - QUALITY_STEP).max(QUALITY_FLOOR);
                    debug!(
                        "{} bytes over the {} byte budget, retrying {} at quality {:.2}",
                        bytes.len(),
                        budget,
                        format,
                        quality
                    );
                }
                _ => return Ok(bytes),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn noisy(width: u32, height: u32) -> DynamicImage {
        let mut seed = 0x2545_F491u32;
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            Rgb([(x * 4) as u8, (y * 4) as u8, (seed & 0xFF) as u8])
        }))
    }

    #[test]
    fn test_jpeg_size_grows_with_quality() {
        let image = noisy(64, 64);
        let sizes: Vec<usize> = [10u8, 50, 90]
            .iter()
            .map(|q| encode_jpeg(&image, *q, false).unwrap().len())
            .collect();
        assert!(sizes[0] <= sizes[1] && sizes[1] <= sizes[2], "{:?}", sizes);
    }

    #[test]
    fn test_transparent_pixels_become_white_in_jpeg() {
        let mut rgba = image::RgbaImage::new(16, 16);
        for (x, _, pixel) in rgba.enumerate_pixels_mut() {
            *pixel = if x < 8 {
                image::Rgba([0, 0, 0, 0])
            } else {
                image::Rgba([0, 0, 255, 255])
            };
        }
        let jpeg = encode_jpeg(&DynamicImage::ImageRgba8(rgba), 95, false).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap().to_rgb8();

        let clear = decoded.get_pixel(2, 8).0;
        assert!(clear.iter().all(|c| *c > 240), "{:?}", clear);
        let opaque = decoded.get_pixel(13, 8).0;
        assert!(opaque[2] > 200 && opaque[0] < 60, "{:?}", opaque);
    }

    #[test]
    fn test_jfif_density() {
        let image = noisy(8, 8);
        let mut jpeg = encode_jpeg(&image, 80, false).unwrap();
        // APP0 is the first segment written by the encoder
        assert_eq!(&jpeg[6..11], b"JFIF\0");
        jpeg[13] = 1;
        jpeg[14..16].copy_from_slice(&300u16.to_be_bytes());
        assert_eq!(metadata_dpi(&jpeg), Some(300.0));

        jpeg[13] = 0;
        assert_eq!(metadata_dpi(&jpeg), None);
    }

    #[test]
    fn test_png_phys_density() {
        let mut png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        let mut chunk = |kind: &[u8], data: &[u8]| {
            png.extend_from_slice(&(data.len() as u32).to_be_bytes());
            png.extend_from_slice(kind);
            png.extend_from_slice(data);
            png.extend_from_slice(&[0, 0, 0, 0]);
        };
        chunk(b"IHDR", &[0; 13]);
        let mut phys = Vec::new();
        phys.extend_from_slice(&11811u32.to_be_bytes());
        phys.extend_from_slice(&11811u32.to_be_bytes());
        phys.push(1);
        chunk(b"pHYs", &phys);
        chunk(b"IEND", &[]);

        let dpi = metadata_dpi(&png).unwrap();
        assert!((dpi - 300.0).abs() < 0.1, "{}", dpi);
    }

    #[test]
    fn test_heif_primary_extents() {
        let mut bytes = b"\0\0\0\x18ftypheic".to_vec();
        for (w, h) in [(320u32, 240u32), (4032, 3024)] {
            bytes.extend_from_slice(&20u32.to_be_bytes());
            bytes.extend_from_slice(b"ispe");
            bytes.extend_from_slice(&[0, 0, 0, 0]);
            bytes.extend_from_slice(&w.to_be_bytes());
            bytes.extend_from_slice(&h.to_be_bytes());
        }
        assert_eq!(heif_dimensions(&bytes), Some((4032, 3024)));
    }

    #[test]
    fn test_read_info_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pic.png");
        std::fs::write(&path, encode_png(&noisy(12, 7)).unwrap()).unwrap();
        let info = read_info(&path, Container::Other).unwrap();
        assert_eq!((info.width, info.height), (12, 7));
    }

    #[test]
    fn test_multi_page_tiff() {
        let pages = vec![noisy(10, 10), noisy(20, 5)];
        let tiff = encode_tiff_pages(&pages).unwrap();
        assert!(tiff.starts_with(b"II*\0") || tiff.starts_with(b"MM\0*"));

        let mut decoder = tiff::decoder::Decoder::new(Cursor::new(&tiff)).unwrap();
        assert_eq!(decoder.dimensions().unwrap(), (10, 10));
        assert!(decoder.more_images());
        decoder.next_image().unwrap();
        assert_eq!(decoder.dimensions().unwrap(), (20, 5));
        assert!(!decoder.more_images());
    }

    #[tokio::test]
    async fn test_budget_steps_quality_down() {
        let dir = tempfile::TempDir::new().unwrap();
        let processor = ImageProcessor::new(PlatformCommands::default());
        let image = Arc::new(noisy(96, 96));
        let token = CancellationToken::new();

        let unbounded = processor
            .encode(image.clone(), ConversionFormat::Jpg, 1.0, dir.path(), &token)
            .await
            .unwrap();
        let options = ConversionOptions {
            quality: 1.0,
            size_budget: Some(unbounded.len() as u64 / 2),
            ..Default::default()
        };
        let bounded = processor
            .encode_within_budget(image, ConversionFormat::Jpg, &options, dir.path(), &token)
            .await
            .unwrap();
        assert!(bounded.len() < unbounded.len());
    }

    #[tokio::test]
    async fn test_lossless_ignores_budget() {
        let dir = tempfile::TempDir::new().unwrap();
        let processor = ImageProcessor::new(PlatformCommands::default());
        let image = Arc::new(noisy(32, 32));
        let options = ConversionOptions {
            size_budget: Some(10),
            ..Default::default()
        };
        let png = processor
            .encode_within_budget(image, ConversionFormat::Png, &options, dir.path(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(png.len() > 10);
    }
}
