//! # Document Processing Module
//!
//! Questo modulo gestisce il modello a oggetti dei documenti: PDF tramite
//! `lopdf`, pacchetti office (OOXML/ODF) tramite `zip`.
//!
//! ## Responsabilità:
//! - Scansione PDF: pagine, immagini uniche (risorse ereditate e form XObject
//!   annidati fino a profondità 4), byte delle immagini, DPI per posizionamento
//! - Costruzione di un PDF da pagine JPEG (una immagine per pagina, in ordine)
//! - Ricompressione delle immagini incorporate (JPEG e Flate 8-bit RGB/Gray)
//!   con downsampling sopra il DPI obiettivo
//! - Scansione dei pacchetti office: media incorporati e numero pagine
//!
//! ## Regola di sostituzione:
//! Un'immagine ricompressa sostituisce l'originale solo se il nuovo stream è
//! più piccolo; in caso contrario l'originale resta intatto.

use crate::error::{OptimizeError, Result};
use crate::image_processor;
use crate::process;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Nesting limit for form XObjects
const MAX_FORM_DEPTH: usize = 4;
const POINTS_PER_INCH: f64 = 72.0;

/// What a walk over a PDF found
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PdfScan {
    pub page_count: u32,
    /// Unique image XObjects
    pub image_count: u32,
    /// Encoded bytes of the unique images
    pub image_bytes: u64,
    pub file_size: u64,
    /// DPI of the largest image (by pixel area) on the page it is placed on
    pub largest_image_dpi: Option<f64>,
    /// DPI of every image placement with a known page width
    pub placement_dpis: Vec<f64>,
}

impl PdfScan {
    /// Share of the file taken by embedded images, in [0, 1]
    pub fn image_fraction(&self) -> f64 {
        if self.file_size == 0 {
            return 0.0;
        }
        (self.image_bytes as f64 / self.file_size as f64).clamp(0.0, 1.0)
    }

    pub fn average_dpi(&self) -> Option<f64> {
        if self.placement_dpis.is_empty() {
            None
        } else {
            Some(self.placement_dpis.iter().sum::<f64>() / self.placement_dpis.len() as f64)
        }
    }
}

#[derive(Debug, Clone)]
struct ImagePlacement {
    id: Option<ObjectId>,
    width_px: u32,
    height_px: u32,
    bytes: u64,
    page_width_in: Option<f64>,
}

impl ImagePlacement {
    fn dpi(&self) -> Option<f64> {
        self.page_width_in
            .filter(|w| *w > 0.0)
            .map(|w| self.width_px as f64 / w)
    }
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

fn name_of(obj: &Object) -> Option<&[u8]> {
    match obj {
        Object::Name(n) => Some(n.as_slice()),
        _ => None,
    }
}

fn dict_number(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<f64> {
    dict.get(key).ok().and_then(|o| resolve(doc, o)).and_then(number)
}

/// Page attribute lookup following the `Parent` chain
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = doc.get_dictionary(page_id).ok()?;
    for _ in 0..64 {
        if let Ok(value) = current.get(key) {
            return resolve(doc, value);
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_dictionary(parent).ok()?;
    }
    None
}

/// Visible page width in inches, from the inherited MediaBox and Rotate
fn page_width_inches(doc: &Document, page_id: ObjectId) -> Option<f64> {
    let media_box = inherited(doc, page_id, b"MediaBox")?.as_array().ok()?;
    let coords: Vec<f64> = media_box
        .iter()
        .filter_map(|o| resolve(doc, o).and_then(number))
        .collect();
    if coords.len() != 4 {
        return None;
    }
    let width = (coords[2] - coords[0]).abs();
    let height = (coords[3] - coords[1]).abs();

    let rotate = inherited(doc, page_id, b"Rotate")
        .and_then(number)
        .unwrap_or(0.0) as i64;
    let visible = if rotate.rem_euclid(180) == 90 { height } else { width };
    Some(visible / POINTS_PER_INCH)
}

fn collect_images(
    doc: &Document,
    resources: &Dictionary,
    depth: usize,
    page_width_in: Option<f64>,
    visited_forms: &mut HashSet<ObjectId>,
    out: &mut Vec<ImagePlacement>,
) {
    let xobjects = match resources
        .get(b"XObject")
        .ok()
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_dict().ok())
    {
        Some(dict) => dict,
        None => return,
    };

    for (_, value) in xobjects.iter() {
        let id = value.as_reference().ok();
        let stream = match resolve(doc, value).and_then(|o| o.as_stream().ok()) {
            Some(stream) => stream,
            None => continue,
        };

        match stream.dict.get(b"Subtype").ok().and_then(name_of) {
            Some(b"Image") => {
                let width_px = dict_number(doc, &stream.dict, b"Width").unwrap_or(0.0) as u32;
                let height_px = dict_number(doc, &stream.dict, b"Height").unwrap_or(0.0) as u32;
                out.push(ImagePlacement {
                    id,
                    width_px,
                    height_px,
                    bytes: stream.content.len() as u64,
                    page_width_in,
                });
            }
            Some(b"Form") if depth < MAX_FORM_DEPTH => {
                if let Some(form_id) = id {
                    if !visited_forms.insert(form_id) {
                        continue;
                    }
                }
                if let Some(form_resources) = stream
                    .dict
                    .get(b"Resources")
                    .ok()
                    .and_then(|o| resolve(doc, o))
                    .and_then(|o| o.as_dict().ok())
                {
                    collect_images(doc, form_resources, depth + 1, page_width_in, visited_forms, out);
                }
            }
            _ => {}
        }
    }
}

/// Every image placement of every page, in page order
fn image_placements(doc: &Document) -> Vec<ImagePlacement> {
    let mut placements = Vec::new();
    for (_, page_id) in doc.get_pages() {
        let page_width = page_width_inches(doc, page_id);
        let resources = match inherited(doc, page_id, b"Resources").and_then(|o| o.as_dict().ok()) {
            Some(resources) => resources,
            None => continue,
        };
        let mut visited_forms = HashSet::new();
        collect_images(doc, resources, 0, page_width, &mut visited_forms, &mut placements);
    }
    placements
}

/// Walk a PDF without modifying it
pub fn scan_pdf(path: &Path) -> Result<PdfScan> {
    let name = path.display().to_string();
    let file_size = std::fs::metadata(path)
        .map_err(|e| OptimizeError::unreadable(&name, e))?
        .len();
    let doc = Document::load(path).map_err(|e| OptimizeError::unreadable(&name, e))?;
    Ok(scan_document(&doc, file_size))
}

fn scan_document(doc: &Document, file_size: u64) -> PdfScan {
    let placements = image_placements(doc);

    let mut seen = HashSet::new();
    let mut image_count = 0u32;
    let mut image_bytes = 0u64;
    let mut largest: Option<&ImagePlacement> = None;

    for placement in &placements {
        let unique = match placement.id {
            Some(id) => seen.insert(id),
            None => true,
        };
        if unique {
            image_count += 1;
            image_bytes += placement.bytes;
        }
        let area = |p: &ImagePlacement| p.width_px as u64 * p.height_px as u64;
        if placement.dpi().is_some() && largest.map_or(true, |l| area(placement) > area(l)) {
            largest = Some(placement);
        }
    }

    let scan = PdfScan {
        page_count: doc.get_pages().len() as u32,
        image_count,
        image_bytes,
        file_size,
        largest_image_dpi: largest.and_then(ImagePlacement::dpi),
        placement_dpis: placements.iter().filter_map(ImagePlacement::dpi).collect(),
    };
    debug!(
        "PDF scan: {} pages, {} images, {} image bytes of {}",
        scan.page_count, scan.image_count, scan.image_bytes, scan.file_size
    );
    scan
}

/// One JPEG-encoded page for `images_to_pdf`
#[derive(Debug, Clone)]
pub struct PdfPageImage {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub gray: bool,
    /// Pixel density used to size the page
    pub dpi: f64,
}

/// Build a PDF with one page per image, in input order
pub fn images_to_pdf(pages: Vec<PdfPageImage>) -> Result<Vec<u8>> {
    if pages.is_empty() {
        return Err(OptimizeError::Validation("a PDF needs at least one page".to_string()));
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());

    for page in pages {
        let dpi = if page.dpi > 0.0 { page.dpi } else { POINTS_PER_INCH };
        let width_pt = ((page.width as f64 * POINTS_PER_INCH / dpi).round() as i64).max(1);
        let height_pt = ((page.height as f64 * POINTS_PER_INCH / dpi).round() as i64).max(1);
        let color_space = if page.gray { "DeviceGray" } else { "DeviceRGB" };

        let image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => page.width as i64,
                "Height" => page.height as i64,
                "ColorSpace" => color_space,
                "BitsPerComponent" => 8i64,
                "Filter" => "DCTDecode",
            },
            page.jpeg,
        )
        .with_compression(false);
        let image_id = doc.add_object(image);

        let content = format!("q {} 0 0 {} 0 0 cm /Im0 Do Q", width_pt, height_pt);
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0i64.into(), 0i64.into(), width_pt.into(), height_pt.into()],
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut out = Vec::new();
    doc.save_to(&mut out)?;
    Ok(out)
}

/// Settings for `recompress_pdf`
#[derive(Debug, Clone, Copy)]
pub struct RecompressSettings {
    pub jpeg_quality: u8,
    /// Images placed above this density are downsampled to it
    pub max_dpi: u32,
}

/// Outcome of a recompression pass
#[derive(Debug, Clone)]
pub struct RecompressReport {
    pub bytes: Vec<u8>,
    pub images_seen: usize,
    pub images_replaced: usize,
}

/// Re-encode the embedded images of a PDF and save it with compressed streams.
/// Stops with `Cancelled` between images once `cancel` fires.
pub fn recompress_pdf(
    input: &[u8],
    settings: RecompressSettings,
    cancel: &CancellationToken,
) -> Result<RecompressReport> {
    let mut doc = Document::load_mem(input)?;

    let mut placement_dpi: HashMap<ObjectId, f64> = HashMap::new();
    for placement in image_placements(&doc) {
        if let (Some(id), Some(dpi)) = (placement.id, placement.dpi()) {
            let entry = placement_dpi.entry(id).or_insert(dpi);
            *entry = entry.max(dpi);
        }
    }

    // Masks keep their exact samples
    let mut masks: HashSet<ObjectId> = HashSet::new();
    let mut image_ids = Vec::new();
    for (id, object) in doc.objects.iter() {
        if let Object::Stream(stream) = object {
            if stream.dict.get(b"Subtype").ok().and_then(name_of) == Some(b"Image".as_slice()) {
                image_ids.push(*id);
                for key in [b"SMask".as_slice(), b"Mask".as_slice()] {
                    if let Ok(mask_id) = stream.dict.get(key).and_then(|o| o.as_reference()) {
                        masks.insert(mask_id);
                    }
                }
            }
        }
    }

    let mut replaced = 0;
    for id in &image_ids {
        process::checkpoint(cancel)?;
        if masks.contains(id) {
            continue;
        }
        let stream = match doc.get_object(*id).and_then(|o| o.as_stream()) {
            Ok(stream) => stream.clone(),
            Err(_) => continue,
        };
        match reencode_image(&stream, placement_dpi.get(id).copied(), settings) {
            Some(new_stream) if new_stream.content.len() < stream.content.len() => {
                trace!(
                    "Image {:?}: {} -> {} bytes",
                    id,
                    stream.content.len(),
                    new_stream.content.len()
                );
                doc.objects.insert(*id, Object::Stream(new_stream));
                replaced += 1;
            }
            _ => {}
        }
    }

    process::checkpoint(cancel)?;
    doc.compress();
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;

    debug!("Recompressed {}/{} images", replaced, image_ids.len());
    Ok(RecompressReport {
        bytes,
        images_seen: image_ids.len(),
        images_replaced: replaced,
    })
}

fn filters(dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|o| name_of(o).map(|n| n.to_vec()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Re-encode one image stream as JPEG; `None` when the image is not a
/// candidate or cannot be decoded
fn reencode_image(stream: &Stream, dpi: Option<f64>, settings: RecompressSettings) -> Option<Stream> {
    let dict = &stream.dict;
    if matches!(dict.get(b"ImageMask"), Ok(Object::Boolean(true))) || dict.has(b"Decode") {
        return None;
    }
    if dict.get(b"BitsPerComponent").ok().and_then(number) != Some(8.0) {
        return None;
    }
    let gray = match dict.get(b"ColorSpace").ok().and_then(name_of) {
        Some(b"DeviceRGB") => false,
        Some(b"DeviceGray") => true,
        _ => return None,
    };
    let width = dict.get(b"Width").ok().and_then(number)? as u32;
    let height = dict.get(b"Height").ok().and_then(number)? as u32;

    let image = match filters(dict).as_slice() {
        [f] if f.as_slice() == b"DCTDecode" => {
            image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg).ok()?
        }
        [f] if f.as_slice() == b"FlateDecode" && !dict.has(b"DecodeParms") => {
            raw_image(stream.decompressed_content().ok()?, width, height, gray)?
        }
        [] => raw_image(stream.content.clone(), width, height, gray)?,
        _ => return None,
    };

    let image = match dpi {
        Some(dpi) if dpi > settings.max_dpi as f64 => {
            let scale = settings.max_dpi as f64 / dpi;
            let new_width = ((image.width() as f64 * scale).round() as u32).max(1);
            let new_height = ((image.height() as f64 * scale).round() as u32).max(1);
            image.resize_exact(new_width, new_height, FilterType::Lanczos3)
        }
        _ => image,
    };

    let jpeg = image_processor::encode_jpeg(&image, settings.jpeg_quality, gray).ok()?;

    let mut new_dict = dict.clone();
    new_dict.remove(b"DecodeParms");
    new_dict.set("Filter", Object::Name(b"DCTDecode".to_vec()));
    new_dict.set("Width", image.width() as i64);
    new_dict.set("Height", image.height() as i64);
    new_dict.set("BitsPerComponent", 8i64);
    new_dict.set(
        "ColorSpace",
        Object::Name(if gray { b"DeviceGray".to_vec() } else { b"DeviceRGB".to_vec() }),
    );
    Some(Stream::new(new_dict, jpeg).with_compression(false))
}

fn raw_image(samples: Vec<u8>, width: u32, height: u32, gray: bool) -> Option<DynamicImage> {
    if gray {
        GrayImage::from_raw(width, height, samples).map(DynamicImage::ImageLuma8)
    } else {
        RgbImage::from_raw(width, height, samples).map(DynamicImage::ImageRgb8)
    }
}

/// What a walk over an office package found
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OfficeScan {
    pub page_count: Option<u32>,
    pub image_count: u32,
    /// Compressed size of the embedded media entries
    pub image_bytes: u64,
    pub file_size: u64,
}

impl OfficeScan {
    pub fn image_fraction(&self) -> f64 {
        if self.file_size == 0 {
            return 0.0;
        }
        (self.image_bytes as f64 / self.file_size as f64).clamp(0.0, 1.0)
    }
}

fn is_media_entry(name: &str) -> bool {
    (name.contains("/media/") || name.starts_with("Pictures/")) && !name.ends_with('/')
}

fn numbered_part(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix(".xml"))
        .map_or(false, |n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

fn xml_element_value(xml: &str, tag: &str) -> Option<u32> {
    let open = format!("<{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find('<')? + start;
    xml[start..end].trim().parse().ok()
}

fn xml_attribute_value(xml: &str, attribute: &str) -> Option<u32> {
    let key = format!("{}=\"", attribute);
    let start = xml.find(&key)? + key.len();
    let end = xml[start..].find('"')? + start;
    xml[start..end].parse().ok()
}

/// Inspect an OOXML or ODF package
pub fn scan_office(path: &Path) -> Result<OfficeScan> {
    let name = path.display().to_string();
    let file = std::fs::File::open(path).map_err(|e| OptimizeError::unreadable(&name, e))?;
    let file_size = file.metadata()?.len();
    let mut archive = zip::ZipArchive::new(file).map_err(|e| OptimizeError::unreadable(&name, e))?;

    let mut scan = OfficeScan {
        file_size,
        ..Default::default()
    };
    let mut slides = 0u32;
    let mut sheets = 0u32;

    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|e| OptimizeError::unreadable(&name, e))?;
        let entry_name = entry.name();
        if is_media_entry(entry_name) {
            scan.image_count += 1;
            scan.image_bytes += entry.compressed_size();
        } else if numbered_part(entry_name, "ppt/slides/slide") {
            slides += 1;
        } else if numbered_part(entry_name, "xl/worksheets/sheet") {
            sheets += 1;
        }
    }

    let read_entry = |archive: &mut zip::ZipArchive<std::fs::File>, entry: &str| -> Option<String> {
        let mut file = archive.by_name(entry).ok()?;
        let mut text = String::new();
        file.read_to_string(&mut text).ok()?;
        Some(text)
    };

    scan.page_count = if slides > 0 {
        Some(slides)
    } else if sheets > 0 {
        Some(sheets)
    } else if let Some(app) = read_entry(&mut archive, "docProps/app.xml") {
        xml_element_value(&app, "Pages").or_else(|| xml_element_value(&app, "Slides"))
    } else {
        read_entry(&mut archive, "meta.xml")
            .and_then(|meta| xml_attribute_value(&meta, "meta:page-count"))
    };

    debug!(
        "Office scan of {}: {:?} pages, {} media entries",
        name, scan.page_count, scan.image_count
    );
    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 128])
        }))
    }

    fn jpeg_page(width: u32, height: u32, dpi: f64) -> PdfPageImage {
        PdfPageImage {
            jpeg: image_processor::encode_jpeg(&gradient(width, height), 80, false).unwrap(),
            width,
            height,
            gray: false,
            dpi,
        }
    }

    /// A PDF with one raw RGB image shared by `pages` pages, optionally
    /// wrapped in a form XObject
    fn raw_image_pdf(pages: usize, width: u32, height: u32, in_form: bool) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let samples = gradient(width, height).to_rgb8().into_raw();
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8i64,
            },
            samples,
        ).with_compression(false));

        let resources = if in_form {
            let form_id = doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Form",
                    "BBox" => vec![0i64.into(), 0i64.into(), 72i64.into(), 72i64.into()],
                    "Resources" => dictionary! { "XObject" => dictionary! { "Im0" => image_id } },
                },
                b"q 72 0 0 72 0 0 cm /Im0 Do Q".to_vec(),
            ));
            dictionary! { "XObject" => dictionary! { "Fm0" => form_id } }
        } else {
            dictionary! { "XObject" => dictionary! { "Im0" => image_id } }
        };
        let resources_id = doc.add_object(resources);

        let mut kids: Vec<Object> = Vec::new();
        for _ in 0..pages {
            let content_id = doc.add_object(Stream::new(dictionary! {}, b"q 72 0 0 72 0 0 cm Q".to_vec()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }
        // Resources and MediaBox inherited from the page tree root
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
                "Resources" => resources_id,
                "MediaBox" => vec![0i64.into(), 0i64.into(), 144i64.into(), 144i64.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    #[test]
    fn test_images_to_pdf_keeps_order_and_size() {
        let pages = vec![jpeg_page(10, 10, 72.0), jpeg_page(20, 10, 72.0), jpeg_page(30, 10, 144.0)];
        let bytes = images_to_pdf(pages).unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        let page_ids: Vec<ObjectId> = doc.get_pages().values().copied().collect();
        assert_eq!(page_ids.len(), 3);

        let widths: Vec<f64> = page_ids
            .iter()
            .map(|id| page_width_inches(&doc, *id).unwrap() * POINTS_PER_INCH)
            .collect();
        assert_eq!(widths, vec![10.0, 20.0, 15.0]);
    }

    #[test]
    fn test_images_to_pdf_rejects_empty() {
        assert!(images_to_pdf(Vec::new()).is_err());
    }

    #[test]
    fn test_scan_counts_shared_image_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shared.pdf");
        std::fs::write(&path, raw_image_pdf(3, 200, 100, false)).unwrap();

        let scan = scan_pdf(&path).unwrap();
        assert_eq!(scan.page_count, 3);
        assert_eq!(scan.image_count, 1);
        assert_eq!(scan.image_bytes, 200 * 100 * 3);
        assert_eq!(scan.placement_dpis.len(), 3);
        // 200 px across a 2 inch page
        assert_eq!(scan.largest_image_dpi, Some(100.0));
        assert!(scan.image_fraction() > 0.5);
    }

    #[test]
    fn test_scan_follows_form_xobjects() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("form.pdf");
        std::fs::write(&path, raw_image_pdf(1, 50, 50, true)).unwrap();

        let scan = scan_pdf(&path).unwrap();
        assert_eq!(scan.image_count, 1);
        assert_eq!(scan.average_dpi(), Some(25.0));
    }

    #[test]
    fn test_scan_unparseable_is_unreadable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("junk.pdf");
        std::fs::write(&path, b"%PDF-1.4 garbage").unwrap();
        assert!(matches!(
            scan_pdf(&path).unwrap_err(),
            OptimizeError::UnreadableSource { .. }
        ));
    }

    #[test]
    fn test_recompress_replaces_raw_images() {
        let input = raw_image_pdf(1, 300, 300, false);
        let report = recompress_pdf(
            &input,
            RecompressSettings {
                jpeg_quality: 60,
                max_dpi: 72,
            },
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(report.images_seen, 1);
        assert_eq!(report.images_replaced, 1);
        assert!(report.bytes.len() < input.len());

        let doc = Document::load_mem(&report.bytes).unwrap();
        let image = doc
            .objects
            .values()
            .filter_map(|o| o.as_stream().ok())
            .find(|s| s.dict.get(b"Subtype").ok().and_then(name_of) == Some(b"Image".as_slice()))
            .unwrap();
        assert_eq!(filters(&image.dict), vec![b"DCTDecode".to_vec()]);
        // 300 px on a 2 inch page is 150 dpi, downsampled to 72
        assert_eq!(number(image.dict.get(b"Width").unwrap()), Some(144.0));
    }

    #[test]
    fn test_recompress_never_grows_images() {
        let pages = vec![jpeg_page(16, 16, 72.0)];
        let input = images_to_pdf(pages).unwrap();
        let report = recompress_pdf(
            &input,
            RecompressSettings {
                jpeg_quality: 100,
                max_dpi: 300,
            },
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(report.images_replaced, 0);
    }

    #[test]
    fn test_recompress_stops_when_cancelled() {
        let input = raw_image_pdf(2, 300, 300, false);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = recompress_pdf(
            &input,
            RecompressSettings {
                jpeg_quality: 60,
                max_dpi: 72,
            },
            &cancel,
        )
        .unwrap_err();
        assert!(err.is_cancelled());
    }

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_scan_presentation_counts_slides_and_media() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deck.pptx");
        let picture = vec![9u8; 4000];
        write_zip(
            &path,
            &[
                ("ppt/slides/slide1.xml", b"<p:sld/>"),
                ("ppt/slides/slide2.xml", b"<p:sld/>"),
                ("ppt/slides/_rels/slide1.xml.rels", b"<Relationships/>"),
                ("ppt/media/image1.png", &picture),
            ],
        );

        let scan = scan_office(&path).unwrap();
        assert_eq!(scan.page_count, Some(2));
        assert_eq!(scan.image_count, 1);
        assert_eq!(scan.image_bytes, 4000);
    }

    #[test]
    fn test_scan_word_document_reads_app_properties() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("letter.docx");
        write_zip(
            &path,
            &[
                ("word/document.xml", b"<w:document/>"),
                ("docProps/app.xml", b"<Properties><Pages>7</Pages></Properties>"),
            ],
        );

        let scan = scan_office(&path).unwrap();
        assert_eq!(scan.page_count, Some(7));
        assert_eq!(scan.image_count, 0);
        assert_eq!(scan.image_fraction(), 0.0);
    }

    #[test]
    fn test_scan_odf_meta_page_count() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("essay.odt");
        write_zip(
            &path,
            &[
                ("content.xml", b"<office:document-content/>"),
                ("meta.xml", b"<meta:document-statistic meta:page-count=\"4\"/>"),
                ("Pictures/1.jpg", b"jpegdata"),
            ],
        );

        let scan = scan_office(&path).unwrap();
        assert_eq!(scan.page_count, Some(4));
        assert_eq!(scan.image_count, 1);
    }
}
