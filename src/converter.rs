//! # Conversion Engine
//!
//! Esegue la trasformazione di una sorgente verso un formato di destinazione,
//! pilotando il `ProgressTracker` del job.
//!
//! ## Ciclo di vita di un job:
//! 1. `preparing`: validazione di coppia (tipo, formato), opzioni e politica
//!    multi-pagina. Un errore qui porta direttamente a `failed`
//! 2. `uploading`: copia a blocchi della sorgente nel workspace privato
//! 3. `optimizing`: lavoro dei codec (in-process o tool esterni)
//! 4. `downloading`: lettura a blocchi dei risultati in `Artifact`
//! 5. `done`
//!
//! Il workspace è una `TempDir`: viene rimosso in ogni caso, anche su errore
//! o cancellazione. I processi figli vengono terminati alla cancellazione.
//!
//! ## Pipeline:
//! - PDF → PDF: ricompressione delle immagini embedded
//! - Office → PDF: soffice headless
//! - Documento → immagini: rasterizzazione (pdftoppm, fallback magick)
//! - Immagine → PDF, immagini → PDF unico (merge)
//! - Immagine → immagine: re-encode con eventuale budget di dimensione
//! - Video → mp4/mov/gif: ffmpeg

use crate::args;
use crate::config::{Config, MultiPagePolicy};
use crate::document::{self, PdfPageImage, RecompressSettings};
use crate::error::{OptimizeError, Result};
use crate::file_manager::{Container, FileManager, FileReference};
use crate::formats::{is_multi_file_merge_eligible, ConversionFormat, FileKind};
use crate::image_processor::{self, ImageProcessor};
use crate::optimizer::progress_tracker::{ProcessingStage, ProgressTracker};
use crate::options::ConversionOptions;
use crate::platform::PlatformCommands;
use crate::process;
use crate::video_processor::VideoProcessor;
use image::DynamicImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Pixel density assumed for images without density metadata
const DEFAULT_IMAGE_DPI: f64 = 72.0;

/// Output payload of a conversion job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub file_name: String,
    pub format: ConversionFormat,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Private per-job directories
struct Workspace {
    root: TempDir,
    input: PathBuf,
    output: PathBuf,
}

impl Workspace {
    async fn create(parent: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("file-optimizer-");
        let root = match parent {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        let input = root.path().join("input");
        let output = root.path().join("output");
        fs::create_dir(&input).await?;
        fs::create_dir(&output).await?;
        Ok(Self { root, input, output })
    }

    fn scratch(&self) -> &Path {
        self.root.path()
    }

    async fn write_output(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.output.join(file_name);
        fs::write(&path, bytes).await?;
        Ok(path)
    }
}

/// Performs conversions for one engine instance
#[derive(Debug, Clone)]
pub struct ConversionEngine {
    platform: PlatformCommands,
    images: ImageProcessor,
    video: VideoProcessor,
    multi_page_policy: MultiPagePolicy,
    chunk_size: usize,
    work_dir: Option<PathBuf>,
}

impl ConversionEngine {
    pub fn new(config: &Config, platform: PlatformCommands) -> Self {
        Self {
            images: ImageProcessor::new(platform.clone()),
            video: VideoProcessor::new(platform.clone(), config),
            platform,
            multi_page_policy: config.multi_page_policy,
            chunk_size: config.staging_chunk_size,
            work_dir: config.work_dir.clone(),
        }
    }

    /// Convert `source` to `to`. Every page of a multi-page document becomes
    /// its own artifact when the target holds a single page.
    pub async fn convert(
        &self,
        source: &FileReference,
        to: ConversionFormat,
        options: &ConversionOptions,
        tracker: &ProgressTracker,
    ) -> Result<Vec<Artifact>> {
        tracker.claim()?;
        let start_time = Instant::now();

        match self.run_convert(source, to, options, tracker).await {
            Ok(artifacts) => {
                info!(
                    "✅ {} → {} ({} artifact(s)) in {:.1}s",
                    source.name,
                    to,
                    artifacts.len(),
                    start_time.elapsed().as_secs_f64()
                );
                Ok(artifacts)
            }
            Err(e) => {
                tracker.finish_with_error(&e);
                Err(e)
            }
        }
    }

    /// Merge several images into one PDF, one page per image in input order
    pub async fn merge_to_document(
        &self,
        sources: &[FileReference],
        options: &ConversionOptions,
        tracker: &ProgressTracker,
    ) -> Result<Artifact> {
        tracker.claim()?;

        match self.run_merge(sources, options, tracker).await {
            Ok(artifact) => {
                info!("✅ Merged {} images into {}", sources.len(), artifact.file_name);
                Ok(artifact)
            }
            Err(e) => {
                tracker.finish_with_error(&e);
                Err(e)
            }
        }
    }

    fn validate(&self, source: &FileReference, to: ConversionFormat, options: &ConversionOptions) -> Result<()> {
        if !to.is_reachable_from(source.kind) {
            return Err(OptimizeError::unsupported(source.kind, to));
        }
        options.validate_for(to)?;
        if let Some(pages) = source.page_count {
            self.check_page_count(to, pages)?;
        }
        Ok(())
    }

    fn check_page_count(&self, to: ConversionFormat, pages: u32) -> Result<()> {
        if pages > 1 && !to.supports_multi_page() && self.multi_page_policy == MultiPagePolicy::Reject {
            return Err(OptimizeError::MultiPageUnsupported {
                format: to,
                pages,
            });
        }
        Ok(())
    }

    async fn run_convert(
        &self,
        source: &FileReference,
        to: ConversionFormat,
        options: &ConversionOptions,
        tracker: &ProgressTracker,
    ) -> Result<Vec<Artifact>> {
        self.validate(source, to, options)?;
        let cancel = tracker.cancellation_token();
        let workspace = Workspace::create(self.work_dir.as_deref()).await?;

        enter(tracker, ProcessingStage::Uploading).await?;
        let staged = self
            .stage(std::slice::from_ref(source), &workspace, tracker, &cancel)
            .await?
            .remove(0);

        enter(tracker, ProcessingStage::Optimizing).await?;
        let outputs = match source.kind {
            FileKind::Image => self.convert_image(source, &staged, to, options, &workspace, &cancel).await?,
            FileKind::Video => {
                let output = workspace.output.join(format!("{}.{}", source.stem(), to.extension()));
                self.video.convert(&staged, &output, to, options, &cancel).await?;
                vec![output]
            }
            FileKind::Document | FileKind::Presentation | FileKind::Spreadsheet => {
                self.convert_document(source, &staged, to, options, &workspace, &cancel)
                    .await?
            }
            FileKind::UnknownBinary => return Err(OptimizeError::unsupported(source.kind, to)),
        };

        enter(tracker, ProcessingStage::Downloading).await?;
        let artifacts = self.collect(&outputs, to, tracker, &cancel).await?;
        tracker.complete()?;
        Ok(artifacts)
    }

    async fn run_merge(
        &self,
        sources: &[FileReference],
        options: &ConversionOptions,
        tracker: &ProgressTracker,
    ) -> Result<Artifact> {
        let kinds: Vec<FileKind> = sources.iter().map(|s| s.kind).collect();
        if !is_multi_file_merge_eligible(ConversionFormat::Pdf, &kinds) {
            return Err(OptimizeError::Validation(
                "merging needs more than one image source".to_string(),
            ));
        }
        options.validate_for(ConversionFormat::Pdf)?;
        let cancel = tracker.cancellation_token();
        let workspace = Workspace::create(self.work_dir.as_deref()).await?;

        enter(tracker, ProcessingStage::Uploading).await?;
        let staged = self.stage(sources, &workspace, tracker, &cancel).await?;

        enter(tracker, ProcessingStage::Optimizing).await?;
        let mut pages = Vec::with_capacity(staged.len());
        for (source, path) in sources.iter().zip(&staged) {
            debug!("Adding page {} from {}", pages.len() + 1, source.name);
            pages.push(self.pdf_page(source, path, options, &workspace, &cancel).await?);
        }
        let pdf = process::blocking(&cancel, move |_| document::images_to_pdf(pages)).await?;
        let stem = sources.first().map(|s| s.stem()).unwrap_or_default();
        let output = workspace
            .write_output(&format!("{}-merged.pdf", stem), &pdf)
            .await?;

        enter(tracker, ProcessingStage::Downloading).await?;
        let mut artifacts = self
            .collect(&[output], ConversionFormat::Pdf, tracker, &cancel)
            .await?;
        tracker.complete()?;
        artifacts
            .pop()
            .ok_or_else(|| OptimizeError::codec("pdf", "merge produced no output"))
    }

    /// Copy sources into the workspace, reporting the combined byte fraction
    async fn stage(
        &self,
        sources: &[FileReference],
        workspace: &Workspace,
        tracker: &ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>> {
        let total: u64 = sources.iter().map(|s| s.size).sum();
        let mut copied = 0u64;
        let mut staged = Vec::with_capacity(sources.len());

        for (index, source) in sources.iter().enumerate() {
            // Index prefix keeps merge inputs with equal names apart
            let file_name = if sources.len() > 1 {
                format!("{:03}-{}", index, source.name)
            } else {
                source.name.clone()
            };
            let target = workspace.input.join(file_name);
            FileManager::copy_with_progress(&source.path, &target, self.chunk_size, cancel, |n| {
                copied += n;
                tracker.report_progress(fraction(copied, total));
            })
            .await
            .map_err(|e| match e {
                OptimizeError::Io(io) => OptimizeError::unreadable(&source.name, io),
                other => other,
            })?;
            staged.push(target);
        }
        tracker.report_progress(1.0);
        Ok(staged)
    }

    /// Read outputs into artifacts, reporting the combined byte fraction
    async fn collect(
        &self,
        outputs: &[PathBuf],
        format: ConversionFormat,
        tracker: &ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<Vec<Artifact>> {
        let mut total = 0u64;
        for path in outputs {
            total += fs::metadata(path).await?.len();
        }

        let mut read = 0u64;
        let mut artifacts = Vec::with_capacity(outputs.len());
        for path in outputs {
            let bytes = FileManager::read_with_progress(path, self.chunk_size, cancel, |n| {
                read += n;
                tracker.report_progress(fraction(read, total));
            })
            .await?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("output.{}", format.extension()));
            artifacts.push(Artifact {
                file_name,
                format,
                bytes,
            });
        }
        tracker.report_progress(1.0);
        Ok(artifacts)
    }

    async fn convert_image(
        &self,
        source: &FileReference,
        staged: &Path,
        to: ConversionFormat,
        options: &ConversionOptions,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>> {
        let file_name = format!("{}.{}", source.stem(), to.extension());

        let bytes = if to == ConversionFormat::Pdf {
            let page = self.pdf_page(source, staged, options, workspace, cancel).await?;
            process::blocking(cancel, move |_| document::images_to_pdf(vec![page])).await?
        } else {
            let image = self
                .images
                .decode(staged, source.container, workspace.scratch(), cancel)
                .await?;
            self.images
                .encode_within_budget(Arc::new(image), to, options, workspace.scratch(), cancel)
                .await?
        };

        Ok(vec![workspace.write_output(&file_name, &bytes).await?])
    }

    /// Decode one staged image into a JPEG page sized from its DPI metadata
    async fn pdf_page(
        &self,
        source: &FileReference,
        staged: &Path,
        options: &ConversionOptions,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> Result<PdfPageImage> {
        let info_path = staged.to_path_buf();
        let container = source.container;
        let dpi = process::blocking(cancel, move |_| image_processor::read_info(&info_path, container))
            .await?
            .dpi
            .unwrap_or(DEFAULT_IMAGE_DPI);

        let image = self
            .images
            .decode(staged, source.container, workspace.scratch(), cancel)
            .await?;
        let quality = options.quality_percent();
        process::blocking(cancel, move |_| {
            let gray = !image.color().has_color();
            Ok(PdfPageImage {
                jpeg: image_processor::encode_jpeg(&image, quality, gray)?,
                width: image.width(),
                height: image.height(),
                gray,
                dpi,
            })
        })
        .await
    }

    async fn convert_document(
        &self,
        source: &FileReference,
        staged: &Path,
        to: ConversionFormat,
        options: &ConversionOptions,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>> {
        let stem = source.stem();

        if to == ConversionFormat::Pdf {
            let file_name = format!("{}.pdf", stem);
            if source.is_pdf() {
                let bytes = self.recompress(staged, options, cancel).await?;
                return Ok(vec![workspace.write_output(&file_name, &bytes).await?]);
            }
            let pdf = self.office_to_pdf(staged, workspace, cancel).await?;
            let output = workspace.output.join(file_name);
            fs::rename(&pdf, &output).await?;
            return Ok(vec![output]);
        }

        let pdf = if source.is_pdf() {
            staged.to_path_buf()
        } else {
            self.office_to_pdf(staged, workspace, cancel).await?
        };
        let rendered = self.rasterize(&pdf, options.target_dpi(), workspace, cancel).await?;
        self.check_page_count(to, rendered.len() as u32)?;
        info!("📄 Rendered {} page(s) of {}", rendered.len(), source.name);

        let page_name = |index: usize| {
            if rendered.len() == 1 {
                format!("{}.{}", stem, to.extension())
            } else {
                format!("{}-page-{}.{}", stem, index + 1, to.extension())
            }
        };

        match to {
            ConversionFormat::Tiff => {
                let pages = rendered.clone();
                let bytes = process::blocking(cancel, move |cancel| {
                    let decoded = pages
                        .iter()
                        .map(|p| {
                            process::checkpoint(cancel)?;
                            image::open(p).map_err(OptimizeError::from)
                        })
                        .collect::<Result<Vec<DynamicImage>>>()?;
                    image_processor::encode_tiff_pages(&decoded)
                })
                .await?;
                Ok(vec![
                    workspace
                        .write_output(&format!("{}.tiff", stem), &bytes)
                        .await?,
                ])
            }
            ConversionFormat::Png => {
                let mut outputs = Vec::with_capacity(rendered.len());
                for (index, page) in rendered.iter().enumerate() {
                    let output = workspace.output.join(page_name(index));
                    fs::rename(page, &output).await?;
                    outputs.push(output);
                }
                Ok(outputs)
            }
            ConversionFormat::Jpg => {
                let page_options = per_page_budget(options, rendered.len());
                let mut outputs = Vec::with_capacity(rendered.len());
                for (index, page) in rendered.iter().enumerate() {
                    let image = self
                        .images
                        .decode(page, Container::Other, workspace.scratch(), cancel)
                        .await?;
                    let bytes = self
                        .images
                        .encode_within_budget(Arc::new(image), to, &page_options, workspace.scratch(), cancel)
                        .await?;
                    outputs.push(workspace.write_output(&page_name(index), &bytes).await?);
                }
                Ok(outputs)
            }
            other => Err(OptimizeError::unsupported(source.kind, other)),
        }
    }

    async fn recompress(&self, pdf: &Path, options: &ConversionOptions, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let input = fs::read(pdf).await?;
        let settings = RecompressSettings {
            jpeg_quality: options.quality_percent(),
            max_dpi: options.target_dpi(),
        };
        process::blocking(cancel, move |cancel| {
            let report = document::recompress_pdf(&input, settings, cancel)?;
            info!(
                "🗜️ Recompressed {}/{} embedded images",
                report.images_replaced, report.images_seen
            );
            // Never hand back something larger than the source
            if report.bytes.len() < input.len() {
                Ok(report.bytes)
            } else {
                debug!("Recompressed PDF is not smaller, keeping the original bytes");
                Ok(input)
            }
        })
        .await
    }

    /// Office package → PDF with a headless LibreOffice
    async fn office_to_pdf(&self, input: &Path, workspace: &Workspace, cancel: &CancellationToken) -> Result<PathBuf> {
        let out_dir = workspace.scratch().join("office");
        fs::create_dir_all(&out_dir).await?;
        // Private profile so parallel jobs do not fight over the default one
        let profile = workspace.scratch().join("lo-profile");

        let args = args![
            format!("-env:UserInstallation=file://{}", profile.display()),
            "--headless",
            "--convert-to",
            "pdf",
            "--outdir",
            out_dir.display(),
            input.display()
        ];
        self.platform.run("soffice", &args, cancel).await?;

        FileManager::collect_outputs(&out_dir, "pdf")
            .into_iter()
            .next()
            .ok_or_else(|| OptimizeError::codec("soffice", "no PDF was produced"))
    }

    /// Render every page of `pdf` as PNG, in page order
    async fn rasterize(&self, pdf: &Path, dpi: u32, workspace: &Workspace, cancel: &CancellationToken) -> Result<Vec<PathBuf>> {
        let out_dir = workspace.scratch().join("pages");
        fs::create_dir_all(&out_dir).await?;

        let (tool, _) = self.platform.first_available(&["pdftoppm", "magick"])?;
        debug!("Rasterizing at {} dpi with {}", dpi, tool);
        let args = if tool == "pdftoppm" {
            args!["-r", dpi, "-png", pdf.display(), out_dir.join("page").display()]
        } else {
            args![
                "-density",
                dpi,
                pdf.display(),
                "-background",
                "white",
                "-alpha",
                "remove",
                out_dir.join("page-%04d.png").display()
            ]
        };
        self.platform.run(tool, &args, cancel).await?;

        let pages = FileManager::collect_outputs(&out_dir, "png");
        if pages.is_empty() {
            return Err(OptimizeError::codec(tool, "no pages were rendered"));
        }
        Ok(pages)
    }
}

/// Advance the tracker, then let subscribers observe the new stage before any
/// work starts
async fn enter(tracker: &ProgressTracker, stage: ProcessingStage) -> Result<()> {
    tracker.advance(stage)?;
    tokio::task::yield_now().await;
    if tracker.is_cancelled() {
        return Err(OptimizeError::Cancelled);
    }
    Ok(())
}

fn fraction(done: u64, total: u64) -> f64 {
    if total == 0 {
        1.0
    } else {
        done as f64 / total as f64
    }
}

/// Split a size budget evenly across `pages` artifacts
fn per_page_budget(options: &ConversionOptions, pages: usize) -> ConversionOptions {
    let mut page_options = options.clone();
    if let Some(budget) = options.size_budget {
        page_options.size_budget = Some((budget / pages.max(1) as u64).max(1));
    }
    page_options
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::progress_tracker::ProgressEvent;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn engine() -> ConversionEngine {
        ConversionEngine::new(&Config::default(), PlatformCommands::default())
    }

    async fn png_source(dir: &Path, name: &str, width: u32) -> FileReference {
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(width, 16, |x, _| Rgb([x as u8 * 8, 90, 160])));
        let path = dir.join(name);
        std::fs::write(&path, image_processor::encode_png(&image).unwrap()).unwrap();
        FileReference::open(&path).await.unwrap()
    }

    fn stages(rx: &mut tokio::sync::broadcast::Receiver<ProgressEvent>) -> Vec<ProcessingStage> {
        let mut stages = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ProgressEvent::StageChanged { stage } = event {
                stages.push(stage);
            }
        }
        stages
    }

    #[tokio::test]
    async fn test_png_to_jpeg_walks_every_stage() {
        let dir = TempDir::new().unwrap();
        let source = png_source(dir.path(), "chart.png", 32).await;
        let tracker = ProgressTracker::new();
        let mut rx = tracker.subscribe();

        let artifacts = engine()
            .convert(&source, ConversionFormat::Jpg, &ConversionOptions::default(), &tracker)
            .await
            .unwrap();

        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].file_name, "chart.jpg");
        assert!(artifacts[0].bytes.starts_with(&[0xFF, 0xD8]));
        assert_eq!(
            stages(&mut rx),
            vec![
                ProcessingStage::Preparing,
                ProcessingStage::Uploading,
                ProcessingStage::Optimizing,
                ProcessingStage::Downloading,
                ProcessingStage::Done
            ]
        );
    }

    #[tokio::test]
    async fn test_image_to_pdf_single_page() {
        let dir = TempDir::new().unwrap();
        let source = png_source(dir.path(), "receipt.png", 24).await;
        let tracker = ProgressTracker::new();

        let artifacts = engine()
            .convert(&source, ConversionFormat::Pdf, &ConversionOptions::default(), &tracker)
            .await
            .unwrap();
        let doc = lopdf::Document::load_mem(&artifacts[0].bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
        assert_eq!(artifacts[0].file_name, "receipt.pdf");
    }

    #[tokio::test]
    async fn test_out_of_range_options_fail_in_preparing() {
        let dir = TempDir::new().unwrap();
        let source = png_source(dir.path(), "chart.png", 8).await;
        let tracker = ProgressTracker::new();
        let options = ConversionOptions {
            quality: 1.5,
            ..ConversionOptions::default()
        };

        let err = engine()
            .convert(&source, ConversionFormat::Jpg, &options, &tracker)
            .await
            .unwrap_err();
        assert!(matches!(err, OptimizeError::OptionsOutOfRange { option: "quality", .. }));
        assert_eq!(tracker.stage(), ProcessingStage::Failed);
    }

    #[tokio::test]
    async fn test_office_pages_rejected_before_uploading() {
        use std::io::Write;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("minutes.odt");
        let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
        let options = zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        zip.start_file("content.xml", options).unwrap();
        zip.write_all(b"<office:document-content/>").unwrap();
        zip.start_file("meta.xml", options).unwrap();
        zip.write_all(br#"<meta:document-statistic meta:page-count="3"/>"#).unwrap();
        zip.finish().unwrap();
        let source = FileReference::open(&path).await.unwrap();
        assert_eq!(source.page_count, Some(3));

        let config = Config {
            multi_page_policy: MultiPagePolicy::Reject,
            ..Config::default()
        };
        let tracker = ProgressTracker::new();
        let mut rx = tracker.subscribe();
        let err = ConversionEngine::new(&config, PlatformCommands::default())
            .convert(&source, ConversionFormat::Png, &ConversionOptions::default(), &tracker)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OptimizeError::MultiPageUnsupported {
                format: ConversionFormat::Png,
                pages: 3
            }
        ));
        assert_eq!(stages(&mut rx), vec![ProcessingStage::Preparing, ProcessingStage::Failed]);
    }

    #[tokio::test]
    async fn test_multi_page_reject_policy() {
        let config = Config {
            multi_page_policy: MultiPagePolicy::Reject,
            ..Config::default()
        };
        let engine = ConversionEngine::new(&config, PlatformCommands::default());
        let page = |width| PdfPageImage {
            jpeg: image_processor::encode_jpeg(
                &DynamicImage::ImageRgb8(RgbImage::new(width, 8)),
                80,
                false,
            )
            .unwrap(),
            width,
            height: 8,
            gray: false,
            dpi: 72.0,
        };
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, document::images_to_pdf(vec![page(8), page(16)]).unwrap()).unwrap();
        let source = FileReference::open(&path).await.unwrap();
        assert_eq!(source.page_count, Some(2));

        let tracker = ProgressTracker::new();
        let err = engine
            .convert(&source, ConversionFormat::Png, &ConversionOptions::default(), &tracker)
            .await
            .unwrap_err();
        assert!(matches!(err, OptimizeError::MultiPageUnsupported { pages: 2, .. }));
        assert_eq!(tracker.stage(), ProcessingStage::Failed);
    }

    #[tokio::test]
    async fn test_merge_rejects_single_source() {
        let dir = TempDir::new().unwrap();
        let source = png_source(dir.path(), "one.png", 8).await;
        let tracker = ProgressTracker::new();
        let err = engine()
            .merge_to_document(&[source], &ConversionOptions::default(), &tracker)
            .await
            .unwrap_err();
        assert!(matches!(err, OptimizeError::Validation(_)));
    }

    #[tokio::test]
    async fn test_tracker_cannot_be_reused() {
        let dir = TempDir::new().unwrap();
        let source = png_source(dir.path(), "chart.png", 8).await;
        let tracker = ProgressTracker::new();
        let engine = engine();
        engine
            .convert(&source, ConversionFormat::Png, &ConversionOptions::default(), &tracker)
            .await
            .unwrap();

        let err = engine
            .convert(&source, ConversionFormat::Png, &ConversionOptions::default(), &tracker)
            .await
            .unwrap_err();
        assert!(matches!(err, OptimizeError::Validation(_)));
        assert_eq!(tracker.stage(), ProcessingStage::Done);
    }

    #[test]
    fn test_per_page_budget() {
        let options = ConversionOptions {
            size_budget: Some(1000),
            ..ConversionOptions::default()
        };
        assert_eq!(per_page_budget(&options, 4).size_budget, Some(250));
        assert_eq!(per_page_budget(&ConversionOptions::default(), 4).size_budget, None);
    }
}
