//! # File Management Module
//!
//! Questo modulo gestisce i riferimenti ai file sorgente e le operazioni di I/O
//! a blocchi usate dagli stadi `uploading` e `downloading`.
//!
//! ## Responsabilità:
//! - `FileReference`: nome, dimensione, tipo rilevato, numero pagine (documenti)
//! - Classificazione una sola volta all'apertura (firma binaria + estensione)
//! - Copia/lettura a blocchi con frazione di avanzamento e cancellazione
//! - Discovery ordinata dei file prodotti dai tool esterni
//! - `format_size()` per l'output leggibile
//!
//! ## Esempio:
//! ```rust,ignore
//! let source = FileReference::open(Path::new("scan.pdf")).await?;
//! assert_eq!(source.kind, FileKind::Document);
//! ```

use crate::document;
use crate::error::{OptimizeError, Result};
use crate::formats::{detect_kind, FileKind};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use walkdir::WalkDir;

/// Bytes sniffed from the start of a file
const HEAD_LEN: usize = 64;

/// Physical container behind a file kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Pdf,
    /// OOXML / ODF zip package
    Zip,
    /// Legacy OLE office file
    Ole,
    Heif,
    Other,
}

impl Container {
    fn sniff(path: &Path, head: &[u8]) -> Self {
        if head.starts_with(b"%PDF") {
            return Self::Pdf;
        }
        if head.starts_with(b"PK\x03\x04") {
            return Self::Zip;
        }
        if head.starts_with(&[0xD0, 0xCF, 0x11, 0xE0]) {
            return Self::Ole;
        }
        if head.len() >= 12
            && &head[4..8] == b"ftyp"
            && matches!(&head[8..12], b"heic" | b"heix" | b"hevc" | b"heim" | b"heis" | b"mif1" | b"msf1")
        {
            return Self::Heif;
        }
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "heic" | "heif" => Self::Heif,
            _ => Self::Other,
        }
    }
}

/// A classified source file. Immutable once opened.
#[derive(Debug, Clone, Serialize)]
pub struct FileReference {
    pub path: PathBuf,
    /// Logical name shown to the user
    pub name: String,
    pub size: u64,
    pub kind: FileKind,
    /// Pages of a PDF or Office package, when they could be counted
    pub page_count: Option<u32>,
    pub container: Container,
}

impl FileReference {
    /// Read metadata and the leading bytes of `path` and classify it
    pub async fn open(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let metadata = fs::metadata(path)
            .await
            .map_err(|e| OptimizeError::unreadable(&name, e))?;
        if !metadata.is_file() {
            return Err(OptimizeError::unreadable(&name, "not a regular file"));
        }

        let mut head = vec![0u8; HEAD_LEN];
        let mut file = fs::File::open(path)
            .await
            .map_err(|e| OptimizeError::unreadable(&name, e))?;
        let mut filled = 0;
        while filled < HEAD_LEN {
            let n = file.read(&mut head[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        head.truncate(filled);

        let kind = detect_kind(path, &head);
        let container = Container::sniff(path, &head);

        let page_count = match container {
            Container::Pdf => {
                let pdf_path = path.to_path_buf();
                let counted = tokio::task::spawn_blocking(move || {
                    lopdf::Document::load(&pdf_path).map(|doc| doc.get_pages().len() as u32)
                })
                .await?;
                match counted {
                    Ok(pages) => Some(pages),
                    Err(e) => {
                        debug!("Could not count pages of {}: {}", name, e);
                        None
                    }
                }
            }
            // Office packages carry their page count in the metadata
            Container::Zip if kind != FileKind::UnknownBinary => {
                let package_path = path.to_path_buf();
                match tokio::task::spawn_blocking(move || document::scan_office(&package_path)).await? {
                    Ok(scan) => scan.page_count,
                    Err(e) => {
                        debug!("Could not count pages of {}: {}", name, e);
                        None
                    }
                }
            }
            _ => None,
        };

        debug!("Classified {} as {} ({:?}, {} bytes)", name, kind, container, metadata.len());

        Ok(Self {
            path: path.to_path_buf(),
            name,
            size: metadata.len(),
            kind,
            page_count,
            container,
        })
    }

    /// File name without extension, used to name artifacts
    pub fn stem(&self) -> String {
        Path::new(&self.name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string())
    }

    /// Lowercase extension, empty when absent
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }

    pub fn is_pdf(&self) -> bool {
        self.container == Container::Pdf
    }
}

/// Manages chunked I/O and file discovery
pub struct FileManager;

impl FileManager {
    /// Copy `src` to `dst` in chunks, reporting the copied fraction
    pub async fn copy_with_progress<F>(
        src: &Path,
        dst: &Path,
        chunk_size: usize,
        cancel: &CancellationToken,
        on_progress: F,
    ) -> Result<u64>
    where
        F: FnMut(u64),
    {
        let mut reader = fs::File::open(src).await?;
        let mut writer = fs::File::create(dst).await?;
        let copied = Self::pump(&mut reader, &mut writer, chunk_size, cancel, on_progress).await?;
        writer.flush().await?;
        Ok(copied)
    }

    /// Read a whole file in chunks, reporting bytes read so far
    pub async fn read_with_progress<F>(
        path: &Path,
        chunk_size: usize,
        cancel: &CancellationToken,
        on_progress: F,
    ) -> Result<Vec<u8>>
    where
        F: FnMut(u64),
    {
        let mut reader = fs::File::open(path).await?;
        let mut buffer = Vec::new();
        Self::pump(&mut reader, &mut buffer, chunk_size, cancel, on_progress).await?;
        Ok(buffer)
    }

    async fn pump<R, W, F>(
        reader: &mut R,
        writer: &mut W,
        chunk_size: usize,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        F: FnMut(u64),
    {
        let mut chunk = vec![0u8; chunk_size.max(1)];
        let mut total = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(OptimizeError::Cancelled);
            }
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            writer.write_all(&chunk[..n]).await?;
            total += n as u64;
            on_progress(n as u64);
        }
        Ok(total)
    }

    /// Files in `dir` (not recursive) with extension `ext`, sorted by name
    pub fn collect_outputs(dir: &Path, ext: &str) -> Vec<PathBuf> {
        WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .map(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Get human-readable file size
    pub fn format_size(size: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = size as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }
}
