//! # Path Resolution Module
//!
//! Centralizza il calcolo dei path su cui scrivere gli artifact.
//! Il sorgente non viene mai sovrascritto, né un file già esistente:
//! in caso di conflitto si aggiunge il suffisso `-optimized`, poi
//! `-optimized-2`, `-optimized-3`, ...

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::debug;

const SUFFIX: &str = "optimized";

/// Utility per calcolare i path di output in modo centralizzato
pub struct PathResolver;

impl PathResolver {
    /// Path for an artifact named `artifact_name` produced from `source`.
    /// Lands in `output_dir` when given, next to the source otherwise.
    pub fn get_output_path(source: &Path, artifact_name: &str, output_dir: Option<&Path>) -> Result<PathBuf> {
        let artifact = Path::new(artifact_name);
        let file_name = artifact
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("Invalid artifact name: {}", artifact_name))?;

        let dir = match output_dir {
            Some(dir) => dir.to_path_buf(),
            None => source
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };

        let candidate = dir.join(file_name);
        if !Self::is_taken(&candidate, source) {
            return Ok(candidate);
        }

        let stem = artifact
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = artifact
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let mut attempt = 1u32;
        loop {
            let name = if attempt == 1 {
                format!("{}-{}{}", stem, SUFFIX, extension)
            } else {
                format!("{}-{}-{}{}", stem, SUFFIX, attempt, extension)
            };
            let candidate = dir.join(name);
            if !Self::is_taken(&candidate, source) {
                debug!("Resolved output path: {} -> {}", source.display(), candidate.display());
                return Ok(candidate);
            }
            attempt += 1;
        }
    }

    fn is_taken(candidate: &Path, source: &Path) -> bool {
        if candidate.exists() {
            return true;
        }
        // Same file spelled differently, e.g. a relative source path
        match (candidate.parent().and_then(|p| p.canonicalize().ok()), source.canonicalize()) {
            (Some(dir), Ok(source)) => candidate.file_name().map(|n| dir.join(n)) == Some(source),
            _ => false,
        }
    }

    /// Crea le directory parent se necessario
    pub async fn ensure_parent_dirs(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                anyhow::anyhow!("Failed to create parent directories for {}: {}", path.display(), e)
            })?;
        }
        Ok(())
    }
}
