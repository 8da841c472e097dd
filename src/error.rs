//! # Error Types Module
//!
//! Questo modulo definisce tutti i tipi di errore del motore di ottimizzazione.
//!
//! ## Responsabilità:
//! - Definisce `OptimizeError` enum per categorizzare tutti gli errori possibili
//! - Fornisce messaggi leggibili per ogni fallimento (mostrati all'utente)
//! - Integra con `thiserror` per automatic error conversion
//!
//! ## Categorie di errori:
//! - `UnreadableSource`: Il file sorgente non può essere analizzato/decodificato
//! - `UnsupportedConversion`: Coppia (tipo sorgente, formato) non legale
//! - `MultiPageUnsupported`: Il formato di destinazione non gestisce più pagine
//! - `OptionsOutOfRange`: Qualità o frame rate fuori dai limiti documentati
//! - `CodecFailure`: Errore del codec (in-process o tool esterno)
//! - `Cancelled`: Annullato dall'utente
//! - `MissingDependency`: Tool esterno mancante (pdftoppm, ffmpeg, cwebp, ...)
//! - `Validation`, `History`, `Io`: uso scorretto, persistenza storico, I/O
//!
//! ## Politica di recovery:
//! Nessun errore viene ritentato automaticamente: una stima o un codec che
//! fallisce viene riportato così com'è al chiamante.
//!
//! ## Esempio:
//! ```rust,ignore
//! if !kind_supports(format) {
//!     return Err(OptimizeError::unsupported(kind, format));
//! }
//! ```

use crate::formats::{ConversionFormat, FileKind};

/// Errors surfaced by the analysis and conversion engine
#[derive(thiserror::Error, Debug)]
pub enum OptimizeError {
    #[error("Cannot read {name}: {reason}")]
    UnreadableSource { name: String, reason: String },

    #[error("Cannot convert {kind} files to {format}")]
    UnsupportedConversion {
        kind: FileKind,
        format: ConversionFormat,
    },

    #[error("{format} cannot hold the {pages} pages of this document")]
    MultiPageUnsupported {
        format: ConversionFormat,
        pages: u32,
    },

    #[error("Option {option} = {value} is outside the allowed range {range}")]
    OptionsOutOfRange {
        option: &'static str,
        value: String,
        range: &'static str,
    },

    #[error("Codec failure ({codec}): {cause}")]
    CodecFailure { codec: String, cause: String },

    #[error("Conversion cancelled")]
    Cancelled,

    #[error("Dependency missing: {0}")]
    MissingDependency(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("History store error: {0}")]
    History(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OptimizeError {
    pub fn unreadable(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::UnreadableSource {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn unsupported(kind: FileKind, format: ConversionFormat) -> Self {
        Self::UnsupportedConversion { kind, format }
    }

    /// Wraps an opaque codec error
    pub fn codec(codec: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::CodecFailure {
            codec: codec.into(),
            cause: cause.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<image::ImageError> for OptimizeError {
    fn from(err: image::ImageError) -> Self {
        Self::codec("image", err)
    }
}

impl From<lopdf::Error> for OptimizeError {
    fn from(err: lopdf::Error) -> Self {
        Self::codec("pdf", err)
    }
}

impl From<tiff::TiffError> for OptimizeError {
    fn from(err: tiff::TiffError) -> Self {
        Self::codec("tiff", err)
    }
}

impl From<tokio::task::JoinError> for OptimizeError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::codec("worker", err)
    }
}

pub type Result<T> = std::result::Result<T, OptimizeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_human_readable() {
        let err = OptimizeError::unsupported(FileKind::Video, ConversionFormat::Png);
        assert_eq!(err.to_string(), "Cannot convert video files to png");

        let err = OptimizeError::MultiPageUnsupported {
            format: ConversionFormat::Jpg,
            pages: 4,
        };
        assert_eq!(err.to_string(), "jpg cannot hold the 4 pages of this document");

        let err = OptimizeError::OptionsOutOfRange {
            option: "quality",
            value: "1.5".to_string(),
            range: "0.10..=1.00",
        };
        assert!(err.to_string().contains("quality"));
    }

    #[test]
    fn test_codec_wraps_cause() {
        let err = OptimizeError::codec("ffmpeg", "exit status 1");
        assert!(matches!(err, OptimizeError::CodecFailure { .. }));
        assert!(err.to_string().contains("exit status 1"));
        assert!(!err.is_cancelled());
        assert!(OptimizeError::Cancelled.is_cancelled());
    }
}
