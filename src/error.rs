//! Error taxonomy for the styling engine.
//!
//! Request-level errors abort before any file is touched. Per-file errors
//! are downgraded by the batch orchestrator into `Failed` records carrying
//! the kind string from [`Error::kind`].

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Template '{0}' collides with a built-in; pass force to shadow it")]
    DuplicateTemplate(String),

    #[error("Cannot remove or overwrite built-in template: {0}")]
    ProtectedTemplate(String),

    #[error("Failed to parse document: {0}")]
    DocumentParse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Processing manifest is corrupt: {0}")]
    ManifestCorrupt(String),

    #[error("Export conversion failed: {0}")]
    ExportFailed(String),

    #[error("Palette must contain at least one color")]
    EmptyPalette,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Stable kind string used in `failed` records and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::TemplateNotFound(_) => "TemplateNotFoundError",
            Error::DuplicateTemplate(_) => "DuplicateTemplateError",
            Error::ProtectedTemplate(_) => "ProtectedTemplateError",
            Error::DocumentParse(_) => "DocumentParseError",
            Error::UnsupportedFormat(_) => "UnsupportedFormatError",
            Error::ManifestCorrupt(_) => "ManifestCorruptError",
            Error::ExportFailed(_) => "ExportFailedError",
            Error::EmptyPalette => "EmptyPaletteError",
            Error::Io(_) => "IoError",
            Error::Serialization(_) => "SerializationError",
        }
    }
}
