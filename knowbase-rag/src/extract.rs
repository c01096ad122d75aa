//! Plain-text extraction from uploaded files.
//!
//! Only the interface matters to the engine; [`FileTextExtractor`] covers the
//! text-based formats and rejects the rest.

use std::path::Path;

use tracing::debug;

use crate::error::{RagError, Result};

/// File types accepted for upload. [`FileTextExtractor`] handles all but
/// `pdf`, which needs a custom [`TextExtractor`].
pub const SUPPORTED_FILE_TYPES: &[&str] = &["pdf", "txt", "json", "md"];

/// Lowercased extension of `path`, if it has one.
pub fn file_type_of(path: &Path) -> Option<String> {
    path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase)
}

/// Produces plain text from a file.
pub trait TextExtractor: Send + Sync {
    /// Extract the text of `path`, whose type is `file_type`.
    ///
    /// # Errors
    ///
    /// [`RagError::ExtractionError`] if the file cannot be read or its type
    /// is not handled.
    fn extract_text(&self, path: &Path, file_type: &str) -> Result<String>;
}

/// Extracts `txt`, `md` and `json` files.
///
/// JSON is re-serialised with indentation so that keys and values chunk
/// cleanly. Markdown is kept as raw text.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTextExtractor;

fn extraction_error(path: &Path, message: impl Into<String>) -> RagError {
    RagError::ExtractionError { path: path.display().to_string(), message: message.into() }
}

impl TextExtractor for FileTextExtractor {
    fn extract_text(&self, path: &Path, file_type: &str) -> Result<String> {
        debug!(path = %path.display(), file_type, "extracting text");
        let read = || std::fs::read_to_string(path).map_err(|e| extraction_error(path, e.to_string()));

        match file_type {
            "txt" | "md" => read(),
            "json" => {
                let value: serde_json::Value =
                    serde_json::from_str(&read()?).map_err(|e| extraction_error(path, format!("invalid JSON: {e}")))?;
                serde_json::to_string_pretty(&value).map_err(|e| extraction_error(path, e.to_string()))
            }
            other => Err(extraction_error(path, format!("no text extractor for file type '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_is_pretty_printed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, r#"{"a":1}"#).unwrap();
        let text = FileTextExtractor.extract_text(&path, "json").unwrap();
        assert_eq!(text, "{\n  \"a\": 1\n}");
    }

    #[test]
    fn pdf_is_not_handled() {
        let err = FileTextExtractor.extract_text(Path::new("report.pdf"), "pdf").unwrap_err();
        assert!(matches!(err, RagError::ExtractionError { .. }));
    }

    #[test]
    fn missing_file_is_an_extraction_error() {
        let err = FileTextExtractor.extract_text(Path::new("/nonexistent/notes.txt"), "txt").unwrap_err();
        assert!(matches!(err, RagError::ExtractionError { .. }));
    }

    #[test]
    fn file_type_is_lowercased_extension() {
        assert_eq!(file_type_of(Path::new("Notes.MD")).as_deref(), Some("md"));
        assert_eq!(file_type_of(Path::new("README")), None);
    }
}
