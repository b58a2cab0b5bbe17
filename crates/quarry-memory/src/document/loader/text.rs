use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use super::DEFAULT_MAX_FILE_SIZE;
use crate::document::{Document, DocumentError, DocumentLoader};

/// Loads a UTF-8 file as a single document identified by its canonical path.
pub struct TextLoader {
    pub max_file_size: u64,
}

impl Default for TextLoader {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "md" | "markdown" => "text/markdown",
        _ => "text/plain",
    }
}

impl DocumentLoader for TextLoader {
    fn load<'a>(
        &'a self,
        source: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Document>, DocumentError>> + Send + 'a>> {
        Box::pin(async move {
            let path = tokio::fs::canonicalize(source).await?;

            let meta = tokio::fs::metadata(&path).await?;
            if meta.len() > self.max_file_size {
                return Err(DocumentError::FileTooLarge(meta.len()));
            }

            let text = tokio::fs::read_to_string(&path).await?;
            let name = path
                .file_name()
                .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());

            tracing::debug!(path = %path.display(), bytes = text.len(), "loaded file");

            Ok(vec![
                Document::new(text)
                    .with_id(path.display().to_string())
                    .with_metadata("source", name)
                    .with_metadata("type", "file")
                    .with_metadata("file_path", path.display().to_string())
                    .with_metadata("content_type", content_type(&path)),
            ])
        })
    }
}
