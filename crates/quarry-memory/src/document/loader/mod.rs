mod text;
mod web;

pub use text::TextLoader;
pub use web::WebLoader;

use std::future::Future;
use std::pin::Pin;

use super::{Document, DocumentError};

/// Default maximum file or response body size: 50 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Turns a source reference (a path, a URL) into documents ready for ingestion.
pub trait DocumentLoader: Send + Sync {
    fn load<'a>(
        &'a self,
        source: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Document>, DocumentError>> + Send + 'a>>;
}
