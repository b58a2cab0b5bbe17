pub mod error;
pub mod loader;
pub mod splitter;
pub mod types;

pub use error::DocumentError;
pub use loader::{DEFAULT_MAX_FILE_SIZE, DocumentLoader, TextLoader, WebLoader};
pub use splitter::{SplitterConfig, TextSplitter};
pub use types::{Chunk, Document, Metadata, MetadataValue, RESERVED_KEYS, SOURCE_ID_KEY};
