#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file too large: {0} bytes")]
    FileTooLarge(u64),

    #[error("invalid chunking configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid document: {0}")]
    Invalid(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTML parse failed: {0}")]
    Parse(String),

    #[error("no text content found in {0}")]
    EmptyContent(String),
}
