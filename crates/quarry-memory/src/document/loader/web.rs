use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use url::Url;

use super::DEFAULT_MAX_FILE_SIZE;
use crate::document::{Document, DocumentError, DocumentLoader};

const CONTENT_SELECTOR: &str = "title, h1, h2, h3, h4, h5, h6, p, li, pre, blockquote, td, th";

/// Fetches an HTML page and keeps its readable text blocks, one paragraph per block.
#[derive(Debug, Clone)]
pub struct WebLoader {
    client: reqwest::Client,
    max_body_bytes: u64,
}

impl Default for WebLoader {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), DEFAULT_MAX_FILE_SIZE)
    }
}

impl WebLoader {
    #[must_use]
    pub fn new(timeout: Duration, max_body_bytes: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()
            .unwrap_or_default();
        Self {
            client,
            max_body_bytes,
        }
    }

    async fn fetch_html(&self, url: &Url) -> Result<String, DocumentError> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?;

        if let Some(len) = resp.content_length()
            && len > self.max_body_bytes
        {
            return Err(DocumentError::FileTooLarge(len));
        }

        let bytes = resp.bytes().await?;
        let len = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        if len > self.max_body_bytes {
            return Err(DocumentError::FileTooLarge(len));
        }

        String::from_utf8(bytes.to_vec()).map_err(|e| DocumentError::Parse(e.to_string()))
    }
}

fn validate_url(raw: &str) -> Result<Url, DocumentError> {
    let parsed = Url::parse(raw).map_err(|e| DocumentError::InvalidUrl(format!("{raw}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(DocumentError::InvalidUrl(format!(
            "scheme not allowed: {other}"
        ))),
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pull readable blocks out of an HTML page and join them with blank lines.
///
/// A block nested inside another matched block (a `<p>` in an `<li>`) is already part of the
/// outer block's text and is skipped.
pub(crate) fn extract_text(html: &str) -> Result<String, DocumentError> {
    let soup = scrape_core::Soup::parse(html);
    let tags = soup
        .find_all(CONTENT_SELECTOR)
        .map_err(|e| DocumentError::Parse(format!("invalid selector: {e}")))?;
    let matched: HashSet<_> = tags.iter().map(scrape_core::Tag::node_id).collect();

    let mut blocks: Vec<String> = Vec::new();
    for tag in tags {
        if tag.ancestors().any(|a| matched.contains(&a.node_id())) {
            continue;
        }
        let block = collapse_whitespace(&tag.text());
        if block.is_empty() || blocks.last() == Some(&block) {
            continue;
        }
        blocks.push(block);
    }
    Ok(blocks.join("\n\n"))
}

impl DocumentLoader for WebLoader {
    fn load<'a>(
        &'a self,
        source: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Document>, DocumentError>> + Send + 'a>> {
        Box::pin(async move {
            let url = validate_url(source)?;
            let html = self.fetch_html(&url).await?;

            let text = tokio::task::spawn_blocking(move || extract_text(&html))
                .await
                .map_err(|e| DocumentError::Parse(e.to_string()))??;

            if text.trim().is_empty() {
                return Err(DocumentError::EmptyContent(url.to_string()));
            }

            tracing::debug!(url = %url, chars = text.chars().count(), "loaded web page");

            Ok(vec![
                Document::new(text)
                    .with_id(url.to_string())
                    .with_metadata("source", url.to_string())
                    .with_metadata("type", "web")
                    .with_metadata("url", url.to_string()),
            ])
        })
    }
}
