use super::DocumentError;
use super::types::{
    CHUNK_COUNT_KEY, CHUNK_INDEX_KEY, CHUNK_OVERLAP_KEY, Chunk, Document, MetadataValue,
    SOURCE_ID_KEY, chunk_id,
};

/// Boundaries tried in order: paragraph, line, sentence, clause, word.
const SEPARATORS: [&str; 8] = ["\n\n", "\n", ". ", "? ", "! ", "; ", ", ", " "];

/// Sizes are measured in characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitterConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl SplitterConfig {
    /// # Errors
    ///
    /// Returns [`DocumentError::InvalidConfig`] if `chunk_size` is zero or
    /// `chunk_overlap` is not smaller than `chunk_size`.
    pub fn validate(&self) -> Result<(), DocumentError> {
        if self.chunk_size == 0 {
            return Err(DocumentError::InvalidConfig(
                "chunk_size must be greater than zero".into(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(DocumentError::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// A span of the source text that never crosses a chosen boundary.
#[derive(Debug, Clone, Copy)]
struct Piece {
    start: usize,
    end: usize,
    chars: usize,
}

/// A chunk expressed as a range of pieces, plus how many characters it repeats.
#[derive(Debug, Clone, Copy)]
struct Window {
    first: usize,
    end: usize,
    overlap: usize,
}

/// Splits documents into overlapping chunks along natural text boundaries.
///
/// Chunks never exceed `chunk_size` characters. Each chunk after the first starts with
/// whole trailing pieces of the previous chunk, totalling at most `chunk_overlap`
/// characters, and records that count in [`Chunk::overlap`].
#[derive(Debug, Clone)]
pub struct TextSplitter {
    config: SplitterConfig,
}

impl TextSplitter {
    /// # Errors
    ///
    /// Returns [`DocumentError::InvalidConfig`] when the configuration is rejected by
    /// [`SplitterConfig::validate`].
    pub fn new(config: SplitterConfig) -> Result<Self, DocumentError> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &SplitterConfig {
        &self.config
    }

    /// Split a document. Empty or whitespace-only text yields no chunks.
    #[must_use]
    pub fn split(&self, document: &Document) -> Vec<Chunk> {
        let text = document.text.as_str();
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut pieces = Vec::new();
        segment(text, 0, self.config.chunk_size, &SEPARATORS, &mut pieces);
        let windows = pack(&pieces, self.config.chunk_size, self.config.chunk_overlap);

        let source_id = document.resolved_id();
        let count = i64::try_from(windows.len()).unwrap_or(i64::MAX);

        windows
            .iter()
            .enumerate()
            .map(|(index, w)| {
                let content = &text[pieces[w.first].start..pieces[w.end - 1].end];
                let mut metadata = document.metadata.clone();
                metadata.insert(SOURCE_ID_KEY.into(), MetadataValue::Text(source_id.clone()));
                metadata.insert(
                    CHUNK_INDEX_KEY.into(),
                    MetadataValue::Integer(i64::try_from(index).unwrap_or(i64::MAX)),
                );
                metadata.insert(CHUNK_COUNT_KEY.into(), MetadataValue::Integer(count));
                metadata.insert(
                    CHUNK_OVERLAP_KEY.into(),
                    MetadataValue::Integer(i64::try_from(w.overlap).unwrap_or(i64::MAX)),
                );
                Chunk {
                    id: chunk_id(&source_id, index),
                    text: content.to_owned(),
                    metadata,
                    source_id: source_id.clone(),
                    chunk_index: index,
                    overlap: w.overlap,
                }
            })
            .collect()
    }

    /// Concatenate chunks in index order, dropping each chunk's overlap prefix.
    ///
    /// For the chunks of one document this reproduces the original text.
    #[must_use]
    pub fn stitch(chunks: &[Chunk]) -> String {
        let mut out = String::new();
        for chunk in chunks {
            out.extend(chunk.text.chars().skip(chunk.overlap));
        }
        out
    }
}

/// Break `text` into pieces of at most `limit` characters, trying coarse separators first.
/// Separators stay attached to the end of the preceding piece, so pieces tile the text.
fn segment(text: &str, offset: usize, limit: usize, separators: &[&str], out: &mut Vec<Piece>) {
    let chars = text.chars().count();
    if chars <= limit {
        if !text.is_empty() {
            out.push(Piece {
                start: offset,
                end: offset + text.len(),
                chars,
            });
        }
        return;
    }

    let Some((sep, rest)) = separators.split_first() else {
        hard_split(text, offset, limit, out);
        return;
    };

    let mut parts = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(sep) {
        let end = idx + sep.len();
        parts.push(start..end);
        start = end;
    }
    if start < text.len() {
        parts.push(start..text.len());
    }

    if parts.len() <= 1 {
        segment(text, offset, limit, rest, out);
        return;
    }
    for range in parts {
        segment(&text[range.clone()], offset + range.start, limit, rest, out);
    }
}

fn hard_split(text: &str, offset: usize, limit: usize, out: &mut Vec<Piece>) {
    let mut start = 0;
    let mut chars = 0;
    for (idx, _) in text.char_indices() {
        if chars == limit {
            out.push(Piece {
                start: offset + start,
                end: offset + idx,
                chars,
            });
            start = idx;
            chars = 0;
        }
        chars += 1;
    }
    if chars > 0 {
        out.push(Piece {
            start: offset + start,
            end: offset + text.len(),
            chars,
        });
    }
}

/// Greedily pack pieces into windows of at most `size` characters.
fn pack(pieces: &[Piece], size: usize, overlap: usize) -> Vec<Window> {
    let mut windows = Vec::new();
    let mut first = 0;
    let mut len = 0;
    let mut window_overlap = 0;

    for (i, piece) in pieces.iter().enumerate() {
        if len + piece.chars > size && i > first {
            windows.push(Window {
                first,
                end: i,
                overlap: window_overlap,
            });

            // Carry whole trailing pieces forward; always move past the previous start.
            let mut j = i;
            let mut carried = 0;
            while j > first + 1 && carried + pieces[j - 1].chars <= overlap {
                j -= 1;
                carried += pieces[j].chars;
            }
            while j < i && carried + piece.chars > size {
                carried -= pieces[j].chars;
                j += 1;
            }

            first = j;
            len = carried;
            window_overlap = carried;
        }
        len += piece.chars;
    }

    if first < pieces.len() {
        windows.push(Window {
            first,
            end: pieces.len(),
            overlap: window_overlap,
        });
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter(chunk_size: usize, chunk_overlap: usize) -> TextSplitter {
        TextSplitter::new(SplitterConfig {
            chunk_size,
            chunk_overlap,
        })
        .unwrap()
    }

    fn make_doc(text: &str) -> Document {
        Document::new(text)
            .with_id("doc")
            .with_metadata("source", "test.txt")
    }

    #[test]
    fn overlap_not_smaller_than_size_rejected() {
        let err = TextSplitter::new(SplitterConfig {
            chunk_size: 100,
            chunk_overlap: 100,
        })
        .unwrap_err();
        assert!(matches!(err, DocumentError::InvalidConfig(_)));
        assert!(
            TextSplitter::new(SplitterConfig {
                chunk_size: 10,
                chunk_overlap: 50,
            })
            .is_err()
        );
    }

    #[test]
    fn zero_size_rejected() {
        assert!(
            TextSplitter::new(SplitterConfig {
                chunk_size: 0,
                chunk_overlap: 0,
            })
            .is_err()
        );
    }

    #[test]
    fn empty_and_blank_documents_yield_nothing() {
        let s = TextSplitter::new(SplitterConfig::default()).unwrap();
        assert!(s.split(&make_doc("")).is_empty());
        assert!(s.split(&make_doc("  \n\n\t ")).is_empty());
    }

    #[test]
    fn short_text_is_single_chunk() {
        let chunks = splitter(1000, 200).split(&make_doc("Short text."));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Short text.");
        assert_eq!(chunks[0].id, "doc:0");
        assert_eq!(chunks[0].overlap, 0);
    }

    #[test]
    fn metadata_inherited_with_provenance() {
        let chunks = splitter(1000, 0).split(&make_doc("Some content."));
        let meta = &chunks[0].metadata;
        assert_eq!(meta["source"], MetadataValue::Text("test.txt".into()));
        assert_eq!(meta[SOURCE_ID_KEY], MetadataValue::Text("doc".into()));
        assert_eq!(meta[CHUNK_INDEX_KEY], MetadataValue::Integer(0));
        assert_eq!(meta[CHUNK_COUNT_KEY], MetadataValue::Integer(1));
        assert_eq!(chunks[0].source_id, "doc");
    }

    #[test]
    fn derived_id_used_without_explicit_id() {
        let doc = Document::new("Untitled text.");
        let chunks = splitter(100, 0).split(&doc);
        assert_eq!(chunks[0].source_id, doc.resolved_id());
        assert_eq!(chunks[0].id, format!("{}:0", doc.resolved_id()));
    }

    #[test]
    fn paragraphs_are_preferred_boundaries() {
        let text = "First paragraph here.\n\nSecond paragraph here.";
        let chunks = splitter(30, 0).split(&make_doc(text));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "First paragraph here.\n\n");
        assert_eq!(chunks[1].text, "Second paragraph here.");
    }

    #[test]
    fn sentences_split_when_paragraph_too_long() {
        let text = "One two three. Four five six. Seven eight nine.";
        let chunks = splitter(18, 0).split(&make_doc(text));
        assert_eq!(
            chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>(),
            vec!["One two three. ", "Four five six. ", "Seven eight nine."]
        );
    }

    #[test]
    fn long_word_is_hard_split() {
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = splitter(10, 0).split(&make_doc(text));
        assert_eq!(
            chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>(),
            vec!["abcdefghij", "klmnopqrst", "uvwxyz"]
        );
    }

    #[test]
    fn consecutive_chunks_share_trailing_text() {
        let text = "A. B. C. D. E. F. G. H.";
        let chunks = splitter(9, 3).split(&make_doc(text));
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            assert!(next.overlap > 0);
            assert!(next.overlap <= 3);
            let shared: String = next.text.chars().take(next.overlap).collect();
            assert!(prev.text.ends_with(&shared));
        }
        assert_eq!(TextSplitter::stitch(&chunks), text);
    }

    #[test]
    fn multibyte_text_counts_characters() {
        let text = "héllo wörld ünïcode ñandú çava";
        let chunks = splitter(8, 2).split(&make_doc(text));
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 8);
        }
        assert_eq!(TextSplitter::stitch(&chunks), text);
    }

    #[test]
    fn split_is_deterministic() {
        let text = "Alpha beta gamma. Delta epsilon zeta.\n\nEta theta iota kappa.";
        let s = splitter(20, 6);
        assert_eq!(s.split(&make_doc(text)), s.split(&make_doc(text)));
    }

    mod proptest_splitter {
        use super::*;
        use proptest::prelude::*;

        fn size_and_overlap() -> impl Strategy<Value = (usize, usize)> {
            (1usize..300).prop_flat_map(|size| (Just(size), 0..size))
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(500))]

            #[test]
            fn chunks_reconstruct_original(
                content in "[\\PC\\n ]{0,2000}",
                (chunk_size, chunk_overlap) in size_and_overlap(),
            ) {
                let chunks = splitter(chunk_size, chunk_overlap).split(&make_doc(&content));
                if content.trim().is_empty() {
                    prop_assert!(chunks.is_empty());
                } else {
                    prop_assert_eq!(TextSplitter::stitch(&chunks), content);
                }
            }

            #[test]
            fn chunks_respect_size_and_overlap(
                content in "[a-z .!?\\n]{1,1500}",
                (chunk_size, chunk_overlap) in size_and_overlap(),
            ) {
                let chunks = splitter(chunk_size, chunk_overlap).split(&make_doc(&content));
                for (i, chunk) in chunks.iter().enumerate() {
                    prop_assert!(!chunk.text.is_empty());
                    prop_assert!(chunk.text.chars().count() <= chunk_size);
                    prop_assert!(chunk.overlap <= chunk_overlap);
                    prop_assert!(chunk.overlap < chunk.text.chars().count());
                    prop_assert_eq!(chunk.chunk_index, i);
                }
                if let Some(first) = chunks.first() {
                    prop_assert_eq!(first.overlap, 0);
                }
            }
        }
    }
}
