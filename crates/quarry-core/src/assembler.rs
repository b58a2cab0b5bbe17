use std::collections::HashSet;

use crate::error::RagError;
use crate::retriever::RetrievalResult;

/// Retrieved chunks selected to fit a character budget, in rank order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledContext {
    pub entries: Vec<RetrievalResult>,
    /// Distinct source document ids of `entries`, in first-appearance order.
    pub sources: Vec<String>,
    pub total_chars: usize,
    /// Set when the top-ranked chunk alone exceeded the budget and was cut.
    pub truncated: bool,
    pub duplicates_dropped: usize,
}

impl AssembledContext {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct ContextAssembler;

impl ContextAssembler {
    /// Pack `results` into at most `budget` characters.
    ///
    /// `results` are taken by ascending `rank` (then chunk id) whatever order the slice is in.
    /// Chunks whose whitespace-normalized text was already taken are dropped. Packing is greedy
    /// in rank order and stops at the first chunk that does not fit, so a lower-ranked chunk never
    /// displaces a higher-ranked one. If the very first chunk is larger than the budget it is
    /// truncated rather than dropped.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Validation`] if `budget` is zero.
    pub fn assemble(
        results: &[RetrievalResult],
        budget: usize,
    ) -> Result<AssembledContext, RagError> {
        if budget == 0 {
            return Err(RagError::Validation(
                "context budget must be greater than zero".into(),
            ));
        }

        let mut ordered: Vec<&RetrievalResult> = results.iter().collect();
        ordered.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.chunk.id.cmp(&b.chunk.id)));

        let mut ctx = AssembledContext::default();
        let mut seen = HashSet::new();

        for result in ordered {
            if !seen.insert(normalize(&result.chunk.text)) {
                ctx.duplicates_dropped += 1;
                continue;
            }

            let len = result.chunk.text.chars().count();
            if ctx.total_chars + len > budget {
                if ctx.entries.is_empty() {
                    let mut cut = result.clone();
                    cut.chunk.text = cut.chunk.text.chars().take(budget).collect();
                    ctx.total_chars = budget;
                    ctx.truncated = true;
                    push(&mut ctx, cut);
                }
                break;
            }

            ctx.total_chars += len;
            push(&mut ctx, result.clone());
        }

        tracing::debug!(
            selected = ctx.entries.len(),
            candidates = results.len(),
            total_chars = ctx.total_chars,
            budget,
            duplicates = ctx.duplicates_dropped,
            "context assembled"
        );
        Ok(ctx)
    }
}

fn push(ctx: &mut AssembledContext, result: RetrievalResult) {
    if !ctx.sources.contains(&result.chunk.source_id) {
        ctx.sources.push(result.chunk.source_id.clone());
    }
    ctx.entries.push(result);
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
