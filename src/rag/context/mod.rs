
use std::fmt::Write as _;
use tracing::debug;

use super::{RetrievedCandidate, SourceRecord};

const BLOCK_SEPARATOR: &str = "\n\n";

/// Renders ranked candidates into a citation-addressable prompt context
#[derive(Debug, Clone, Copy)]
pub struct ContextBuilder {
    max_context_length: usize,
}

/// A rendered context and the candidates it cites.
///
/// `[Source k]` in `text` always refers to `cited[k - 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltContext<'a> {
    pub text: String,
    pub cited: &'a [RetrievedCandidate],
}

impl BuiltContext<'_> {
    /// Candidate behind citation marker `k`, counting from one
    #[inline]
    pub fn candidate(&self, k: usize) -> Option<&RetrievedCandidate> {
        k.checked_sub(1).and_then(|index| self.cited.get(index))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cited.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cited.is_empty()
    }

    #[inline]
    pub fn source_records(&self) -> Vec<SourceRecord> {
        self.cited
            .iter()
            .map(RetrievedCandidate::source_record)
            .collect()
    }
}

impl ContextBuilder {
    #[inline]
    pub fn new(max_context_length: usize) -> Self {
        Self { max_context_length }
    }

    /// Emit one block per candidate in retrieval order, stopping before the
    /// block that would push the context past `max_context_length` characters.
    /// The first block is always emitted.
    #[inline]
    pub fn build<'a>(&self, candidates: &'a [RetrievedCandidate]) -> BuiltContext<'a> {
        let mut text = String::new();
        let mut length = 0;
        let mut emitted = 0;

        for (index, candidate) in candidates.iter().enumerate() {
            let block = render_block(index + 1, candidate);
            let block_length = block.chars().count();
            let added = if emitted == 0 {
                block_length
            } else {
                block_length + BLOCK_SEPARATOR.len()
            };

            if emitted > 0 && length + added > self.max_context_length {
                debug!(
                    "Context limit of {} characters reached after {} of {} sources",
                    self.max_context_length,
                    emitted,
                    candidates.len()
                );
                break;
            }

            if emitted > 0 {
                text.push_str(BLOCK_SEPARATOR);
            }
            text.push_str(&block);
            length += added;
            emitted += 1;
        }

        BuiltContext {
            text,
            cited: &candidates[..emitted],
        }
    }
}

fn render_block(k: usize, candidate: &RetrievedCandidate) -> String {
    let document = &candidate.document;
    let mut block = format!(
        "[Source {k}] Source: {}",
        document.source().unwrap_or("Unknown")
    );
    if let Some(crop) = document.metadata_str("crop") {
        let _ = write!(block, ", Crop: {crop}");
    }
    if let Some(category) = document.metadata_str("category") {
        let _ = write!(block, ", Category: {category}");
    }
    block.push('\n');
    block.push_str(&document.content);
    block
}
