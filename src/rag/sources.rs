use std::collections::HashSet;

use super::types::{non_blank, Chunk, Source, UNKNOWN_DOCUMENT};

/// One source per distinct document, in the order documents first appear
/// among the ranked chunks. Chunks without a document id are skipped.
pub fn extract_sources(chunks: &[Chunk]) -> Vec<Source> {
    let mut seen = HashSet::new();
    chunks
        .iter()
        .filter_map(|chunk| {
            let document_id = chunk.document_id.as_deref()?;
            if !seen.insert(document_id) {
                return None;
            }
            Some(Source {
                id: document_id.to_string(),
                title: source_title(chunk).to_string(),
                author: source_author(chunk).map(str::to_string),
            })
        })
        .collect()
}

/// Title precedence: joined document title, chunk metadata source, chunk
/// metadata title, document filename, document path, fallback label.
pub fn source_title(chunk: &Chunk) -> &str {
    let document = chunk.document.as_ref();
    document
        .and_then(|doc| non_blank(Some(doc.title.as_str())))
        .or_else(|| non_blank(chunk.metadata.source.as_deref()))
        .or_else(|| {
            chunk
                .metadata
                .has_title()
                .then_some(chunk.metadata.title.as_str())
        })
        .or_else(|| document.and_then(|doc| doc.origin()))
        .unwrap_or(UNKNOWN_DOCUMENT)
}

fn source_author(chunk: &Chunk) -> Option<&str> {
    chunk
        .document
        .as_ref()
        .and_then(|doc| doc.display_author())
        .or_else(|| non_blank(chunk.metadata.author.as_deref()))
}
