//! AST-aware source chunking.
//!
//! Splits repository files into semantic units for embedding: one chunk
//! per function/class span where the language heuristics find spans,
//! fixed 50-line windows otherwise, and one chunk per config file.
//! Every chunk is token-normalized (dropped when too small, split
//! line-aligned when too large) and enriched with call links, constants,
//! config keys, and semantic tags.

pub mod enrich;
pub mod language;
pub mod spans;

pub use language::{Language, SpanStyle};
pub use spans::Span;

use uuid::Uuid;

use crate::error::Result;
use crate::model::chunk::{sha256_hex, CodeChunk};

/// Default minimum tokens for a chunk to be kept.
pub const DEFAULT_MIN_TOKENS: usize = 50;

/// Default maximum tokens before line-aligned splitting.
pub const DEFAULT_MAX_TOKENS: usize = 1500;

/// Window size for the no-spans fallback.
pub const FALLBACK_WINDOW_LINES: usize = 50;

/// Estimates the token count of a text as `ceil(len / 4)`.
#[must_use]
pub const fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Token-normalizing, enriching source chunker.
///
/// # Examples
///
/// ```
/// use regscan_rs::chunking::Chunker;
/// use uuid::Uuid;
///
/// let chunker = Chunker::default();
/// let content = "def f():\n".to_string() + &"    x = compute()\n".repeat(20);
/// let chunks = chunker.chunk_file(Uuid::new_v4(), "app.py", &content).unwrap();
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].ast_node_type.as_deref(), Some("function"));
/// ```
#[derive(Debug, Clone)]
pub struct Chunker {
    min_tokens: usize,
    max_tokens: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_TOKENS, DEFAULT_MAX_TOKENS)
    }
}

impl Chunker {
    /// Creates a chunker with explicit token bounds.
    #[must_use]
    pub const fn new(min_tokens: usize, max_tokens: usize) -> Self {
        Self {
            min_tokens,
            max_tokens,
        }
    }

    /// Chunks one file into code-map drafts.
    ///
    /// Unknown extensions yield zero chunks. Drafts carry `delta_type =
    /// Added`; delta classification happens during persistence.
    ///
    /// # Errors
    ///
    /// Chunking itself is infallible on valid UTF-8 input; the `Result`
    /// reserves the seam for pluggable AST extractors.
    pub fn chunk_file(
        &self,
        repo_id: Uuid,
        file_path: &str,
        content: &str,
    ) -> Result<Vec<CodeChunk>> {
        let lang = Language::from_path(file_path);
        if !lang.is_supported() || content.is_empty() {
            return Ok(Vec::new());
        }

        let file_hash = sha256_hex(content);
        let tags = enrich::semantic_tags(content);

        if lang.span_style() == Some(SpanStyle::Config) {
            return Ok(self.chunk_config_file(repo_id, file_path, content, lang, &file_hash, &tags));
        }

        let found = spans::extract_spans(content, lang);
        let mut chunks = Vec::new();

        if found.is_empty() {
            // Fallback: fixed line windows, small ones discarded
            for (start, end, text) in spans::fixed_windows(content, FALLBACK_WINDOW_LINES) {
                if estimate_tokens(&text) < self.min_tokens {
                    continue;
                }
                chunks.push(self.build_chunk(
                    repo_id, file_path, lang, start, end, text, &file_hash, None, &tags,
                ));
            }
            return Ok(chunks);
        }

        for span in found {
            let tokens = estimate_tokens(&span.text);
            if tokens < self.min_tokens {
                continue;
            }
            if tokens > self.max_tokens {
                for (start, end, text) in split_line_aligned(&span.text, span.start_line, self.max_tokens)
                {
                    chunks.push(self.build_chunk(
                        repo_id,
                        file_path,
                        lang,
                        start,
                        end,
                        text,
                        &file_hash,
                        Some(span.node_type),
                        &tags,
                    ));
                }
            } else {
                chunks.push(self.build_chunk(
                    repo_id,
                    file_path,
                    lang,
                    span.start_line,
                    span.end_line,
                    span.text,
                    &file_hash,
                    Some(span.node_type),
                    &tags,
                ));
            }
        }

        Ok(chunks)
    }

    /// One chunk per config file, keys extracted in the same pass.
    fn chunk_config_file(
        &self,
        repo_id: Uuid,
        file_path: &str,
        content: &str,
        lang: Language,
        file_hash: &str,
        tags: &[String],
    ) -> Vec<CodeChunk> {
        if estimate_tokens(content) < self.min_tokens {
            return Vec::new();
        }
        let line_count = content.lines().count().max(1);
        let mut chunk = CodeChunk::new(
            repo_id,
            file_path,
            lang.as_str(),
            1,
            line_count,
            content.to_string(),
            file_hash.to_string(),
        );
        chunk.config_keys = enrich::config_file_keys(content, lang);
        chunk.semantic_tags = tags.to_vec();
        vec![chunk]
    }

    #[allow(clippy::too_many_arguments)]
    fn build_chunk(
        &self,
        repo_id: Uuid,
        file_path: &str,
        lang: Language,
        start_line: usize,
        end_line: usize,
        text: String,
        file_hash: &str,
        node_type: Option<&'static str>,
        tags: &[String],
    ) -> CodeChunk {
        let mut chunk = CodeChunk::new(
            repo_id,
            file_path,
            lang.as_str(),
            start_line,
            end_line,
            text,
            file_hash.to_string(),
        );
        chunk.ast_node_type = node_type.map(str::to_string);
        chunk.call_links = enrich::call_links(&chunk.chunk_text);
        chunk.variables = enrich::constants(&chunk.chunk_text);
        chunk.config_keys = enrich::threshold_keys(&chunk.variables);
        chunk.semantic_tags = tags.to_vec();
        chunk
    }
}

/// Splits oversized text into line-aligned pieces of at most
/// `max_tokens` each, preserving absolute line numbers.
///
/// A single line exceeding the budget is emitted alone; splitting never
/// goes below line granularity.
fn split_line_aligned(
    text: &str,
    first_line: usize,
    max_tokens: usize,
) -> Vec<(usize, usize, String)> {
    let lines: Vec<&str> = text.lines().collect();
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut len = 0usize;

    for (i, line) in lines.iter().enumerate() {
        let added = line.len() + usize::from(i > start);
        if i > start && (len + added).div_ceil(4) > max_tokens {
            pieces.push((
                first_line + start,
                first_line + i - 1,
                lines[start..i].join("\n"),
            ));
            start = i;
            len = line.len();
        } else {
            len += added;
        }
    }
    if start < lines.len() {
        pieces.push((
            first_line + start,
            first_line + lines.len() - 1,
            lines[start..].join("\n"),
        ));
    }
    pieces
}
