use crate::error::LoadError;
use crate::models::{Chunk, ChunkMetadata, ContentType, IngestionOptions};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            max_chars: value.chunk_max_chars,
            overlap_chars: value.chunk_overlap_chars,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.max_chars == 0 {
            return Err(LoadError::InvalidChunkConfig(
                "max_chars must be greater than zero".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(LoadError::InvalidChunkConfig(format!(
                "overlap_chars ({}) must be less than max_chars ({})",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Packs paragraphs into chunks of at most `max_chars` characters. Paragraphs
/// longer than that are cut into windows that overlap by `overlap_chars`.
pub fn split_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    let paragraphs = paragraphs(text);

    let mut packed = Vec::new();
    let mut current = String::new();

    for paragraph in paragraphs {
        if current.is_empty() {
            current.push_str(&paragraph);
            continue;
        }

        if char_len(&current) + char_len(&paragraph) + 2 <= config.max_chars {
            current.push_str("\n\n");
            current.push_str(&paragraph);
        } else {
            packed.push(std::mem::take(&mut current));
            current.push_str(&paragraph);
        }
    }

    if !current.is_empty() {
        packed.push(current);
    }

    let mut with_overlap = Vec::new();
    for chunk in packed {
        if char_len(&chunk) <= config.max_chars {
            with_overlap.push(chunk);
            continue;
        }

        let chars: Vec<char> = chunk.chars().collect();
        let step = config.max_chars.saturating_sub(config.overlap_chars).max(1);
        let mut start = 0;
        while start < chars.len() {
            let end = (start + config.max_chars).min(chars.len());
            let piece: String = chars[start..end].iter().collect();
            let piece = piece.trim().to_string();
            if !piece.is_empty() {
                with_overlap.push(piece);
            }
            if end == chars.len() {
                break;
            }
            start += step;
        }
    }

    with_overlap
}

fn paragraphs(text: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                result.push(normalize_whitespace(&current.join(" ")));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }

    if !current.is_empty() {
        result.push(normalize_whitespace(&current.join(" ")));
    }

    result
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

pub fn build_chunks(
    source: &str,
    content_type: ContentType,
    page: Option<u32>,
    text: &str,
    config: ChunkingConfig,
    global_index: u64,
) -> (Vec<Chunk>, u64) {
    let mut cursor = global_index;
    let chunks = split_text(text, config)
        .into_iter()
        .map(|content| {
            let chunk = Chunk {
                content,
                metadata: ChunkMetadata {
                    source: source.to_string(),
                    page,
                    row: None,
                    content_type,
                    chunk_index: cursor,
                },
            };
            cursor = cursor.saturating_add(1);
            chunk
        })
        .collect();

    (chunks, cursor)
}

/// Entry id for the `index`-th chunk of `source`. Re-ingesting a changed
/// document overwrites its entries position by position.
pub fn make_chunk_id(source: &str, index: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(index.to_le_bytes());
    format!("{:x}", hasher.finalize())
}
