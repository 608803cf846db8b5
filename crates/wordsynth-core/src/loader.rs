//! Reading embedding files (word2vec binary/text, GloVe text) into raw (word, vector) rows.
//!
//! The loader only parses; normalization and lookup structures are built by
//! [`EmbeddingStore`](crate::store::EmbeddingStore).

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

/// Upper bound on rows reserved from a header count before any row is read.
const MAX_PREALLOCATED_ROWS: usize = 1 << 20;
const MAX_PREALLOCATED_DIM: usize = 1 << 12;

/// On-disk layout of an embedding file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingFormat {
    /// `"<count> <dim>"` header, then `word ` + `dim` little-endian f32 per row.
    Word2VecBinary,
    /// `"<count> <dim>"` header, then one whitespace-separated row per word.
    Word2VecText,
    /// No header, one whitespace-separated row per word.
    GloveText,
}

impl EmbeddingFormat {
    /// Picks a format from the file name. `binary` forces the word2vec binary layout.
    pub fn detect(path: &Path, binary: bool) -> Self {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if binary || name.ends_with(".bin") {
            Self::Word2VecBinary
        } else if name.ends_with(".txt") && !name.ends_with(".word2vec.txt") {
            Self::GloveText
        } else {
            Self::Word2VecText
        }
    }
}

/// Parsed rows, in file order.
#[derive(Debug, Clone, Default)]
pub struct RawEmbeddings {
    pub dim: usize,
    pub entries: Vec<(String, Vec<f32>)>,
}

/// Loads every row of `path`. Fails with [`LoadError::NotFound`] when the file is missing.
pub fn load_embeddings(path: &Path, format: EmbeddingFormat) -> Result<RawEmbeddings, LoadError> {
    if !path.is_file() {
        return Err(LoadError::NotFound(path.to_path_buf()));
    }
    let file = File::open(path).map_err(|e| LoadError::Io(path.to_path_buf(), e))?;
    let reader = BufReader::new(file);
    tracing::info!(path = %path.display(), ?format, "loading embeddings");
    let raw = match format {
        EmbeddingFormat::Word2VecBinary => read_word2vec_binary(reader)?,
        EmbeddingFormat::Word2VecText => read_text(reader, true)?,
        EmbeddingFormat::GloveText => read_text(reader, false)?,
    };
    tracing::info!(words = raw.entries.len(), dim = raw.dim, "embeddings parsed");
    Ok(raw)
}

/// Lists candidate embedding files (`.bin`, `.txt`, `.vec`) under `root`, sorted by path.
/// Hidden entries are skipped and symlinked directories are not followed.
pub fn discover_sources(root: &Path) -> Result<Vec<PathBuf>, LoadError> {
    if !root.is_dir() {
        return Err(LoadError::NotFound(root.to_path_buf()));
    }
    let mut found = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
    {
        let entry = entry.map_err(|e| LoadError::Walk(e.to_string()))?;
        let path = entry.path();
        let is_embedding = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| matches!(e, "bin" | "txt" | "vec"));
        if is_embedding && path.is_file() {
            found.push(path.to_path_buf());
        }
    }
    found.sort();
    Ok(found)
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn parse_header(line: &str) -> Option<(usize, usize)> {
    let mut parts = line.split_whitespace();
    let count = parts.next()?.parse().ok()?;
    let dim = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((count, dim))
}

fn read_text<R: BufRead>(reader: R, expect_header: bool) -> Result<RawEmbeddings, LoadError> {
    let mut raw = RawEmbeddings::default();
    let mut declared_dim = None;
    for (i, line) in reader.lines().enumerate() {
        let line_no = i + 1;
        let line = line.map_err(LoadError::Read)?;
        if i == 0 && expect_header {
            if let Some((count, dim)) = parse_header(&line) {
                declared_dim = Some(dim);
                raw.entries.reserve(count.min(MAX_PREALLOCATED_ROWS));
                continue;
            }
        }
        let mut parts = line.split_whitespace();
        let Some(word) = parts.next() else {
            continue;
        };
        let values: Vec<&str> = parts.collect();
        if values.is_empty() {
            continue;
        }
        let mut vector = Vec::with_capacity(values.len());
        for v in values {
            let x: f32 = v.parse().map_err(|_| LoadError::Format {
                line: line_no,
                reason: format!("invalid float {v:?} for word {word:?}"),
            })?;
            vector.push(x);
        }
        let dim = *declared_dim.get_or_insert(vector.len());
        if vector.len() != dim {
            return Err(LoadError::Format {
                line: line_no,
                reason: format!("word {word:?} has {} values, expected {dim}", vector.len()),
            });
        }
        raw.entries.push((word.to_string(), vector));
    }
    raw.dim = declared_dim.unwrap_or(0);
    Ok(raw)
}

fn read_word2vec_binary<R: BufRead>(mut reader: R) -> Result<RawEmbeddings, LoadError> {
    let mut header = String::new();
    reader.read_line(&mut header).map_err(LoadError::Read)?;
    let (count, dim) = parse_header(&header).ok_or_else(|| LoadError::Format {
        line: 1,
        reason: format!("expected \"<count> <dim>\" header, got {:?}", header.trim()),
    })?;

    if dim.checked_mul(std::mem::size_of::<f32>()).is_none() {
        return Err(LoadError::Format {
            line: 1,
            reason: format!("dimension {dim} is too large"),
        });
    }

    let mut entries = Vec::with_capacity(count.min(MAX_PREALLOCATED_ROWS));
    let mut word_buf = Vec::new();
    for row in 0..count {
        let record = row + 1;
        word_buf.clear();
        reader
            .read_until(b' ', &mut word_buf)
            .map_err(LoadError::Read)?;
        if word_buf.last() != Some(&b' ') {
            return Err(LoadError::Format {
                line: record,
                reason: format!("truncated file: expected {count} records, got {row}"),
            });
        }
        word_buf.pop();
        // Rows may be separated by a newline that ends up in front of the next word.
        let word = String::from_utf8_lossy(&word_buf)
            .trim_start_matches('\n')
            .to_string();
        // Capacity follows the bytes actually read, not the header dimension.
        let mut vector = Vec::with_capacity(dim.min(MAX_PREALLOCATED_DIM));
        let mut value = [0u8; 4];
        for _ in 0..dim {
            reader.read_exact(&mut value).map_err(|_| LoadError::Format {
                line: record,
                reason: format!("truncated vector for word {word:?}"),
            })?;
            vector.push(f32::from_le_bytes(value));
        }
        entries.push((word, vector));
    }
    Ok(RawEmbeddings { dim, entries })
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("embedding source not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to open {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("read error: {0}")]
    Read(std::io::Error),
    #[error("malformed embeddings at record {line}: {reason}")]
    Format { line: usize, reason: String },
    #[error("walk error: {0}")]
    Walk(String),
}
