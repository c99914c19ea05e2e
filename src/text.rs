// ============================================================================
// Unicode Text Processor
// ============================================================================

use ndarray::{Array2, Array3};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use unicode_normalization::UnicodeNormalization;

use crate::error::{Result, SynthesisError};
use crate::mask::get_text_mask;
use crate::tensor::rows_to_array2;

/// File name of the codepoint-to-id table inside the ONNX directory.
pub const UNICODE_INDEXER_FILE: &str = "unicode_indexer.json";

/// Codepoint ranges removed before tokenization (emoticons, pictographs,
/// transport symbols).
const EMOJI_RANGES: &[(u32, u32)] = &[
    (0x1F600, 0x1F64F),
    (0x1F300, 0x1F5FF),
    (0x1F680, 0x1F6FF),
];

const REPLACEMENTS: &[(&str, &str)] = &[
    ("\u{2013}", "-"), // en dash
    ("\u{2011}", "-"), // non-breaking hyphen
    ("\u{2014}", "-"), // em dash
    ("\u{201C}", "\""),
    ("\u{201D}", "\""),
    ("\u{2018}", "'"),
    ("\u{2019}", "'"),
    ("_", " "),
    ("|", " "),
    ("/", " "),
    ("#", " "),
    ("\u{2192}", " "), // right arrow
    ("\u{2190}", " "), // left arrow
];

/// A normalized text must end in one of these, otherwise `.` is appended.
const TERMINAL_PUNCTUATION: &[char] = &[
    '.', '!', '?', ';', ':', ',', '\'', '"', ')', ']', '}', '…', '。', '」', '』', '】', '〉',
    '》', '›', '»',
];

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

fn space_before_punct_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r" ([,.!?;:])").expect("static regex"))
}

pub fn is_emoji(c: char) -> bool {
    let cp = c as u32;
    EMOJI_RANGES.iter().any(|&(lo, hi)| (lo..=hi).contains(&cp))
}

pub fn ends_with_terminal_punctuation(text: &str) -> bool {
    text.chars()
        .next_back()
        .is_some_and(|c| TERMINAL_PUNCTUATION.contains(&c))
}

/// Normalizes raw text for the unicode indexer.
///
/// NFKD, emoji removal, symbol substitution, whitespace cleanup and a
/// trailing period when the text has no terminal punctuation. The result
/// always ends in terminal punctuation (an empty input becomes `"."`).
pub fn preprocess_text(text: &str) -> String {
    let mut text: String = text.nfkd().filter(|&c| !is_emoji(c)).collect();

    for (from, to) in REPLACEMENTS {
        text = text.replace(from, to);
    }

    // Only a single plain space directly before punctuation is dropped; longer
    // runs collapse to one space that stays ("word  ." -> "word .").
    let text = space_before_punct_re().replace_all(&text, "$1");
    let text = whitespace_re().replace_all(&text, " ");
    let mut text = text.trim().to_string();

    if !ends_with_terminal_punctuation(&text) {
        text.push('.');
    }
    text
}

/// Token ids and mask for a batch of texts, padded to the longest item.
#[derive(Debug, Clone)]
pub struct TokenBatch {
    /// `(batch, max_len)` token ids, 0 beyond each item's length.
    pub ids: Array2<i64>,
    /// `(batch, 1, max_len)` validity mask.
    pub mask: Array3<f32>,
    /// Character count of each normalized text.
    pub lengths: Vec<usize>,
    /// The normalized texts themselves.
    pub texts: Vec<String>,
}

impl TokenBatch {
    pub fn batch_size(&self) -> usize {
        self.lengths.len()
    }

    /// Padded length shared by every row.
    pub fn max_len(&self) -> usize {
        self.ids.ncols()
    }
}

/// Maps normalized text to token ids with a codepoint-indexed table.
#[derive(Debug, Clone)]
pub struct UnicodeProcessor {
    indexer: Vec<i64>,
}

impl UnicodeProcessor {
    /// Loads the indexer table from `unicode_indexer.json`.
    pub fn new<P: AsRef<Path>>(unicode_indexer_json_path: P) -> Result<Self> {
        let path = unicode_indexer_json_path.as_ref();
        if !path.exists() {
            return Err(SynthesisError::AssetMissing(path.to_path_buf()));
        }
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes).map_err(|e| e.with_path(path))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let indexer: Vec<i64> = serde_json::from_slice(bytes)
            .map_err(|e| SynthesisError::malformed(format!("invalid unicode indexer: {e}")))?;
        Ok(Self::from_indexer(indexer))
    }

    /// `indexer[codepoint]` is the token id of that codepoint.
    pub fn from_indexer(indexer: Vec<i64>) -> Self {
        UnicodeProcessor { indexer }
    }

    /// Token id for a codepoint; codepoints past the end of the table map to 0.
    pub fn token_id(&self, c: char) -> i64 {
        self.indexer.get(c as usize).copied().unwrap_or(0)
    }

    pub fn call(&self, text_list: &[String]) -> Result<TokenBatch> {
        if text_list.is_empty() {
            return Err(SynthesisError::EmptyBatch);
        }

        let processed_texts: Vec<String> =
            text_list.iter().map(|t| preprocess_text(t)).collect();
        let text_ids_lengths: Vec<usize> =
            processed_texts.iter().map(|t| t.chars().count()).collect();
        let max_len = text_ids_lengths.iter().copied().max().unwrap_or(0);

        let rows: Vec<Vec<i64>> = processed_texts
            .iter()
            .map(|text| {
                let mut row = vec![0i64; max_len];
                for (slot, c) in row.iter_mut().zip(text.chars()) {
                    *slot = self.token_id(c);
                }
                row
            })
            .collect();

        Ok(TokenBatch {
            ids: rows_to_array2(&rows)?,
            mask: get_text_mask(&text_ids_lengths)?,
            lengths: text_ids_lengths,
            texts: processed_texts,
        })
    }
}

// ============================================================================
// Text Chunking
// ============================================================================

/// Default chunk cap, in characters, for long-form synthesis.
pub const MAX_CHUNK_LENGTH: usize = 300;

const ABBREVIATIONS: &[&str] = &[
    "Dr.", "Mr.", "Mrs.", "Ms.", "Prof.", "Sr.", "Jr.", "St.", "Ave.", "Rd.", "Blvd.", "Dept.",
    "Inc.", "Ltd.", "Co.", "Corp.", "etc.", "vs.", "i.e.", "e.g.", "Ph.D.",
];

fn paragraph_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n").expect("static regex"))
}

fn sentence_end_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]\s+").expect("static regex"))
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// True when `text` ends with `abbr` as a whole word ("Co." but not "Taco.").
fn ends_with_abbreviation(text: &str, abbr: &str) -> bool {
    match text.strip_suffix(abbr) {
        Some(head) => head.chars().next_back().map_or(true, |c| !c.is_alphanumeric()),
        None => false,
    }
}

/// Splits on `.`, `!` or `?` followed by whitespace, except after common
/// abbreviations. Returned sentences are trimmed and non-empty.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for m in sentence_end_re().find_iter(text) {
        // The punctuation mark is ASCII, so it is exactly one byte.
        let candidate = text[start..m.start() + 1].trim();
        if ABBREVIATIONS
            .iter()
            .any(|abbr| ends_with_abbreviation(candidate, abbr))
        {
            continue;
        }
        if !candidate.is_empty() {
            sentences.push(candidate.to_string());
        }
        start = m.end();
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

/// Greedily packs pieces into chunks of at most `max_len` characters.
struct ChunkPacker {
    chunks: Vec<String>,
    current: String,
    max_len: usize,
}

impl ChunkPacker {
    fn new(max_len: usize) -> Self {
        Self {
            chunks: Vec::new(),
            current: String::new(),
            max_len,
        }
    }

    fn push(&mut self, piece: &str, sep: &str) {
        if !self.current.is_empty()
            && char_len(&self.current) + char_len(sep) + char_len(piece) > self.max_len
        {
            self.flush();
        }
        if !self.current.is_empty() {
            self.current.push_str(sep);
        }
        self.current.push_str(piece);
    }

    fn flush(&mut self) {
        let chunk = self.current.trim();
        if !chunk.is_empty() {
            self.chunks.push(chunk.to_string());
        }
        self.current.clear();
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.chunks
    }
}

/// Splits long text into synthesis-sized chunks: by paragraph, then sentence,
/// then comma, then word. Returns no chunks for blank input.
pub fn chunk_text(text: &str, max_len: Option<usize>) -> Vec<String> {
    let max_len = max_len.unwrap_or(MAX_CHUNK_LENGTH).max(1);
    let mut packer = ChunkPacker::new(max_len);

    for para in paragraph_re().split(text.trim()) {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }
        if char_len(para) <= max_len {
            packer.flush();
            packer.push(para, " ");
            packer.flush();
            continue;
        }

        for sentence in split_sentences(para) {
            if char_len(&sentence) <= max_len {
                packer.push(&sentence, " ");
                continue;
            }

            packer.flush();
            for part in sentence.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                if char_len(part) <= max_len {
                    packer.push(part, ", ");
                    continue;
                }
                packer.flush();
                for word in part.split_whitespace() {
                    packer.push(word, " ");
                }
                packer.flush();
            }
        }
        packer.flush();
    }

    packer.finish()
}
