use std::fs::File;
use std::io::prelude::*;
use std::io::BufReader;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use flate2::bufread::GzDecoder;
use serde::Deserialize;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::hub::pad_token_id;
use crate::model::IGNORE_INDEX;
use crate::qa::QaPair;

/// The built-in training corpus used when no data file is given.
pub fn default_texts() -> Vec<String> {
    [
        "The quick brown fox jumps over the lazy dog.",
        "A journey of a thousand miles begins with a single step.",
        "To be or not to be, that is the question.",
        "All that glitters is not gold.",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Debug, Deserialize)]
struct TextRecord {
    text: String,
}

fn read_lines(reader: impl BufRead) -> Result<Vec<String>> {
    let mut texts = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() {
            texts.push(line.to_string());
        }
    }
    Ok(texts)
}

fn read_jsonl(reader: impl BufRead) -> Result<Vec<String>> {
    let mut texts = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(&line)
            .with_context(|| format!("line {}: invalid JSON", lineno + 1))?;
        if value.get("question").is_some() {
            let pair: QaPair = serde_json::from_value(value)
                .with_context(|| format!("line {}: invalid QA record", lineno + 1))?;
            match pair.training_text() {
                Some(text) => texts.push(text),
                None => debug!(line = lineno + 1, "skipping QA record without an answer"),
            }
        } else {
            let record: TextRecord = serde_json::from_value(value)
                .with_context(|| format!("line {}: expected a `text` or `question` field", lineno + 1))?;
            texts.push(record.text);
        }
    }
    Ok(texts)
}

/// Loads training texts from `.jsonl` (QA or `{"text": ..}` records), gzip
/// compressed text, or plain text with one example per non-empty line.
pub fn load_texts(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = BufReader::new(file);
    let texts = match path.extension().and_then(|e| e.to_str()) {
        Some("jsonl") => read_jsonl(reader)?,
        Some("gz") => read_lines(BufReader::new(GzDecoder::new(reader)))?,
        _ => read_lines(reader)?,
    };
    info!(path = %path.display(), examples = texts.len(), "loaded training texts");
    Ok(texts)
}

/// One tokenized training example; every field is `max_length` long.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedExample {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub labels: Vec<i64>,
}

impl EncodedExample {
    /// Truncates `ids` to `max_length` and right pads with `pad_id`.
    /// Padding is masked out of attention and ignored by the loss.
    pub fn from_ids(mut ids: Vec<u32>, max_length: usize, pad_id: u32) -> Self {
        ids.truncate(max_length);
        let real = ids.len();
        ids.resize(max_length, pad_id);

        let attention_mask = (0..max_length).map(|i| u32::from(i < real)).collect();
        let labels = ids
            .iter()
            .enumerate()
            .map(|(i, &id)| if i < real { id as i64 } else { IGNORE_INDEX })
            .collect();
        Self {
            input_ids: ids,
            attention_mask,
            labels,
        }
    }

    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    /// True when at least one token has a predecessor to be predicted from.
    pub fn has_targets(&self) -> bool {
        self.labels.iter().skip(1).any(|&l| l >= 0)
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

pub struct TextDataset {
    texts: Vec<String>,
}

impl TextDataset {
    pub fn new(texts: Vec<String>) -> Self {
        Self { texts }
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&str> {
        self.texts.get(idx).map(String::as_str)
    }

    /// Tokenizes every text with fixed `max_length` padding and truncation.
    pub fn tokenize(&self, tokenizer: &Tokenizer, max_length: usize) -> Result<Vec<EncodedExample>> {
        if self.is_empty() {
            bail!("dataset is empty");
        }
        if max_length == 0 {
            bail!("max_length must be positive");
        }
        let pad_id = pad_token_id(tokenizer)?;
        self.texts
            .iter()
            .map(|text| {
                let encoding = tokenizer
                    .encode(text.as_str(), false)
                    .map_err(|e| anyhow!("tokenizing {text:?}: {e}"))?;
                Ok(EncodedExample::from_ids(
                    encoding.get_ids().to_vec(),
                    max_length,
                    pad_id,
                ))
            })
            .collect()
    }
}
