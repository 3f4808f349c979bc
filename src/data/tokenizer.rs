use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use super::text::tokenize;
use crate::error::NliError;

/// Trait for tokenization
pub trait Tokenizer: Send + Sync {
    /// Encode text to token IDs, keeping at most `cutoff` tokens
    fn encode(&self, text: &str, cutoff: Option<usize>) -> Vec<i64>;

    /// Decode token IDs to space separated words
    fn decode(&self, tokens: &[i64]) -> String;

    fn vocab_size(&self) -> usize;

    fn unk_id(&self) -> i64;

    fn pad_id(&self) -> i64;
}

pub const PAD_TOKEN: &str = "<pad>";
pub const UNK_TOKEN: &str = "<unk>";

/// Word-level tokenizer used by the attention model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTokenizer {
    word_to_id: HashMap<String, i64>,
    id_to_word: Vec<String>,
    unk_id: i64,
    pad_id: i64,
}

impl WordTokenizer {
    /// Build a vocabulary from `documents`: words seen at least `min_count`
    /// times, most frequent first, capped at `max_vocab` entries including
    /// the pad and unk tokens.
    pub fn fit<S: AsRef<str>>(documents: &[S], max_vocab: usize, min_count: usize) -> Result<Self, NliError> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for doc in documents {
            for word in tokenize(doc.as_ref()) {
                *counts.entry(word).or_default() += 1;
            }
        }

        let mut ranked: Vec<(String, usize)> = counts
            .into_iter()
            .filter(|(_, count)| *count >= min_count.max(1))
            .collect();
        if ranked.is_empty() {
            return Err(NliError::EmptyVocabulary);
        }
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(max_vocab.saturating_sub(2));

        Ok(Self::from_vocab(ranked.into_iter().map(|(word, _)| word)))
    }

    /// Create a tokenizer with a predefined vocabulary
    pub fn from_vocab<I: IntoIterator<Item = String>>(vocab: I) -> Self {
        let pad_id = 0;
        let unk_id = 1;

        let mut id_to_word = vec![PAD_TOKEN.to_string(), UNK_TOKEN.to_string()];
        let mut word_to_id = HashMap::new();
        word_to_id.insert(PAD_TOKEN.to_string(), pad_id);
        word_to_id.insert(UNK_TOKEN.to_string(), unk_id);

        for word in vocab {
            if !word_to_id.contains_key(&word) {
                word_to_id.insert(word.clone(), id_to_word.len() as i64);
                id_to_word.push(word);
            }
        }

        Self {
            word_to_id,
            id_to_word,
            unk_id,
            pad_id,
        }
    }

    /// Save tokenizer to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .with_context(|| "Failed to serialize tokenizer")?;

        fs::write(path, json)
            .with_context(|| format!("Failed to write tokenizer to {:?}", path))?;

        Ok(())
    }

    /// Load tokenizer from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read tokenizer from {:?}", path))?;

        let tokenizer: Self = serde_json::from_str(&json)
            .with_context(|| "Failed to deserialize tokenizer")?;

        Ok(tokenizer)
    }
}

impl Tokenizer for WordTokenizer {
    fn encode(&self, text: &str, cutoff: Option<usize>) -> Vec<i64> {
        let words = tokenize(text);
        let limit = cutoff.unwrap_or(words.len());
        words
            .iter()
            .take(limit)
            .map(|word| *self.word_to_id.get(word).unwrap_or(&self.unk_id))
            .collect()
    }

    fn decode(&self, tokens: &[i64]) -> String {
        tokens
            .iter()
            .filter(|&&id| id != self.pad_id)
            .filter_map(|&id| usize::try_from(id).ok().and_then(|i| self.id_to_word.get(i)))
            .cloned()
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn vocab_size(&self) -> usize {
        self.id_to_word.len()
    }

    fn unk_id(&self) -> i64 {
        self.unk_id
    }

    fn pad_id(&self) -> i64 {
        self.pad_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_word_tokenizer_encode_decode() {
        let tokenizer = WordTokenizer::fit(&["the cat sat on the mat"], 100, 1).unwrap();
        let encoded = tokenizer.encode("The cat sat", None);
        assert_eq!(tokenizer.decode(&encoded), "the cat sat");
        // "the" is the most frequent word
        assert_eq!(encoded[0], 2);
    }

    #[test]
    fn test_word_tokenizer_unknown_and_cutoff() {
        let tokenizer = WordTokenizer::fit(&["alpha beta"], 100, 1).unwrap();
        let encoded = tokenizer.encode("gamma alpha delta", Some(2));
        assert_eq!(encoded.len(), 2);
        assert_eq!(encoded[0], tokenizer.unk_id());
    }

    #[test]
    fn test_max_vocab_and_min_count() {
        let tokenizer = WordTokenizer::fit(&["aa aa bb bb cc dd"], 4, 2).unwrap();
        assert_eq!(tokenizer.vocab_size(), 4);
        assert_eq!(tokenizer.encode("cc", None), vec![tokenizer.unk_id()]);
        assert!(WordTokenizer::fit(&["aa bb"], 10, 5).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vocab.json");
        let tokenizer = WordTokenizer::fit(&["claims need evidence"], 100, 1).unwrap();
        tokenizer.save(&path).unwrap();
        assert_eq!(WordTokenizer::load(&path).unwrap(), tokenizer);
    }
}
