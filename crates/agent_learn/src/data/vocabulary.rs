//! Vocabulary - word-level tokenizer over instruction text
//!
//! Stored as a HuggingFace `tokenizer.json` so the file can be inspected and
//! reused by any `tokenizers` consumer.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokenizers::Tokenizer;

pub const TOKENIZER_FILENAME: &str = "tokenizer.json";
pub const PAD_TOKEN: &str = "<pad>";
pub const UNK_TOKEN: &str = "<unk>";

/// Lower-cased whitespace-separated words, the same split the tokenizer applies.
pub fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace().map(|w| w.to_lowercase())
}

#[derive(Clone)]
pub struct Vocabulary {
    tokens: Vec<String>,
    tokenizer: Tokenizer,
    source: Option<PathBuf>,
}

impl Vocabulary {
    /// Builds a vocabulary of `<pad>`, `<unk>` and then `words` in order.
    /// Duplicates and the special tokens are skipped.
    pub fn from_words<I: IntoIterator<Item = String>>(words: I) -> Result<Self> {
        let mut tokens = vec![PAD_TOKEN.to_string(), UNK_TOKEN.to_string()];
        let mut seen: HashSet<String> = tokens.iter().cloned().collect();
        for word in words {
            if seen.insert(word.clone()) {
                tokens.push(word);
            }
        }

        let json = tokenizer_json(&tokens);
        let tokenizer = Tokenizer::from_str(&json.to_string())
            .map_err(|e| anyhow::anyhow!("Failed to build tokenizer: {}", e))?;
        Ok(Self {
            tokens,
            tokenizer,
            source: None,
        })
    }

    /// Loads `<directory>/tokenizer.json`.
    pub fn load<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let directory = directory.as_ref();
        let path = directory.join(TOKENIZER_FILENAME);
        let tokenizer = Tokenizer::from_file(&path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer {:?}: {}", path, e))?;

        let mut entries: Vec<(String, u32)> = tokenizer.get_vocab(true).into_iter().collect();
        entries.sort_by_key(|(_, id)| *id);
        for (expected, (token, id)) in entries.iter().enumerate() {
            if *id as usize != expected {
                anyhow::bail!("Tokenizer {:?} has a gap in its ids at '{}'", path, token);
            }
        }
        if entries.first().map(|(t, _)| t.as_str()) != Some(PAD_TOKEN) {
            anyhow::bail!("Tokenizer {:?} does not start with {}", path, PAD_TOKEN);
        }

        Ok(Self {
            tokens: entries.into_iter().map(|(t, _)| t).collect(),
            tokenizer,
            source: Some(directory.to_path_buf()),
        })
    }

    /// Writes `<directory>/tokenizer.json` and returns its path.
    pub fn save<P: AsRef<Path>>(&self, directory: P) -> Result<PathBuf> {
        let directory = directory.as_ref();
        std::fs::create_dir_all(directory)
            .with_context(|| format!("Failed to create {:?}", directory))?;
        let path = directory.join(TOKENIZER_FILENAME);
        let json = serde_json::to_string_pretty(&tokenizer_json(&self.tokens))?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write {:?}", path))?;
        tracing::info!("Saved vocabulary of {} tokens to {:?}", self.len(), path);
        Ok(path)
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow::anyhow!("Failed to tokenize '{}': {}", text, e))?;
        Ok(encoding.get_ids().to_vec())
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Directory the vocabulary was loaded from; `None` when derived in memory.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

impl PartialEq for Vocabulary {
    fn eq(&self, other: &Self) -> bool {
        self.tokens == other.tokens
    }
}

impl std::fmt::Debug for Vocabulary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vocabulary")
            .field("len", &self.tokens.len())
            .field("source", &self.source)
            .finish()
    }
}

fn tokenizer_json(tokens: &[String]) -> serde_json::Value {
    let vocab: serde_json::Map<String, serde_json::Value> = tokens
        .iter()
        .enumerate()
        .map(|(id, token)| (token.clone(), serde_json::json!(id)))
        .collect();
    let special = |id: usize, content: &str| {
        serde_json::json!({
            "id": id, "content": content, "single_word": false, "lstrip": false,
            "rstrip": false, "normalized": false, "special": true
        })
    };

    serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [special(0, PAD_TOKEN), special(1, UNK_TOKEN)],
        "normalizer": { "type": "Lowercase" },
        "pre_tokenizer": { "type": "WhitespaceSplit" },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": vocab,
            "unk_token": UNK_TOKEN
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocabulary() -> Vocabulary {
        Vocabulary::from_words(["go", "left", "go", "<unk>", "up"].map(String::from)).unwrap()
    }

    #[test]
    fn test_specials_come_first() {
        let v = vocabulary();
        assert_eq!(v.tokens(), &["<pad>", "<unk>", "go", "left", "up"]);
        assert!(v.source().is_none());
    }

    #[test]
    fn test_encode_maps_unknown_words() -> Result<()> {
        let v = vocabulary();
        assert_eq!(v.encode("Go LEFT then up")?, vec![2, 3, 1, 4]);
        assert!(v.encode("")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_save_then_load_records_source() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let v = vocabulary();
        v.save(dir.path())?;

        let loaded = Vocabulary::load(dir.path())?;
        assert_eq!(loaded, v);
        assert_eq!(loaded.source(), Some(dir.path()));
        assert_eq!(loaded.encode("up go")?, vec![4, 2]);
        Ok(())
    }
}
