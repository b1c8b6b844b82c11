//! Byte-level BPE vocabulary handling.
//!
//! Tokenizers in the GPT-2 lineage store raw bytes as printable unicode
//! code points through a fixed bijection. The container stores the raw
//! bytes, so conversion walks every token back through the bijection's
//! inverse before writing it.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{EnvasarError, Result};

/// Create the byte↔unicode bijection used by byte-level BPE tokenizers.
///
/// Byte values in the three printable ranges (33–126, 161–172, 174–255)
/// map to themselves as code points; the remaining byte values are
/// assigned sequentially to code points starting at 256, walking 0..=255
/// in order. The iteration order is load-bearing: it decides which code
/// points stand in for the control/whitespace bytes, and tokenizers using
/// this scheme depend on exactly this assignment.
#[must_use]
pub fn byte_unicode_maps() -> (HashMap<u8, char>, HashMap<char, u8>) {
    let mut encoder = HashMap::new();
    let mut decoder = HashMap::new();

    let mut n = 0u32;
    for b in 0..=255u8 {
        let c = if (b'!'..=b'~').contains(&b)
            || (0xa1..=0xac).contains(&b)
            || (0xae..=0xff).contains(&b)
        {
            char::from(b)
        } else {
            let c = char::from_u32(256 + n).unwrap_or('?');
            n += 1;
            c
        };

        encoder.insert(b, c);
        decoder.insert(c, b);
    }

    (encoder, decoder)
}

/// Decodes stored token strings back to the raw bytes they encode.
#[derive(Debug, Clone)]
pub struct TokenByteDecoder {
    inverse: HashMap<char, u8>,
}

impl TokenByteDecoder {
    /// Build the decoder from the fixed bijection.
    #[must_use]
    pub fn new() -> Self {
        let (_, inverse) = byte_unicode_maps();
        Self { inverse }
    }

    /// Recover the raw byte sequence a token string encodes.
    ///
    /// # Errors
    ///
    /// `Vocabulary` when a character has no inverse mapping — the token
    /// was not produced by this byte-level scheme. The diagnostic names
    /// the id, the token and the offending character.
    pub fn decode(&self, id: u32, token: &str) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(token.len());
        for ch in token.chars() {
            match self.inverse.get(&ch) {
                Some(&b) => bytes.push(b),
                None => return Err(EnvasarError::invalid_byte_mapping(id, token, ch)),
            }
        }
        Ok(bytes)
    }
}

impl Default for TokenByteDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Tokenizer vocabulary as an id → token-string mapping.
///
/// Built from whatever ordering the tokenizer uses internally; the
/// container always walks ids 0..vocab_size in ascending order.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    id_to_token: HashMap<u32, String>,
}

/// `tokenizer.json` root, trimmed to the fields conversion needs.
#[derive(Debug, Deserialize)]
struct HfTokenizerJson {
    model: HfModel,
    #[serde(default)]
    added_tokens: Vec<HfAddedToken>,
}

#[derive(Debug, Deserialize)]
struct HfModel {
    vocab: HashMap<String, u32>,
}

#[derive(Debug, Deserialize)]
struct HfAddedToken {
    id: u32,
    content: String,
}

impl Vocabulary {
    /// Build from (token, id) pairs, reversing the tokenizer's map.
    #[must_use]
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, u32)>) -> Self {
        let id_to_token = pairs.into_iter().map(|(tok, id)| (id, tok)).collect();
        Self { id_to_token }
    }

    /// Parse a standalone `vocab.json` (token → id object).
    pub fn from_vocab_json(json: &str) -> Result<Self> {
        let map: HashMap<String, u32> =
            serde_json::from_str(json).map_err(|e| EnvasarError::Vocabulary {
                message: format!("failed to parse vocab.json: {e}"),
            })?;
        Ok(Self::from_pairs(map))
    }

    /// Parse a HuggingFace `tokenizer.json`, including added tokens.
    pub fn from_tokenizer_json(json: &str) -> Result<Self> {
        let hf: HfTokenizerJson =
            serde_json::from_str(json).map_err(|e| EnvasarError::Vocabulary {
                message: format!("failed to parse tokenizer.json: {e}"),
            })?;
        let mut vocab = Self::from_pairs(hf.model.vocab);
        for added in hf.added_tokens {
            vocab.id_to_token.insert(added.id, added.content);
        }
        Ok(vocab)
    }

    /// Token string for an id, if the vocabulary has one.
    #[must_use]
    pub fn token(&self, id: u32) -> Option<&str> {
        self.id_to_token.get(&id).map(String::as_str)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.id_to_token.len()
    }

    /// True when the vocabulary holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.id_to_token.is_empty()
    }
}
