//! Tokenizer vocabulary: token string to id and back

use std::collections::HashMap;

use crate::container::Container;
use crate::error::{Result, VargateError};

/// Metadata key holding the token strings
pub const TOKENS_KEY: &str = "tokenizer.tokens";

/// Replacement emitted by [`Vocabulary::decode`] for ids outside the vocabulary
pub const UNKNOWN_TOKEN: &str = "<unk>";

/// Bidirectional token table; both directions are unique
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vocabulary {
    tokens: Vec<String>,
    ids: HashMap<String, u32>,
    /// Longest token in bytes, bounds the greedy match window
    max_token_len: usize,
}

impl Vocabulary {
    /// Build from token strings in id order
    ///
    /// # Errors
    ///
    /// Returns [`VargateError::FormatError`] on a duplicate token string or
    /// more tokens than fit in a `u32` id.
    pub fn new(tokens: Vec<String>) -> Result<Self> {
        if u32::try_from(tokens.len()).is_err() {
            return Err(VargateError::format("vocabulary exceeds u32 ids"));
        }
        let mut ids = HashMap::with_capacity(tokens.len());
        for (id, token) in tokens.iter().enumerate() {
            if ids.insert(token.clone(), id as u32).is_some() {
                return Err(VargateError::format(format!("duplicate vocabulary token '{token}'")));
            }
        }
        let max_token_len = tokens.iter().map(String::len).max().unwrap_or(0);
        Ok(Self {
            tokens,
            ids,
            max_token_len,
        })
    }

    /// Read `tokenizer.tokens` from container metadata
    ///
    /// # Errors
    ///
    /// Returns [`VargateError::FormatError`] if the key is missing, is not a
    /// string array, or holds duplicates.
    pub fn from_container(container: &Container) -> Result<Self> {
        let tokens = container
            .get_string_array(TOKENS_KEY)
            .ok_or_else(|| VargateError::format(format!("missing or malformed {TOKENS_KEY}")))?;
        Self::new(tokens.into_iter().map(str::to_string).collect())
    }

    /// Number of tokens
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the vocabulary is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Id of a token string
    #[must_use]
    pub fn token_id(&self, token: &str) -> Option<u32> {
        self.ids.get(token).copied()
    }

    /// Token string of an id
    #[must_use]
    pub fn token(&self, id: u32) -> Option<&str> {
        self.tokens.get(id as usize).map(String::as_str)
    }

    /// Concatenate token strings; unknown ids become [`UNKNOWN_TOKEN`]
    #[must_use]
    pub fn decode(&self, ids: &[u32]) -> String {
        ids.iter()
            .map(|&id| self.token(id).unwrap_or(UNKNOWN_TOKEN))
            .collect()
    }

    /// Greedy longest-prefix tokenization
    ///
    /// At each position the longest vocabulary entry that prefixes the
    /// remaining text wins. A character no entry covers is skipped.
    #[must_use]
    pub fn encode_greedy(&self, text: &str) -> Vec<u32> {
        let mut out = Vec::new();
        let mut rest = text;
        while let Some(first) = rest.chars().next() {
            let window = self.max_token_len.min(rest.len());
            let matched = (1..=window)
                .rev()
                .filter(|&len| rest.is_char_boundary(len))
                .find_map(|len| self.token_id(&rest[..len]).map(|id| (id, len)));
            match matched {
                Some((id, len)) => {
                    out.push(id);
                    rest = &rest[len..];
                },
                None => rest = &rest[first.len_utf8()..],
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vocabulary {
        Vocabulary::new(
            ["a", "b", "ab", "abc", " ", "é"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_lookup_both_directions() {
        let v = vocab();
        assert_eq!(v.len(), 6);
        assert_eq!(v.token_id("ab"), Some(2));
        assert_eq!(v.token(3), Some("abc"));
        assert_eq!(v.token(99), None);
        assert_eq!(v.token_id("zz"), None);
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = Vocabulary::new(vec!["x".into(), "x".into()]).unwrap_err();
        assert!(matches!(err, VargateError::FormatError { .. }));
    }

    #[test]
    fn test_decode_with_unknown() {
        assert_eq!(vocab().decode(&[2, 4, 0, 42]), "ab a<unk>");
    }

    #[test]
    fn test_encode_longest_prefix() {
        let v = vocab();
        assert_eq!(v.encode_greedy("abcab"), vec![3, 2]);
        assert_eq!(v.encode_greedy("abz b"), vec![2, 4, 1]);
        assert_eq!(v.encode_greedy("éa"), vec![5, 0]);
        assert!(v.encode_greedy("").is_empty());
    }

    #[test]
    fn test_encode_skips_partial_multibyte() {
        // 'ü' is not in the vocabulary and is skipped whole
        assert_eq!(vocab().encode_greedy("üa"), vec![0]);
    }
}
