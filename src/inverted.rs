//! Inverted-index abstract decoding.
//!
//! OpenAlex distributes abstracts as an inverted index (word -> positions)
//! for legal reasons. This module reconstructs the plaintext.

use std::collections::BTreeMap;

/// OpenAlex inverted abstract index: word -> ascending positions.
///
/// A `BTreeMap` keeps word iteration order stable, so decoding is
/// deterministic even when a malformed index maps two words to the same
/// position (last write wins).
pub type InvertedIndex = BTreeMap<String, Vec<i64>>;

/// Reconstruct abstract text from an inverted index.
///
/// Words are emitted in ascending position order, space-joined. An empty
/// index decodes to `None`, never to an empty string.
pub fn decode(index: &InvertedIndex) -> Option<String> {
    if index.is_empty() {
        return None;
    }

    let mut position_word: BTreeMap<i64, &str> = BTreeMap::new();
    for (word, positions) in index {
        for pos in positions {
            position_word.insert(*pos, word.as_str());
        }
    }

    if position_word.is_empty() {
        return None;
    }

    let text = position_word
        .values()
        .copied()
        .collect::<Vec<_>>()
        .join(" ");

    Some(text)
}

/// Decode an optional index, treating a missing index as missing text.
pub fn decode_opt(index: Option<&InvertedIndex>) -> Option<String> {
    index.and_then(decode)
}
