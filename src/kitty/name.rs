use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::KittyError;

/// Public identifier of a kitty: two lowercase words joined by a hyphen.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KittyName(String);

impl KittyName {
    /// Case-normalizes `raw` and checks that it is exactly `[a-z]+-[a-z]+`.
    pub fn parse(raw: &str) -> Result<Self, KittyError> {
        let normalized = raw.to_lowercase();
        let mut words = normalized.split('-');
        let valid = match (words.next(), words.next(), words.next()) {
            (Some(first), Some(second), None) => is_word(first) && is_word(second),
            _ => false,
        };
        if !valid {
            return Err(KittyError::InvalidName {
                name: raw.to_string(),
            });
        }
        Ok(Self(normalized))
    }

    pub fn from_words(first: &str, second: &str) -> Result<Self, KittyError> {
        Self::parse(&format!("{first}-{second}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_word(word: &str) -> bool {
    !word.is_empty() && word.bytes().all(|b| b.is_ascii_lowercase())
}

impl fmt::Display for KittyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for KittyName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for KittyName {
    type Err = KittyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for KittyName {
    type Error = KittyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<KittyName> for String {
    fn from(value: KittyName) -> Self {
        value.0
    }
}

/// Source of candidate names for new kitties.
///
/// Candidates need not be unused; the store rejects duplicates on insert and
/// the service asks for another candidate a bounded number of times.
pub trait NameAllocator: Send + Sync {
    fn next_name(&self) -> Result<KittyName, KittyError>;
}

#[derive(Debug, Error)]
pub enum NameListError {
    #[error("read word list failed: {0}")]
    Read(#[from] std::io::Error),
    #[error("word list has {usable} usable words, need at least 2")]
    TooFewWords { usable: usize },
}

/// Picks two distinct random words from a dictionary file.
#[derive(Clone, Debug)]
pub struct DictionaryNameAllocator {
    words: Vec<String>,
}

impl DictionaryNameAllocator {
    pub fn from_file(
        path: impl AsRef<Path>,
        min_len: usize,
        max_len: usize,
    ) -> Result<Self, NameListError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_words(raw.lines(), min_len, max_len)
    }

    pub fn from_words<'a>(
        words: impl IntoIterator<Item = &'a str>,
        min_len: usize,
        max_len: usize,
    ) -> Result<Self, NameListError> {
        let words: BTreeSet<String> = words
            .into_iter()
            .map(str::trim)
            .filter(|word| word.len() >= min_len && word.len() <= max_len)
            .filter(|word| is_word(word))
            .map(str::to_string)
            .collect();
        if words.len() < 2 {
            return Err(NameListError::TooFewWords {
                usable: words.len(),
            });
        }
        Ok(Self {
            words: words.into_iter().collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl NameAllocator for DictionaryNameAllocator {
    fn next_name(&self) -> Result<KittyName, KittyError> {
        let count = self.words.len();
        let first = random_index(count)?;
        // Second word is drawn from the remaining count - 1 slots so it never repeats the first.
        let mut second = random_index(count - 1)?;
        if second >= first {
            second += 1;
        }
        KittyName::from_words(&self.words[first], &self.words[second])
    }
}

fn random_index(len: usize) -> Result<usize, KittyError> {
    index_from(len, getrandom::fill)
}

fn index_from(
    len: usize,
    fill: impl FnOnce(&mut [u8]) -> Result<(), getrandom::Error>,
) -> Result<usize, KittyError> {
    let mut bytes = [0u8; 8];
    fill(&mut bytes).map_err(|err| KittyError::Internal {
        message: format!("os randomness unavailable: {err}"),
    })?;
    let value = u64::from_le_bytes(bytes);
    Ok((value % len as u64) as usize)
}
