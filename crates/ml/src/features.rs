use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use switchboard_core::tokenize;

/// Frozen word → column mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Vocabulary {
    words: Vec<String>,
    index: HashMap<String, usize>,
}

impl Vocabulary {
    /// Sorted, de-duplicated tokens of every text.
    pub fn build<'a>(texts: impl IntoIterator<Item = &'a str>) -> Self {
        let mut words = texts
            .into_iter()
            .flat_map(tokenize)
            .collect::<Vec<_>>();
        words.sort();
        words.dedup();
        Self::from(words)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn index_of(&self, word: &str) -> Option<usize> {
        self.index.get(word).copied()
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Term counts over the vocabulary divided by the query's total token count.
    /// Out-of-vocabulary tokens count towards the total but have no column.
    pub fn query_to_vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.words.len()];
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return vector;
        }

        for token in &tokens {
            if let Some(idx) = self.index_of(token) {
                vector[idx] += 1.0;
            }
        }

        let total = tokens.len() as f32;
        for value in &mut vector {
            *value /= total;
        }
        vector
    }
}

impl From<Vec<String>> for Vocabulary {
    fn from(words: Vec<String>) -> Self {
        let index = words
            .iter()
            .enumerate()
            .map(|(idx, word)| (word.clone(), idx))
            .collect();
        Self { words, index }
    }
}

impl From<Vocabulary> for Vec<String> {
    fn from(value: Vocabulary) -> Self {
        value.words
    }
}
