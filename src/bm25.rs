//! Okapi BM25 keyword index over chunk text.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

const K1: f32 = 1.5;
const B: f32 = 0.75;

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.to_lowercase().chars() {
        if ch.is_alphanumeric() || ch == '_' {
            current.push(ch);
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bm25Index {
    /// term -> (doc id -> term frequency in that doc)
    postings: HashMap<String, HashMap<Uuid, u32>>,
    /// doc id -> document length in tokens
    doc_lengths: HashMap<Uuid, u32>,
    total_length: u64,
    num_docs: usize,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_docs(&self) -> usize {
        self.num_docs
    }

    pub fn add(&mut self, id: Uuid, text: &str) {
        let tokens = tokenize(text);
        let len = tokens.len() as u32;

        let mut counts: HashMap<String, u32> = HashMap::new();
        for token in tokens {
            *counts.entry(token).or_insert(0) += 1;
        }

        for (term, tf) in counts {
            self.postings.entry(term).or_default().insert(id, tf);
        }

        self.doc_lengths.insert(id, len);
        self.total_length += len as u64;
        self.num_docs += 1;
    }

    pub fn remove(&mut self, id: Uuid) {
        if let Some(len) = self.doc_lengths.remove(&id) {
            self.total_length = self.total_length.saturating_sub(len as u64);
            self.num_docs = self.num_docs.saturating_sub(1);
        }
        for postings in self.postings.values_mut() {
            postings.remove(&id);
        }
    }

    fn avg_doc_length(&self) -> f32 {
        if self.num_docs == 0 {
            0.0
        } else {
            self.total_length as f32 / self.num_docs as f32
        }
    }

    /// Score every document that shares at least one query term with the
    /// query and return them sorted by descending score.
    pub fn query(&self, query: &str, top_k: usize) -> Vec<(Uuid, f32)> {
        let terms = tokenize(query);
        let avg_len = self.avg_doc_length();
        let mut scores: HashMap<Uuid, f32> = HashMap::new();

        for term in &terms {
            let Some(postings) = self.postings.get(term) else {
                continue;
            };
            let df = postings.len() as f32;
            let idf = (((self.num_docs as f32 - df + 0.5) / (df + 0.5)) + 1.0).ln();

            for (&doc_id, &tf) in postings {
                let doc_len = *self.doc_lengths.get(&doc_id).unwrap_or(&0) as f32;
                let tf = tf as f32;
                let denom = tf + K1 * (1.0 - B + B * (doc_len / avg_len.max(1.0)));
                let score = idf * (tf * (K1 + 1.0)) / denom.max(f32::EPSILON);
                *scores.entry(doc_id).or_insert(0.0) += score.max(0.0);
            }
        }

        let mut results: Vec<(Uuid, f32)> = scores.into_iter().collect();
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_are_non_negative_and_ranked() {
        let mut idx = Bm25Index::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        idx.add(a, "the quick brown fox jumps over the lazy dog");
        idx.add(b, "lazy cats sleep all day long every single day");

        let results = idx.query("lazy dog", 10);
        assert!(results.iter().all(|(_, score)| *score >= 0.0));
        assert_eq!(results[0].0, a);
    }

    #[test]
    fn num_docs_matches_added_count() {
        let mut idx = Bm25Index::new();
        idx.add(Uuid::new_v4(), "one");
        idx.add(Uuid::new_v4(), "two");
        assert_eq!(idx.num_docs(), 2);
    }

    #[test]
    fn remove_decrements_num_docs() {
        let mut idx = Bm25Index::new();
        let id = Uuid::new_v4();
        idx.add(id, "some text here");
        idx.remove(id);
        assert_eq!(idx.num_docs(), 0);
    }
}
