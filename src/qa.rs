//! Q&A pair retrieval: cosine similarity over a precomputed, L2-normalized
//! matrix of question embeddings, loaded once per process.

use serde::{Deserialize, Serialize};

use crate::models::QaPair;
use crate::tts_filter::filter_safe_text;

#[derive(Debug, Serialize, Deserialize)]
pub struct RetrievedQaPair {
    pub question: String,
    pub answer: String,
    pub context: String,
    pub source: String,
    pub page: Option<u32>,
    pub similarity: f32,
}

/// Holds Q&A pairs with L2-pre-normalized embeddings for fast cosine
/// scoring against a query vector.
pub struct QaIndex {
    pairs: Vec<QaPair>,
}

impl QaIndex {
    pub fn new(mut pairs: Vec<QaPair>) -> Self {
        for pair in &mut pairs {
            crate::embedding::l2_normalize(&mut pair.embedding);
        }
        Self { pairs }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Score every pair against a (not necessarily normalized) query
    /// vector, returning the top `num_results` above `threshold`,
    /// sorted by descending similarity. Note the threshold check here is
    /// inclusive (`>=`), unlike the chunk-mode relevance threshold, which
    /// is exclusive (`>`) — the two paths are grounded in distinct source
    /// code and intentionally preserve that difference.
    pub fn query(&self, query_vec: &[f32], num_results: usize, threshold: f32) -> Vec<RetrievedQaPair> {
        let mut query_norm = query_vec.to_vec();
        crate::embedding::l2_normalize(&mut query_norm);

        let mut scored: Vec<(f32, &QaPair)> = self
            .pairs
            .iter()
            .map(|p| {
                let sim: f32 = p.embedding.iter().zip(query_norm.iter()).map(|(a, b)| a * b).sum();
                (sim, p)
            })
            .filter(|(sim, _)| *sim >= threshold)
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(num_results);

        scored
            .into_iter()
            .map(|(sim, p)| RetrievedQaPair {
                question: filter_safe_text(&p.question),
                answer: filter_safe_text(&p.answer),
                context: filter_safe_text(&p.context),
                source: p.source_filename.clone(),
                page: p.page,
                similarity: sim,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn pair(question: &str, embedding: Vec<f32>) -> QaPair {
        QaPair {
            id: Uuid::new_v4(),
            question: question.to_string(),
            answer: "some answer".to_string(),
            context: "some context".to_string(),
            source_filename: "doc.md".to_string(),
            page: None,
            embedding,
        }
    }

    #[test]
    fn returns_results_above_threshold_sorted_descending() {
        let index = QaIndex::new(vec![
            pair("close match", vec![1.0, 0.0]),
            pair("far match", vec![0.0, 1.0]),
        ]);

        let results = index.query(&[1.0, 0.0], 5, 0.5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].question, "close match");
    }

    #[test]
    fn threshold_is_inclusive() {
        let index = QaIndex::new(vec![pair("exact", vec![1.0, 0.0])]);
        let results = index.query(&[1.0, 0.0], 5, 1.0);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn respects_top_k_limit() {
        let index = QaIndex::new(vec![
            pair("a", vec![1.0, 0.0]),
            pair("b", vec![0.9, 0.1]),
            pair("c", vec![0.8, 0.2]),
        ]);
        let results = index.query(&[1.0, 0.0], 2, 0.0);
        assert_eq!(results.len(), 2);
    }
}
