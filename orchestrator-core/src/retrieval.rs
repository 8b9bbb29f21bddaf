//! Retrieval Engine interface (spec §4.5).
//!
//! No CGRAG implementation ships with the core; callers supply a
//! `RetrievalProvider` and a resolved index root. The core never resolves
//! an index path itself (see DESIGN.md, Open Question: retrieval path
//! resolution). `estimate_tokens` (words × 1.3) is the documented heuristic
//! spec §9 calls out; the `token_budget` contract is honored by this
//! estimate, not by a real tokenizer.

use crate::inference_client::estimate_tokens;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedChunk {
    pub source_path: String,
    pub chunk_index: usize,
    pub text: String,
    pub score: f32,
}

/// Result of one `retrieve()` call (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalResult {
    pub artifacts: Vec<RetrievedChunk>,
    pub tokens_used: u32,
    pub candidates_considered: usize,
    pub retrieval_time_ms: u64,
    pub cache_hit: bool,
}

/// Implemented by whatever indexing backend a deployment wires in.
#[async_trait]
pub trait RetrievalProvider: Send + Sync {
    async fn retrieve(
        &self,
        index_root: &Path,
        query: &str,
        token_budget: u32,
        max_artifacts: usize,
    ) -> crate::error::OrchestratorResult<RetrievalResult>;
}

/// A provider that always returns no chunks, used where retrieval is wired
/// in but no index has been configured yet.
pub struct NullRetrievalProvider;

#[async_trait]
impl RetrievalProvider for NullRetrievalProvider {
    async fn retrieve(
        &self,
        _index_root: &Path,
        _query: &str,
        _token_budget: u32,
        _max_artifacts: usize,
    ) -> crate::error::OrchestratorResult<RetrievalResult> {
        Ok(RetrievalResult {
            artifacts: Vec::new(),
            tokens_used: 0,
            candidates_considered: 0,
            retrieval_time_ms: 0,
            cache_hit: false,
        })
    }
}

/// Truncates ranked `chunks` to fit `token_budget`, using the words × 1.3
/// token-count heuristic (spec §9). Stops before exceeding the budget rather
/// than truncating a chunk's text mid-way.
pub fn fit_to_token_budget(chunks: Vec<RetrievedChunk>, token_budget: u32) -> (Vec<RetrievedChunk>, u32) {
    let mut kept = Vec::new();
    let mut used = 0u32;
    for chunk in chunks {
        let tokens = estimate_tokens(&chunk.text) as u32;
        if used + tokens > token_budget && !kept.is_empty() {
            break;
        }
        used += tokens;
        kept.push(chunk);
    }
    (kept, used)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn null_provider_returns_no_chunks() {
        let provider = NullRetrievalProvider;
        let result = provider
            .retrieve(&PathBuf::from("/does/not/matter"), "query", 2000, 5)
            .await
            .unwrap();
        assert!(result.artifacts.is_empty());
        assert!(!result.cache_hit);
    }

    #[test]
    fn fit_to_token_budget_stops_before_exceeding() {
        let chunks = vec![
            RetrievedChunk { source_path: "a.rs".into(), chunk_index: 0, text: "word ".repeat(100), score: 0.9 },
            RetrievedChunk { source_path: "b.rs".into(), chunk_index: 0, text: "word ".repeat(100), score: 0.8 },
        ];
        let (kept, used) = fit_to_token_budget(chunks, 100);
        assert_eq!(kept.len(), 1);
        assert!(used <= 130);
    }

    #[test]
    fn fit_to_token_budget_always_keeps_at_least_one_chunk() {
        let chunks = vec![RetrievedChunk {
            source_path: "a.rs".into(),
            chunk_index: 0,
            text: "word ".repeat(1000),
            score: 0.9,
        }];
        let (kept, _) = fit_to_token_budget(chunks, 1);
        assert_eq!(kept.len(), 1);
    }
}
