//! Semantic trial retrieval.
//!
//! Embeds a free-text query and scores it against every stored chunk
//! vector by brute-force cosine similarity, then deduplicates to one
//! best-scoring chunk per trial. No external vector index is involved.
//!
//! An optional [`TrialFilter`] restricts hits by chunk metadata (phase,
//! overall status, minimum enrollment) before deduplication.

use anyhow::{bail, Result};
use serde_json::Value;
use sqlx::Row;
use std::collections::HashSet;

use crate::config::Config;
use crate::embedding::{blob_to_vec, cosine_similarity, create_embedder, Embedder};
use crate::feasibility::parse_metadata_int;
use crate::models::TrialHit;
use crate::store::Store;

/// Metadata filter applied to candidate chunks before deduplication.
#[derive(Debug, Clone, Default)]
pub struct TrialFilter {
    pub phase: Option<String>,
    pub status: Option<String>,
    pub min_enrollment: Option<i64>,
}

impl TrialFilter {
    pub fn is_empty(&self) -> bool {
        self.phase.is_none() && self.status.is_none() && self.min_enrollment.is_none()
    }

    fn matches(&self, metadata: &Value) -> bool {
        if let Some(ref phase) = self.phase {
            match metadata.get("phase").and_then(|v| v.as_str()) {
                Some(p) if p.eq_ignore_ascii_case(phase) => {}
                _ => return false,
            }
        }

        if let Some(ref status) = self.status {
            match metadata.get("overall_status").and_then(|v| v.as_str()) {
                Some(s) if s.eq_ignore_ascii_case(status) => {}
                _ => return false,
            }
        }

        if let Some(min_enrollment) = self.min_enrollment {
            match parse_metadata_int(metadata.get("enrollment")) {
                Some(enrollment) if enrollment >= min_enrollment => {}
                _ => return false,
            }
        }

        true
    }
}

/// Rank trials against a free-text query.
///
/// Every chunk vector is scored and the top `candidate_k` chunks form the
/// candidate pool; each trial then keeps its best-scoring chunk. Results
/// are sorted by score descending (ties broken by `nct_id` for
/// determinism) and truncated to `top_k`.
pub async fn search_trials(
    store: &Store,
    embedder: &dyn Embedder,
    query: &str,
    top_k: usize,
    candidate_k: usize,
    filter: Option<&TrialFilter>,
) -> Result<Vec<TrialHit>> {
    if query.trim().is_empty() {
        bail!("query must not be empty");
    }

    let query_vec = embedder.embed(query).await?;

    let rows = sqlx::query(
        r#"
        SELECT cv.nct_id, cv.embedding,
               COALESCE(substr(c.text, 1, 240), '') AS snippet,
               c.metadata_json
        FROM chunk_vectors cv
        JOIN chunks c ON c.id = cv.chunk_id
        "#,
    )
    .fetch_all(store.pool())
    .await?;

    let mut candidates: Vec<TrialHit> = Vec::new();

    for row in &rows {
        let blob: Vec<u8> = row.get("embedding");
        let vec = blob_to_vec(&blob);
        let score = cosine_similarity(&query_vec, &vec) as f64;

        let metadata_json: String = row.get("metadata_json");
        let metadata: Value = serde_json::from_str(&metadata_json)
            .unwrap_or_else(|_| Value::Object(Default::default()));

        if let Some(filter) = filter {
            if !filter.matches(&metadata) {
                continue;
            }
        }

        candidates.push(TrialHit {
            nct_id: row.get("nct_id"),
            score,
            snippet: row.get("snippet"),
            metadata,
        });
    }

    // Rank chunk candidates, cap the pool, then keep the best-scoring
    // chunk per trial.
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.nct_id.cmp(&b.nct_id))
    });
    candidates.truncate(candidate_k.max(top_k));

    let mut seen = HashSet::new();
    let mut hits: Vec<TrialHit> = Vec::new();
    for candidate in candidates {
        if seen.insert(candidate.nct_id.clone()) {
            hits.push(candidate);
        }
    }
    hits.truncate(top_k);

    Ok(hits)
}

/// CLI entry point — runs a search and prints ranked results.
pub async fn run_search(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    filter: TrialFilter,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }

    let store = Store::connect(config).await?;
    let embedder = create_embedder(&config.embedding)?;
    let limit = top_k.unwrap_or(config.retrieval.final_limit as usize);
    let candidate_k = config.retrieval.candidate_k as usize;
    let filter_opt = if filter.is_empty() { None } else { Some(&filter) };

    let hits = search_trials(&store, embedder.as_ref(), query, limit, candidate_k, filter_opt).await?;

    if hits.is_empty() {
        println!("No results.");
        store.close().await;
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.3}] {}", i + 1, hit.score, hit.nct_id);
        if let Some(conditions) = hit.metadata.get("conditions").and_then(|v| v.as_str()) {
            println!("    conditions: {}", conditions);
        }
        println!("    excerpt: \"{}\"", hit.snippet.replace('\n', " "));
        println!();
    }

    store.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = TrialFilter::default();
        assert!(filter.is_empty());
        assert!(filter.matches(&json!({})));
        assert!(filter.matches(&json!({"phase": "Phase 1"})));
    }

    #[test]
    fn test_phase_filter_case_insensitive() {
        let filter = TrialFilter {
            phase: Some("phase 2".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&json!({"phase": "Phase 2"})));
        assert!(!filter.matches(&json!({"phase": "Phase 3"})));
        assert!(!filter.matches(&json!({})));
    }

    #[test]
    fn test_status_filter() {
        let filter = TrialFilter {
            status: Some("Recruiting".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&json!({"overall_status": "RECRUITING"})));
        assert!(!filter.matches(&json!({"overall_status": "Completed"})));
    }

    #[test]
    fn test_min_enrollment_filter_parses_defensively() {
        let filter = TrialFilter {
            min_enrollment: Some(100),
            ..Default::default()
        };
        assert!(filter.matches(&json!({"enrollment": 150})));
        assert!(filter.matches(&json!({"enrollment": "120"})));
        assert!(!filter.matches(&json!({"enrollment": 50})));
        // Malformed enrollment cannot satisfy the bound.
        assert!(!filter.matches(&json!({"enrollment": "n/a"})));
        assert!(!filter.matches(&json!({})));
    }

    #[test]
    fn test_combined_filters_conjunctive() {
        let filter = TrialFilter {
            phase: Some("Phase 2".to_string()),
            status: Some("Recruiting".to_string()),
            min_enrollment: Some(50),
        };
        let good = json!({"phase": "Phase 2", "overall_status": "Recruiting", "enrollment": 80});
        let wrong_phase =
            json!({"phase": "Phase 1", "overall_status": "Recruiting", "enrollment": 80});
        assert!(filter.matches(&good));
        assert!(!filter.matches(&wrong_phase));
    }
}
