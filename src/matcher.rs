//! Semantic eligibility matching between patients and trials.
//!
//! A trial's required conditions are matched conjunctively: every required
//! condition must be semantically close (cosine similarity at or above the
//! threshold) to at least one condition observed on the patient. An empty
//! requirement set is vacuously satisfied.
//!
//! Condition vectors come from an injected [`Embedder`] and are memoized in
//! a bounded [`EmbedCache`] owned exclusively by the matcher, so repeated
//! comparisons across patients never re-embed the same string.

use anyhow::Result;
use std::sync::Arc;

use crate::config::MatchingConfig;
use crate::embedding::{cosine_similarity, normalize, EmbedCache, Embedder};
use crate::models::EligiblePatient;
use crate::store::Store;

pub struct EligibilityMatcher {
    embedder: Arc<dyn Embedder>,
    threshold: f32,
    cache: EmbedCache,
}

impl EligibilityMatcher {
    pub fn new(embedder: Arc<dyn Embedder>, threshold: f32, cache_size: usize) -> Self {
        Self {
            embedder,
            threshold,
            cache: EmbedCache::new(cache_size),
        }
    }

    pub fn from_config(embedder: Arc<dyn Embedder>, config: &MatchingConfig) -> Self {
        Self::new(embedder, config.similarity_threshold, config.cache_size)
    }

    /// Embedding for a condition, via the cache. The key is the lower-cased
    /// trimmed string; vectors are normalized before insertion.
    async fn condition_vector(&self, condition: &str) -> Result<Vec<f32>> {
        let key = EmbedCache::normalize_key(condition);
        if let Some(vec) = self.cache.get(&key) {
            return Ok(vec);
        }

        let mut vec = self.embedder.embed(&key).await?;
        normalize(&mut vec);
        self.cache.insert(key, vec.clone());
        Ok(vec)
    }

    /// Conjunctive semantic match: every required condition must have at
    /// least one observed condition within the similarity threshold. An
    /// empty `required` set is satisfied without any embedding calls.
    pub async fn conditions_match(&self, required: &[String], observed: &[String]) -> Result<bool> {
        for req in required {
            let req_vec = self.condition_vector(req).await?;

            let mut satisfied = false;
            for obs in observed {
                let obs_vec = self.condition_vector(obs).await?;
                if cosine_similarity(&req_vec, &obs_vec) >= self.threshold {
                    satisfied = true;
                    break;
                }
            }

            if !satisfied {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// First `limit` eligible patients among the age-filtered candidates.
    ///
    /// Candidates are tested in store iteration order and the scan stops as
    /// soon as `limit` eligible patients are found. The result is therefore
    /// the first N in collaborator order — it is NOT ranked by similarity
    /// or any other score.
    pub async fn find_eligible_patients(
        &self,
        store: &Store,
        age_min: i64,
        age_max: i64,
        required: &[String],
        limit: usize,
    ) -> Result<Vec<EligiblePatient>> {
        let candidates = store.patients_in_age_range(age_min, age_max).await?;
        let ids: Vec<String> = candidates.iter().map(|p| p.patient_id.clone()).collect();
        let mut conditions_by_patient = store.conditions_for_patients(&ids).await?;

        let mut eligible = Vec::new();
        for patient in candidates {
            if eligible.len() >= limit {
                break;
            }

            let observed = conditions_by_patient
                .remove(&patient.patient_id)
                .unwrap_or_default();

            if self.conditions_match(required, &observed).await? {
                eligible.push(EligiblePatient {
                    patient,
                    conditions: observed,
                });
            }
        }

        Ok(eligible)
    }

    #[cfg(test)]
    pub(crate) fn cached_conditions(&self) -> usize {
        self.cache.len()
    }
}

/// CLI entry point — find eligible patients and print them.
pub async fn run_match(
    config: &crate::config::Config,
    age_min: i64,
    age_max: i64,
    conditions: Vec<String>,
    limit: usize,
) -> Result<()> {
    let store = Store::connect(config).await?;
    let embedder = crate::embedding::create_embedder(&config.embedding)?;
    let matcher = EligibilityMatcher::from_config(embedder, &config.matching);

    let eligible = matcher
        .find_eligible_patients(&store, age_min, age_max, &conditions, limit)
        .await?;

    println!(
        "eligible patients: {} (ages {}-{}, limit {})",
        eligible.len(),
        age_min,
        age_max,
        limit
    );
    for ep in &eligible {
        println!(
            "  {}  age={} gender={} race={} ethnicity={}",
            ep.patient.patient_id,
            ep.patient.age,
            ep.patient.gender,
            ep.patient.race,
            ep.patient.ethnicity
        );
        if !ep.conditions.is_empty() {
            println!("    conditions: {}", ep.conditions.join("; "));
        }
    }

    store.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic embedder for tests: fixed vectors per known string,
    /// errors on anything else. Counts embed calls.
    struct StubEmbedder {
        vectors: HashMap<String, Vec<f32>>,
        calls: AtomicUsize,
    }

    impl StubEmbedder {
        fn new(entries: &[(&str, Vec<f32>)]) -> Self {
            Self {
                vectors: entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        fn model_name(&self) -> &str {
            "stub"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(texts.len(), Ordering::SeqCst);
            texts
                .iter()
                .map(|t| {
                    self.vectors
                        .get(t)
                        .cloned()
                        .ok_or_else(|| anyhow::anyhow!("no stub vector for '{}'", t))
                })
                .collect()
        }
    }

    /// Embedder that always fails; proves a code path makes no embed calls.
    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            0
        }
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            bail!("embedder must not be called")
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_empty_required_is_vacuously_true() {
        let matcher = EligibilityMatcher::new(Arc::new(FailingEmbedder), 0.75, 16);
        let observed = strings(&["diabetes", "hypertension"]);
        assert!(matcher.conditions_match(&[], &observed).await.unwrap());
        assert!(matcher.conditions_match(&[], &[]).await.unwrap());
    }

    #[tokio::test]
    async fn test_below_threshold_is_not_eligible() {
        // Orthogonal vectors: similarity 0 < 0.75 for every observed.
        let stub = StubEmbedder::new(&[
            ("asthma", vec![1.0, 0.0, 0.0]),
            ("fracture", vec![0.0, 1.0, 0.0]),
            ("migraine", vec![0.0, 0.0, 1.0]),
        ]);
        let matcher = EligibilityMatcher::new(Arc::new(stub), 0.75, 16);

        let eligible = matcher
            .conditions_match(&strings(&["asthma"]), &strings(&["fracture", "migraine"]))
            .await
            .unwrap();
        assert!(!eligible);
    }

    #[tokio::test]
    async fn test_existential_match_per_requirement() {
        // "asthma" close to "chronic asthma", far from everything else.
        let stub = StubEmbedder::new(&[
            ("asthma", vec![1.0, 0.0, 0.0]),
            ("chronic asthma", vec![0.95, 0.1, 0.0]),
            ("fracture", vec![0.0, 1.0, 0.0]),
        ]);
        let matcher = EligibilityMatcher::new(Arc::new(stub), 0.75, 16);

        let eligible = matcher
            .conditions_match(
                &strings(&["asthma"]),
                &strings(&["fracture", "chronic asthma"]),
            )
            .await
            .unwrap();
        assert!(eligible);
    }

    #[tokio::test]
    async fn test_conjunctive_across_requirements() {
        let stub = StubEmbedder::new(&[
            ("asthma", vec![1.0, 0.0, 0.0]),
            ("diabetes", vec![0.0, 1.0, 0.0]),
            ("chronic asthma", vec![0.95, 0.1, 0.0]),
        ]);
        let matcher = EligibilityMatcher::new(Arc::new(stub), 0.75, 16);

        // One requirement satisfied, the other not: overall no match.
        let eligible = matcher
            .conditions_match(
                &strings(&["asthma", "diabetes"]),
                &strings(&["chronic asthma"]),
            )
            .await
            .unwrap();
        assert!(!eligible);

        // Both satisfied: match.
        let eligible = matcher
            .conditions_match(
                &strings(&["asthma", "diabetes"]),
                &strings(&["chronic asthma", "diabetes"]),
            )
            .await
            .unwrap();
        assert!(eligible);
    }

    #[tokio::test]
    async fn test_cache_avoids_repeat_embedding() {
        let stub = Arc::new(StubEmbedder::new(&[
            ("asthma", vec![1.0, 0.0, 0.0]),
            ("chronic asthma", vec![0.95, 0.1, 0.0]),
        ]));
        let matcher = EligibilityMatcher::new(stub.clone(), 0.75, 16);

        let required = strings(&["asthma"]);
        let observed = strings(&["chronic asthma"]);

        assert!(matcher.conditions_match(&required, &observed).await.unwrap());
        let first_pass = stub.call_count();
        assert_eq!(first_pass, 2);

        // Same comparison again: everything served from the cache.
        assert!(matcher.conditions_match(&required, &observed).await.unwrap());
        assert_eq!(stub.call_count(), first_pass);
        assert_eq!(matcher.cached_conditions(), 2);
    }

    #[tokio::test]
    async fn test_cache_key_is_case_insensitive_and_trimmed() {
        let stub = Arc::new(StubEmbedder::new(&[("asthma", vec![1.0, 0.0, 0.0])]));
        let matcher = EligibilityMatcher::new(stub.clone(), 0.75, 16);

        assert!(matcher
            .conditions_match(&strings(&["  Asthma "]), &strings(&["ASTHMA"]))
            .await
            .unwrap());
        // Both spellings normalize to one cache entry and one embed call.
        assert_eq!(stub.call_count(), 1);
        assert_eq!(matcher.cached_conditions(), 1);
    }
}
