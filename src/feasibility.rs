//! Recruitment feasibility inference over a retrieved trial sample.
//!
//! Aggregates the noisy numeric metadata of a trial sample into inferred
//! eligibility criteria (medians are used instead of means so a single
//! outlier trial cannot skew the band), matches patients against those
//! criteria through the [`EligibilityMatcher`], and maps the resulting
//! availability ratio onto feasibility and recruitment-risk labels.

use anyhow::Result;
use serde_json::Value;
use std::collections::HashSet;

use crate::config::FeasibilityConfig;
use crate::matcher::EligibilityMatcher;
use crate::models::{
    DemographicsSummary, Feasibility, FeasibilityLevel, FeasibilityReport, InferredCriteria,
    RecruitmentRisk, TrialHit,
};
use crate::store::Store;

pub struct FeasibilityAnalyzer {
    default_enrollment: i64,
    max_patients: usize,
}

impl FeasibilityAnalyzer {
    pub fn new(config: &FeasibilityConfig) -> Self {
        Self {
            default_enrollment: config.default_enrollment,
            max_patients: config.max_patients,
        }
    }

    /// Infer aggregate criteria from the sample: per-field medians of the
    /// parsable numeric metadata, plus the de-duplicated union of studied
    /// conditions in first-seen order.
    pub fn infer_criteria(&self, hits: &[TrialHit]) -> InferredCriteria {
        InferredCriteria {
            minimum_age: median(&collect_ints(hits, "minimum_age")),
            maximum_age: median(&collect_ints(hits, "maximum_age")),
            enrollment: median(&collect_ints(hits, "enrollment")),
            conditions: collect_conditions(hits),
        }
    }

    /// Run the full analysis: infer criteria, match patients, score
    /// feasibility.
    ///
    /// When either age median is missing, patient retrieval is skipped
    /// entirely and the report carries no feasibility verdict.
    pub async fn analyze(
        &self,
        hits: &[TrialHit],
        max_patients: Option<usize>,
        matcher: &EligibilityMatcher,
        store: &Store,
    ) -> Result<FeasibilityReport> {
        let criteria = self.infer_criteria(hits);

        let cap = max_patients.unwrap_or(self.max_patients);
        let patient_limit = criteria
            .enrollment
            .unwrap_or(self.default_enrollment)
            .max(0) as usize;
        let patient_limit = patient_limit.min(cap);

        let (age_min, age_max) = match (criteria.minimum_age, criteria.maximum_age) {
            (Some(lo), Some(hi)) => (lo, hi),
            _ => {
                return Ok(FeasibilityReport {
                    criteria,
                    matched_patients: Vec::new(),
                    demographics: DemographicsSummary::default(),
                    feasibility: None,
                });
            }
        };

        let matched = matcher
            .find_eligible_patients(store, age_min, age_max, &criteria.conditions, patient_limit)
            .await?;
        let demographics = DemographicsSummary::summarize(&matched);

        let target_enrollment = criteria.enrollment.unwrap_or(patient_limit as i64);
        let availability_ratio = if target_enrollment <= 0 {
            0.0
        } else {
            matched.len() as f64 / target_enrollment as f64
        };

        let feasibility = Feasibility {
            availability_ratio,
            level: feasibility_level(availability_ratio),
            risk: recruitment_risk(availability_ratio),
            target_enrollment,
            patient_limit,
        };

        Ok(FeasibilityReport {
            criteria,
            matched_patients: matched,
            demographics,
            feasibility: Some(feasibility),
        })
    }
}

/// Feasibility-level cut list. Evaluated independently of the risk list
/// against the same ratio.
pub fn feasibility_level(ratio: f64) -> FeasibilityLevel {
    if ratio >= 1.5 {
        FeasibilityLevel::High
    } else if ratio >= 1.0 {
        FeasibilityLevel::Medium
    } else {
        FeasibilityLevel::Low
    }
}

/// Recruitment-risk cut list. Evaluated independently of the level list
/// against the same ratio.
pub fn recruitment_risk(ratio: f64) -> RecruitmentRisk {
    if ratio >= 2.0 {
        RecruitmentRisk::Minimal
    } else if ratio >= 1.2 {
        RecruitmentRisk::Moderate
    } else {
        RecruitmentRisk::High
    }
}

/// Parse an optional numeric metadata field defensively. Missing, empty,
/// or malformed values are skipped, never an error. JSON numbers and
/// numeric strings are both accepted; floats truncate toward zero.
pub fn parse_metadata_int(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    }
}

fn collect_ints(hits: &[TrialHit], field: &str) -> Vec<i64> {
    hits.iter()
        .filter_map(|hit| parse_metadata_int(hit.metadata.get(field)))
        .collect()
}

/// Median of the parsed samples. Even counts take the integer mean of the
/// middle pair. `None` when no sample parsed.
fn median(values: &[i64]) -> Option<i64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_unstable();

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2)
    }
}

/// Union of studied conditions across the sample, first-seen order,
/// de-duplicated case-insensitively. Accepts both comma-joined strings
/// and JSON string arrays.
fn collect_conditions(hits: &[TrialHit]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for hit in hits {
        let parts: Vec<String> = match hit.metadata.get("conditions") {
            Some(Value::String(s)) => s.split(',').map(|c| c.trim().to_string()).collect(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|c| c.trim().to_string())
                .collect(),
            _ => continue,
        };

        for condition in parts {
            if condition.is_empty() {
                continue;
            }
            if seen.insert(condition.to_lowercase()) {
                out.push(condition);
            }
        }
    }

    out
}

/// CLI entry point — retrieve a trial sample, run the analysis, and print
/// the inferred criteria and feasibility verdict.
pub async fn run_analyze(
    config: &crate::config::Config,
    query: &str,
    top_k: usize,
    max_patients: Option<usize>,
) -> Result<()> {
    let store = Store::connect(config).await?;
    let embedder = crate::embedding::create_embedder(&config.embedding)?;
    let matcher = crate::matcher::EligibilityMatcher::from_config(embedder.clone(), &config.matching);
    let analyzer = FeasibilityAnalyzer::new(&config.feasibility);

    let hits = crate::retrieval::search_trials(
        &store,
        embedder.as_ref(),
        query,
        top_k,
        config.retrieval.candidate_k as usize,
        None,
    )
    .await?;
    let report = analyzer.analyze(&hits, max_patients, &matcher, &store).await?;

    println!("analyze \"{}\"", query);
    println!("  similar trials: {}", hits.len());
    for hit in &hits {
        println!("    [{:.3}] {}", hit.score, hit.nct_id);
    }
    println!(
        "  inferred age band: {} - {}",
        report
            .criteria
            .minimum_age
            .map(|v| v.to_string())
            .unwrap_or_else(|| "?".to_string()),
        report
            .criteria
            .maximum_age
            .map(|v| v.to_string())
            .unwrap_or_else(|| "?".to_string())
    );
    println!(
        "  inferred enrollment: {}",
        report
            .criteria
            .enrollment
            .map(|v| v.to_string())
            .unwrap_or_else(|| "?".to_string())
    );
    if !report.criteria.conditions.is_empty() {
        println!("  conditions: {}", report.criteria.conditions.join(", "));
    }
    println!("  matched patients: {}", report.matched_patients.len());

    match &report.feasibility {
        Some(f) => {
            println!(
                "  feasibility: {:?} (risk {:?}, ratio {:.2}, target {})",
                f.level, f.risk, f.availability_ratio, f.target_enrollment
            );
        }
        None => {
            println!("  feasibility: undetermined (no age band inferred from sample)");
        }
    }

    store.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hit(metadata: Value) -> TrialHit {
        TrialHit {
            nct_id: "NCT0000000".to_string(),
            score: 0.9,
            snippet: String::new(),
            metadata,
        }
    }

    fn analyzer() -> FeasibilityAnalyzer {
        FeasibilityAnalyzer::new(&FeasibilityConfig::default())
    }

    #[test]
    fn test_enrollment_median_odd_sample() {
        let hits = vec![
            hit(json!({"enrollment": 80})),
            hit(json!({"enrollment": 100})),
            hit(json!({"enrollment": 120})),
        ];
        let criteria = analyzer().infer_criteria(&hits);
        assert_eq!(criteria.enrollment, Some(100));
    }

    #[test]
    fn test_median_even_sample_takes_middle_mean() {
        let hits = vec![
            hit(json!({"minimum_age": 40})),
            hit(json!({"minimum_age": 50})),
            hit(json!({"minimum_age": 18})),
            hit(json!({"minimum_age": 60})),
        ];
        let criteria = analyzer().infer_criteria(&hits);
        assert_eq!(criteria.minimum_age, Some(45));
    }

    #[test]
    fn test_malformed_numeric_fields_skipped() {
        let hits = vec![
            hit(json!({"enrollment": "abc", "minimum_age": ""})),
            hit(json!({"enrollment": null})),
            hit(json!({"maximum_age": [65]})),
            hit(json!({"enrollment": "150", "minimum_age": 40.9})),
        ];
        let criteria = analyzer().infer_criteria(&hits);
        assert_eq!(criteria.enrollment, Some(150));
        assert_eq!(criteria.minimum_age, Some(40));
        assert_eq!(criteria.maximum_age, None);
    }

    #[test]
    fn test_all_fields_missing_yields_undefined_medians() {
        let hits = vec![hit(json!({})), hit(json!({"phase": "Phase 2"}))];
        let criteria = analyzer().infer_criteria(&hits);
        assert_eq!(criteria.minimum_age, None);
        assert_eq!(criteria.maximum_age, None);
        assert_eq!(criteria.enrollment, None);
    }

    #[test]
    fn test_conditions_deduplicated_first_seen_order() {
        let hits = vec![
            hit(json!({"conditions": "Melanoma, Lung Cancer"})),
            hit(json!({"conditions": "melanoma, Breast Cancer"})),
            hit(json!({"conditions": ["Lung Cancer", "Glioma"]})),
        ];
        let criteria = analyzer().infer_criteria(&hits);
        assert_eq!(
            criteria.conditions,
            vec!["Melanoma", "Lung Cancer", "Breast Cancer", "Glioma"]
        );
    }

    #[test]
    fn test_level_cut_list() {
        assert_eq!(feasibility_level(2.5), FeasibilityLevel::High);
        assert_eq!(feasibility_level(2.0), FeasibilityLevel::High);
        assert_eq!(feasibility_level(1.6), FeasibilityLevel::High);
        assert_eq!(feasibility_level(1.5), FeasibilityLevel::High);
        assert_eq!(feasibility_level(1.2), FeasibilityLevel::Medium);
        assert_eq!(feasibility_level(1.0), FeasibilityLevel::Medium);
        assert_eq!(feasibility_level(0.99), FeasibilityLevel::Low);
    }

    #[test]
    fn test_risk_cut_list() {
        assert_eq!(recruitment_risk(2.5), RecruitmentRisk::Minimal);
        assert_eq!(recruitment_risk(2.0), RecruitmentRisk::Minimal);
        assert_eq!(recruitment_risk(1.6), RecruitmentRisk::Moderate);
        assert_eq!(recruitment_risk(1.5), RecruitmentRisk::Moderate);
        assert_eq!(recruitment_risk(1.2), RecruitmentRisk::Moderate);
        assert_eq!(recruitment_risk(1.0), RecruitmentRisk::High);
        assert_eq!(recruitment_risk(0.5), RecruitmentRisk::High);
    }

    #[test]
    fn test_level_and_risk_disagree_between_cuts() {
        // The two lists are independent: 1.6 is HIGH but only Moderate.
        assert_eq!(feasibility_level(1.6), FeasibilityLevel::High);
        assert_eq!(recruitment_risk(1.6), RecruitmentRisk::Moderate);
        // 1.0 is MEDIUM but already High risk.
        assert_eq!(feasibility_level(1.0), FeasibilityLevel::Medium);
        assert_eq!(recruitment_risk(1.0), RecruitmentRisk::High);
    }

    #[test]
    fn test_parse_metadata_int_variants() {
        assert_eq!(parse_metadata_int(Some(&json!(65))), Some(65));
        assert_eq!(parse_metadata_int(Some(&json!(65.7))), Some(65));
        assert_eq!(parse_metadata_int(Some(&json!("65"))), Some(65));
        assert_eq!(parse_metadata_int(Some(&json!("65.7"))), Some(65));
        assert_eq!(parse_metadata_int(Some(&json!("  "))), None);
        assert_eq!(parse_metadata_int(Some(&json!("n/a"))), None);
        assert_eq!(parse_metadata_int(Some(&json!(null))), None);
        assert_eq!(parse_metadata_int(None), None);
    }

    // ============ Store-backed analysis tests ============

    use crate::config::{Config, DbConfig, ServerConfig};
    use crate::models::Patient;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct StubEmbedder {
        vectors: std::collections::HashMap<String, Vec<f32>>,
    }

    #[async_trait]
    impl crate::embedding::Embedder for StubEmbedder {
        fn model_name(&self) -> &str {
            "stub"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
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

    async fn test_store(dir: &std::path::Path) -> Store {
        let config = Config {
            db: DbConfig {
                path: dir.join("feasibility.sqlite"),
            },
            chunking: Default::default(),
            matching: Default::default(),
            feasibility: Default::default(),
            retrieval: Default::default(),
            embedding: Default::default(),
            server: ServerConfig {
                bind: "127.0.0.1:0".to_string(),
            },
        };
        let store = Store::connect(&config).await.unwrap();
        crate::migrate::run_migrations(&store).await.unwrap();
        store
    }

    async fn insert_patient(store: &Store, id: &str, age: i64, conditions: &[&str]) {
        store
            .upsert_patient(&Patient {
                patient_id: id.to_string(),
                age,
                gender: "female".to_string(),
                race: "white".to_string(),
                ethnicity: "nonhispanic".to_string(),
            })
            .await
            .unwrap();
        for condition in conditions.iter() {
            store.insert_condition(id, condition).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_analyze_without_age_band_skips_matching() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = test_store(tmp.path()).await;

        // Embedder with no vectors: any matching attempt would error.
        let matcher = EligibilityMatcher::new(
            Arc::new(StubEmbedder {
                vectors: Default::default(),
            }),
            0.75,
            16,
        );

        let hits = vec![hit(json!({"enrollment": 50, "conditions": "Melanoma"}))];
        let report = analyzer()
            .analyze(&hits, None, &matcher, &store)
            .await
            .unwrap();

        assert!(report.feasibility.is_none());
        assert!(report.matched_patients.is_empty());
        assert_eq!(report.demographics.total, 0);
        assert_eq!(report.criteria.enrollment, Some(50));
        assert_eq!(report.criteria.conditions, vec!["Melanoma"]);
    }

    #[tokio::test]
    async fn test_analyze_full_pipeline_scores_feasibility() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = test_store(tmp.path()).await;

        insert_patient(&store, "P001", 45, &["diabetes mellitus"]).await;
        insert_patient(&store, "P002", 60, &["diabetes mellitus", "hypertension"]).await;
        insert_patient(&store, "P003", 80, &["diabetes mellitus"]).await; // outside band

        let vectors: std::collections::HashMap<String, Vec<f32>> = [
            ("diabetes".to_string(), vec![1.0, 0.0, 0.0]),
            ("diabetes mellitus".to_string(), vec![0.95, 0.1, 0.0]),
            ("hypertension".to_string(), vec![0.0, 1.0, 0.0]),
        ]
        .into_iter()
        .collect();
        let matcher = EligibilityMatcher::new(Arc::new(StubEmbedder { vectors }), 0.75, 16);

        let hits = vec![
            hit(json!({"minimum_age": 40, "maximum_age": 70, "enrollment": 2, "conditions": "Diabetes"})),
            hit(json!({"minimum_age": 40, "maximum_age": 70})),
            hit(json!({"minimum_age": 40, "maximum_age": 70, "enrollment": 2})),
        ];

        let report = analyzer()
            .analyze(&hits, None, &matcher, &store)
            .await
            .unwrap();

        // Both in-band patients match "Diabetes" semantically; P003 is 80.
        assert_eq!(report.matched_patients.len(), 2);
        assert_eq!(report.demographics.total, 2);

        let feasibility = report.feasibility.expect("feasibility verdict");
        assert_eq!(feasibility.target_enrollment, 2);
        assert!((feasibility.availability_ratio - 1.0).abs() < 1e-9);
        assert_eq!(feasibility.level, FeasibilityLevel::Medium);
        assert_eq!(feasibility.risk, RecruitmentRisk::High);
    }
}
