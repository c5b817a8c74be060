//! Core data models for the trial harness.
//!
//! These types represent the patients, trials, chunks, and analysis results
//! that flow through the matching and retrieval pipeline.

use serde::Serialize;
use std::collections::BTreeMap;

/// Patient demographics row.
#[derive(Debug, Clone, Serialize)]
pub struct Patient {
    pub patient_id: String,
    pub age: i64,
    pub gender: String,
    pub race: String,
    pub ethnicity: String,
}

/// A patient that passed eligibility matching, with the observed conditions
/// that were tested.
#[derive(Debug, Clone, Serialize)]
pub struct EligiblePatient {
    #[serde(flatten)]
    pub patient: Patient,
    pub conditions: Vec<String>,
}

/// Full trial row stored in SQLite.
#[derive(Debug, Clone, Serialize)]
pub struct Trial {
    pub nct_id: String,
    pub text: String,
    /// Comma-joined studied conditions.
    pub conditions: String,
}

/// A chunk of a trial document prepared for embedding and indexing.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub nct_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub metadata_json: String,
    pub hash: String,
}

/// A retrieved trial with its best-matching chunk's score and metadata.
///
/// The metadata is carried as raw JSON: the numeric fields the feasibility
/// analyzer reads (`minimum_age`, `maximum_age`, `enrollment`) may be
/// absent, empty, or malformed in the source corpus.
#[derive(Debug, Clone, Serialize)]
pub struct TrialHit {
    pub nct_id: String,
    pub score: f64,
    pub snippet: String,
    pub metadata: serde_json::Value,
}

/// Eligibility criteria inferred from a retrieved trial sample.
#[derive(Debug, Clone, Serialize)]
pub struct InferredCriteria {
    pub minimum_age: Option<i64>,
    pub maximum_age: Option<i64>,
    pub enrollment: Option<i64>,
    pub conditions: Vec<String>,
}

/// Derived label for how likely a trial is to fill its enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FeasibilityLevel {
    High,
    Medium,
    Low,
}

/// Derived label for the recruitment risk of a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecruitmentRisk {
    Minimal,
    Moderate,
    High,
}

/// Recruitment feasibility verdict for an inferred criteria set.
#[derive(Debug, Clone, Serialize)]
pub struct Feasibility {
    pub availability_ratio: f64,
    pub level: FeasibilityLevel,
    pub risk: RecruitmentRisk,
    pub target_enrollment: i64,
    pub patient_limit: usize,
}

/// Aggregate demographics over a matched patient set.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DemographicsSummary {
    pub total: usize,
    pub by_gender: BTreeMap<String, usize>,
    pub by_race: BTreeMap<String, usize>,
    pub by_ethnicity: BTreeMap<String, usize>,
    pub age_min: Option<i64>,
    pub age_max: Option<i64>,
    pub age_mean: Option<f64>,
}

impl DemographicsSummary {
    pub fn summarize(patients: &[EligiblePatient]) -> Self {
        let mut by_gender: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_race: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_ethnicity: BTreeMap<String, usize> = BTreeMap::new();

        for ep in patients {
            *by_gender.entry(ep.patient.gender.clone()).or_default() += 1;
            *by_race.entry(ep.patient.race.clone()).or_default() += 1;
            *by_ethnicity.entry(ep.patient.ethnicity.clone()).or_default() += 1;
        }

        let ages: Vec<i64> = patients.iter().map(|p| p.patient.age).collect();
        let age_mean = if ages.is_empty() {
            None
        } else {
            Some(ages.iter().sum::<i64>() as f64 / ages.len() as f64)
        };

        Self {
            total: patients.len(),
            by_gender,
            by_race,
            by_ethnicity,
            age_min: ages.iter().min().copied(),
            age_max: ages.iter().max().copied(),
            age_mean,
        }
    }
}

/// Full output of a feasibility analysis run.
#[derive(Debug, Clone, Serialize)]
pub struct FeasibilityReport {
    pub criteria: InferredCriteria,
    pub matched_patients: Vec<EligiblePatient>,
    pub demographics: DemographicsSummary,
    /// `None` when no age band could be inferred from the sample, in which
    /// case patient retrieval is skipped entirely.
    pub feasibility: Option<Feasibility>,
}
