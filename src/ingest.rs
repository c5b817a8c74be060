//! Ingestion pipeline orchestration.
//!
//! Coordinates the indexing flow for a trial corpus: document → section
//! extraction → chunking → storage → inline embedding (non-fatal on
//! failure). Also loads patient demographics and condition reference data
//! from JSON exports.
//!
//! Corpus format: a JSON object keyed by trial registry id, each entry
//! carrying the raw document text plus a flat metadata map. The
//! `condition_<i>` expansions and secondary count fields are stripped from
//! chunk metadata; `chunk_index` is added per chunk.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use uuid::Uuid;

use crate::chunk::build_chunks;
use crate::config::Config;
use crate::embed_cmd;
use crate::models::{ChunkRecord, Patient, Trial};
use crate::sections::parse_sections;
use crate::store::Store;

/// One corpus entry: the raw document plus flat metadata.
#[derive(Debug, Deserialize)]
struct CorpusEntry {
    document: String,
    #[serde(default)]
    metadata: serde_json::Map<String, Value>,
}

pub async fn run_index(
    config: &Config,
    path: &Path,
    dry_run: bool,
    limit: Option<usize>,
) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read corpus file: {}", path.display()))?;
    let corpus: BTreeMap<String, CorpusEntry> =
        serde_json::from_str(&raw).with_context(|| "Failed to parse corpus JSON")?;

    let store = Store::connect(config).await?;

    let mut docs = 0u64;
    let mut chunks_written = 0u64;
    let mut skipped = 0u64;
    let mut embeddings_written = 0u64;
    let mut embeddings_pending = 0u64;

    for (nct_id, entry) in corpus.iter().take(limit.unwrap_or(usize::MAX)) {
        let sections = match parse_sections(&entry.document) {
            Ok(sections) => sections,
            Err(e) => {
                eprintln!("Warning: skipping {}: {}", nct_id, e);
                skipped += 1;
                continue;
            }
        };

        let texts = build_chunks(&sections, config.chunking.max_length);

        if dry_run {
            docs += 1;
            chunks_written += texts.len() as u64;
            continue;
        }

        let trial = Trial {
            nct_id: nct_id.clone(),
            text: entry.document.clone(),
            conditions: studied_conditions(&entry.metadata).join(", "),
        };
        store.upsert_trial(&trial).await?;

        let base_metadata = filtered_metadata(&entry.metadata);
        let records: Vec<ChunkRecord> = texts
            .iter()
            .enumerate()
            .map(|(idx, text)| {
                let mut metadata = base_metadata.clone();
                metadata.insert("chunk_index".to_string(), Value::from(idx as i64));
                ChunkRecord {
                    id: Uuid::new_v4().to_string(),
                    nct_id: nct_id.clone(),
                    chunk_index: idx as i64,
                    text: text.clone(),
                    metadata_json: Value::Object(metadata).to_string(),
                    hash: hash_text(text),
                }
            })
            .collect();

        store.replace_chunks(nct_id, &records).await?;

        // Inline embedding (non-fatal)
        let (emb_ok, emb_pending) = embed_cmd::embed_chunks_inline(config, &store, &records).await;
        embeddings_written += emb_ok;
        embeddings_pending += emb_pending;

        docs += 1;
        chunks_written += records.len() as u64;
    }

    if dry_run {
        println!("index {} (dry-run)", path.display());
        println!("  documents: {}", docs);
        println!("  estimated chunks: {}", chunks_written);
        if skipped > 0 {
            println!("  skipped: {}", skipped);
        }
        store.close().await;
        return Ok(());
    }

    println!("index {}", path.display());
    println!("  documents indexed: {}", docs);
    println!("  chunks written: {}", chunks_written);
    if skipped > 0 {
        println!("  skipped: {}", skipped);
    }
    if config.embedding.is_enabled() {
        println!("  embeddings written: {}", embeddings_written);
        println!("  embeddings pending: {}", embeddings_pending);
    }
    println!("ok");

    store.close().await;
    Ok(())
}

/// The `condition_<i>` expansions declared by `conditions_count`, in order.
fn studied_conditions(metadata: &serde_json::Map<String, Value>) -> Vec<String> {
    let count = metadata
        .get("conditions_count")
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
        .max(0);

    let mut out = Vec::new();
    for i in 1..=count {
        if let Some(condition) = metadata
            .get(&format!("condition_{}", i))
            .and_then(|v| v.as_str())
        {
            if !condition.is_empty() {
                out.push(condition.to_string());
            }
        }
    }
    out
}

/// Document metadata minus the per-condition expansions and the
/// interventions/outcomes count fields that would pollute chunk metadata.
fn filtered_metadata(metadata: &serde_json::Map<String, Value>) -> serde_json::Map<String, Value> {
    let count = metadata
        .get("conditions_count")
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
        .max(0);

    let excluded: HashSet<String> = (1..=count)
        .map(|i| format!("condition_{}", i))
        .chain([
            "interventions_count".to_string(),
            "outcomes_count".to_string(),
        ])
        .collect();

    metadata
        .iter()
        .filter(|(key, _)| !excluded.contains(key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ============ Reference data loading ============

#[derive(Debug, Deserialize)]
struct PatientRow {
    patient_id: String,
    age: i64,
    gender: String,
    #[serde(default)]
    race: String,
    #[serde(default)]
    ethnicity: String,
}

pub async fn run_load_patients(config: &Config, path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read patients file: {}", path.display()))?;
    let rows: Vec<PatientRow> =
        serde_json::from_str(&raw).with_context(|| "Failed to parse patients JSON")?;

    let store = Store::connect(config).await?;

    let mut added = 0u64;
    let mut skipped = 0u64;

    for row in &rows {
        let patient = Patient {
            patient_id: row.patient_id.clone(),
            age: row.age,
            gender: row.gender.clone(),
            race: row.race.clone(),
            ethnicity: row.ethnicity.clone(),
        };
        if store.upsert_patient(&patient).await? {
            added += 1;
        } else {
            skipped += 1;
        }
    }

    println!("load patients {}", path.display());
    println!("  added: {}", added);
    println!("  skipped duplicates: {}", skipped);
    println!("ok");

    store.close().await;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ConditionRow {
    patient_id: String,
    condition: String,
}

pub async fn run_load_conditions(config: &Config, path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read conditions file: {}", path.display()))?;
    let rows: Vec<ConditionRow> =
        serde_json::from_str(&raw).with_context(|| "Failed to parse conditions JSON")?;

    let store = Store::connect(config).await?;

    let mut added = 0u64;
    let mut skipped = 0u64;
    let mut patients_not_found = 0u64;

    for row in &rows {
        if store.get_patient(&row.patient_id).await?.is_none() {
            eprintln!(
                "Warning: patient {} not found, skipping condition",
                row.patient_id
            );
            patients_not_found += 1;
            continue;
        }

        if store.insert_condition(&row.patient_id, &row.condition).await? {
            added += 1;
        } else {
            skipped += 1;
        }
    }

    println!("load conditions {}", path.display());
    println!("  added: {}", added);
    println!("  skipped duplicates: {}", skipped);
    if patients_not_found > 0 {
        println!("  patients not found: {}", patients_not_found);
    }
    println!("ok");

    store.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata_map(value: Value) -> serde_json::Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_studied_conditions_expansion() {
        let metadata = metadata_map(json!({
            "conditions_count": 2,
            "condition_1": "Melanoma",
            "condition_2": "Lung Cancer",
            "condition_3": "ignored beyond count"
        }));
        assert_eq!(studied_conditions(&metadata), vec!["Melanoma", "Lung Cancer"]);
    }

    #[test]
    fn test_studied_conditions_missing_count() {
        let metadata = metadata_map(json!({"condition_1": "Melanoma"}));
        assert!(studied_conditions(&metadata).is_empty());
    }

    #[test]
    fn test_filtered_metadata_strips_expansions_and_counts() {
        let metadata = metadata_map(json!({
            "conditions_count": 2,
            "condition_1": "Melanoma",
            "condition_2": "Lung Cancer",
            "interventions_count": 3,
            "outcomes_count": 4,
            "phase": "Phase 2",
            "enrollment": 120
        }));

        let filtered = filtered_metadata(&metadata);
        assert!(!filtered.contains_key("condition_1"));
        assert!(!filtered.contains_key("condition_2"));
        assert!(!filtered.contains_key("interventions_count"));
        assert!(!filtered.contains_key("outcomes_count"));
        // conditions_count itself survives, as do the real fields.
        assert_eq!(filtered.get("conditions_count"), Some(&json!(2)));
        assert_eq!(filtered.get("phase"), Some(&json!("Phase 2")));
        assert_eq!(filtered.get("enrollment"), Some(&json!(120)));
    }
}
