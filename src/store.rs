//! SQLite persistence collaborator.
//!
//! Serves read-only views of patients, conditions, and trials to the
//! matching and feasibility components per call, and upserts reference
//! data during loads. Components receive a [`Store`] reference at
//! construction or call time; there is no global handle.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;

use crate::config::Config;
use crate::models::{ChunkRecord, Patient, Trial};

// SQLite caps bound parameters; chunked IN queries stay well below it.
const IN_BATCH: usize = 500;

pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(config: &Config) -> Result<Self> {
        let db_path = &config.db.path;

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ============ Patients ============

    /// Patients whose age falls inside `[age_min, age_max]`, in stable
    /// store order (`patient_id` ascending). Callers that cap their result
    /// take the first N in this order.
    pub async fn patients_in_age_range(&self, age_min: i64, age_max: i64) -> Result<Vec<Patient>> {
        let rows = sqlx::query(
            "SELECT patient_id, age, gender, race, ethnicity FROM patients \
             WHERE age >= ? AND age <= ? ORDER BY patient_id",
        )
        .bind(age_min)
        .bind(age_max)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(patient_from_row).collect())
    }

    pub async fn get_patient(&self, patient_id: &str) -> Result<Option<Patient>> {
        let row = sqlx::query(
            "SELECT patient_id, age, gender, race, ethnicity FROM patients WHERE patient_id = ?",
        )
        .bind(patient_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(patient_from_row))
    }

    /// Returns `true` when the row was inserted, `false` when it already
    /// existed.
    pub async fn upsert_patient(&self, patient: &Patient) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO patients (patient_id, age, gender, race, ethnicity) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&patient.patient_id)
        .bind(patient.age)
        .bind(&patient.gender)
        .bind(&patient.race)
        .bind(&patient.ethnicity)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // ============ Conditions ============

    /// Observed condition strings for each of the given patients, in
    /// insertion order per patient.
    pub async fn conditions_for_patients(
        &self,
        patient_ids: &[String],
    ) -> Result<HashMap<String, Vec<String>>> {
        let mut out: HashMap<String, Vec<String>> = HashMap::new();

        for batch in patient_ids.chunks(IN_BATCH) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let sql = format!(
                "SELECT patient_id, condition FROM patient_conditions \
                 WHERE patient_id IN ({}) ORDER BY id",
                placeholders
            );

            let mut query = sqlx::query(&sql);
            for id in batch {
                query = query.bind(id);
            }

            for row in query.fetch_all(&self.pool).await? {
                let patient_id: String = row.get("patient_id");
                let condition: String = row.get("condition");
                out.entry(patient_id).or_default().push(condition);
            }
        }

        Ok(out)
    }

    /// Returns `true` when the row was inserted, `false` on duplicate.
    pub async fn insert_condition(&self, patient_id: &str, condition: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO patient_conditions (patient_id, condition) VALUES (?, ?)",
        )
        .bind(patient_id)
        .bind(condition)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // ============ Trials ============

    pub async fn get_trial(&self, nct_id: &str) -> Result<Option<Trial>> {
        let row = sqlx::query("SELECT nct_id, text, conditions FROM trials WHERE nct_id = ?")
            .bind(nct_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(trial_from_row))
    }

    pub async fn trials_by_ids(&self, nct_ids: &[String]) -> Result<Vec<Trial>> {
        let mut out = Vec::new();

        for batch in nct_ids.chunks(IN_BATCH) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let sql = format!(
                "SELECT nct_id, text, conditions FROM trials WHERE nct_id IN ({}) ORDER BY nct_id",
                placeholders
            );

            let mut query = sqlx::query(&sql);
            for id in batch {
                query = query.bind(id);
            }

            for row in query.fetch_all(&self.pool).await? {
                out.push(trial_from_row(&row));
            }
        }

        Ok(out)
    }

    pub async fn upsert_trial(&self, trial: &Trial) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trials (nct_id, text, conditions) VALUES (?, ?, ?)
            ON CONFLICT(nct_id) DO UPDATE SET
                text = excluded.text,
                conditions = excluded.conditions
            "#,
        )
        .bind(&trial.nct_id)
        .bind(&trial.text)
        .bind(&trial.conditions)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ============ Chunks ============

    /// Replace all chunks for a trial atomically, dropping any stale
    /// embeddings with them.
    pub async fn replace_chunks(&self, nct_id: &str, chunks: &[ChunkRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE nct_id = ?)",
        )
        .bind(nct_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE nct_id = ?)",
        )
        .bind(nct_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM chunks WHERE nct_id = ?")
            .bind(nct_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (id, nct_id, chunk_index, text, metadata_json, hash) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.nct_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.metadata_json)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn patient_from_row(row: &sqlx::sqlite::SqliteRow) -> Patient {
    Patient {
        patient_id: row.get("patient_id"),
        age: row.get("age"),
        gender: row.get("gender"),
        race: row.get("race"),
        ethnicity: row.get("ethnicity"),
    }
}

fn trial_from_row(row: &sqlx::sqlite::SqliteRow) -> Trial {
    Trial {
        nct_id: row.get("nct_id"),
        text: row.get("text"),
        conditions: row.get("conditions"),
    }
}
