use anyhow::Result;

use crate::store::Store;

pub async fn run_migrations(store: &Store) -> Result<()> {
    // Patient demographics
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS patients (
            patient_id TEXT PRIMARY KEY,
            age INTEGER NOT NULL,
            gender TEXT NOT NULL,
            race TEXT NOT NULL DEFAULT '',
            ethnicity TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(store.pool())
    .await?;

    // Observed patient conditions, one row per condition string
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS patient_conditions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            patient_id TEXT NOT NULL,
            condition TEXT NOT NULL,
            UNIQUE(patient_id, condition),
            FOREIGN KEY (patient_id) REFERENCES patients(patient_id)
        )
        "#,
    )
    .execute(store.pool())
    .await?;

    // Trial documents
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trials (
            nct_id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            conditions TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(store.pool())
    .await?;

    // Document chunks prepared for embedding
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            nct_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            hash TEXT NOT NULL,
            UNIQUE(nct_id, chunk_index),
            FOREIGN KEY (nct_id) REFERENCES trials(nct_id)
        )
        "#,
    )
    .execute(store.pool())
    .await?;

    // Embedding bookkeeping (model + text hash for staleness detection)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            chunk_id TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            hash TEXT NOT NULL
        )
        "#,
    )
    .execute(store.pool())
    .await?;

    // Raw embedding vectors
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            nct_id TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(store.pool())
    .await?;

    // Indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_patients_age ON patients(age)")
        .execute(store.pool())
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conditions_patient ON patient_conditions(patient_id)",
    )
    .execute(store.pool())
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_nct ON chunks(nct_id)")
        .execute(store.pool())
        .await?;

    Ok(())
}
