//! SQLite-backed [`Store`] implementation.
//!
//! Vectors are stored as little-endian `f32` BLOBs in `chunk_records`;
//! similarity is computed in Rust over every row. Test cases are stored as
//! JSON keyed by id, scripts as plain rows.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::{rank, Store};
use crate::config::Config;
use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{Error, Result};
use crate::migrate;
use crate::models::{
    Chunk, EmbeddingRecord, ScoredChunk, ScriptArtifact, StoreCounts, TestCase,
};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Ok(Self::new(pool))
    }
}

fn json_error(e: serde_json::Error) -> Error {
    Error::Storage(sqlx::Error::Decode(Box::new(e)))
}

async fn insert_records(conn: &mut SqliteConnection, records: &[EmbeddingRecord]) -> Result<()> {
    for record in records {
        sqlx::query(
            r#"
            INSERT INTO chunk_records (source_id, chunk_index, text, word_count, overlap, dims, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.chunk.source_id)
        .bind(record.chunk.chunk_index as i64)
        .bind(&record.chunk.text)
        .bind(record.chunk.word_count as i64)
        .bind(record.chunk.overlap_with_predecessor as i64)
        .bind(record.vector.len() as i64)
        .bind(vec_to_blob(&record.vector))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn delete_all(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("DELETE FROM scripts").execute(&mut *conn).await?;
    sqlx::query("DELETE FROM test_cases")
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM chunk_records")
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn count(pool: &SqlitePool, table: &str) -> Result<usize> {
    let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await?;
    Ok(n as usize)
}

#[async_trait]
impl Store for SqliteStore {
    async fn append(&self, records: Vec<EmbeddingRecord>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_records(&mut *tx, &records).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn replace(&self, records: Vec<EmbeddingRecord>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        delete_all(&mut *tx).await?;
        insert_records(&mut *tx, &records).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_count(&self) -> Result<usize> {
        count(&self.pool, "chunk_records").await
    }

    async fn dims(&self) -> Result<Option<usize>> {
        let dims: Option<i64> =
            sqlx::query_scalar("SELECT dims FROM chunk_records ORDER BY id LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(dims.map(|d| d as usize))
    }

    async fn vector_search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let rows = sqlx::query(
            "SELECT source_id, chunk_index, text, word_count, overlap, embedding FROM chunk_records",
        )
        .fetch_all(&self.pool)
        .await?;

        let candidates = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let chunk_index: i64 = row.get("chunk_index");
                let word_count: i64 = row.get("word_count");
                let overlap: i64 = row.get("overlap");
                ScoredChunk {
                    chunk: Chunk {
                        text: row.get("text"),
                        source_id: row.get("source_id"),
                        chunk_index: chunk_index as usize,
                        word_count: word_count as usize,
                        overlap_with_predecessor: overlap as usize,
                    },
                    score: cosine_similarity(query, &blob_to_vec(&blob)),
                }
            })
            .collect();

        Ok(rank(candidates, k))
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        delete_all(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn put_test_cases(&self, cases: &[TestCase]) -> Result<()> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for case in cases {
            let body = serde_json::to_string(case).map_err(json_error)?;
            sqlx::query(
                r#"
                INSERT INTO test_cases (id, body_json, updated_at) VALUES (?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    body_json = excluded.body_json,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&case.id)
            .bind(body)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_test_case(&self, id: &str) -> Result<Option<TestCase>> {
        let body: Option<String> =
            sqlx::query_scalar("SELECT body_json FROM test_cases WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        body.map(|b| serde_json::from_str(&b).map_err(json_error))
            .transpose()
    }

    async fn list_test_cases(&self) -> Result<Vec<TestCase>> {
        let bodies: Vec<String> =
            sqlx::query_scalar("SELECT body_json FROM test_cases ORDER BY rowid")
                .fetch_all(&self.pool)
                .await?;
        bodies
            .iter()
            .map(|b| serde_json::from_str(b).map_err(json_error))
            .collect()
    }

    async fn put_script(&self, script: &ScriptArtifact) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scripts (id, test_case_id, framework, text, generated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&script.id)
        .bind(&script.based_on)
        .bind(&script.framework)
        .bind(&script.text)
        .bind(script.generated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn counts(&self) -> Result<StoreCounts> {
        Ok(StoreCounts {
            records: count(&self.pool, "chunk_records").await?,
            test_cases: count(&self.pool, "test_cases").await?,
            scripts: count(&self.pool, "scripts").await?,
        })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
