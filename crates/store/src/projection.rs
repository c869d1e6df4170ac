//! Projection bookkeeping: ordering cursors and the read-model cache.
//!
//! Projections fold the event log into derived state. Each one tracks the
//! last `commit_sequence` it has folded in `projection_meta` and keeps its
//! derived rows in `projection_cache`, keyed by projection name.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use sqlx::Row;

use crate::engine::LogEngine;
use crate::error::{map_sqlx_error, StoreError};

#[derive(Debug, Clone)]
pub struct ProjectionStore {
    engine: Arc<LogEngine>,
}

impl ProjectionStore {
    pub fn new(engine: Arc<LogEngine>) -> Self {
        Self { engine }
    }

    /// Last folded commit sequence; 0 when the projection has never run.
    pub async fn cursor(&self, projection: &str) -> Result<i64, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT last_commit_sequence FROM projection_meta WHERE projection = ?",
        )
        .bind(projection)
        .fetch_optional(self.engine.pool())
        .await
        .map_err(|e| map_sqlx_error("projection cursor", e))?;
        Ok(row.map(|(seq,)| seq).unwrap_or(0))
    }

    /// Advance the cursor. Moving it backwards is a caller bug and rejected.
    pub async fn set_cursor(&self, projection: &str, commit_sequence: i64) -> Result<(), StoreError> {
        let current = self.cursor(projection).await?;
        if commit_sequence < current {
            return Err(StoreError::validation(format!(
                "projection '{projection}' cursor would move backwards ({current} -> {commit_sequence})"
            )));
        }

        self.engine
            .execute(
                "INSERT INTO projection_meta (projection, last_commit_sequence) VALUES (?, ?) \
                 ON CONFLICT (projection) DO UPDATE SET last_commit_sequence = excluded.last_commit_sequence",
                &[JsonValue::from(projection), JsonValue::from(commit_sequence)],
            )
            .await?;
        Ok(())
    }

    pub async fn cache_put(
        &self,
        projection: &str,
        key: &str,
        value: &JsonValue,
    ) -> Result<(), StoreError> {
        self.engine
            .execute(
                "INSERT INTO projection_cache (projection, key, value) VALUES (?, ?, ?) \
                 ON CONFLICT (projection, key) DO UPDATE SET value = excluded.value",
                &[
                    JsonValue::from(projection),
                    JsonValue::from(key),
                    JsonValue::from(value.to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn cache_get(
        &self,
        projection: &str,
        key: &str,
    ) -> Result<Option<JsonValue>, StoreError> {
        let row = sqlx::query("SELECT value FROM projection_cache WHERE projection = ? AND key = ?")
            .bind(projection)
            .bind(key)
            .fetch_optional(self.engine.pool())
            .await
            .map_err(|e| map_sqlx_error("projection cache", e))?;

        row.map(|row| {
            let raw: String = row.get("value");
            serde_json::from_str(&raw)
                .map_err(|e| StoreError::validation(format!("projection cache value: {e}")))
        })
        .transpose()
    }
}
