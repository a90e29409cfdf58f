use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::db::{connection::Database, helpers::parse_json};
use crate::error::{TrackingError, TrackingResult};
use crate::upload::RemoteStore;

impl Database {
    /// Upsert: the row at `path` always holds the last value written.
    pub async fn set_node(&self, path: &str, value: &serde_json::Value) -> Result<()> {
        let path = path.to_string();
        let serialized = serde_json::to_string(value)?;
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO nodes (path, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(path) DO UPDATE SET
                     value = excluded.value,
                     updated_at = excluded.updated_at",
                params![path, serialized, Utc::now().to_rfc3339()],
            )
            .with_context(|| format!("failed to write node {path}"))?;
            Ok(())
        })
        .await
    }

    pub async fn get_node(&self, path: &str) -> Result<Option<serde_json::Value>> {
        let path = path.to_string();
        self.execute(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT value FROM nodes WHERE path = ?1",
                    params![path],
                    |row| row.get(0),
                )
                .optional()?;

            raw.map(|value| parse_json(&value, "node value")).transpose()
        })
        .await
    }

    /// All nodes directly or indirectly under `prefix`, ordered by path.
    pub async fn list_nodes(&self, prefix: &str) -> Result<Vec<(String, serde_json::Value)>> {
        let pattern = format!("{}/%", prefix.trim_end_matches('/'));
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT path, value FROM nodes
                 WHERE path LIKE ?1
                 ORDER BY path",
            )?;

            let mut rows = stmt.query(params![pattern])?;
            let mut nodes = Vec::new();
            while let Some(row) = rows.next()? {
                let path: String = row.get(0)?;
                let value: String = row.get(1)?;
                nodes.push((path, parse_json(&value, "node value")?));
            }
            Ok(nodes)
        })
        .await
    }
}

#[async_trait]
impl RemoteStore for Database {
    async fn set(&self, path: &str, value: serde_json::Value) -> TrackingResult<()> {
        self.set_node(path, &value)
            .await
            .map_err(|err| TrackingError::store(format!("{err:#}")))
    }

    async fn get(&self, path: &str) -> TrackingResult<Option<serde_json::Value>> {
        self.get_node(path)
            .await
            .map_err(|err| TrackingError::store(format!("{err:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_overwrites_previous_value() {
        let db = Database::in_memory().unwrap();

        db.set("reports/R1/locations/u1", json!({"latitude": 1.0}))
            .await
            .unwrap();
        db.set("reports/R1/locations/u1", json!({"latitude": 2.0}))
            .await
            .unwrap();

        assert_eq!(
            db.get("reports/R1/locations/u1").await.unwrap(),
            Some(json!({"latitude": 2.0}))
        );
        assert_eq!(db.list_nodes("reports/R1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_is_scoped_to_prefix() {
        let db = Database::in_memory().unwrap();
        db.set_node("reports/R1/locations/u1", &json!(1)).await.unwrap();
        db.set_node("reports/R1/locations/u2", &json!(2)).await.unwrap();
        db.set_node("reports/R10/locations/u1", &json!(3)).await.unwrap();

        let paths: Vec<String> = db
            .list_nodes("reports/R1/locations")
            .await
            .unwrap()
            .into_iter()
            .map(|(path, _)| path)
            .collect();

        assert_eq!(
            paths,
            vec!["reports/R1/locations/u1", "reports/R1/locations/u2"]
        );
    }

    #[tokio::test]
    async fn missing_node_is_none() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.get("reports/none/locations/u1").await.unwrap(), None);
    }
}
