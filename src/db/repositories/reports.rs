use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_optional_datetime},
    models::Report,
};
use crate::error::{TrackingError, TrackingResult};
use crate::reports::ReportDirectory;

fn row_to_report(row: &Row) -> Result<Report> {
    let opened_at: String = row.get("opened_at")?;
    let closed_at: Option<String> = row.get("closed_at")?;

    Ok(Report {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        opened_at: parse_datetime(&opened_at, "opened_at")?,
        closed_at: parse_optional_datetime(closed_at, "closed_at")?,
    })
}

impl Database {
    pub async fn open_report(&self, user_id: &str) -> Result<Report> {
        let report = Report {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            opened_at: Utc::now(),
            closed_at: None,
        };
        self.insert_report(&report).await?;
        Ok(report)
    }

    pub async fn insert_report(&self, report: &Report) -> Result<()> {
        let record = report.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO reports (id, user_id, opened_at, closed_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.id,
                    record.user_id,
                    record.opened_at.to_rfc3339(),
                    record.closed_at.as_ref().map(|dt| dt.to_rfc3339()),
                ],
            )
            .with_context(|| "failed to insert report")?;
            Ok(())
        })
        .await
    }

    /// Returns false when the report does not exist or is already closed.
    pub async fn close_report(&self, report_id: &str) -> Result<bool> {
        let report_id = report_id.to_string();
        self.execute(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE reports SET closed_at = ?1
                     WHERE id = ?2 AND closed_at IS NULL",
                    params![Utc::now().to_rfc3339(), report_id],
                )
                .with_context(|| "failed to close report")?;
            Ok(updated > 0)
        })
        .await
    }

    pub async fn get_report(&self, report_id: &str) -> Result<Option<Report>> {
        let report_id = report_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, opened_at, closed_at FROM reports WHERE id = ?1",
            )?;
            stmt.query_row(params![report_id], |row| Ok(row_to_report(row)))
                .optional()?
                .transpose()
        })
        .await
    }

    /// Most recently opened report the user has not closed.
    pub async fn active_report_for_user(&self, user_id: &str) -> Result<Option<Report>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, opened_at, closed_at FROM reports
                 WHERE user_id = ?1 AND closed_at IS NULL
                 ORDER BY opened_at DESC
                 LIMIT 1",
            )?;
            stmt.query_row(params![user_id], |row| Ok(row_to_report(row)))
                .optional()?
                .transpose()
        })
        .await
    }
}

#[async_trait]
impl ReportDirectory for Database {
    async fn get_active_report_id(&self, user_id: &str) -> TrackingResult<Option<String>> {
        self.active_report_for_user(user_id)
            .await
            .map(|report| report.map(|report| report.id))
            .map_err(|err| TrackingError::report_directory(format!("{err:#}")))
    }
}
