use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{
        parse_datetime, parse_end_reason, parse_optional_datetime, parse_status, to_i64, to_u64,
    },
    models::{JournalEntry, JournalStatus},
};
use crate::sampler::SamplerCounters;
use crate::session::EndReason;

const SELECT_COLUMNS: &str = "SELECT id, session_id, activity_id, student_id, started_at, ended_at, status, end_reason, acknowledged,
        ticks, frames_sent, device_failures, detections, not_detected, inference_failures, created_at, updated_at
 FROM activity_sessions";

fn row_to_entry(row: &Row) -> Result<JournalEntry> {
    let started_at: String = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;
    let status: String = row.get("status")?;
    let end_reason: Option<String> = row.get("end_reason")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(JournalEntry {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        activity_id: row.get("activity_id")?,
        student_id: row.get("student_id")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        ended_at: parse_optional_datetime(ended_at, "ended_at")?,
        status: parse_status(&status)?,
        end_reason: parse_end_reason(end_reason)?,
        acknowledged: row.get::<_, i64>("acknowledged")? != 0,
        counters: SamplerCounters {
            ticks: to_u64(row.get("ticks")?, "ticks")?,
            frames_sent: to_u64(row.get("frames_sent")?, "frames_sent")?,
            device_failures: to_u64(row.get("device_failures")?, "device_failures")?,
            detections: to_u64(row.get("detections")?, "detections")?,
            not_detected: to_u64(row.get("not_detected")?, "not_detected")?,
            inference_failures: to_u64(row.get("inference_failures")?, "inference_failures")?,
        },
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

fn collect_entries(rows: &mut rusqlite::Rows<'_>) -> Result<Vec<JournalEntry>> {
    let mut entries = Vec::new();
    while let Some(row) = rows.next()? {
        entries.push(row_to_entry(row)?);
    }
    Ok(entries)
}

impl Database {
    pub async fn insert_journal_entry(&self, entry: &JournalEntry) -> Result<()> {
        let record = entry.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO activity_sessions (id, session_id, activity_id, student_id, started_at, ended_at, status, end_reason, acknowledged,
                     ticks, frames_sent, device_failures, detections, not_detected, inference_failures, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    record.id,
                    record.session_id,
                    record.activity_id,
                    record.student_id,
                    record.started_at.to_rfc3339(),
                    record.ended_at.as_ref().map(|dt| dt.to_rfc3339()),
                    record.status.as_str(),
                    record.end_reason.map(|reason| reason.as_str()),
                    record.acknowledged as i64,
                    to_i64(record.counters.ticks)?,
                    to_i64(record.counters.frames_sent)?,
                    to_i64(record.counters.device_failures)?,
                    to_i64(record.counters.detections)?,
                    to_i64(record.counters.not_detected)?,
                    to_i64(record.counters.inference_failures)?,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .context("failed to insert journal entry")?;
            Ok(())
        })
        .await
    }

    /// Closes an entry that is still `Active`. Returns whether a row changed,
    /// so a second close of the same attempt is a no-op.
    pub async fn mark_journal_ended(
        &self,
        entry_id: &str,
        status: JournalStatus,
        end_reason: Option<EndReason>,
        ended_at: DateTime<Utc>,
        acknowledged: bool,
        counters: SamplerCounters,
    ) -> Result<bool> {
        let entry_id = entry_id.to_string();
        self.execute(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE activity_sessions
                     SET status = ?1,
                         end_reason = ?2,
                         ended_at = ?3,
                         acknowledged = ?4,
                         ticks = ?5,
                         frames_sent = ?6,
                         device_failures = ?7,
                         detections = ?8,
                         not_detected = ?9,
                         inference_failures = ?10,
                         updated_at = ?11
                     WHERE id = ?12 AND status = 'Active'",
                    params![
                        status.as_str(),
                        end_reason.map(|reason| reason.as_str()),
                        ended_at.to_rfc3339(),
                        acknowledged as i64,
                        to_i64(counters.ticks)?,
                        to_i64(counters.frames_sent)?,
                        to_i64(counters.device_failures)?,
                        to_i64(counters.detections)?,
                        to_i64(counters.not_detected)?,
                        to_i64(counters.inference_failures)?,
                        Utc::now().to_rfc3339(),
                        entry_id,
                    ],
                )
                .context("failed to close journal entry")?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn mark_journal_interrupted(
        &self,
        entry_id: &str,
        ended_at: DateTime<Utc>,
        acknowledged: bool,
    ) -> Result<bool> {
        let entry_id = entry_id.to_string();
        self.execute(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE activity_sessions
                     SET status = 'Interrupted',
                         ended_at = ?1,
                         acknowledged = ?2,
                         updated_at = ?3
                     WHERE id = ?4 AND status = 'Active'",
                    params![
                        ended_at.to_rfc3339(),
                        acknowledged as i64,
                        Utc::now().to_rfc3339(),
                        entry_id,
                    ],
                )
                .context("failed to mark journal entry interrupted")?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn get_journal_entry(&self, entry_id: &str) -> Result<Option<JournalEntry>> {
        let entry_id = entry_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
            let entry = stmt
                .query_row(params![entry_id], |row| Ok(row_to_entry(row)))
                .optional()?
                .transpose()?;
            Ok(entry)
        })
        .await
    }

    pub async fn get_active_journal_entries(&self) -> Result<Vec<JournalEntry>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS} WHERE status = 'Active' ORDER BY started_at ASC"
            ))?;
            let mut rows = stmt.query([])?;
            collect_entries(&mut rows)
        })
        .await
    }

    pub async fn list_journal_entries(&self, limit: usize) -> Result<Vec<JournalEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS} ORDER BY started_at DESC LIMIT ?1"
            ))?;
            let mut rows = stmt.query(params![limit])?;
            collect_entries(&mut rows)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use tempfile::TempDir;

    use super::*;

    fn open_journal() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("journal.sqlite3")).unwrap();
        (dir, db)
    }

    fn entry(id: &str, session_id: i64, started_at: DateTime<Utc>) -> JournalEntry {
        JournalEntry {
            id: id.to_string(),
            session_id,
            activity_id: 7,
            student_id: 42,
            started_at,
            ended_at: None,
            status: JournalStatus::Active,
            end_reason: None,
            acknowledged: false,
            counters: SamplerCounters::default(),
            created_at: started_at,
            updated_at: started_at,
        }
    }

    #[tokio::test]
    async fn closes_entry_once_with_counters() {
        let (_dir, db) = open_journal();
        let started = Utc::now();
        db.insert_journal_entry(&entry("a", 11, started)).await.unwrap();

        let counters = SamplerCounters {
            ticks: 80,
            frames_sent: 79,
            device_failures: 1,
            detections: 60,
            not_detected: 15,
            inference_failures: 4,
        };
        let ended = started + Duration::seconds(120);
        let changed = db
            .mark_journal_ended("a", JournalStatus::Ended, Some(EndReason::Timeout), ended, true, counters)
            .await
            .unwrap();
        assert!(changed);

        let again = db
            .mark_journal_ended("a", JournalStatus::Ended, Some(EndReason::Manual), Utc::now(), false, SamplerCounters::default())
            .await
            .unwrap();
        assert!(!again);

        let stored = db.get_journal_entry("a").await.unwrap().unwrap();
        assert_eq!(stored.status, JournalStatus::Ended);
        assert_eq!(stored.end_reason, Some(EndReason::Timeout));
        assert!(stored.acknowledged);
        assert_eq!(stored.counters, counters);
        assert_eq!(stored.ended_at.map(|t| t.timestamp()), Some(ended.timestamp()));
    }

    #[tokio::test]
    async fn active_entries_and_interruption() {
        let (_dir, db) = open_journal();
        let now = Utc::now();
        db.insert_journal_entry(&entry("old", 1, now - Duration::minutes(10))).await.unwrap();
        db.insert_journal_entry(&entry("new", 2, now)).await.unwrap();
        db.mark_journal_ended("new", JournalStatus::Ended, Some(EndReason::Manual), now, true, SamplerCounters::default())
            .await
            .unwrap();

        let active = db.get_active_journal_entries().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id, 1);

        assert!(db.mark_journal_interrupted("old", now, false).await.unwrap());
        assert!(db.get_active_journal_entries().await.unwrap().is_empty());

        let listed = db.list_journal_entries(10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "new");
        assert_eq!(listed[1].status, JournalStatus::Interrupted);
        assert!(db.get_journal_entry("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reopening_keeps_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("journal.sqlite3");
        {
            let db = Database::new(path.clone()).unwrap();
            db.insert_journal_entry(&entry("kept", 5, Utc::now())).await.unwrap();
        }
        let db = Database::new(path).unwrap();
        assert_eq!(db.get_active_journal_entries().await.unwrap().len(), 1);
    }
}
