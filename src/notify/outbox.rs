//! File-plus-table outbox.
//!
//! Artifacts are written under the outbox directory and a `delivery_outbox`
//! row is queued. An external mailer drains pending rows and marks them
//! dispatched; nothing here talks SMTP.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::params;
use serde::Serialize;
use tracing::{debug, info};

use super::{Delivery, Notifier};
use crate::error::{ReportError, Result};
use crate::storage::{format_instant, Pool};

/// A queued message, as listed for the mailer.
#[derive(Debug, Clone, Serialize)]
pub struct OutboxEntry {
    pub id: i64,
    pub schedule_id: Option<i64>,
    pub recipients: Vec<String>,
    pub subject: String,
    pub artifact_path: String,
    pub filename: String,
    pub content_type: String,
    pub created_at: String,
}

#[derive(Clone)]
pub struct OutboxNotifier {
    pool: Pool,
    dir: PathBuf,
}

impl OutboxNotifier {
    pub fn new(pool: Pool, dir: impl Into<PathBuf>) -> Self {
        Self { pool, dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Undispatched entries, oldest first.
    pub fn pending(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, schedule_id, recipients_json, subject, artifact_path, filename, content_type, created_at
             FROM delivery_outbox WHERE dispatched = 0 ORDER BY id LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut entries = Vec::new();
        for r in rows {
            let (id, schedule_id, recipients, subject, artifact_path, filename, content_type, created_at) = r?;
            entries.push(OutboxEntry {
                id,
                schedule_id,
                recipients: serde_json::from_str(&recipients)?,
                subject,
                artifact_path,
                filename,
                content_type,
                created_at,
            });
        }
        Ok(entries)
    }

    /// Mark entries as handed off. Returns how many were still pending.
    pub fn mark_dispatched(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare("UPDATE delivery_outbox SET dispatched = 1 WHERE id = ?1 AND dispatched = 0")?;
            for id in ids {
                changed += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        debug!(count = changed, "outbox entries dispatched");
        Ok(changed)
    }

    fn enqueue(&self, delivery: &Delivery) -> Result<String> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            ReportError::DeliveryFailure(format!("cannot create outbox {}: {e}", self.dir.display()))
        })?;

        let path = self
            .dir
            .join(format!("{}_{}", uuid::Uuid::new_v4().simple(), delivery.artifact.filename));
        std::fs::write(&path, &delivery.artifact.bytes)
            .map_err(|e| ReportError::DeliveryFailure(format!("cannot write {}: {e}", path.display())))?;
        let artifact_path = path.to_string_lossy().into_owned();

        let queued = self.pool.get().map_err(ReportError::from).and_then(|conn| {
            conn.execute(
                "INSERT INTO delivery_outbox (schedule_id, recipients_json, subject, artifact_path, filename,
                                              content_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    delivery.schedule_id,
                    serde_json::to_string(&delivery.recipients)?,
                    delivery.subject,
                    artifact_path,
                    delivery.artifact.filename,
                    delivery.artifact.content_type,
                    format_instant(Utc::now()),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        });

        match queued {
            Ok(id) => {
                info!(
                    schedule_id = delivery.schedule_id,
                    outbox_id = id,
                    recipients = delivery.recipients.len(),
                    path = %artifact_path,
                    "delivery queued"
                );
                Ok(artifact_path)
            }
            Err(e) => {
                // An orphan file with no queued row would never be mailed.
                let _ = std::fs::remove_file(&path);
                Err(ReportError::DeliveryFailure(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn deliver(&self, delivery: &Delivery) -> Result<String> {
        let this = self.clone();
        let delivery = delivery.clone();
        tokio::task::spawn_blocking(move || this.enqueue(&delivery))
            .await
            .map_err(|e| ReportError::DeliveryFailure(format!("outbox task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Artifact;
    use crate::storage::test_pool;

    fn delivery() -> Delivery {
        Delivery {
            schedule_id: 0,
            schedule_name: "Monthly birthdays".into(),
            recipients: vec!["pastor@example.org".into()],
            subject: "Monthly birthdays".into(),
            body: "Attached.".into(),
            artifact: Artifact {
                bytes: b"Name\nAnn\n".to_vec(),
                filename: "birthdays_20240301_090000.csv".into(),
                content_type: "text/csv; charset=utf-8",
                row_count: 1,
            },
        }
    }

    fn insert_schedule(pool: &Pool) -> i64 {
        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO report_schedules (name, report_type, configuration_json, frequency, time_of_day,
                                           recipients_json, next_run, created_by, created_at)
             VALUES ('b', 'birthdays', '{}', 'monthly', '09:00', '[]', '2024-03-01T09:00:00Z', 'a', '2024-03-01T00:00:00Z')",
            [],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    #[tokio::test]
    async fn test_deliver_writes_file_and_queues_row() {
        let (dir, pool) = test_pool();
        let outbox = OutboxNotifier::new(pool.clone(), dir.path().join("outbox"));
        let mut d = delivery();
        d.schedule_id = insert_schedule(&pool);

        let path = outbox.deliver(&d).await.unwrap();
        assert!(path.ends_with("birthdays_20240301_090000.csv"));
        assert_eq!(std::fs::read(&path).unwrap(), b"Name\nAnn\n");

        let pending = outbox.pending(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].recipients, vec!["pastor@example.org"]);
        assert_eq!(pending[0].artifact_path, path);
        assert_eq!(pending[0].schedule_id, Some(d.schedule_id));
    }

    #[tokio::test]
    async fn test_mark_dispatched_drains_pending() {
        let (dir, pool) = test_pool();
        let outbox = OutboxNotifier::new(pool.clone(), dir.path().join("outbox"));
        let mut d = delivery();
        d.schedule_id = insert_schedule(&pool);
        outbox.deliver(&d).await.unwrap();
        outbox.deliver(&d).await.unwrap();

        let ids: Vec<i64> = outbox.pending(10).unwrap().iter().map(|e| e.id).collect();
        assert_eq!(outbox.mark_dispatched(&ids[..1]).unwrap(), 1);
        assert_eq!(outbox.mark_dispatched(&ids).unwrap(), 1);
        assert!(outbox.pending(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_schedule_is_delivery_failure() {
        let (dir, pool) = test_pool();
        let outbox = OutboxNotifier::new(pool, dir.path().join("outbox"));
        let mut d = delivery();
        d.schedule_id = 404; // foreign key violation

        let err = outbox.deliver(&d).await.unwrap_err();
        assert!(matches!(err, ReportError::DeliveryFailure(_)));
        let leftover = std::fs::read_dir(dir.path().join("outbox")).unwrap().count();
        assert_eq!(leftover, 0);
    }
}
