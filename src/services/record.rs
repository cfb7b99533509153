use std::collections::{HashMap, HashSet};

use sqlx::{FromRow, QueryBuilder, Sqlite};
use uuid::Uuid;

use crate::db::{now_timestamp, Database};
use crate::error::{AppError, Result};
use crate::models::{
    FileRecord, FileStatus, FileTypeBreakdown, NewFileRecord, NewOutputFile, OutputFile,
    OwnerBreakdown, RecordFilter, StatusBreakdown,
};

/// Logical size of a record: input plus all outputs
const RECORD_TOTAL_SIZE_SQL: &str = "r.file_size + COALESCE((SELECT SUM(o.file_size) FROM output_files o WHERE o.record_id = r.id), 0)";

#[derive(FromRow)]
struct OutputRow {
    record_id: String,
    file_name: String,
    file_size: i64,
    blob_id: Option<String>,
    stored_in_blob_store: bool,
}

/// Persistent manuscript records
#[derive(Clone)]
pub struct RecordStore {
    db: Database,
}

impl RecordStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a record in the `uploaded` state
    pub async fn create(&self, new: NewFileRecord) -> Result<FileRecord> {
        let id = Uuid::new_v4().to_string();
        let now = now_timestamp();

        sqlx::query(
            r#"
            INSERT INTO file_records
                (id, original_name, file_type, file_size, status, input_blob_id, uploaded_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&new.original_name)
        .bind(new.file_type)
        .bind(new.file_size)
        .bind(FileStatus::Uploaded)
        .bind(&new.input_blob_id)
        .bind(&new.uploaded_by)
        .bind(&now)
        .bind(&now)
        .execute(self.db.pool())
        .await?;

        self.get(&id).await
    }

    /// Get a record with its outputs
    pub async fn get(&self, id: &str) -> Result<FileRecord> {
        let record: FileRecord = sqlx::query_as("SELECT * FROM file_records WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| AppError::RecordNotFound(id.to_string()))?;

        let mut records = self.attach_outputs(vec![record]).await?;
        records
            .pop()
            .ok_or_else(|| AppError::RecordNotFound(id.to_string()))
    }

    /// Query records by status, owner and creation range
    pub async fn find(&self, filter: &RecordFilter) -> Result<Vec<FileRecord>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM file_records WHERE 1 = 1");

        if !filter.statuses.is_empty() {
            qb.push(" AND status IN (");
            let mut separated = qb.separated(", ");
            for status in &filter.statuses {
                separated.push_bind(*status);
            }
            separated.push_unseparated(")");
        }
        if let Some(owner) = &filter.uploaded_by {
            qb.push(" AND uploaded_by = ").push_bind(owner.clone());
        }
        if let Some(before) = &filter.created_before {
            qb.push(" AND created_at < ").push_bind(before.clone());
        }
        if let Some(after) = &filter.created_after {
            qb.push(" AND created_at >= ").push_bind(after.clone());
        }

        qb.push(if filter.oldest_first {
            " ORDER BY created_at ASC"
        } else {
            " ORDER BY created_at DESC"
        });
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit);
        }

        let records = qb
            .build_query_as::<FileRecord>()
            .fetch_all(self.db.pool())
            .await?;
        self.attach_outputs(records).await
    }

    /// Records a reclamation may delete before touching completed work:
    /// failed ones, uploads never picked up before `stale_before`, and jobs
    /// that started processing before `stale_before`. Oldest first.
    pub async fn reclaimable(&self, stale_before: &str) -> Result<Vec<FileRecord>> {
        let records: Vec<FileRecord> = sqlx::query_as(
            r#"
            SELECT * FROM file_records
            WHERE status = ?
               OR (status = ? AND created_at < ?)
               OR (status = ? AND COALESCE(processing_started_at, created_at) < ?)
            ORDER BY created_at ASC
            "#,
        )
        .bind(FileStatus::Failed)
        .bind(FileStatus::Uploaded)
        .bind(stale_before)
        .bind(FileStatus::Processing)
        .bind(stale_before)
        .fetch_all(self.db.pool())
        .await?;

        self.attach_outputs(records).await
    }

    /// Every blob id some record points at, inputs and outputs alike
    pub async fn referenced_blob_ids(&self) -> Result<HashSet<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT input_blob_id FROM file_records WHERE input_blob_id IS NOT NULL
            UNION
            SELECT blob_id FROM output_files WHERE blob_id IS NOT NULL
            "#,
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(ids.into_iter().collect())
    }

    /// Remove a record and its output rows. Returns false if it was already gone.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query("DELETE FROM output_files WHERE record_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM file_records WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Worker picked the record up: `uploaded -> processing`
    pub async fn mark_processing(&self, id: &str) -> Result<FileRecord> {
        let now = now_timestamp();
        let result = sqlx::query(
            "UPDATE file_records SET status = ?, processing_started_at = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(FileStatus::Processing)
        .bind(&now)
        .bind(&now)
        .bind(id)
        .bind(FileStatus::Uploaded)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, FileStatus::Processing).await);
        }
        self.get(id).await
    }

    /// Worker finished: `processing -> completed`, outputs attached in order
    pub async fn mark_completed(&self, id: &str, outputs: Vec<NewOutputFile>) -> Result<FileRecord> {
        let now = now_timestamp();
        let mut tx = self.db.pool().begin().await?;

        let result = sqlx::query(
            "UPDATE file_records SET status = ?, processing_completed_at = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(FileStatus::Completed)
        .bind(&now)
        .bind(&now)
        .bind(id)
        .bind(FileStatus::Processing)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(self.transition_error(id, FileStatus::Completed).await);
        }

        for (position, output) in outputs.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO output_files (record_id, position, file_name, file_size, blob_id, stored_in_blob_store)
                VALUES (?, ?, ?, ?, ?, 1)
                "#,
            )
            .bind(id)
            .bind(position as i64)
            .bind(&output.file_name)
            .bind(output.file_size)
            .bind(&output.blob_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.get(id).await
    }

    /// Worker gave up: `processing -> failed`
    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<FileRecord> {
        let now = now_timestamp();
        let result = sqlx::query(
            "UPDATE file_records SET status = ?, error_message = ?, processing_completed_at = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(FileStatus::Failed)
        .bind(error)
        .bind(&now)
        .bind(&now)
        .bind(id)
        .bind(FileStatus::Processing)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, FileStatus::Failed).await);
        }
        self.get(id).await
    }

    /// Explain why a guarded status update matched nothing
    async fn transition_error(&self, id: &str, to: FileStatus) -> AppError {
        match self.get(id).await {
            Ok(record) => AppError::Conflict(format!(
                "Cannot move record {} from {} to {}",
                id,
                record.status.as_str(),
                to.as_str()
            )),
            Err(e) => e,
        }
    }

    /// Record counts and logical bytes per status
    pub async fn totals_by_status(&self) -> Result<Vec<StatusBreakdown>> {
        let sql = format!(
            "SELECT r.status AS status, COUNT(*) AS count, COALESCE(SUM({}), 0) AS total_bytes FROM file_records r GROUP BY r.status ORDER BY r.status",
            RECORD_TOTAL_SIZE_SQL
        );
        Ok(sqlx::query_as(&sql).fetch_all(self.db.pool()).await?)
    }

    /// Owners holding the most logical bytes
    pub async fn top_owners(&self, limit: i64) -> Result<Vec<OwnerBreakdown>> {
        let sql = format!(
            "SELECT r.uploaded_by AS uploaded_by, COUNT(*) AS count, COALESCE(SUM({}), 0) AS total_bytes FROM file_records r GROUP BY r.uploaded_by ORDER BY total_bytes DESC, uploaded_by ASC LIMIT ?",
            RECORD_TOTAL_SIZE_SQL
        );
        Ok(sqlx::query_as(&sql)
            .bind(limit)
            .fetch_all(self.db.pool())
            .await?)
    }

    /// Record counts and logical bytes per manuscript format
    pub async fn totals_by_file_type(&self) -> Result<Vec<FileTypeBreakdown>> {
        let sql = format!(
            "SELECT r.file_type AS file_type, COUNT(*) AS count, COALESCE(SUM({}), 0) AS total_bytes FROM file_records r GROUP BY r.file_type ORDER BY r.file_type",
            RECORD_TOTAL_SIZE_SQL
        );
        Ok(sqlx::query_as(&sql).fetch_all(self.db.pool()).await?)
    }

    /// Load output rows for a batch of records in one query
    async fn attach_outputs(&self, mut records: Vec<FileRecord>) -> Result<Vec<FileRecord>> {
        if records.is_empty() {
            return Ok(records);
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT record_id, file_name, file_size, blob_id, stored_in_blob_store FROM output_files WHERE record_id IN (",
        );
        let mut separated = qb.separated(", ");
        for record in &records {
            separated.push_bind(record.id.clone());
        }
        separated.push_unseparated(") ORDER BY record_id, position");

        let rows = qb
            .build_query_as::<OutputRow>()
            .fetch_all(self.db.pool())
            .await?;

        let mut by_record: HashMap<String, Vec<OutputFile>> = HashMap::new();
        for row in rows {
            by_record.entry(row.record_id).or_default().push(OutputFile {
                file_name: row.file_name,
                file_size: row.file_size,
                blob_id: row.blob_id,
                stored_in_blob_store: row.stored_in_blob_store,
            });
        }

        for record in &mut records {
            record.output_files = by_record.remove(&record.id).unwrap_or_default();
        }
        Ok(records)
    }
}
