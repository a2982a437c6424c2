//! `PostgreSQL` implementation of the `StoryRepository` trait.
//!
//! Transactions lock the timeline row with `SELECT ... FOR UPDATE`, which
//! serializes all writers of one record group. Serialization failures and
//! deadlocks reported by the server are retried a bounded number of times.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::warn;

use storyteller_core::error::DomainError;
use storyteller_core::keys::{ParagraphKey, TimelineId};
use storyteller_core::record::{
    ParagraphRecord, PendingParagraph, TimelineDraft, TimelineRecord,
};
use storyteller_core::repository::{StoryRepository, TimelineTxn, TxnWork};

/// How many times a transaction is attempted before contention is reported.
const MAX_TXN_ATTEMPTS: u32 = 3;

const SELECT_TIMELINE: &str = r"
SELECT id, ancestor_points, length, auth_token_digest, lock_expiry, pending, created_at, updated_at
FROM timelines
WHERE id = $1
";

const SELECT_TIMELINE_FOR_UPDATE: &str = r"
SELECT id, ancestor_points, length, auth_token_digest, lock_expiry, pending, created_at, updated_at
FROM timelines
WHERE id = $1
FOR UPDATE
";

const SELECT_FIRST_TIMELINE: &str = r"
SELECT id, ancestor_points, length, auth_token_digest, lock_expiry, pending, created_at, updated_at
FROM timelines
ORDER BY id
LIMIT 1
";

const SELECT_FORKS_AT: &str = r"
SELECT id, ancestor_points, length, auth_token_digest, lock_expiry, pending, created_at, updated_at
FROM timelines
WHERE fork_timeline_id = $1 AND fork_position = $2
ORDER BY id
";

const INSERT_TIMELINE: &str = r"
INSERT INTO timelines (ancestor_points, fork_timeline_id, fork_position, length, created_at, updated_at)
VALUES ($1, $2, $3, $4, $5, $5)
RETURNING id
";

const UPDATE_TIMELINE: &str = r"
UPDATE timelines
SET length = $2, auth_token_digest = $3, lock_expiry = $4, pending = $5, updated_at = $6
WHERE id = $1
";

const INSERT_PARAGRAPH: &str = r"
INSERT INTO paragraphs (timeline_id, position, text, created_at, branch_count)
VALUES ($1, $2, $3, $4, $5)
";

const INCREMENT_BRANCH_COUNT: &str = r"
UPDATE paragraphs
SET branch_count = branch_count + 1
WHERE timeline_id = $1 AND position = $2
";

const SELECT_PARAGRAPHS: &str = r"
SELECT timeline_id, position, text, created_at, branch_count
FROM paragraphs
WHERE (timeline_id, position) IN (SELECT * FROM UNNEST($1::BIGINT[], $2::INTEGER[]))
";

/// PostgreSQL-backed story repository.
#[derive(Debug, Clone)]
pub struct PgStoryRepository {
    pool: PgPool,
}

impl PgStoryRepository {
    /// Creates a new `PgStoryRepository`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn try_transact(
        &self,
        id: TimelineId,
        work: &TxnWork<'_>,
    ) -> Result<TimelineTxn, TxnError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(SELECT_TIMELINE_FOR_UPDATE)
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Err(DomainError::TimelineNotFound(id).into());
        };

        let mut txn = TimelineTxn::begin(timeline_from_row(&row)?);
        work(&mut txn)?;
        if !txn.has_writes() {
            return Ok(txn);
        }
        txn.validate()?;

        let timeline = &txn.timeline;
        sqlx::query(UPDATE_TIMELINE)
            .bind(timeline.id.0)
            .bind(to_db_int(timeline.length)?)
            .bind(timeline.auth_token_digest.clone())
            .bind(timeline.lock_expiry)
            .bind(timeline.pending.clone().map(Json))
            .bind(timeline.updated_at)
            .execute(&mut *tx)
            .await?;
        for paragraph in &txn.new_paragraphs {
            sqlx::query(INSERT_PARAGRAPH)
                .bind(paragraph.timeline_id.0)
                .bind(to_db_int(paragraph.position)?)
                .bind(paragraph.text.clone())
                .bind(paragraph.created_at)
                .bind(to_db_int(paragraph.branch_count)?)
                .execute(&mut *tx)
                .await?;
        }
        for position in &txn.branch_increments {
            sqlx::query(INCREMENT_BRANCH_COUNT)
                .bind(id.0)
                .bind(to_db_int(*position)?)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(txn)
    }
}

/// Failure of one transaction attempt: either the work/validation rejected
/// it, or the database did.
#[derive(Debug)]
enum TxnError {
    Domain(DomainError),
    Database(sqlx::Error),
}

impl From<DomainError> for TxnError {
    fn from(err: DomainError) -> Self {
        Self::Domain(err)
    }
}

impl From<sqlx::Error> for TxnError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err)
    }
}

fn is_retryable(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "40001" || code == "40P01")
}

fn infrastructure(context: &str, err: &sqlx::Error) -> DomainError {
    DomainError::Infrastructure(format!("{context}: {err}"))
}

fn to_db_int(value: u32) -> Result<i32, DomainError> {
    i32::try_from(value)
        .map_err(|_| DomainError::Infrastructure(format!("value {value} exceeds column range")))
}

fn from_db_int(value: i32) -> Result<u32, sqlx::Error> {
    u32::try_from(value).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn timeline_from_row(row: &PgRow) -> Result<TimelineRecord, sqlx::Error> {
    let Json(ancestor_points): Json<Vec<ParagraphKey>> = row.try_get("ancestor_points")?;
    let pending: Option<Json<PendingParagraph>> = row.try_get("pending")?;
    Ok(TimelineRecord {
        id: TimelineId(row.try_get("id")?),
        ancestor_points,
        length: from_db_int(row.try_get("length")?)?,
        auth_token_digest: row.try_get("auth_token_digest")?,
        lock_expiry: row.try_get("lock_expiry")?,
        pending: pending.map(|Json(pending)| pending),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn paragraph_from_row(row: &PgRow) -> Result<ParagraphRecord, sqlx::Error> {
    Ok(ParagraphRecord {
        timeline_id: TimelineId(row.try_get("timeline_id")?),
        position: from_db_int(row.try_get("position")?)?,
        text: row.try_get("text")?,
        created_at: row.try_get("created_at")?,
        branch_count: from_db_int(row.try_get("branch_count")?)?,
    })
}

#[async_trait]
impl StoryRepository for PgStoryRepository {
    async fn insert_timeline(
        &self,
        draft: TimelineDraft,
    ) -> Result<(TimelineRecord, Option<ParagraphRecord>), DomainError> {
        let fork_point = draft.ancestor_points.last().copied();
        let length = to_db_int(draft.length)?;
        let fork_position = fork_point.map(|p| to_db_int(p.position)).transpose()?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| infrastructure("begin failed", &e))?;
        let id: i64 = sqlx::query(INSERT_TIMELINE)
            .bind(Json(draft.ancestor_points.clone()))
            .bind(fork_point.map(|p| p.timeline_id.0))
            .bind(fork_position)
            .bind(length)
            .bind(draft.created_at)
            .fetch_one(&mut *tx)
            .await
            .and_then(|row| row.try_get("id"))
            .map_err(|e| infrastructure("timeline insert failed", &e))?;

        let timeline = TimelineRecord {
            id: TimelineId(id),
            ancestor_points: draft.ancestor_points,
            length: draft.length,
            auth_token_digest: None,
            lock_expiry: None,
            pending: None,
            created_at: draft.created_at,
            updated_at: draft.created_at,
        };
        let paragraph = draft.first_paragraph.map(|text| ParagraphRecord {
            timeline_id: timeline.id,
            position: timeline.length,
            text,
            created_at: draft.created_at,
            branch_count: 0,
        });
        if let Some(paragraph) = &paragraph {
            sqlx::query(INSERT_PARAGRAPH)
                .bind(id)
                .bind(length)
                .bind(paragraph.text.clone())
                .bind(paragraph.created_at)
                .bind(0_i32)
                .execute(&mut *tx)
                .await
                .map_err(|e| infrastructure("paragraph insert failed", &e))?;
        }
        tx.commit()
            .await
            .map_err(|e| infrastructure("commit failed", &e))?;

        Ok((timeline, paragraph))
    }

    async fn load_timeline(&self, id: TimelineId) -> Result<Option<TimelineRecord>, DomainError> {
        let row = sqlx::query(SELECT_TIMELINE)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| infrastructure("timeline load failed", &e))?;
        row.as_ref()
            .map(timeline_from_row)
            .transpose()
            .map_err(|e| infrastructure("timeline decode failed", &e))
    }

    async fn first_timeline(&self) -> Result<Option<TimelineRecord>, DomainError> {
        let row = sqlx::query(SELECT_FIRST_TIMELINE)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| infrastructure("timeline load failed", &e))?;
        row.as_ref()
            .map(timeline_from_row)
            .transpose()
            .map_err(|e| infrastructure("timeline decode failed", &e))
    }

    async fn load_paragraphs(
        &self,
        keys: &[ParagraphKey],
    ) -> Result<Vec<Option<ParagraphRecord>>, DomainError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let timeline_ids: Vec<i64> = keys.iter().map(|k| k.timeline_id.0).collect();
        let positions = keys
            .iter()
            .map(|k| to_db_int(k.position))
            .collect::<Result<Vec<i32>, _>>()?;

        let rows = sqlx::query(SELECT_PARAGRAPHS)
            .bind(timeline_ids)
            .bind(positions)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| infrastructure("paragraph load failed", &e))?;
        let mut found = rows
            .iter()
            .map(|row| paragraph_from_row(row).map(|p| (p.key(), p)))
            .collect::<Result<HashMap<_, _>, _>>()
            .map_err(|e| infrastructure("paragraph decode failed", &e))?;

        Ok(keys.iter().map(|key| found.remove(key)).collect())
    }

    async fn forks_at(&self, key: ParagraphKey) -> Result<Vec<TimelineRecord>, DomainError> {
        let rows = sqlx::query(SELECT_FORKS_AT)
            .bind(key.timeline_id.0)
            .bind(to_db_int(key.position)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| infrastructure("fork lookup failed", &e))?;
        rows.iter()
            .map(timeline_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| infrastructure("timeline decode failed", &e))
    }

    async fn transact(
        &self,
        id: TimelineId,
        work: &TxnWork<'_>,
    ) -> Result<TimelineTxn, DomainError> {
        let mut attempt = 1;
        loop {
            match self.try_transact(id, work).await {
                Ok(txn) => return Ok(txn),
                Err(TxnError::Domain(err)) => return Err(err),
                Err(TxnError::Database(err))
                    if is_retryable(&err) && attempt < MAX_TXN_ATTEMPTS =>
                {
                    warn!(
                        timeline_id = %id,
                        attempt,
                        error = %err,
                        "retrying contended story transaction"
                    );
                    attempt += 1;
                }
                Err(TxnError::Database(err)) => {
                    return Err(infrastructure("story transaction failed", &err));
                }
            }
        }
    }

    async fn increment_branch_count(&self, key: ParagraphKey) -> Result<(), DomainError> {
        let result = sqlx::query(INCREMENT_BRANCH_COUNT)
            .bind(key.timeline_id.0)
            .bind(to_db_int(key.position)?)
            .execute(&self.pool)
            .await
            .map_err(|e| infrastructure("branch count update failed", &e))?;
        if result.rows_affected() == 0 {
            return Err(DomainError::ParagraphNotFound(key));
        }
        Ok(())
    }
}
