use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use conduit_core::types::{
    ChatId, CtaMetadata, CustomerStatus, LlmCallRecord, ReviewItem, ReviewStatus, SafetyReport, UserId,
};

use crate::error::Result;

/// Creates the review pipeline's tables. Idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS interactions (
            review_id               TEXT PRIMARY KEY,
            user_id                 INTEGER NOT NULL,
            chat_id                 INTEGER NOT NULL,
            inbound_text            TEXT NOT NULL,
            last_inbound_message_id INTEGER NOT NULL,
            draft_text              TEXT NOT NULL,
            refined_bubbles         TEXT NOT NULL,
            final_bubbles           TEXT,
            safety                  TEXT NOT NULL,
            llm1                    TEXT NOT NULL,
            llm2                    TEXT NOT NULL,
            priority_score          REAL NOT NULL,
            status                  TEXT NOT NULL,
            reviewer_id             TEXT,
            review_started_at       TEXT,
            review_completed_at     TEXT,
            edit_tags               TEXT NOT NULL DEFAULT '[]',
            quality_score           INTEGER,
            cta                     TEXT,
            customer_status         TEXT,
            processing_error        TEXT,
            delivery_failed_reason  TEXT,
            delivered_at            TEXT,
            created_at              TEXT NOT NULL,
            updated_at              TEXT NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_interactions_status_priority
            ON interactions (status, priority_score DESC);

        CREATE INDEX IF NOT EXISTS idx_interactions_user
            ON interactions (user_id, created_at);

        CREATE TABLE IF NOT EXISTS approved_queue (
            seq            INTEGER PRIMARY KEY AUTOINCREMENT,
            review_id      TEXT NOT NULL,
            user_id        INTEGER NOT NULL,
            chat_id        INTEGER NOT NULL,
            bubbles        TEXT NOT NULL,
            inbound_text   TEXT NOT NULL,
            last_inbound_message_id INTEGER NOT NULL,
            approved_at    TEXT NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}

/// Scalar/JSON-serialized form of a `ReviewItem`, shared by `create` and
/// `update` so the column list only needs to be written out once per
/// statement shape.
struct Row24 {
    final_bubbles: Option<String>,
    refined_bubbles: String,
    safety: String,
    llm1: String,
    llm2: String,
    edit_tags: String,
    cta: Option<String>,
    customer_status: Option<String>,
    review_started_at: Option<String>,
    review_completed_at: Option<String>,
    delivered_at: Option<String>,
}

fn serialize(item: &ReviewItem) -> Result<Row24> {
    Ok(Row24 {
        final_bubbles: item.final_bubbles.as_ref().map(serde_json::to_string).transpose()?,
        refined_bubbles: serde_json::to_string(&item.refined_bubbles)?,
        safety: serde_json::to_string(&item.safety)?,
        llm1: serde_json::to_string(&item.llm1)?,
        llm2: serde_json::to_string(&item.llm2)?,
        edit_tags: serde_json::to_string(&item.edit_tags)?,
        cta: item.cta.as_ref().map(serde_json::to_string).transpose()?,
        customer_status: item.customer_status.map(|s| s.to_string()),
        review_started_at: item.review_started_at.map(|dt| dt.to_rfc3339()),
        review_completed_at: item.review_completed_at.map(|dt| dt.to_rfc3339()),
        delivered_at: item.delivered_at.map(|dt| dt.to_rfc3339()),
    })
}

pub fn create(conn: &Connection, item: &ReviewItem) -> Result<()> {
    let r = serialize(item)?;
    conn.execute(
        "INSERT INTO interactions (
            review_id, user_id, chat_id, inbound_text, last_inbound_message_id, draft_text,
            refined_bubbles, final_bubbles, safety, llm1, llm2, priority_score, status, reviewer_id,
            review_started_at, review_completed_at, edit_tags, quality_score, cta,
            customer_status, processing_error, delivery_failed_reason, delivered_at,
            created_at, updated_at
         ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
            ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25
         )",
        params![
            item.review_id.to_string(),
            item.user_id.0,
            item.chat_id.0,
            item.inbound_text,
            item.last_inbound_message_id,
            item.draft_text,
            r.refined_bubbles,
            r.final_bubbles,
            r.safety,
            r.llm1,
            r.llm2,
            item.priority_score,
            item.status.to_string(),
            item.reviewer_id,
            r.review_started_at,
            r.review_completed_at,
            r.edit_tags,
            item.quality_score,
            r.cta,
            r.customer_status,
            item.processing_error,
            item.delivery_failed_reason,
            r.delivered_at,
            item.created_at.to_rfc3339(),
            item.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn update(conn: &Connection, item: &ReviewItem) -> Result<()> {
    let r = serialize(item)?;
    conn.execute(
        "UPDATE interactions SET
            user_id = ?2, chat_id = ?3, inbound_text = ?4, draft_text = ?5,
            refined_bubbles = ?6, final_bubbles = ?7, safety = ?8, llm1 = ?9,
            llm2 = ?10, priority_score = ?11, status = ?12, reviewer_id = ?13,
            review_started_at = ?14, review_completed_at = ?15, edit_tags = ?16,
            quality_score = ?17, cta = ?18, customer_status = ?19,
            processing_error = ?20, delivery_failed_reason = ?21, delivered_at = ?22,
            created_at = ?23, updated_at = ?24
         WHERE review_id = ?1",
        params![
            item.review_id.to_string(),
            item.user_id.0,
            item.chat_id.0,
            item.inbound_text,
            item.draft_text,
            r.refined_bubbles,
            r.final_bubbles,
            r.safety,
            r.llm1,
            r.llm2,
            item.priority_score,
            item.status.to_string(),
            item.reviewer_id,
            r.review_started_at,
            r.review_completed_at,
            r.edit_tags,
            item.quality_score,
            r.cta,
            r.customer_status,
            item.processing_error,
            item.delivery_failed_reason,
            r.delivered_at,
            item.created_at.to_rfc3339(),
            item.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, review_id: Uuid) -> Result<Option<ReviewItem>> {
    conn.query_row(
        select_clause("WHERE review_id = ?1").as_str(),
        params![review_id.to_string()],
        row_to_review_item,
    )
    .optional()
    .map_err(Into::into)
}

pub fn list_by_status(conn: &Connection, status: ReviewStatus) -> Result<Vec<ReviewItem>> {
    let mut stmt = conn.prepare(
        select_clause("WHERE status = ?1 ORDER BY priority_score DESC").as_str(),
    )?;
    let rows = stmt
        .query_map(params![status.to_string()], row_to_review_item)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Replaces every `user_id` reference with a tombstone id but keeps the
/// row: interactions are retained for analytics, only the identity is
/// erased.
pub fn anonymize_user(conn: &Connection, user_id: UserId, tombstone: UserId) -> Result<usize> {
    let n = conn.execute(
        "UPDATE interactions SET user_id = ?1 WHERE user_id = ?2",
        params![tombstone.0, user_id.0],
    )?;
    Ok(n)
}

#[allow(clippy::too_many_arguments)]
pub fn push_approved(
    conn: &Connection,
    review_id: Uuid,
    user_id: UserId,
    chat_id: ChatId,
    bubbles: &[String],
    inbound_text: &str,
    last_inbound_message_id: i64,
    approved_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO approved_queue (review_id, user_id, chat_id, bubbles, inbound_text, last_inbound_message_id, approved_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            review_id.to_string(),
            user_id.0,
            chat_id.0,
            serde_json::to_string(bubbles)?,
            inbound_text,
            last_inbound_message_id,
            approved_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Row shape handed back to `queue.rs` for FIFO pops; kept distinct from
/// `ReviewItem` since the delivery path only ever needs these fields.
pub struct ApprovedRow {
    pub review_id: Uuid,
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub bubbles: Vec<String>,
    pub inbound_text: String,
    pub last_inbound_message_id: i64,
    pub approved_at: DateTime<Utc>,
}

pub fn pop_approved(conn: &Connection) -> Result<Option<ApprovedRow>> {
    let row: Option<(i64, String, i64, i64, String, String, i64, String)> = conn
        .query_row(
            "SELECT seq, review_id, user_id, chat_id, bubbles, inbound_text, last_inbound_message_id, approved_at
             FROM approved_queue ORDER BY seq ASC LIMIT 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?, r.get(6)?, r.get(7)?)),
        )
        .optional()?;

    let Some((seq, review_id, user_id, chat_id, bubbles, inbound_text, last_inbound_message_id, approved_at)) = row
    else {
        return Ok(None);
    };

    conn.execute("DELETE FROM approved_queue WHERE seq = ?1", params![seq])?;

    Ok(Some(ApprovedRow {
        review_id: Uuid::parse_str(&review_id).unwrap_or_else(|_| Uuid::nil()),
        user_id: UserId(user_id),
        chat_id: ChatId(chat_id),
        bubbles: serde_json::from_str(&bubbles)?,
        inbound_text,
        last_inbound_message_id,
        approved_at: DateTime::parse_from_rfc3339(&approved_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    }))
}

pub fn approved_queue_len(conn: &Connection) -> Result<usize> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM approved_queue", [], |r| r.get(0))?;
    Ok(n as usize)
}

fn select_clause(suffix: &str) -> String {
    format!(
        "SELECT review_id, user_id, chat_id, inbound_text, last_inbound_message_id, draft_text,
                refined_bubbles, final_bubbles, safety, llm1, llm2, priority_score, status, reviewer_id,
                review_started_at, review_completed_at, edit_tags, quality_score, cta,
                customer_status, processing_error, delivery_failed_reason, delivered_at,
                created_at, updated_at
         FROM interactions {suffix}"
    )
}

fn row_to_review_item(row: &Row<'_>) -> rusqlite::Result<ReviewItem> {
    let review_id: String = row.get(0)?;
    let status: String = row.get(12)?;
    let refined_bubbles: String = row.get(6)?;
    let final_bubbles: Option<String> = row.get(7)?;
    let safety: String = row.get(8)?;
    let llm1: String = row.get(9)?;
    let llm2: String = row.get(10)?;
    let edit_tags: String = row.get(16)?;
    let cta: Option<String> = row.get(18)?;
    let customer_status: Option<String> = row.get(19)?;
    let review_started_at: Option<String> = row.get(14)?;
    let review_completed_at: Option<String> = row.get(15)?;
    let delivered_at: Option<String> = row.get(22)?;
    let created_at: String = row.get(23)?;
    let updated_at: String = row.get(24)?;

    let parse_ts = |s: &str| {
        DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
    };
    let sql_err = |e: serde_json::Error| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    };

    Ok(ReviewItem {
        review_id: Uuid::parse_str(&review_id).unwrap_or_else(|_| Uuid::nil()),
        user_id: UserId(row.get(1)?),
        chat_id: ChatId(row.get(2)?),
        inbound_text: row.get(3)?,
        last_inbound_message_id: row.get(4)?,
        draft_text: row.get(5)?,
        refined_bubbles: serde_json::from_str(&refined_bubbles).map_err(sql_err)?,
        final_bubbles: final_bubbles.map(|s| serde_json::from_str(&s)).transpose().map_err(sql_err)?,
        safety: serde_json::from_str::<SafetyReport>(&safety).map_err(sql_err)?,
        llm1: serde_json::from_str::<LlmCallRecord>(&llm1).map_err(sql_err)?,
        llm2: serde_json::from_str::<LlmCallRecord>(&llm2).map_err(sql_err)?,
        priority_score: row.get(11)?,
        status: status.parse().unwrap_or(ReviewStatus::Pending),
        reviewer_id: row.get(13)?,
        review_started_at: review_started_at.map(|s| parse_ts(&s)),
        review_completed_at: review_completed_at.map(|s| parse_ts(&s)),
        edit_tags: serde_json::from_str(&edit_tags).unwrap_or_default(),
        quality_score: row.get(17)?,
        cta: cta.map(|s| serde_json::from_str::<CtaMetadata>(&s)).transpose().map_err(sql_err)?,
        customer_status: customer_status.and_then(|s| s.parse::<CustomerStatus>().ok()),
        processing_error: row.get(20)?,
        delivery_failed_reason: row.get(21)?,
        delivered_at: delivered_at.map(|s| parse_ts(&s)),
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}
