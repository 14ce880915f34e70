//! Customer status / LTV ledger. `user_current_status` holds the live
//! snapshot per user; every change to it is also appended to
//! `status_transitions` so the snapshot can always be reconstructed from
//! the log for any point in time.

use std::str::FromStr;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use conduit_core::types::{CustomerStatus, StatusTransition, UserCurrentStatus, UserId};

use crate::error::Result;

/// Fetch the current status row, if the user has ever been touched.
pub fn get_status(conn: &Connection, user_id: UserId) -> Result<Option<UserCurrentStatus>> {
    conn.query_row(
        "SELECT customer_status, ltv_total_usd, nickname
         FROM user_current_status WHERE user_id = ?1",
        params![user_id.0],
        |row| row_to_status(user_id, row),
    )
    .optional()
    .map_err(Into::into)
}

/// Fetch the current status, creating a fresh `PROSPECT` row at zero LTV if
/// this user has no ledger entry yet.
pub fn get_or_create_status(conn: &Connection, user_id: UserId) -> Result<UserCurrentStatus> {
    if let Some(status) = get_status(conn, user_id)? {
        return Ok(status);
    }
    conn.execute(
        "INSERT OR IGNORE INTO user_current_status (user_id, customer_status, ltv_total_usd)
         VALUES (?1, 'PROSPECT', 0.0)",
        params![user_id.0],
    )?;
    Ok(UserCurrentStatus {
        user_id,
        customer_status: CustomerStatus::Prospect,
        ltv_total_usd: 0.0,
        nickname: None,
    })
}

/// Apply a status/LTV change and record it in the audit log in the same
/// transaction. `to_status: None` means "don't change the status, only the
/// LTV total" (e.g. recording a purchase without a lifecycle transition).
pub fn apply_transition(
    conn: &mut Connection,
    user_id: UserId,
    to_status: Option<CustomerStatus>,
    delta_ltv: f64,
    reason: Option<&str>,
    performer: &str,
) -> Result<UserCurrentStatus> {
    let tx = conn.transaction()?;

    let current = {
        let row: Option<(String, f64, Option<String>)> = tx
            .query_row(
                "SELECT customer_status, ltv_total_usd, nickname FROM user_current_status WHERE user_id = ?1",
                params![user_id.0],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        row
    };

    let (from_status, prior_ltv, nickname) = match &current {
        Some((status_str, ltv, nick)) => (
            Some(CustomerStatus::from_str(status_str).unwrap_or(CustomerStatus::Prospect)),
            *ltv,
            nick.clone(),
        ),
        None => (None, 0.0, None),
    };

    let new_status = to_status.unwrap_or_else(|| from_status.unwrap_or(CustomerStatus::Prospect));
    let new_ltv = prior_ltv + delta_ltv;
    let now = Utc::now();

    tx.execute(
        "INSERT INTO user_current_status (user_id, customer_status, ltv_total_usd, nickname)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(user_id) DO UPDATE SET
            customer_status = excluded.customer_status,
            ltv_total_usd   = excluded.ltv_total_usd",
        params![user_id.0, new_status.to_string(), new_ltv, nickname],
    )?;

    tx.execute(
        "INSERT INTO status_transitions
            (user_id, from_status, to_status, delta_ltv, reason, performer, at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            user_id.0,
            from_status.map(|s| s.to_string()),
            to_status.map(|s| s.to_string()),
            delta_ltv,
            reason,
            performer,
            now.to_rfc3339(),
        ],
    )?;

    tx.commit()?;

    Ok(UserCurrentStatus {
        user_id,
        customer_status: new_status,
        ltv_total_usd: new_ltv,
        nickname: current.and_then(|(_, _, n)| n),
    })
}

/// Set or clear the display nickname without touching status/LTV or the
/// audit log — nicknames are cosmetic, not a lifecycle fact.
pub fn set_nickname(conn: &Connection, user_id: UserId, nickname: Option<&str>) -> Result<()> {
    conn.execute(
        "INSERT INTO user_current_status (user_id, customer_status, ltv_total_usd, nickname)
         VALUES (?1, 'PROSPECT', 0.0, ?2)
         ON CONFLICT(user_id) DO UPDATE SET nickname = excluded.nickname",
        params![user_id.0, nickname],
    )?;
    Ok(())
}

/// Full transition history for a user, oldest first.
pub fn list_transitions(conn: &Connection, user_id: UserId) -> Result<Vec<StatusTransition>> {
    let mut stmt = conn.prepare(
        "SELECT id, from_status, to_status, delta_ltv, reason, performer, at
         FROM status_transitions WHERE user_id = ?1 ORDER BY at ASC",
    )?;
    let rows = stmt
        .query_map(params![user_id.0], |row| {
            let from_status: Option<String> = row.get(1)?;
            let to_status: Option<String> = row.get(2)?;
            let at: String = row.get(6)?;
            Ok(StatusTransition {
                id: row.get(0)?,
                user_id,
                from_status: from_status.and_then(|s| CustomerStatus::from_str(&s).ok()),
                to_status: to_status.and_then(|s| CustomerStatus::from_str(&s).ok()),
                delta_ltv: row.get(3)?,
                reason: row.get(4)?,
                performer: row.get(5)?,
                at: chrono::DateTime::parse_from_rfc3339(&at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn row_to_status(user_id: UserId, row: &rusqlite::Row<'_>) -> rusqlite::Result<UserCurrentStatus> {
    let status_str: String = row.get(0)?;
    Ok(UserCurrentStatus {
        user_id,
        customer_status: CustomerStatus::from_str(&status_str).unwrap_or(CustomerStatus::Prospect),
        ltv_total_usd: row.get(1)?,
        nickname: row.get(2)?,
    })
}
