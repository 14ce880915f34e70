use std::sync::Mutex;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::db::init_db;
use crate::error::{MemoryError, Result};
use crate::types::*;

/// Rendered context is capped at this size.
const MAX_CONTEXT_BYTES: usize = 100 * 1024;

/// Keeps per-user facts, a rolling window of raw conversation turns, and
/// deterministic digests of everything that aged out of that window.
///
/// Raw turns beyond `max_history` are folded into daily digests; daily
/// digests older than `memory_ttl_days` are folded again into weekly
/// digests; weekly digests older than `profile_ttl_days` are purged. None
/// of this touches a model — it is pure bucketing and truncation, so the
/// pipeline's LLM budget is never spent summarizing its own history.
pub struct MemoryStore {
    db: Mutex<Connection>,
    max_history: usize,
    recent_n: usize,
    memory_ttl_days: i64,
    profile_ttl_days: i64,
    anti_repeat_window: usize,
}

impl MemoryStore {
    pub fn new(
        conn: Connection,
        max_history: usize,
        recent_n: usize,
        memory_ttl_days: i64,
        profile_ttl_days: i64,
        anti_repeat_window: usize,
    ) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            max_history,
            recent_n,
            memory_ttl_days,
            profile_ttl_days,
            anti_repeat_window,
        })
    }

    /// Store or update a fact. Higher confidence wins on conflict; a
    /// lower-confidence write for the same key is silently dropped.
    pub fn learn(
        &self,
        user_id: i64,
        category: MemoryCategory,
        key: &str,
        value: &str,
        confidence: f64,
        source: MemorySource,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let cat = category.to_string();
        let src = source.to_string();
        let ttl_days = match source {
            MemorySource::OperatorSet => self.profile_ttl_days,
            _ => self.memory_ttl_days,
        };
        let expires_at = (now + ChronoDuration::days(ttl_days)).to_rfc3339();

        let existing: Option<(i64, f64)> = db
            .query_row(
                "SELECT id, confidence FROM user_memory
                 WHERE user_id = ?1 AND category = ?2 AND key = ?3",
                rusqlite::params![user_id, cat, key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match existing {
            Some((_, old_conf)) if confidence <= old_conf => {
                debug!(user_id, key, old_conf, new_conf = confidence, "learn skipped: lower confidence");
            }
            Some((id, _)) => {
                db.execute(
                    "UPDATE user_memory SET value=?1, confidence=?2, source=?3,
                     expires_at=?4, updated_at=?5 WHERE id=?6",
                    rusqlite::params![value, confidence, src, expires_at, now_str, id],
                )?;
            }
            None => {
                db.execute(
                    "INSERT INTO user_memory
                     (user_id, category, key, value, confidence, source, expires_at, created_at, updated_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?8)",
                    rusqlite::params![user_id, cat, key, value, confidence, src, expires_at, now_str],
                )?;
            }
        }
        Ok(())
    }

    pub fn forget(&self, user_id: i64, category: MemoryCategory, key: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let cat = category.to_string();
        let n = db.execute(
            "DELETE FROM user_memory WHERE user_id=?1 AND category=?2 AND key=?3",
            rusqlite::params![user_id, cat, key],
        )?;
        if n == 0 {
            return Err(MemoryError::NotFound {
                category: cat,
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// GDPR erasure: removes every fact, raw turn, and digest for this
    /// user. Unlike the review store's anonymization, memory keeps no
    /// retained-but-scrubbed row — there is nothing here an analyst needs
    /// to preserve.
    pub fn delete_user(&self, user_id: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("DELETE FROM user_memory WHERE user_id=?1", rusqlite::params![user_id])?;
        db.execute("DELETE FROM conversation_turns WHERE user_id=?1", rusqlite::params![user_id])?;
        db.execute("DELETE FROM history_digests WHERE user_id=?1", rusqlite::params![user_id])?;
        Ok(())
    }

    pub fn list_memories(&self, user_id: i64) -> Result<Vec<UserMemory>> {
        let db = self.db.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let mut stmt = db.prepare(
            "SELECT id, user_id, category, key, value, confidence, source,
                    expires_at, created_at, updated_at
             FROM user_memory
             WHERE user_id = ?1 AND (expires_at IS NULL OR expires_at > ?2)
             ORDER BY
                CASE category
                    WHEN 'instruction' THEN 0
                    WHEN 'preference' THEN 1
                    WHEN 'fact' THEN 2
                    WHEN 'context' THEN 3
                END,
                confidence DESC",
        )?;
        let rows = stmt.query_map(rusqlite::params![user_id, now], row_to_memory)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Append a turn and compress the window if it now exceeds `max_history`.
    pub fn save_turn(&self, user_id: i64, role: &str, content: &str) -> Result<()> {
        {
            let db = self.db.lock().unwrap();
            db.execute(
                "INSERT INTO conversation_turns (user_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![user_id, role, content, Utc::now().to_rfc3339()],
            )?;
        }
        self.compress_if_needed(user_id)?;
        Ok(())
    }

    /// Most recent raw turns, oldest first, capped at `recent_n`.
    pub fn recent_turns(&self, user_id: i64) -> Result<Vec<StoredTurn>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, user_id, role, content, created_at FROM conversation_turns
             WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![user_id, self.recent_n as i64], row_to_turn)?;
        let mut turns: Vec<_> = rows.filter_map(|r| r.ok()).collect();
        turns.reverse();
        Ok(turns)
    }

    /// Returns `true` when `candidate` (normalized) matches an assistant
    /// turn from the last `anti_repeat_window` assistant messages — the
    /// generation stage uses this to force a rewrite rather than send a
    /// bubble it already sent recently.
    pub fn is_repeat(&self, user_id: i64, candidate: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT content FROM conversation_turns
             WHERE user_id = ?1 AND role = 'assistant'
             ORDER BY created_at DESC LIMIT ?2",
        )?;
        let normalized_candidate = normalize(candidate);
        let rows = stmt.query_map(
            rusqlite::params![user_id, self.anti_repeat_window as i64],
            |row| row.get::<_, String>(0),
        )?;
        for r in rows.filter_map(|r| r.ok()) {
            if normalize(&r) == normalized_candidate {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Render facts + digests + recent turns into a single bounded block
    /// for prompt injection.
    pub fn build_context(&self, user_id: i64) -> Result<MemoryContext> {
        let memories = self.list_memories(user_id)?;
        let digests = self.list_digests(user_id)?;
        let recent = self.recent_turns(user_id)?;

        let mut out = String::new();
        if !memories.is_empty() {
            out.push_str("## Known facts\n");
            for m in &memories {
                push_bounded(&mut out, &format!("- [{}] {}: {}\n", m.category, m.key, m.value));
            }
        }
        if !digests.is_empty() {
            out.push_str("## History summary\n");
            for d in &digests {
                push_bounded(&mut out, &format!("- {} ({}): {}\n", d.window_label, d.level, d.summary));
            }
        }
        if !recent.is_empty() {
            out.push_str("## Recent turns\n");
            for t in &recent {
                push_bounded(&mut out, &format!("{}: {}\n", t.role, t.content));
            }
        }

        Ok(MemoryContext {
            user_id,
            recent_turn_count: recent.len(),
            digest_count: digests.len(),
            rendered: out,
            built_at: Utc::now(),
        })
    }

    /// Purge expired facts and weekly digests past the profile TTL.
    pub fn expire_old(&self) -> Result<u64> {
        let db = self.db.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let n1 = db.execute(
            "DELETE FROM user_memory WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            [&now],
        )?;
        let cutoff = (Utc::now() - ChronoDuration::days(self.profile_ttl_days)).to_rfc3339();
        let n2 = db.execute(
            "DELETE FROM history_digests WHERE level = 'weekly' AND created_at <= ?1",
            [&cutoff],
        )?;
        Ok((n1 + n2) as u64)
    }

    fn list_digests(&self, user_id: i64) -> Result<Vec<HistoryDigest>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, user_id, level, window_label, summary, turn_count, created_at
             FROM history_digests WHERE user_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([user_id], row_to_digest)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn compress_if_needed(&self, user_id: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM conversation_turns WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )?;
        if (count as usize) <= self.max_history {
            return Ok(());
        }
        let excess = count as usize - self.max_history;

        let mut stmt = db.prepare(
            "SELECT id, role, content, created_at FROM conversation_turns
             WHERE user_id = ?1 ORDER BY created_at ASC LIMIT ?2",
        )?;
        let rows: Vec<(i64, String, String, String)> = stmt
            .query_map(rusqlite::params![user_id, excess as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        let mut by_day: std::collections::BTreeMap<NaiveDate, Vec<(String, String)>> =
            std::collections::BTreeMap::new();
        let mut ids = Vec::with_capacity(rows.len());
        for (id, role, content, created_at) in rows {
            ids.push(id);
            let day = DateTime::parse_from_rfc3339(&created_at)
                .map(|d| d.date_naive())
                .unwrap_or_else(|_| Utc::now().date_naive());
            by_day.entry(day).or_default().push((role, content));
        }

        for (day, turns) in by_day {
            let label = day.format("%Y-%m-%d").to_string();
            let summary = summarize_turns(&turns);
            db.execute(
                "INSERT INTO history_digests (user_id, level, window_label, summary, turn_count, created_at)
                 VALUES (?1, 'daily', ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id, level, window_label) DO UPDATE SET
                    summary = excluded.summary,
                    turn_count = history_digests.turn_count + excluded.turn_count",
                rusqlite::params![user_id, label, summary, turns.len() as i64, Utc::now().to_rfc3339()],
            )?;
        }

        for id in &ids {
            db.execute("DELETE FROM conversation_turns WHERE id = ?1", [id])?;
        }

        self.fold_stale_daily_digests(&db, user_id)?;
        Ok(())
    }

    /// Daily digests older than `memory_ttl_days` fold into a weekly digest.
    fn fold_stale_daily_digests(&self, db: &Connection, user_id: i64) -> Result<()> {
        let cutoff = (Utc::now() - ChronoDuration::days(self.memory_ttl_days)).to_rfc3339();
        let mut stmt = db.prepare(
            "SELECT id, window_label, summary, turn_count FROM history_digests
             WHERE user_id = ?1 AND level = 'daily' AND created_at <= ?2",
        )?;
        let stale: Vec<(i64, String, String, i64)> = stmt
            .query_map(rusqlite::params![user_id, cutoff], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        let mut by_week: std::collections::BTreeMap<String, (Vec<String>, i64)> =
            std::collections::BTreeMap::new();
        let mut ids = Vec::with_capacity(stale.len());
        for (id, label, summary, turn_count) in stale {
            ids.push(id);
            let week_label = NaiveDate::parse_from_str(&label, "%Y-%m-%d")
                .map(|d| format!("{}-W{:02}", d.iso_week().year(), d.iso_week().week()))
                .unwrap_or_else(|_| label.clone());
            let entry = by_week.entry(week_label).or_insert_with(|| (Vec::new(), 0));
            entry.0.push(summary);
            entry.1 += turn_count;
        }

        for (week_label, (summaries, turn_count)) in by_week {
            let summary = summaries.join(" ");
            db.execute(
                "INSERT INTO history_digests (user_id, level, window_label, summary, turn_count, created_at)
                 VALUES (?1, 'weekly', ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id, level, window_label) DO UPDATE SET
                    summary = excluded.summary,
                    turn_count = history_digests.turn_count + excluded.turn_count",
                rusqlite::params![user_id, week_label, summary, turn_count, Utc::now().to_rfc3339()],
            )?;
        }
        for id in &ids {
            db.execute("DELETE FROM history_digests WHERE id = ?1", [id])?;
        }
        Ok(())
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

fn push_bounded(out: &mut String, line: &str) {
    if out.len() + line.len() <= MAX_CONTEXT_BYTES {
        out.push_str(line);
    }
}

/// Deterministic one-line summary of a day's turns: counts by role plus a
/// short excerpt of the first user message, so the digest stays useful
/// without ever calling a model.
fn summarize_turns(turns: &[(String, String)]) -> String {
    let user_count = turns.iter().filter(|(r, _)| r == "user").count();
    let assistant_count = turns.iter().filter(|(r, _)| r == "assistant").count();
    let excerpt = turns
        .iter()
        .find(|(r, _)| r == "user")
        .map(|(_, c)| truncate(c, 80))
        .unwrap_or_default();
    format!(
        "{user_count} user / {assistant_count} assistant messages; opened with: \"{excerpt}\""
    )
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let mut t: String = s.chars().take(max_chars).collect();
        t.push('…');
        t
    }
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserMemory> {
    let cat_str: String = row.get(2)?;
    let src_str: String = row.get(6)?;
    Ok(UserMemory {
        id: row.get(0)?,
        user_id: row.get(1)?,
        category: cat_str.parse().unwrap_or(MemoryCategory::Context),
        key: row.get(3)?,
        value: row.get(4)?,
        confidence: row.get(5)?,
        source: src_str.parse().unwrap_or(MemorySource::Inferred),
        expires_at: parse_opt_dt(row.get::<_, Option<String>>(7)?),
        created_at: parse_dt(row.get(8)?),
        updated_at: parse_dt(row.get(9)?),
    })
}

fn row_to_turn(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredTurn> {
    Ok(StoredTurn {
        id: row.get(0)?,
        user_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        created_at: parse_dt(row.get(4)?),
    })
}

fn row_to_digest(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryDigest> {
    let level_str: String = row.get(2)?;
    Ok(HistoryDigest {
        id: row.get(0)?,
        user_id: row.get(1)?,
        level: level_str.parse().unwrap_or(CompressionLevel::Daily),
        window_label: row.get(3)?,
        summary: row.get(4)?,
        turn_count: row.get::<_, i64>(5)? as usize,
        created_at: parse_dt(row.get(6)?),
    })
}

fn parse_dt(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_opt_dt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(max_history: usize, recent_n: usize) -> MemoryStore {
        MemoryStore::new(Connection::open_in_memory().unwrap(), max_history, recent_n, 7, 30, 20).unwrap()
    }

    #[test]
    fn learn_keeps_higher_confidence() {
        let s = store(50, 10);
        s.learn(1, MemoryCategory::Fact, "diet", "vegetarian", 0.6, MemorySource::Inferred).unwrap();
        s.learn(1, MemoryCategory::Fact, "diet", "vegan", 0.4, MemorySource::Inferred).unwrap();
        let mems = s.list_memories(1).unwrap();
        assert_eq!(mems[0].value, "vegetarian");
    }

    #[test]
    fn save_turn_compresses_beyond_max_history() {
        let s = store(5, 3);
        for i in 0..8 {
            s.save_turn(1, "user", &format!("message {i}")).unwrap();
        }
        let recent = s.recent_turns(1).unwrap();
        assert!(recent.len() <= 5);
        let ctx = s.build_context(1).unwrap();
        assert!(ctx.digest_count > 0);
    }

    #[test]
    fn is_repeat_detects_recent_assistant_message() {
        let s = store(50, 10);
        s.save_turn(1, "assistant", "Sounds good!").unwrap();
        assert!(s.is_repeat(1, "sounds good!").unwrap());
        assert!(!s.is_repeat(1, "something else").unwrap());
    }

    #[test]
    fn forget_removes_existing_memory() {
        let s = store(50, 10);
        s.learn(1, MemoryCategory::Fact, "diet", "vegetarian", 0.9, MemorySource::UserSaid).unwrap();
        s.forget(1, MemoryCategory::Fact, "diet").unwrap();
        assert!(s.list_memories(1).unwrap().is_empty());
    }
}
