//! `conduit-quarantine` — per-user silence protocol and the store diverted
//! messages land in while it's active.
//!
//! The Activity Tracker consults `QuarantineManager` (via the
//! `conduit_core::QuarantineGate` trait) before buffering anything; the
//! Supervisor repeats the check before spending LLM calls on a job, in
//! case activation happened mid-flight.

pub mod cache;
pub mod db;
pub mod error;
pub mod manager;

pub use cache::StatusCache;
pub use error::{QuarantineError, Result};
pub use manager::{ProtocolStatusChange, QuarantineManager, DEFAULT_QUARANTINE_TTL};

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use conduit_core::types::{ChatId, InboundMessage, UserId};
    use conduit_core::QuarantineGate;
    use rusqlite::Connection;

    use crate::manager::QuarantineManager;

    fn manager() -> std::sync::Arc<QuarantineManager> {
        QuarantineManager::new(
            Connection::open_in_memory().unwrap(),
            Duration::from_secs(300),
            Duration::from_secs(7 * 24 * 3600),
        )
        .unwrap()
    }

    fn msg(user_id: i64, text: &str) -> InboundMessage {
        InboundMessage {
            user_id: UserId(user_id),
            chat_id: ChatId(user_id),
            message_id: 1,
            text: text.to_string(),
            received_at: chrono::Utc::now(),
            recovered: None,
        }
    }

    #[test]
    fn inactive_by_default() {
        let mgr = manager();
        assert!(!mgr.is_active(UserId(1)));
    }

    #[test]
    fn activate_then_deactivate_round_trips() {
        let mgr = manager();
        mgr.activate(UserId(1), Some("abuse report"), "reviewer:bob").unwrap();
        assert!(mgr.is_active(UserId(1)));

        let status = mgr.status(UserId(1)).unwrap();
        assert!(status.active);
        assert_eq!(status.reason.as_deref(), Some("abuse report"));

        mgr.deactivate(UserId(1), Some("resolved"), "reviewer:bob").unwrap();
        assert!(!mgr.is_active(UserId(1)));
    }

    #[test]
    fn store_and_release_round_trips_text() {
        let mgr = manager();
        let stored = mgr.store_message(&msg(7, "hello while quarantined")).unwrap();
        assert_eq!(mgr.list_for_user(UserId(7)).unwrap().len(), 1);

        let released = mgr.release(stored.q_id).unwrap();
        assert_eq!(released.text, "hello while quarantined");
        assert_eq!(released.user_id, UserId(7));
        assert!(mgr.list_for_user(UserId(7)).unwrap().is_empty());
    }

    #[test]
    fn release_unknown_id_errors() {
        let mgr = manager();
        assert!(mgr.release(uuid::Uuid::now_v7()).is_err());
    }

    #[test]
    fn purge_removes_expired_only() {
        let mgr = QuarantineManager::new(
            Connection::open_in_memory().unwrap(),
            Duration::from_secs(300),
            Duration::from_millis(1),
        )
        .unwrap();

        let old = InboundMessage {
            received_at: chrono::Utc::now() - chrono::Duration::seconds(10),
            ..msg(1, "stale")
        };
        mgr.store_message(&old).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let removed = mgr.purge_expired().unwrap();
        assert_eq!(removed, 1);
        assert!(mgr.list_for_user(UserId(1)).unwrap().is_empty());
    }

    #[test]
    fn activation_broadcasts_status_change() {
        let mgr = manager();
        let mut rx = mgr.subscribe();
        mgr.activate(UserId(9), None, "system").unwrap();
        let change = rx.try_recv().unwrap();
        assert_eq!(change.user_id, UserId(9));
        assert!(change.active);
    }
}
