//! `conduit-recovery` — replays transport history the system missed,
//! whether from downtime or a cursor that never advanced.
//!
//! Runs independently of the live message path: it reads `MessageCursor`
//! rows, calls `Transport::scan_history` per user, and injects whatever it
//! finds back into the Activity Tracker tagged with a `RecoveryTier` so the
//! Supervisor can weight it accordingly.

pub mod agent;
pub mod db;
pub mod error;

pub use agent::{RecoveryAgent, RecoveryParams};
pub use error::{RecoveryError, Result};

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::Utc;
    use rusqlite::Connection;

    use conduit_activity::{ActivityTracker, BatchingParams};
    use conduit_core::types::{ChatId, UserId};
    use conduit_core::QuarantineGate;
    use conduit_transport::{EntityHandle, HistoryMessage, Transport, TransportError, TransportStatus};
    use conduit_wal::WalQueue;

    use super::*;

    struct FakeTransport {
        history: Mutex<Vec<HistoryMessage>>,
    }

    impl FakeTransport {
        fn with(history: Vec<HistoryMessage>) -> Self {
            Self { history: Mutex::new(history) }
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn name(&self) -> &str {
            "fake"
        }
        async fn connect(&self) -> std::result::Result<(), TransportError> {
            Ok(())
        }
        async fn disconnect(&self) -> std::result::Result<(), TransportError> {
            Ok(())
        }
        fn status(&self) -> TransportStatus {
            TransportStatus::Connected
        }
        async fn send(&self, _chat_id: ChatId, _text: &str) -> std::result::Result<(), TransportError> {
            Ok(())
        }
        async fn set_typing(&self, _chat_id: ChatId, _is_typing: bool) -> std::result::Result<(), TransportError> {
            Ok(())
        }
        async fn scan_history(
            &self,
            chat_id: ChatId,
            since_message_id: i64,
            _limit: usize,
        ) -> std::result::Result<Vec<HistoryMessage>, TransportError> {
            Ok(self
                .history
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.chat_id == chat_id && m.message_id > since_message_id)
                .cloned()
                .collect())
        }
        async fn resolve_entity(&self, user_id: UserId) -> std::result::Result<EntityHandle, TransportError> {
            Ok(EntityHandle(serde_json::json!({ "user_id": user_id.0 })))
        }
    }

    struct NeverQuarantined;
    impl QuarantineGate for NeverQuarantined {
        fn is_active(&self, _user_id: UserId) -> bool {
            false
        }
    }

    struct AlwaysQuarantined;
    impl QuarantineGate for AlwaysQuarantined {
        fn is_active(&self, _user_id: UserId) -> bool {
            true
        }
    }

    fn tracker() -> Arc<ActivityTracker> {
        let wal = Arc::new(WalQueue::new(Connection::open_in_memory().unwrap(), 30_000, 5).unwrap());
        ActivityTracker::new(Connection::open_in_memory().unwrap(), wal, BatchingParams::default()).unwrap()
    }

    fn msg(chat_id: i64, message_id: i64, text: &str, age: chrono::Duration) -> HistoryMessage {
        HistoryMessage {
            user_id: UserId(chat_id),
            chat_id: ChatId(chat_id),
            message_id,
            text: text.to_string(),
            received_at: Utc::now() - age,
        }
    }

    fn agent_with(
        history: Vec<HistoryMessage>,
        quarantine: Arc<dyn QuarantineGate>,
        params: RecoveryParams,
    ) -> (Arc<RecoveryAgent>, Arc<ActivityTracker>) {
        let tracker = tracker();
        let transport: Arc<dyn Transport> = Arc::new(FakeTransport::with(history));
        let agent = RecoveryAgent::new(
            Connection::open_in_memory().unwrap(),
            transport,
            tracker.clone(),
            quarantine,
            params,
        )
        .unwrap();
        (agent, tracker)
    }

    #[tokio::test]
    async fn sweep_with_no_cursors_completes_with_zero_counts() {
        let (agent, _tracker) = agent_with(vec![], Arc::new(NeverQuarantined), RecoveryParams::default());
        let op = agent.sweep().await.unwrap();
        assert_eq!(op.users_scanned, 0);
        assert_eq!(op.messages_recovered, 0);
    }

    #[tokio::test]
    async fn recent_messages_are_recovered_and_buffered() {
        let history = vec![msg(1, 10, "missed while offline", chrono::Duration::minutes(30))];
        let (agent, tracker) = agent_with(history, Arc::new(NeverQuarantined), RecoveryParams::default());
        agent.record_cursor(UserId(1), ChatId(1), 0, Utc::now()).unwrap();

        let op = agent.sweep().await.unwrap();
        assert_eq!(op.users_scanned, 1);
        assert_eq!(op.messages_recovered, 1);
        assert!(tracker.drain_buffer(UserId(1)).is_some());
    }

    #[tokio::test]
    async fn old_inactive_tier3_messages_are_skipped() {
        let history = vec![msg(2, 10, "very old", chrono::Duration::hours(40))];
        let (agent, tracker) = agent_with(history, Arc::new(NeverQuarantined), RecoveryParams::default());
        agent.record_cursor(UserId(2), ChatId(2), 0, Utc::now()).unwrap();

        let op = agent.sweep().await.unwrap();
        assert_eq!(op.messages_recovered, 0);
        assert!(tracker.drain_buffer(UserId(2)).is_none());
    }

    #[tokio::test]
    async fn tier3_is_recovered_when_user_active_recently() {
        let history = vec![
            msg(3, 10, "very old", chrono::Duration::hours(40)),
            msg(3, 11, "recent ping", chrono::Duration::minutes(5)),
        ];
        let (agent, _tracker) = agent_with(history, Arc::new(NeverQuarantined), RecoveryParams::default());
        agent.record_cursor(UserId(3), ChatId(3), 0, Utc::now()).unwrap();

        let op = agent.sweep().await.unwrap();
        assert_eq!(op.messages_recovered, 2);
    }

    #[tokio::test]
    async fn quarantined_users_are_skipped_entirely() {
        let history = vec![msg(4, 10, "should stay put", chrono::Duration::minutes(5))];
        let (agent, tracker) = agent_with(history, Arc::new(AlwaysQuarantined), RecoveryParams::default());
        agent.record_cursor(UserId(4), ChatId(4), 0, Utc::now()).unwrap();

        let op = agent.sweep().await.unwrap();
        assert_eq!(op.users_scanned, 0);
        assert!(tracker.drain_buffer(UserId(4)).is_none());
    }

    #[tokio::test]
    async fn consecutive_errors_halt_the_sweep() {
        struct FailingTransport;
        #[async_trait]
        impl Transport for FailingTransport {
            fn name(&self) -> &str {
                "failing"
            }
            async fn connect(&self) -> std::result::Result<(), TransportError> {
                Ok(())
            }
            async fn disconnect(&self) -> std::result::Result<(), TransportError> {
                Ok(())
            }
            fn status(&self) -> TransportStatus {
                TransportStatus::Connected
            }
            async fn send(&self, _chat_id: ChatId, _text: &str) -> std::result::Result<(), TransportError> {
                Ok(())
            }
            async fn set_typing(&self, _chat_id: ChatId, _is_typing: bool) -> std::result::Result<(), TransportError> {
                Ok(())
            }
            async fn scan_history(
                &self,
                _chat_id: ChatId,
                _since_message_id: i64,
                _limit: usize,
            ) -> std::result::Result<Vec<HistoryMessage>, TransportError> {
                Err(TransportError::ScanFailed("boom".into()))
            }
            async fn resolve_entity(&self, user_id: UserId) -> std::result::Result<EntityHandle, TransportError> {
                Ok(EntityHandle(serde_json::json!({ "user_id": user_id.0 })))
            }
        }

        let tracker = tracker();
        let transport: Arc<dyn Transport> = Arc::new(FailingTransport);
        let params = RecoveryParams {
            max_concurrent_users: 1,
            consecutive_error_threshold: 2,
            ..RecoveryParams::default()
        };
        let agent = RecoveryAgent::new(
            Connection::open_in_memory().unwrap(),
            transport,
            tracker,
            Arc::new(NeverQuarantined),
            params,
        )
        .unwrap();

        for i in 1..=5 {
            agent.record_cursor(UserId(i), ChatId(i), 0, Utc::now()).unwrap();
        }

        let op = agent.sweep().await.unwrap();
        assert_eq!(op.status, conduit_core::types::RecoveryStatus::Halted);
        assert!(op.errors >= 2);
        assert!(op.users_scanned < 5);
    }

    #[test]
    fn cursor_round_trips() {
        let (agent, _tracker) = agent_with(vec![], Arc::new(NeverQuarantined), RecoveryParams::default());
        assert!(agent.cursor(UserId(9)).unwrap().is_none());
        agent.record_cursor(UserId(9), ChatId(9), 42, Utc::now()).unwrap();
        let cursor = agent.cursor(UserId(9)).unwrap().unwrap();
        assert_eq!(cursor.last_processed_transport_message_id, 42);
    }
}
