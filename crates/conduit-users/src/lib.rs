//! `conduit-users` — customer status / lifetime-value ledger.
//!
//! `user_current_status` is the live snapshot a reviewer or the Recovery
//! Agent reads; `status_transitions` is the append-only audit trail it is
//! derived from. The snapshot is never the source of truth on its own —
//! it is always re-derivable by folding the transition log.

pub mod db;
pub mod error;
pub mod store;

pub use error::{Result, UserError};

#[cfg(test)]
mod tests {
    use conduit_core::types::{CustomerStatus, UserId};
    use rusqlite::Connection;

    use crate::db::init_db;
    use crate::store::{apply_transition, get_or_create_status, get_status, list_transitions, set_nickname};

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        conn
    }

    #[test]
    fn unknown_user_has_no_status() {
        let conn = conn();
        assert!(get_status(&conn, UserId(1)).unwrap().is_none());
    }

    #[test]
    fn get_or_create_defaults_to_prospect() {
        let conn = conn();
        let status = get_or_create_status(&conn, UserId(1)).unwrap();
        assert_eq!(status.customer_status, CustomerStatus::Prospect);
        assert_eq!(status.ltv_total_usd, 0.0);
    }

    #[test]
    fn transition_updates_snapshot_and_logs_history() {
        let mut conn = conn();
        apply_transition(
            &mut conn,
            UserId(1),
            Some(CustomerStatus::LeadQualified),
            0.0,
            Some("replied with interest"),
            "analyzer",
        )
        .unwrap();

        let status = get_status(&conn, UserId(1)).unwrap().unwrap();
        assert_eq!(status.customer_status, CustomerStatus::LeadQualified);

        apply_transition(
            &mut conn,
            UserId(1),
            Some(CustomerStatus::Customer),
            49.99,
            Some("first purchase"),
            "reviewer:alice",
        )
        .unwrap();

        let status = get_status(&conn, UserId(1)).unwrap().unwrap();
        assert_eq!(status.customer_status, CustomerStatus::Customer);
        assert_eq!(status.ltv_total_usd, 49.99);

        let history = list_transitions(&conn, UserId(1)).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].to_status, Some(CustomerStatus::LeadQualified));
        assert_eq!(history[1].from_status, Some(CustomerStatus::LeadQualified));
        assert_eq!(history[1].delta_ltv, 49.99);
    }

    #[test]
    fn ltv_only_delta_does_not_change_status() {
        let mut conn = conn();
        apply_transition(&mut conn, UserId(2), Some(CustomerStatus::Customer), 10.0, None, "billing")
            .unwrap();
        apply_transition(&mut conn, UserId(2), None, 5.0, Some("repeat purchase"), "billing")
            .unwrap();

        let status = get_status(&conn, UserId(2)).unwrap().unwrap();
        assert_eq!(status.customer_status, CustomerStatus::Customer);
        assert_eq!(status.ltv_total_usd, 15.0);
    }

    #[test]
    fn nickname_survives_status_changes() {
        let mut conn = conn();
        set_nickname(&conn, UserId(3), Some("Jamie")).unwrap();

        apply_transition(&mut conn, UserId(3), Some(CustomerStatus::LeadQualified), 0.0, None, "analyzer")
            .unwrap();

        let status = get_status(&conn, UserId(3)).unwrap().unwrap();
        assert_eq!(status.nickname.as_deref(), Some("Jamie"));
        assert_eq!(status.customer_status, CustomerStatus::LeadQualified);
    }
}
