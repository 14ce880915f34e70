//! Narrow trait the Activity Tracker uses to ask "is this user quarantined
//! right now?" without depending on the quarantine crate's storage or cache
//! implementation.

use crate::types::UserId;

/// Implemented by the quarantine manager; consulted on every inbound
/// message before it is buffered so a silenced user's messages never enter
/// the generative pipeline's window in the first place.
pub trait QuarantineGate: Send + Sync {
    fn is_active(&self, user_id: UserId) -> bool;
}
