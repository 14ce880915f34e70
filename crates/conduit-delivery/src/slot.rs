//! Per-user delivery ordering. `ReviewQueue::next_approved` pops in
//! strict global FIFO order, so two items for the same user are always
//! popped in their approval order; the concern this module addresses is a
//! second task reaching that user's send sequence before the first task's
//! is done, which would let a later-approved bubble land ahead of an
//! earlier one. Each user gets one async mutex; holding it for the whole
//! read-delay/typing/send sequence serializes deliveries per user while
//! leaving unrelated users free to proceed in parallel.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

pub struct DeliverySlots {
    slots: DashMap<i64, Arc<Mutex<()>>>,
}

impl DeliverySlots {
    pub fn new() -> Self {
        Self { slots: DashMap::new() }
    }

    pub fn slot_for(&self, user_id: i64) -> Arc<Mutex<()>> {
        self.slots.entry(user_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

impl Default for DeliverySlots {
    fn default() -> Self {
        Self::new()
    }
}
