//! Time-ordered id generation.
//!
//! All primary keys are v7 UUIDs so insertion order approximates index
//! order, keeping the `(status, scheduled_for)` claim index selective.

use uuid::Uuid;

/// Generate a new time-ordered id for a database row.
#[inline]
pub fn new_id() -> Uuid {
    Uuid::now_v7()
}
