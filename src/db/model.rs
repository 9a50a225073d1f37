//! View models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use crate::model::{Availability, MediaKind};
use chrono::{DateTime, NaiveDate, Utc};

/// User slice used by the run to gate eligibility and deliver notifications.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub push_token: Option<String>,
    pub last_notified: Option<NaiveDate>,
    pub region: String,
}

/// Watchlist slice used by the reconciler.
#[derive(Debug, Clone)]
pub struct WatchlistEntry {
    pub id: i64,
    pub media_id: i64,
    pub kind: MediaKind,
    pub title: String,
    pub availability: Availability,
}

/// Pending per-item write produced by the reconciler, applied as one batch.
#[derive(Debug, Clone)]
pub struct ItemUpdate {
    pub item_id: i64,
    pub availability: Availability,
    pub checked_at: DateTime<Utc>,
}
