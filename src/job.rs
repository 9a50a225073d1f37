//! The daily reconciliation run.
//!
//! One invocation walks every user in the store, decides eligibility, diffs
//! freshly fetched availability against the stored snapshots, persists each
//! user's updates as one atomic batch, and sends at most one notification per
//! user per calendar day. Everything below a store enumeration failure is
//! recoverable: a bad user, item, or send is logged and the run moves on.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use std::collections::BTreeSet;
use tracing::{debug, info, instrument, warn};

use crate::db::{self, ItemUpdate, Pool, UserRecord, WatchlistEntry};
use crate::model::RunSummary;
use crate::push::{PushError, PushService};
use crate::tmdb::AvailabilityProvider;

/// Shared handles and per-run facts, constructed once per invocation and
/// passed to every stage. There is no global state.
pub struct RunContext<'a> {
    pub pool: &'a Pool,
    pub provider: &'a dyn AvailabilityProvider,
    pub push: &'a dyn PushService,
    /// Today's UTC calendar date; the unit of the per-user notification cap.
    pub today: NaiveDate,
    pub min_watchlist_size: usize,
}

/// Execute one full run and report how many notifications went out.
///
/// A store error while enumerating users is fatal and propagates; per-user
/// failures are logged and skipped so one broken user never stalls the rest.
pub async fn run_daily_check(ctx: &RunContext<'_>) -> Result<RunSummary> {
    info!(today = %ctx.today, "starting daily watchlist availability check");

    let users = db::list_users(ctx.pool)
        .await
        .context("failed to enumerate users")?;

    let mut notifications_sent = 0u32;
    for user in &users {
        match process_user(ctx, user).await {
            Ok(true) => notifications_sent += 1,
            Ok(false) => {}
            Err(err) => warn!(?err, user_id = %user.id, "skipping user after error"),
        }
    }

    info!(
        users = users.len(),
        notifications_sent, "daily availability check complete"
    );
    Ok(RunSummary {
        success: true,
        notifications_sent,
    })
}

/// Process a single user end to end. Returns whether a notification was sent.
///
/// The eligibility predicates run in order and short-circuit, so a user
/// skipped early costs no further store reads and no provider calls.
#[instrument(skip_all, fields(user_id = %user.id))]
async fn process_user(ctx: &RunContext<'_>, user: &UserRecord) -> Result<bool> {
    let Some(token) = user.push_token.as_deref().filter(|t| !t.is_empty()) else {
        info!("no push token, skipping");
        return Ok(false);
    };
    if user.last_notified == Some(ctx.today) {
        info!("already notified today, skipping");
        return Ok(false);
    }

    let watchlist = db::fetch_watchlist(ctx.pool, &user.id)
        .await
        .context("failed to load watchlist")?;
    if watchlist.len() < ctx.min_watchlist_size {
        info!(items = watchlist.len(), "watchlist below minimum size, skipping");
        return Ok(false);
    }

    let services = db::fetch_services(ctx.pool, &user.id)
        .await
        .context("failed to load streaming services")?;
    if services.is_empty() {
        info!("no streaming services selected, skipping");
        return Ok(false);
    }

    let outcome = reconcile_watchlist(
        ctx.provider,
        &user.id,
        &user.region,
        &watchlist,
        &services,
    )
    .await;

    // The batch must land (or atomically fail) before any notification is
    // attempted, so a crash never leaves a notified-but-stale user.
    db::apply_item_updates(ctx.pool, &user.id, &outcome.updates)
        .await
        .context("failed to persist availability updates")?;

    if !outcome.has_changes {
        debug!("no availability changes");
        return Ok(false);
    }

    match ctx.push.send_watchlist_update(token).await {
        Ok(()) => {
            db::mark_notified(ctx.pool, &user.id, ctx.today)
                .await
                .context("notification sent but last notified date not persisted")?;
            info!("notification sent");
            Ok(true)
        }
        Err(PushError::InvalidToken(code)) => {
            warn!(%code, "push token permanently invalid, clearing");
            db::clear_push_token(ctx.pool, &user.id).await?;
            Ok(false)
        }
        Err(err) => {
            warn!(?err, "failed to deliver notification");
            Ok(false)
        }
    }
}

/// Result of diffing one user's watchlist against fresh provider data.
pub struct ReconcileOutcome {
    /// OR-reduction of the per-item diffs: true if any watched title became
    /// newly available on a service the user subscribes to.
    pub has_changes: bool,
    /// Pending snapshot writes, one per successfully fetched item.
    pub updates: Vec<ItemUpdate>,
}

/// Fetch and diff every watchlist item independently.
///
/// A fetch failure for one item records nothing for that item (its stored
/// snapshot and last_checked stay untouched) and never blocks the others.
async fn reconcile_watchlist(
    provider: &dyn AvailabilityProvider,
    user_id: &str,
    region: &str,
    watchlist: &[WatchlistEntry],
    services: &BTreeSet<i64>,
) -> ReconcileOutcome {
    let mut has_changes = false;
    let mut updates = Vec::with_capacity(watchlist.len());

    for item in watchlist {
        let fetched = match provider
            .fetch_availability(item.media_id, item.kind, region)
            .await
        {
            Ok(a) => a,
            Err(err) => {
                warn!(
                    ?err,
                    user_id,
                    item_id = item.id,
                    media_id = item.media_id,
                    "availability fetch failed, keeping stored snapshot"
                );
                continue;
            }
        };

        let newly = fetched.newly_streaming(&item.availability, services);
        if !newly.is_empty() {
            has_changes = true;
            info!(
                title = %item.title,
                new_services = newly.len(),
                "title newly available on subscribed service"
            );
        }

        updates.push(ItemUpdate {
            item_id: item.id,
            availability: fetched,
            checked_at: Utc::now(),
        });
    }

    ReconcileOutcome {
        has_changes,
        updates,
    }
}
