use super::model::{ItemUpdate, UserRecord, WatchlistEntry};
use crate::model::{Availability, MediaKind};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    // Pass through non-sqlite schemes
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }

    // In-memory URLs like sqlite::memory: or sqlite::memory:?cache=shared
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    // Strip prefix and optional //
    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    // Separate query string if any
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        // nothing to normalize
        return url.to_string();
    }

    // Expand leading ~/ to HOME
    let expanded_path = if let Some(rest) = path_part.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            format!("{}/{}", home.trim_end_matches('/'), rest)
        } else {
            path_part.to_string()
        }
    } else {
        path_part.to_string()
    };

    // Ensure parent directory exists if any
    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

const DATE_FMT: &str = "%Y-%m-%d";

fn parse_stored_date(raw: Option<String>) -> Result<Option<NaiveDate>> {
    raw.map(|s| {
        NaiveDate::parse_from_str(&s, DATE_FMT)
            .with_context(|| format!("invalid stored date '{}'", s))
    })
    .transpose()
}

/// List every user record in the store. No eligibility filtering happens
/// here; a read error is fatal to the whole run.
#[instrument(skip_all)]
pub async fn list_users(pool: &Pool) -> Result<Vec<UserRecord>> {
    let rows = sqlx::query(
        "SELECT id, push_token, last_notified, region FROM users ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let id: String = row.get("id");
            let push_token: Option<String> = row.get("push_token");
            let last_notified = parse_stored_date(row.get("last_notified"))
                .with_context(|| format!("user {}", id))?;
            Ok(UserRecord {
                id,
                push_token,
                last_notified,
                region: row.get("region"),
            })
        })
        .collect()
}

/// Load a user's full watchlist, including each item's stored snapshot.
#[instrument(skip_all)]
pub async fn fetch_watchlist(pool: &Pool, user_id: &str) -> Result<Vec<WatchlistEntry>> {
    let rows = sqlx::query(
        "SELECT id, media_id, media_kind, title, availability FROM watchlist_items WHERE user_id = ? ORDER BY id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let id: i64 = row.get("id");
            let kind_str: String = row.get("media_kind");
            let kind = MediaKind::parse_kind(&kind_str)
                .ok_or_else(|| anyhow!("item {} has unknown media kind {}", id, kind_str))?;
            let raw: String = row.get("availability");
            let availability: Availability = serde_json::from_str(&raw)
                .with_context(|| format!("item {} has malformed availability snapshot", id))?;
            Ok(WatchlistEntry {
                id,
                media_id: row.get("media_id"),
                kind,
                title: row.get("title"),
                availability,
            })
        })
        .collect()
}

/// Load the user's selected streaming services as a set of provider ids.
#[instrument(skip_all)]
pub async fn fetch_services(pool: &Pool, user_id: &str) -> Result<BTreeSet<i64>> {
    let ids: Vec<i64> =
        sqlx::query_scalar("SELECT provider_id FROM streaming_services WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(pool)
            .await?;
    Ok(ids.into_iter().collect())
}

/// Apply all pending snapshot updates for one user in a single transaction.
/// Either every item's availability and last_checked land, or none do.
#[instrument(skip_all)]
pub async fn apply_item_updates(pool: &Pool, user_id: &str, updates: &[ItemUpdate]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for update in updates {
        let snapshot = serde_json::to_string(&update.availability)?;
        sqlx::query(
            "UPDATE watchlist_items SET availability = ?, last_checked = ? WHERE id = ? AND user_id = ?",
        )
        .bind(snapshot)
        .bind(update.checked_at)
        .bind(update.item_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Record that the user was notified on `date`, capping sends at one per day.
#[instrument(skip_all)]
pub async fn mark_notified(pool: &Pool, user_id: &str, date: NaiveDate) -> Result<()> {
    sqlx::query("UPDATE users SET last_notified = ? WHERE id = ?")
        .bind(date.format(DATE_FMT).to_string())
        .bind(user_id)
        .execute(pool)
        .await
        .context("failed to persist last notified date")?;
    Ok(())
}

/// Drop a permanently invalid push token so future runs skip the user until
/// a device re-registers.
#[instrument(skip_all)]
pub async fn clear_push_token(pool: &Pool, user_id: &str) -> Result<()> {
    sqlx::query("UPDATE users SET push_token = NULL WHERE id = ?")
        .bind(user_id)
        .execute(pool)
        .await
        .context("failed to clear push token")?;
    Ok(())
}

/// Insert or replace a user record. Used by seeding and account-facing code;
/// the daily run itself only mutates `last_notified` and `push_token`.
#[instrument(skip_all)]
pub async fn upsert_user(
    pool: &Pool,
    user_id: &str,
    push_token: Option<&str>,
    last_notified: Option<NaiveDate>,
    region: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO users (id, push_token, last_notified, region) VALUES (?, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET push_token = excluded.push_token, \
         last_notified = excluded.last_notified, region = excluded.region",
    )
    .bind(user_id)
    .bind(push_token)
    .bind(last_notified.map(|d| d.format(DATE_FMT).to_string()))
    .bind(region)
    .execute(pool)
    .await?;
    Ok(())
}

/// Add a watchlist item with an explicit starting snapshot and return its id.
#[instrument(skip_all)]
pub async fn insert_watchlist_item(
    pool: &Pool,
    user_id: &str,
    media_id: i64,
    kind: MediaKind,
    title: &str,
    availability: &Availability,
) -> Result<i64> {
    let snapshot = serde_json::to_string(availability)?;
    let rec = sqlx::query(
        "INSERT INTO watchlist_items (user_id, media_id, media_kind, title, availability) \
         VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(user_id)
    .bind(media_id)
    .bind(kind.as_str())
    .bind(title)
    .bind(snapshot)
    .fetch_one(pool)
    .await?;
    Ok(rec.get::<i64, _>("id"))
}

/// Replace the user's selected-services set. Duplicate ids collapse via the
/// primary key.
#[instrument(skip_all)]
pub async fn replace_services(pool: &Pool, user_id: &str, provider_ids: &[i64]) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM streaming_services WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    for id in provider_ids {
        sqlx::query(
            "INSERT OR IGNORE INTO streaming_services (user_id, provider_id) VALUES (?, ?)",
        )
        .bind(user_id)
        .bind(id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// The stored last_checked timestamp for one item, if any.
pub async fn item_last_checked(pool: &Pool, item_id: i64) -> Result<Option<DateTime<Utc>>> {
    let ts: Option<DateTime<Utc>> =
        sqlx::query_scalar("SELECT last_checked FROM watchlist_items WHERE id = ?")
            .bind(item_id)
            .fetch_one(pool)
            .await?;
    Ok(ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn snapshot(streaming: &[i64]) -> Availability {
        Availability {
            streaming: streaming.iter().copied().collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn list_users_parses_dates_and_tokens() {
        let pool = setup_pool().await;
        let yesterday = NaiveDate::from_ymd_opt(2026, 8, 23).unwrap();
        upsert_user(&pool, "alice", Some("tok-1"), Some(yesterday), "US")
            .await
            .unwrap();
        upsert_user(&pool, "bob", None, None, "DE").await.unwrap();

        let users = list_users(&pool).await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].id, "alice");
        assert_eq!(users[0].push_token.as_deref(), Some("tok-1"));
        assert_eq!(users[0].last_notified, Some(yesterday));
        assert_eq!(users[1].region, "DE");
        assert!(users[1].push_token.is_none());
    }

    #[tokio::test]
    async fn new_items_start_with_the_empty_snapshot() {
        let pool = setup_pool().await;
        upsert_user(&pool, "alice", None, None, "US").await.unwrap();
        sqlx::query(
            "INSERT INTO watchlist_items (user_id, media_id, media_kind, title) VALUES ('alice', 550, 'movie', 'Fight Club')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let items = fetch_watchlist(&pool, "alice").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].availability, Availability::default());
        assert_eq!(items[0].kind, MediaKind::Movie);
    }

    #[tokio::test]
    async fn snapshot_survives_a_write_read_round_trip() {
        let pool = setup_pool().await;
        upsert_user(&pool, "alice", None, None, "US").await.unwrap();
        let stored = Availability {
            streaming: [8, 337].into_iter().collect(),
            rent: [2].into_iter().collect(),
            buy: [2, 3].into_iter().collect(),
        };
        let item_id = insert_watchlist_item(&pool, "alice", 550, MediaKind::Movie, "Fight Club", &stored)
            .await
            .unwrap();

        let items = fetch_watchlist(&pool, "alice").await.unwrap();
        assert_eq!(items[0].id, item_id);
        assert_eq!(items[0].availability, stored);
    }

    #[tokio::test]
    async fn apply_item_updates_is_atomic_per_user() {
        let pool = setup_pool().await;
        upsert_user(&pool, "alice", None, None, "US").await.unwrap();
        let empty = Availability::default();
        let a = insert_watchlist_item(&pool, "alice", 1, MediaKind::Movie, "A", &empty)
            .await
            .unwrap();
        let b = insert_watchlist_item(&pool, "alice", 2, MediaKind::Tv, "B", &empty)
            .await
            .unwrap();

        let now = Utc::now();
        let updates = vec![
            ItemUpdate {
                item_id: a,
                availability: snapshot(&[8]),
                checked_at: now,
            },
            ItemUpdate {
                item_id: b,
                availability: snapshot(&[9]),
                checked_at: now,
            },
        ];
        apply_item_updates(&pool, "alice", &updates).await.unwrap();

        let items = fetch_watchlist(&pool, "alice").await.unwrap();
        assert_eq!(items[0].availability, snapshot(&[8]));
        assert_eq!(items[1].availability, snapshot(&[9]));
        assert!(item_last_checked(&pool, a).await.unwrap().is_some());
        assert!(item_last_checked(&pool, b).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn services_collapse_duplicates_into_a_set() {
        let pool = setup_pool().await;
        upsert_user(&pool, "alice", None, None, "US").await.unwrap();
        replace_services(&pool, "alice", &[8, 8, 337]).await.unwrap();

        let services = fetch_services(&pool, "alice").await.unwrap();
        assert_eq!(services, [8, 337].into_iter().collect());
    }

    #[tokio::test]
    async fn mark_notified_and_clear_token_round_trip() {
        let pool = setup_pool().await;
        upsert_user(&pool, "alice", Some("tok"), None, "US")
            .await
            .unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 8, 24).unwrap();

        mark_notified(&pool, "alice", today).await.unwrap();
        clear_push_token(&pool, "alice").await.unwrap();

        let users = list_users(&pool).await.unwrap();
        assert_eq!(users[0].last_notified, Some(today));
        assert!(users[0].push_token.is_none());
    }

    #[test]
    fn prepare_sqlite_url_passes_memory_urls_through() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("sqlite::memory:?cache=shared"),
            "sqlite::memory:?cache=shared"
        );
    }

    #[test]
    fn prepare_sqlite_url_normalizes_file_paths() {
        assert_eq!(
            prepare_sqlite_url("sqlite:///tmp/notifier/test.db"),
            "sqlite:///tmp/notifier/test.db"
        );
    }
}
