pub mod models;

use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::error::Result;
use crate::types::{AggregateKey, LatestEntry, MinuteAggregate};

pub async fn init_pool(db_path: &str) -> Result<SqlitePool> {
    let url = format!("sqlite://{db_path}?mode=rwc");
    let pool = SqlitePoolOptions::new().max_connections(8).connect(&url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

/// Persist one minute's aggregate for one key. Idempotent on re-delivery —
/// the same (source, pair, timestamp) overwrites rather than duplicates.
pub async fn upsert_minute_stat(
    pool: &SqlitePool,
    key: &AggregateKey,
    agg: &MinuteAggregate,
    timestamp: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO price_stats (source, pair, timestamp, avg_price, min_price, max_price, count)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(source, pair, timestamp) DO UPDATE SET
            avg_price = excluded.avg_price,
            min_price = excluded.min_price,
            max_price = excluded.max_price,
            count = excluded.count
        "#,
    )
    .bind(&key.source)
    .bind(&key.pair)
    .bind(timestamp)
    .bind(agg.avg())
    .bind(agg.min)
    .bind(agg.max)
    .bind(agg.count as i64)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn upsert_latest(pool: &SqlitePool, entry: &LatestEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO latest_data (source, pair, price, stored_time)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(source, pair) DO UPDATE SET
            price = excluded.price,
            stored_time = excluded.stored_time
        "#,
    )
    .bind(&entry.source)
    .bind(&entry.pair)
    .bind(entry.price)
    .bind(entry.event_ts)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn latest(pool: &SqlitePool, source: &str, pair: &str) -> Result<Option<models::LatestDataRow>> {
    let row = sqlx::query_as::<_, models::LatestDataRow>(
        "SELECT source, pair, price, stored_time FROM latest_data WHERE source = ? AND pair = ?",
    )
    .bind(source)
    .bind(pair)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Count-weighted average across every persisted minute for (source, pair),
/// optionally bounded to `timestamp >= since`.
pub async fn avg_price(
    pool: &SqlitePool,
    source: &str,
    pair: &str,
    since: Option<i64>,
) -> Result<Option<f64>> {
    let row: Option<SqliteRow> = match since {
        Some(since) => sqlx::query(
            "SELECT SUM(avg_price * count) AS weighted, SUM(count) AS total \
             FROM price_stats WHERE source = ? AND pair = ? AND timestamp >= ?",
        )
        .bind(source)
        .bind(pair)
        .bind(since)
        .fetch_optional(pool)
        .await?,
        None => sqlx::query(
            "SELECT SUM(avg_price * count) AS weighted, SUM(count) AS total \
             FROM price_stats WHERE source = ? AND pair = ?",
        )
        .bind(source)
        .bind(pair)
        .fetch_optional(pool)
        .await?,
    };

    match row {
        Some(r) => {
            let total: Option<f64> = r.try_get("total")?;
            let weighted: Option<f64> = r.try_get("weighted")?;
            match (weighted, total) {
                (Some(w), Some(t)) if t > 0.0 => Ok(Some(w / t)),
                _ => Ok(None),
            }
        }
        None => Ok(None),
    }
}

pub async fn min_price(
    pool: &SqlitePool,
    source: &str,
    pair: &str,
    since: Option<i64>,
) -> Result<Option<f64>> {
    let value: Option<f64> = match since {
        Some(since) => {
            sqlx::query_scalar("SELECT MIN(min_price) FROM price_stats WHERE source = ? AND pair = ? AND timestamp >= ?")
                .bind(source)
                .bind(pair)
                .bind(since)
                .fetch_one(pool)
                .await?
        }
        None => {
            sqlx::query_scalar("SELECT MIN(min_price) FROM price_stats WHERE source = ? AND pair = ?")
                .bind(source)
                .bind(pair)
                .fetch_one(pool)
                .await?
        }
    };
    Ok(value)
}

pub async fn max_price(
    pool: &SqlitePool,
    source: &str,
    pair: &str,
    since: Option<i64>,
) -> Result<Option<f64>> {
    let value: Option<f64> = match since {
        Some(since) => {
            sqlx::query_scalar("SELECT MAX(max_price) FROM price_stats WHERE source = ? AND pair = ? AND timestamp >= ?")
                .bind(source)
                .bind(pair)
                .bind(since)
                .fetch_one(pool)
                .await?
        }
        None => {
            sqlx::query_scalar("SELECT MAX(max_price) FROM price_stats WHERE source = ? AND pair = ?")
                .bind(source)
                .bind(pair)
                .fetch_one(pool)
                .await?
        }
    };
    Ok(value)
}

pub async fn check_health(pool: &SqlitePool) -> bool {
    sqlx::query("SELECT 1").fetch_one(pool).await.is_ok()
}
