//! Postgres aggregator backend.
//!
//! Projects the bot's vote tables into a [`StatsSnapshot`]. Queries are
//! scoped to one guild and issued per snapshot request; the scheduler already
//! guarantees at most one request per guild per tick.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::snapshot::{
    Item, ItemFlags, ItemOption, ItemWindow, StatsSnapshot, SummaryTotals, TodayCounters,
};

use super::{AggregatorError, StatsAggregator};

pub struct PostgresStatsAggregator {
    pool: PgPool,
}

impl PostgresStatsAggregator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_items(
        &self,
        guild_id: i64,
        active: bool,
    ) -> Result<Vec<Item>, AggregatorError> {
        let rows: Vec<ItemRow> = if active {
            sqlx::query_as(
                r#"
                SELECT v.id, v.title, v.starts_at, v.ends_at, v.multi_select, v.anonymous,
                       COUNT(DISTINCT b.user_id) AS participant_count
                FROM votes v
                LEFT JOIN ballots b ON b.vote_id = v.id
                WHERE v.guild_id = $1 AND v.status = 'active'
                GROUP BY v.id
                ORDER BY v.ends_at ASC
                "#,
            )
            .bind(guild_id)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as(
                r#"
                SELECT v.id, v.title, v.starts_at, v.ends_at, v.multi_select, v.anonymous,
                       COUNT(DISTINCT b.user_id) AS participant_count
                FROM votes v
                LEFT JOIN ballots b ON b.vote_id = v.id
                WHERE v.guild_id = $1
                  AND v.status = 'completed'
                  AND v.completed_at >= NOW() - INTERVAL '24 hours'
                GROUP BY v.id
                ORDER BY v.completed_at DESC
                LIMIT 10
                "#,
            )
            .bind(guild_id)
            .fetch_all(&self.pool)
            .await?
        };

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let item_ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let option_rows: Vec<OptionRow> = sqlx::query_as(
            r#"
            SELECT o.vote_id AS item_id, o.id AS option_id, o.label,
                   COUNT(b.user_id) AS vote_count
            FROM vote_options o
            LEFT JOIN ballots b ON b.option_id = o.id
            WHERE o.vote_id = ANY($1)
            GROUP BY o.vote_id, o.id, o.label, o.position
            ORDER BY o.vote_id, o.position
            "#,
        )
        .bind(&item_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut options_by_item: HashMap<i64, Vec<ItemOption>> = HashMap::new();
        for row in option_rows {
            options_by_item
                .entry(row.item_id)
                .or_default()
                .push(ItemOption {
                    option_id: row.option_id,
                    label: row.label,
                    vote_count: row.vote_count.max(0) as u64,
                });
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let options = options_by_item.remove(&row.id).unwrap_or_default();
                Item {
                    id: row.id,
                    title: row.title,
                    window: ItemWindow {
                        start: row.starts_at,
                        end: row.ends_at,
                    },
                    flags: ItemFlags {
                        multi_select: row.multi_select,
                        anonymous: row.anonymous,
                    },
                    participant_count: row.participant_count.max(0) as u64,
                    options,
                }
            })
            .collect())
    }

    async fn fetch_today_counters(
        &self,
        guild_id: i64,
        day_start: DateTime<Utc>,
    ) -> Result<TodayCounters, AggregatorError> {
        let row: TodayRow = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE v.created_at >= $2) AS created,
                COUNT(*) FILTER (WHERE v.completed_at >= $2) AS completed,
                (SELECT COUNT(DISTINCT b.user_id)
                 FROM ballots b
                 JOIN votes v2 ON v2.id = b.vote_id
                 WHERE v2.guild_id = $1 AND b.cast_at >= $2) AS total_participants
            FROM votes v
            WHERE v.guild_id = $1
            "#,
        )
        .bind(guild_id)
        .bind(day_start)
        .fetch_one(&self.pool)
        .await?;

        Ok(TodayCounters {
            created: row.created.max(0) as u64,
            completed: row.completed.max(0) as u64,
            total_participants: row.total_participants.max(0) as u64,
        })
    }

    async fn fetch_active_participants(&self, guild_id: i64) -> Result<u64, AggregatorError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(DISTINCT b.user_id)
            FROM ballots b
            JOIN votes v ON v.id = b.vote_id
            WHERE v.guild_id = $1 AND v.status = 'active'
            "#,
        )
        .bind(guild_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl StatsAggregator for PostgresStatsAggregator {
    async fn get_snapshot(&self, guild_id: u64) -> Result<StatsSnapshot, AggregatorError> {
        let generated_at = Utc::now();
        let guild = guild_id as i64;
        let day_start = day_start_utc(generated_at);

        let active_items = self.fetch_items(guild, true).await?;
        let recent_completed = self.fetch_items(guild, false).await?;
        let today_counters = self.fetch_today_counters(guild, day_start).await?;
        let total_active_participants = self.fetch_active_participants(guild).await?;

        Ok(StatsSnapshot {
            summary: SummaryTotals {
                active_count: active_items.len() as u64,
                total_active_participants,
            },
            active_items,
            recent_completed,
            today_counters,
            generated_at,
        })
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

/// Midnight UTC of the day containing `at`.
fn day_start_utc(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc()
}

#[derive(FromRow)]
struct ItemRow {
    id: i64,
    title: String,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    multi_select: bool,
    anonymous: bool,
    participant_count: i64,
}

#[derive(FromRow)]
struct OptionRow {
    item_id: i64,
    option_id: i64,
    label: String,
    vote_count: i64,
}

#[derive(FromRow)]
struct TodayRow {
    created: i64,
    completed: i64,
    total_participants: i64,
}
