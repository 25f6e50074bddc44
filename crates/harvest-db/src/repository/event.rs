//! # Market Event Repository
//!
//! Market events and their concrete days.
//!
//! ## Day Expansion
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  market_events                         event_days                      │
//! │  ┌──────────────────────────────┐      ┌──────────────────┐            │
//! │  │ Saturday Market              │      │ 2024-03-02       │            │
//! │  │ recurring / weekly           │─────►│ 2024-03-09       │            │
//! │  │ 2024-03-02 → 2024-03-23      │      │ 2024-03-16       │            │
//! │  └──────────────────────────────┘      │ 2024-03-23       │            │
//! │                                        └──────────────────┘            │
//! │                                                                         │
//! │  Days are expanded once on create and again on every update, so the    │
//! │  calendar is a plain range query over event_days.                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;

use chrono::NaiveDate;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use super::{begin_write, generate_id, now};
use crate::error::{DbError, DbResult};
use harvest_core::recurrence::{expand_event_days, occurrences_between, validate_range};
use harvest_core::{CalendarEntry, EventDay, MarketEvent, MarketEventDetail, NewMarketEvent};

const EVENT_COLUMNS: &str = "id, name, location, event_type, start_date, end_date, start_time, \
     end_time, recurrence_pattern, recurrence_end_date, stall_fee_cents, notes, created_at, \
     updated_at";

const DAY_COLUMNS: &str = "id, event_id, event_date, start_time, end_time";

/// Writes one `event_days` row per expanded date.
async fn insert_days(
    conn: &mut SqliteConnection,
    event_id: &str,
    input: &NewMarketEvent,
    dates: &[NaiveDate],
) -> DbResult<()> {
    for date in dates {
        sqlx::query(
            "INSERT INTO event_days (id, event_id, event_date, start_time, end_time)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(generate_id())
        .bind(event_id)
        .bind(date)
        .bind(input.start_time)
        .bind(input.end_time)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct MarketEventRepository {
    pool: SqlitePool,
}

impl MarketEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        MarketEventRepository { pool }
    }

    /// Creates an event and its days in one transaction.
    pub async fn create(&self, input: &NewMarketEvent) -> DbResult<MarketEventDetail> {
        input.validate()?;
        let dates = expand_event_days(&input.schedule())?;

        let id = generate_id();
        let now = now();
        let mut tx = begin_write(&self.pool).await?;

        sqlx::query(
            "INSERT INTO market_events
                (id, name, location, event_type, start_date, end_date, start_time, end_time,
                 recurrence_pattern, recurrence_end_date, stall_fee_cents, notes, created_at,
                 updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(input.name.trim())
        .bind(&input.location)
        .bind(input.event_type)
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(input.start_time)
        .bind(input.end_time)
        .bind(input.recurrence_pattern)
        .bind(input.recurrence_end_date)
        .bind(input.stall_fee_cents)
        .bind(&input.notes)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        insert_days(&mut tx, &id, input, &dates).await?;
        tx.commit().await?;

        info!(event_id = %id, days = dates.len(), "Market event created");
        self.get_detail(&id).await
    }

    pub async fn get(&self, id: &str) -> DbResult<MarketEvent> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM market_events WHERE id = ?");
        sqlx::query_as::<_, MarketEvent>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Market event", id))
    }

    pub async fn get_detail(&self, id: &str) -> DbResult<MarketEventDetail> {
        let event = self.get(id).await?;
        let sql =
            format!("SELECT {DAY_COLUMNS} FROM event_days WHERE event_id = ? ORDER BY event_date");
        let days = sqlx::query_as::<_, EventDay>(&sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await?;

        Ok(MarketEventDetail { event, days })
    }

    /// Lists events, most recent start first.
    pub async fn list(&self) -> DbResult<Vec<MarketEvent>> {
        let sql =
            format!("SELECT {EVENT_COLUMNS} FROM market_events ORDER BY start_date DESC, name");
        let events = sqlx::query_as::<_, MarketEvent>(&sql)
            .fetch_all(&self.pool)
            .await?;

        debug!(count = events.len(), "Listed market events");
        Ok(events)
    }

    /// Every event day in `from..=to`, in date order.
    pub async fn calendar(&self, from: NaiveDate, to: NaiveDate) -> DbResult<Vec<CalendarEntry>> {
        validate_range(from, to)?;

        let sql = format!("SELECT {DAY_COLUMNS} FROM event_days WHERE event_date BETWEEN ? AND ?");
        let days = sqlx::query_as::<_, EventDay>(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;

        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM market_events
             WHERE id IN (SELECT event_id FROM event_days WHERE event_date BETWEEN ? AND ?)"
        );
        let events: HashMap<String, MarketEvent> = sqlx::query_as::<_, MarketEvent>(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect();

        let entries = occurrences_between(&days, from, to)
            .into_iter()
            .filter_map(|day| {
                let event = events.get(&day.event_id)?;
                Some(CalendarEntry {
                    event_id: event.id.clone(),
                    event_day_id: day.id,
                    name: event.name.clone(),
                    location: event.location.clone(),
                    event_type: event.event_type,
                    date: day.event_date,
                    start_time: day.start_time,
                    end_time: day.end_time,
                })
            })
            .collect();

        Ok(entries)
    }

    /// Replaces an event and re-expands its days.
    ///
    /// Orders reference the event, not a day, so they are unaffected.
    pub async fn update(&self, id: &str, input: &NewMarketEvent) -> DbResult<MarketEventDetail> {
        input.validate()?;
        let dates = expand_event_days(&input.schedule())?;

        let mut tx = begin_write(&self.pool).await?;
        let result = sqlx::query(
            "UPDATE market_events SET
                name = ?, location = ?, event_type = ?, start_date = ?, end_date = ?,
                start_time = ?, end_time = ?, recurrence_pattern = ?, recurrence_end_date = ?,
                stall_fee_cents = ?, notes = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(input.name.trim())
        .bind(&input.location)
        .bind(input.event_type)
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(input.start_time)
        .bind(input.end_time)
        .bind(input.recurrence_pattern)
        .bind(input.recurrence_end_date)
        .bind(input.stall_fee_cents)
        .bind(&input.notes)
        .bind(now())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Market event", id));
        }

        sqlx::query("DELETE FROM event_days WHERE event_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        insert_days(&mut tx, id, input, &dates).await?;
        tx.commit().await?;

        info!(event_id = %id, days = dates.len(), "Market event updated");
        self.get_detail(id).await
    }

    /// Deletes an event and its days; linked orders are kept, unlinked.
    pub async fn delete(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM market_events WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Market event", id));
        }

        info!(event_id = %id, "Market event deleted");
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{date, test_db};
    use harvest_core::recurrence::{EventType, RecurrencePattern};

    fn saturday_market() -> NewMarketEvent {
        NewMarketEvent {
            name: "Saturday Market".into(),
            location: Some("Old Biscuit Mill".into()),
            event_type: EventType::Recurring,
            start_date: date("2024-03-02"),
            end_date: None,
            start_time: None,
            end_time: None,
            recurrence_pattern: Some(RecurrencePattern::Weekly),
            recurrence_end_date: Some(date("2024-03-23")),
            stall_fee_cents: 35000,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_create_expands_days() {
        let db = test_db().await;
        let detail = db.events().create(&saturday_market()).await.unwrap();

        assert_eq!(detail.days.len(), 4);
        assert_eq!(detail.days[0].event_date, date("2024-03-02"));
        assert_eq!(detail.days[3].event_date, date("2024-03-23"));
    }

    #[tokio::test]
    async fn test_recurring_requires_pattern() {
        let db = test_db().await;
        let mut input = saturday_market();
        input.recurrence_pattern = None;
        assert!(db.events().create(&input).await.is_err());
    }

    #[tokio::test]
    async fn test_calendar_range() {
        let db = test_db().await;
        db.events().create(&saturday_market()).await.unwrap();
        db.events()
            .create(&NewMarketEvent {
                name: "Easter Fair".into(),
                location: None,
                event_type: EventType::MultiDay,
                start_date: date("2024-03-08"),
                end_date: Some(date("2024-03-10")),
                start_time: None,
                end_time: None,
                recurrence_pattern: None,
                recurrence_end_date: None,
                stall_fee_cents: 0,
                notes: None,
            })
            .await
            .unwrap();

        let entries = db.events().calendar(date("2024-03-08"), date("2024-03-10")).await.unwrap();
        let dates: Vec<_> = entries.iter().map(|e| e.date).collect();
        assert_eq!(entries.len(), 4);
        assert!(dates.windows(2).all(|w| w[0] <= w[1]));
        let saturday = date("2024-03-09");
        assert!(entries.iter().any(|e| e.name == "Saturday Market" && e.date == saturday));

        assert!(db.events().calendar(date("2024-03-10"), date("2024-03-01")).await.is_err());
    }

    #[tokio::test]
    async fn test_update_reexpands_and_delete() {
        let db = test_db().await;
        let created = db.events().create(&saturday_market()).await.unwrap();

        let mut input = saturday_market();
        input.recurrence_pattern = Some(RecurrencePattern::Biweekly);
        let updated = db.events().update(&created.event.id, &input).await.unwrap();
        assert_eq!(updated.days.len(), 2);

        db.events().delete(&created.event.id).await.unwrap();
        assert!(db.events().list().await.unwrap().is_empty());
        assert!(matches!(
            db.events().get(&created.event.id).await,
            Err(DbError::NotFound { .. })
        ));
    }
}
