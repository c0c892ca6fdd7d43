use crate::error::CoreError;
use crate::models::{BaseRecurringEvent, FieldChanges, InstanceTemplate, NewBaseEventData};
use chrono::{NaiveDate, Utc};
use sqlx::{Sqlite, Transaction};
use uuid::Uuid;

/// Persistence for series templates.
pub struct BaseEventRepository;

impl BaseEventRepository {
    pub async fn create<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        data: NewBaseEventData,
    ) -> Result<BaseRecurringEvent, CoreError> {
        if data.title.trim().is_empty() {
            return Err(CoreError::InvalidInput("Event title cannot be empty".to_string()));
        }
        if data.span_days < 0 {
            return Err(CoreError::InvalidInput("Event span cannot be negative".to_string()));
        }

        let now = Utc::now();
        let event = BaseRecurringEvent {
            id: Uuid::now_v7(),
            organization_id: data.organization_id,
            title: data.title,
            description: data.description,
            location: data.location,
            all_day: data.all_day,
            start_time: data.start_time,
            end_time: data.end_time,
            span_days: data.span_days,
            start_date: data.start_date,
            end_date: None,
            recurring: false,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"INSERT INTO base_recurring_events (id, organization_id, title, description, location, all_day, start_time, end_time, span_days, start_date, end_date, recurring, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"#,
        )
        .bind(event.id)
        .bind(event.organization_id)
        .bind(&event.title)
        .bind(&event.description)
        .bind(&event.location)
        .bind(event.all_day)
        .bind(event.start_time)
        .bind(event.end_time)
        .bind(event.span_days)
        .bind(event.start_date)
        .bind(event.end_date)
        .bind(event.recurring)
        .bind(event.created_at)
        .bind(event.updated_at)
        .execute(&mut **tx)
        .await?;

        Ok(event)
    }

    pub async fn find_by_id<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        id: Uuid,
    ) -> Result<Option<BaseRecurringEvent>, CoreError> {
        let event = sqlx::query_as("SELECT * FROM base_recurring_events WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(event)
    }

    pub async fn get<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        id: Uuid,
    ) -> Result<BaseRecurringEvent, CoreError> {
        Self::find_by_id(tx, id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Base recurring event with id {} not found", id)))
    }

    /// Mirrors an epoch's end date onto the template.
    pub async fn update_end_date<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        id: Uuid,
        end_date: Option<NaiveDate>,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE base_recurring_events SET end_date = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(end_date)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("Base recurring event with id {} not found", id)));
        }
        Ok(())
    }

    /// Sets the `recurring` flag together with the mirrored end date.
    pub async fn mark_recurring<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        id: Uuid,
        end_date: Option<NaiveDate>,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE base_recurring_events SET recurring = 1, end_date = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(end_date)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("Base recurring event with id {} not found", id)));
        }
        Ok(())
    }

    /// Clears the `recurring` flag. The end date is left as it was.
    pub async fn mark_non_recurring<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        id: Uuid,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE base_recurring_events SET recurring = 0, updated_at = $1 WHERE id = $2",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("Base recurring event with id {} not found", id)));
        }
        Ok(())
    }

    /// Applies template field changes and returns the updated event.
    pub async fn apply_changes<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        event: &BaseRecurringEvent,
        changes: &FieldChanges,
    ) -> Result<BaseRecurringEvent, CoreError> {
        let mut template = InstanceTemplate::from(event);
        changes.apply_to_template(&mut template);
        if template.title.trim().is_empty() {
            return Err(CoreError::InvalidInput("Event title cannot be empty".to_string()));
        }

        let updated = BaseRecurringEvent {
            title: template.title,
            description: template.description,
            location: template.location,
            all_day: template.all_day,
            start_time: template.start_time,
            end_time: template.end_time,
            updated_at: Utc::now(),
            ..event.clone()
        };

        sqlx::query(
            r#"UPDATE base_recurring_events
            SET title = $1, description = $2, location = $3, all_day = $4, start_time = $5, end_time = $6, updated_at = $7
            WHERE id = $8"#,
        )
        .bind(&updated.title)
        .bind(&updated.description)
        .bind(&updated.location)
        .bind(updated.all_day)
        .bind(updated.start_time)
        .bind(updated.end_time)
        .bind(updated.updated_at)
        .bind(updated.id)
        .execute(&mut **tx)
        .await?;

        Ok(updated)
    }
}
