use crate::error::CoreError;
use crate::models::{NewRecurrenceRule, RecurrenceRule};
use chrono::{NaiveDate, Utc};
use sqlx::{Sqlite, Transaction};
use uuid::Uuid;

/// Persistence for recurrence epochs. Holds no business logic; every call runs on
/// the caller's transaction.
pub struct RecurrenceRuleStore;

impl RecurrenceRuleStore {
    /// Inserts a new epoch. `latest_instance_date` starts at the pattern anchor and
    /// is corrected once the epoch has been materialized.
    pub async fn create<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        data: NewRecurrenceRule,
    ) -> Result<RecurrenceRule, CoreError> {
        let now = Utc::now();
        let rule = RecurrenceRule {
            id: Uuid::now_v7(),
            organization_id: data.organization_id,
            base_recurring_event_id: data.base_recurring_event_id,
            rule_text: data.rule_text,
            frequency: data.frequency,
            week_days: data.week_days,
            count: data.count,
            start_date: data.start_date,
            end_date: data.end_date,
            latest_instance_date: data.start_date,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"INSERT INTO recurrence_rules (id, organization_id, base_recurring_event_id, rule_text, frequency, week_days, count, start_date, end_date, latest_instance_date, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"#,
        )
        .bind(rule.id)
        .bind(rule.organization_id)
        .bind(rule.base_recurring_event_id)
        .bind(&rule.rule_text)
        .bind(rule.frequency)
        .bind(rule.week_days.to_string())
        .bind(rule.count)
        .bind(rule.start_date)
        .bind(rule.end_date)
        .bind(rule.latest_instance_date)
        .bind(rule.version)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&mut **tx)
        .await?;

        Ok(rule)
    }

    pub async fn find_by_id<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        id: Uuid,
    ) -> Result<Option<RecurrenceRule>, CoreError> {
        let rule = sqlx::query_as("SELECT * FROM recurrence_rules WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(rule)
    }

    /// Like [`find_by_id`](Self::find_by_id) but a missing rule is an error.
    pub async fn get<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        id: Uuid,
    ) -> Result<RecurrenceRule, CoreError> {
        Self::find_by_id(tx, id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Recurrence rule with id {} not found", id)))
    }

    /// All epochs of a base event in pattern order.
    pub async fn find_by_base_event<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        base_recurring_event_id: Uuid,
    ) -> Result<Vec<RecurrenceRule>, CoreError> {
        let rules = sqlx::query_as(
            "SELECT * FROM recurrence_rules WHERE base_recurring_event_id = $1 ORDER BY start_date ASC, created_at ASC, id ASC",
        )
        .bind(base_recurring_event_id)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rules)
    }

    /// Writes both bookkeeping fields, guarded by the rule's version.
    ///
    /// # Returns
    ///
    /// The rule as stored after the write, with its version bumped.
    ///
    /// # Errors
    ///
    /// `ConcurrentModification` if the stored version no longer matches
    /// `rule.version`; `NotFound` if the rule is gone.
    pub async fn update_end_date_and_latest_instance<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        rule: &RecurrenceRule,
        end_date: Option<NaiveDate>,
        latest_instance_date: NaiveDate,
    ) -> Result<RecurrenceRule, CoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"UPDATE recurrence_rules
            SET end_date = $1, latest_instance_date = $2, version = version + 1, updated_at = $3
            WHERE id = $4 AND version = $5"#,
        )
        .bind(end_date)
        .bind(latest_instance_date)
        .bind(now)
        .bind(rule.id)
        .bind(rule.version)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            let current = Self::get(tx, rule.id).await?;
            return Err(CoreError::ConcurrentModification(format!(
                "recurrence rule {} (expected version {}, found {})",
                rule.id, rule.version, current.version
            )));
        }

        Ok(RecurrenceRule {
            end_date,
            latest_instance_date,
            version: rule.version + 1,
            updated_at: now,
            ..rule.clone()
        })
    }

    /// Epochs of a base event, most recent first. An open-ended epoch sorts before
    /// any bounded one; ties fall back to creation order.
    pub async fn list_epochs_for_base_event_ordered_by_end_date_desc<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        base_recurring_event_id: Uuid,
    ) -> Result<Vec<RecurrenceRule>, CoreError> {
        let rules = sqlx::query_as(
            r#"SELECT * FROM recurrence_rules
            WHERE base_recurring_event_id = $1
            ORDER BY (end_date IS NULL) DESC, end_date DESC, created_at DESC, id DESC"#,
        )
        .bind(base_recurring_event_id)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rules)
    }

    pub async fn delete<'a>(tx: &mut Transaction<'a, Sqlite>, id: Uuid) -> Result<(), CoreError> {
        let result = sqlx::query("DELETE FROM recurrence_rules WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("Recurrence rule with id {} not found", id)));
        }
        Ok(())
    }
}
