use crate::error::CoreError;
use crate::models::{
    EventInstance, FieldChanges, InstanceStatus, InstanceTemplate, RecurrenceRule,
};
use crate::repository::rules::RecurrenceRuleStore;
use chrono::{Days, NaiveDate, Utc};
use sqlx::{QueryBuilder, Sqlite, Transaction};
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

/// Keeps `IN (...)` lists well under SQLite's bound-parameter limit.
pub(crate) const BIND_CHUNK_SIZE: usize = 500;

/// Persistence for materialized occurrences. Rows are soft-deleted only.
pub struct InstanceRepository;

impl InstanceRepository {
    pub async fn find_by_id<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        id: Uuid,
    ) -> Result<Option<EventInstance>, CoreError> {
        let instance = sqlx::query_as("SELECT * FROM event_instances WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(instance)
    }

    pub async fn get<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        id: Uuid,
    ) -> Result<EventInstance, CoreError> {
        Self::find_by_id(tx, id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Event instance with id {} not found", id)))
    }

    /// Live occurrences of a rule in date order.
    pub async fn find_live_for_rule<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        rule_id: Uuid,
    ) -> Result<Vec<EventInstance>, CoreError> {
        let instances = sqlx::query_as(
            "SELECT * FROM event_instances WHERE recurrence_rule_id = $1 AND status = $2 ORDER BY start_date ASC",
        )
        .bind(rule_id)
        .bind(InstanceStatus::Active)
        .fetch_all(&mut **tx)
        .await?;
        Ok(instances)
    }

    /// Live occurrences of a rule dated on or after `from`.
    pub async fn find_live_for_rule_from<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        rule_id: Uuid,
        from: NaiveDate,
    ) -> Result<Vec<EventInstance>, CoreError> {
        let instances = sqlx::query_as(
            r#"SELECT * FROM event_instances
            WHERE recurrence_rule_id = $1 AND status = $2 AND start_date >= $3
            ORDER BY start_date ASC"#,
        )
        .bind(rule_id)
        .bind(InstanceStatus::Active)
        .bind(from)
        .fetch_all(&mut **tx)
        .await?;
        Ok(instances)
    }

    /// Live occurrences of a base event, across all epochs, within `[from, to]`.
    pub async fn find_between<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        base_recurring_event_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<EventInstance>, CoreError> {
        let instances = sqlx::query_as(
            r#"SELECT * FROM event_instances
            WHERE base_recurring_event_id = $1 AND status = $2 AND start_date BETWEEN $3 AND $4
            ORDER BY start_date ASC, id ASC"#,
        )
        .bind(base_recurring_event_id)
        .bind(InstanceStatus::Active)
        .bind(from)
        .bind(to)
        .fetch_all(&mut **tx)
        .await?;
        Ok(instances)
    }

    /// `max(start_date)` over the live occurrences of a rule.
    pub async fn max_live_date<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        rule_id: Uuid,
    ) -> Result<Option<NaiveDate>, CoreError> {
        let date = sqlx::query_scalar(
            r#"SELECT start_date FROM event_instances
            WHERE recurrence_rule_id = $1 AND status = $2
            ORDER BY start_date DESC LIMIT 1"#,
        )
        .bind(rule_id)
        .bind(InstanceStatus::Active)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(date)
    }

    /// The most recent live occurrence that was not edited on its own.
    pub async fn latest_live_non_exception<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        rule_id: Uuid,
    ) -> Result<Option<EventInstance>, CoreError> {
        let instance = sqlx::query_as(
            r#"SELECT * FROM event_instances
            WHERE recurrence_rule_id = $1 AND status = $2 AND is_recurring_event_exception = 0
            ORDER BY start_date DESC LIMIT 1"#,
        )
        .bind(rule_id)
        .bind(InstanceStatus::Active)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(instance)
    }

    /// Every date that already has a row under the rule, live or deleted.
    pub async fn occupied_dates<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        rule_id: Uuid,
    ) -> Result<HashSet<NaiveDate>, CoreError> {
        let dates: Vec<NaiveDate> =
            sqlx::query_scalar("SELECT start_date FROM event_instances WHERE recurrence_rule_id = $1")
                .bind(rule_id)
                .fetch_all(&mut **tx)
                .await?;
        Ok(dates.into_iter().collect())
    }

    /// Marks the given occurrences deleted. Already deleted rows are left alone.
    ///
    /// # Returns
    ///
    /// The number of rows that changed state.
    pub async fn soft_delete<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        ids: &[Uuid],
    ) -> Result<u64, CoreError> {
        let mut affected = 0;
        for chunk in ids.chunks(BIND_CHUNK_SIZE) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("UPDATE event_instances SET status = ");
            qb.push_bind(InstanceStatus::Deleted);
            qb.push(", updated_at = ");
            qb.push_bind(Utc::now());
            qb.push(" WHERE status = ");
            qb.push_bind(InstanceStatus::Active);
            qb.push(" AND id IN (");
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            affected += qb.build().execute(&mut **tx).await?.rows_affected();
        }
        Ok(affected)
    }

    /// Applies field changes to each occurrence. Dates are never moved.
    ///
    /// # Arguments
    ///
    /// * `mark_exception` - Flag the occurrences as individually edited.
    ///
    /// # Returns
    ///
    /// Ids of the updated occurrences, in input order.
    pub async fn apply_changes<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        instances: &[EventInstance],
        changes: &FieldChanges,
        mark_exception: bool,
    ) -> Result<Vec<Uuid>, CoreError> {
        if let Some(title) = &changes.title {
            if title.trim().is_empty() {
                return Err(CoreError::InvalidInput("Event title cannot be empty".to_string()));
            }
        }

        let now = Utc::now();
        let mut updated_ids = Vec::with_capacity(instances.len());
        for instance in instances {
            let mut updated = instance.clone();
            changes.apply_to_instance(&mut updated);
            if mark_exception {
                updated.is_recurring_event_exception = true;
            }

            sqlx::query(
                r#"UPDATE event_instances
                SET title = $1, description = $2, location = $3, all_day = $4, start_time = $5, end_time = $6,
                    is_recurring_event_exception = $7, updated_at = $8
                WHERE id = $9"#,
            )
            .bind(&updated.title)
            .bind(&updated.description)
            .bind(&updated.location)
            .bind(updated.all_day)
            .bind(updated.start_time)
            .bind(updated.end_time)
            .bind(updated.is_recurring_event_exception)
            .bind(now)
            .bind(updated.id)
            .execute(&mut **tx)
            .await?;

            updated_ids.push(updated.id);
        }

        Ok(updated_ids)
    }

    async fn insert<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        instance: &EventInstance,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"INSERT INTO event_instances (id, organization_id, base_recurring_event_id, recurrence_rule_id, title, description, location, all_day, start_time, end_time, start_date, end_date, status, is_recurring_event_exception, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"#,
        )
        .bind(instance.id)
        .bind(instance.organization_id)
        .bind(instance.base_recurring_event_id)
        .bind(instance.recurrence_rule_id)
        .bind(&instance.title)
        .bind(&instance.description)
        .bind(&instance.location)
        .bind(instance.all_day)
        .bind(instance.start_time)
        .bind(instance.end_time)
        .bind(instance.start_date)
        .bind(instance.end_date)
        .bind(instance.status)
        .bind(instance.is_recurring_event_exception)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

/// Writes occurrences for generated dates and keeps the rule's bookkeeping in step.
pub struct InstanceMaterializer;

impl InstanceMaterializer {
    /// Materializes the given dates under `rule`.
    ///
    /// # Behavior
    ///
    /// - Dates that already have a row under the rule are skipped, including rows that
    ///   were soft-deleted, so repeated calls never duplicate or resurrect occurrences
    /// - Each new occurrence copies the template with the date substituted
    /// - When anything was written, `latest_instance_date` is re-derived from the live
    ///   rows and persisted; otherwise the rule is returned unchanged
    pub async fn materialize<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        rule: &RecurrenceRule,
        template: &InstanceTemplate,
        dates: &[NaiveDate],
    ) -> Result<(RecurrenceRule, Vec<EventInstance>), CoreError> {
        let mut occupied = InstanceRepository::occupied_dates(tx, rule.id).await?;

        let mut created = Vec::new();
        for &date in dates {
            if !occupied.insert(date) {
                continue;
            }

            let end_date = u64::try_from(template.span_days)
                .ok()
                .and_then(|span| date.checked_add_days(Days::new(span)))
                .ok_or_else(|| {
                    CoreError::InvalidInput(format!(
                        "Occurrence on {} cannot span {} days",
                        date, template.span_days
                    ))
                })?;

            let now = Utc::now();
            let instance = EventInstance {
                id: Uuid::now_v7(),
                organization_id: template.organization_id,
                base_recurring_event_id: template.base_recurring_event_id,
                recurrence_rule_id: rule.id,
                title: template.title.clone(),
                description: template.description.clone(),
                location: template.location.clone(),
                all_day: template.all_day,
                start_time: template.start_time,
                end_time: template.end_time,
                start_date: date,
                end_date,
                status: InstanceStatus::Active,
                is_recurring_event_exception: false,
                created_at: now,
                updated_at: now,
            };

            InstanceRepository::insert(tx, &instance).await?;
            created.push(instance);
        }

        if created.is_empty() {
            debug!(rule_id = %rule.id, "No new occurrences to materialize");
            return Ok((rule.clone(), created));
        }

        let latest = InstanceRepository::max_live_date(tx, rule.id)
            .await?
            .ok_or_else(|| {
                CoreError::InconsistentState(format!(
                    "Rule {} has no live occurrences right after materialization",
                    rule.id
                ))
            })?;
        let rule =
            RecurrenceRuleStore::update_end_date_and_latest_instance(tx, rule, rule.end_date, latest)
                .await?;

        debug!(
            rule_id = %rule.id,
            created = created.len(),
            latest_instance_date = %latest,
            "Materialized occurrences"
        );

        Ok((rule, created))
    }
}
