use crate::error::CoreError;
use crate::models::ReferenceKind;
use crate::repository::instances::BIND_CHUNK_SIZE;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, Transaction};
use uuid::Uuid;

/// Collaborator that removes entities hanging off deleted occurrences.
///
/// Both calls run on the engine's transaction, so a failure aborts the whole
/// operation. Implementations report failures as [`CoreError::DependencyCleanup`].
#[async_trait]
pub trait DependentCleanup: Send + Sync {
    /// Deletes attendance rows and action items of the given events.
    async fn delete_by_event_ids<'a>(
        &self,
        tx: &mut Transaction<'a, Sqlite>,
        event_ids: &[Uuid],
    ) -> Result<(), CoreError>;

    /// Strips the given events from every per-user reference list.
    async fn detach_event_references<'a>(
        &self,
        tx: &mut Transaction<'a, Sqlite>,
        event_ids: &[Uuid],
    ) -> Result<(), CoreError>;
}

/// Dependent-entity cleanup over the local attendee, action item and user
/// reference tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDependentCleanup;

/// Row counts of the entities attached to one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DependentCounts {
    pub attendees: i64,
    pub action_items: i64,
    pub user_references: i64,
}

impl SqliteDependentCleanup {
    pub fn new() -> Self {
        Self
    }

    async fn delete_from<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        table: &str,
        event_ids: &[Uuid],
    ) -> Result<u64, CoreError> {
        let mut affected = 0;
        for chunk in event_ids.chunks(BIND_CHUNK_SIZE) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!("DELETE FROM {} WHERE event_id IN (", table));
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            affected += qb
                .build()
                .execute(&mut **tx)
                .await
                .map_err(|e| {
                    CoreError::DependencyCleanup(format!("Failed to delete from {}: {}", table, e))
                })?
                .rows_affected();
        }
        Ok(affected)
    }

    pub async fn add_attendee<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), CoreError> {
        sqlx::query("INSERT INTO event_attendees (event_id, user_id, created_at) VALUES ($1, $2, $3)")
            .bind(event_id)
            .bind(user_id)
            .bind(Utc::now())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn add_action_item<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        event_id: Uuid,
        assignee_id: Option<Uuid>,
        title: &str,
    ) -> Result<Uuid, CoreError> {
        let id = Uuid::now_v7();
        sqlx::query(
            "INSERT INTO action_items (id, event_id, assignee_id, title, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(event_id)
        .bind(assignee_id)
        .bind(title)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;
        Ok(id)
    }

    pub async fn add_user_reference<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        user_id: Uuid,
        event_id: Uuid,
        kind: ReferenceKind,
    ) -> Result<(), CoreError> {
        sqlx::query("INSERT OR IGNORE INTO user_event_refs (user_id, event_id, kind) VALUES ($1, $2, $3)")
            .bind(user_id)
            .bind(event_id)
            .bind(kind)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn count_dependents<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        event_id: Uuid,
    ) -> Result<DependentCounts, CoreError> {
        let attendees = sqlx::query_scalar("SELECT COUNT(*) FROM event_attendees WHERE event_id = $1")
            .bind(event_id)
            .fetch_one(&mut **tx)
            .await?;
        let action_items = sqlx::query_scalar("SELECT COUNT(*) FROM action_items WHERE event_id = $1")
            .bind(event_id)
            .fetch_one(&mut **tx)
            .await?;
        let user_references =
            sqlx::query_scalar("SELECT COUNT(*) FROM user_event_refs WHERE event_id = $1")
                .bind(event_id)
                .fetch_one(&mut **tx)
                .await?;

        Ok(DependentCounts {
            attendees,
            action_items,
            user_references,
        })
    }
}

#[async_trait]
impl DependentCleanup for SqliteDependentCleanup {
    async fn delete_by_event_ids<'a>(
        &self,
        tx: &mut Transaction<'a, Sqlite>,
        event_ids: &[Uuid],
    ) -> Result<(), CoreError> {
        Self::delete_from(tx, "event_attendees", event_ids).await?;
        Self::delete_from(tx, "action_items", event_ids).await?;
        Ok(())
    }

    async fn detach_event_references<'a>(
        &self,
        tx: &mut Transaction<'a, Sqlite>,
        event_ids: &[Uuid],
    ) -> Result<(), CoreError> {
        Self::delete_from(tx, "user_event_refs", event_ids).await?;
        Ok(())
    }
}
