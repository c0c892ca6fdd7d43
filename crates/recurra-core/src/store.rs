use crate::config::EngineConfig;
use crate::db::DbPool;
use crate::engine::RecurrenceEngine;
use crate::error::CoreError;
use crate::models::{
    BaseRecurringEvent, EditScope, EventInstance, FieldChanges, NewBaseEventData,
    RecurrenceDescription, RecurrenceRule,
};
use crate::repository::{
    BaseEventRepository, DependentCleanup, InstanceRepository, RecurrenceRuleStore,
    SqliteDependentCleanup,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

/// Transactional entry point for callers that do not manage their own transactions.
/// Each call runs in exactly one transaction that commits only on success.
#[async_trait]
pub trait EventStore {
    async fn create_base_event(&self, data: NewBaseEventData) -> Result<BaseRecurringEvent, CoreError>;
    async fn find_base_event(&self, id: Uuid) -> Result<Option<BaseRecurringEvent>, CoreError>;

    async fn define_recurrence(
        &self,
        base_event_id: Uuid,
        description: &RecurrenceDescription,
    ) -> Result<(RecurrenceRule, Vec<EventInstance>), CoreError>;
    async fn extend_materialization(
        &self,
        rule_id: Uuid,
        query_upper_bound: NaiveDate,
    ) -> Result<Vec<EventInstance>, CoreError>;
    async fn update_instance(
        &self,
        instance_id: Uuid,
        scope: EditScope,
        changes: &FieldChanges,
        new_description: Option<&RecurrenceDescription>,
    ) -> Result<Vec<Uuid>, CoreError>;
    async fn delete_instance(&self, instance_id: Uuid, scope: EditScope) -> Result<Vec<Uuid>, CoreError>;

    async fn find_rule_by_id(&self, id: Uuid) -> Result<Option<RecurrenceRule>, CoreError>;
    async fn find_rules_for_base_event(&self, base_event_id: Uuid) -> Result<Vec<RecurrenceRule>, CoreError>;
    async fn find_instance_by_id(&self, id: Uuid) -> Result<Option<EventInstance>, CoreError>;
    async fn find_live_instances_for_rule(&self, rule_id: Uuid) -> Result<Vec<EventInstance>, CoreError>;
    async fn find_instances_between(
        &self,
        base_event_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<EventInstance>, CoreError>;
}

/// SQLite implementation of [`EventStore`]
pub struct SqliteEventStore<C: DependentCleanup = SqliteDependentCleanup> {
    pool: DbPool,
    engine: RecurrenceEngine<C>,
}

impl SqliteEventStore<SqliteDependentCleanup> {
    pub fn new(pool: DbPool, config: EngineConfig) -> Self {
        Self::with_engine(pool, RecurrenceEngine::with_sqlite_cleanup(config))
    }
}

impl<C: DependentCleanup> SqliteEventStore<C> {
    pub fn with_engine(pool: DbPool, engine: RecurrenceEngine<C>) -> Self {
        Self { pool, engine }
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn engine(&self) -> &RecurrenceEngine<C> {
        &self.engine
    }
}

#[async_trait]
impl<C: DependentCleanup> EventStore for SqliteEventStore<C> {
    async fn create_base_event(&self, data: NewBaseEventData) -> Result<BaseRecurringEvent, CoreError> {
        let mut tx = self.pool.begin().await?;
        let event = BaseEventRepository::create(&mut tx, data).await?;
        tx.commit().await?;
        Ok(event)
    }

    async fn find_base_event(&self, id: Uuid) -> Result<Option<BaseRecurringEvent>, CoreError> {
        let mut tx = self.pool.begin().await?;
        let event = BaseEventRepository::find_by_id(&mut tx, id).await?;
        tx.commit().await?;
        Ok(event)
    }

    async fn define_recurrence(
        &self,
        base_event_id: Uuid,
        description: &RecurrenceDescription,
    ) -> Result<(RecurrenceRule, Vec<EventInstance>), CoreError> {
        let mut tx = self.pool.begin().await?;
        let result = self
            .engine
            .define_recurrence(&mut tx, base_event_id, description)
            .await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn extend_materialization(
        &self,
        rule_id: Uuid,
        query_upper_bound: NaiveDate,
    ) -> Result<Vec<EventInstance>, CoreError> {
        let mut tx = self.pool.begin().await?;
        let created = self
            .engine
            .extend_materialization(&mut tx, rule_id, query_upper_bound)
            .await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn update_instance(
        &self,
        instance_id: Uuid,
        scope: EditScope,
        changes: &FieldChanges,
        new_description: Option<&RecurrenceDescription>,
    ) -> Result<Vec<Uuid>, CoreError> {
        let mut tx = self.pool.begin().await?;
        let affected = self
            .engine
            .update_instance(&mut tx, instance_id, scope, changes, new_description)
            .await?;
        tx.commit().await?;
        Ok(affected)
    }

    async fn delete_instance(&self, instance_id: Uuid, scope: EditScope) -> Result<Vec<Uuid>, CoreError> {
        let mut tx = self.pool.begin().await?;
        let deleted = self.engine.delete_instance(&mut tx, instance_id, scope).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    async fn find_rule_by_id(&self, id: Uuid) -> Result<Option<RecurrenceRule>, CoreError> {
        let mut tx = self.pool.begin().await?;
        let rule = RecurrenceRuleStore::find_by_id(&mut tx, id).await?;
        tx.commit().await?;
        Ok(rule)
    }

    async fn find_rules_for_base_event(&self, base_event_id: Uuid) -> Result<Vec<RecurrenceRule>, CoreError> {
        let mut tx = self.pool.begin().await?;
        let rules = RecurrenceRuleStore::find_by_base_event(&mut tx, base_event_id).await?;
        tx.commit().await?;
        Ok(rules)
    }

    async fn find_instance_by_id(&self, id: Uuid) -> Result<Option<EventInstance>, CoreError> {
        let mut tx = self.pool.begin().await?;
        let instance = InstanceRepository::find_by_id(&mut tx, id).await?;
        tx.commit().await?;
        Ok(instance)
    }

    async fn find_live_instances_for_rule(&self, rule_id: Uuid) -> Result<Vec<EventInstance>, CoreError> {
        let mut tx = self.pool.begin().await?;
        let instances = InstanceRepository::find_live_for_rule(&mut tx, rule_id).await?;
        tx.commit().await?;
        Ok(instances)
    }

    async fn find_instances_between(
        &self,
        base_event_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<EventInstance>, CoreError> {
        let mut tx = self.pool.begin().await?;
        let instances = InstanceRepository::find_between(&mut tx, base_event_id, from, to).await?;
        tx.commit().await?;
        Ok(instances)
    }
}
