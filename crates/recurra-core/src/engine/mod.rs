//! The recurrence engine: defines series, extends their materialization and
//! propagates updates and deletions across occurrences.
//!
//! Every operation runs on a caller-supplied transaction and either completes
//! entirely or fails, leaving the caller to roll back. The engine never begins or
//! commits a transaction itself.

mod delete;
mod update;

use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::models::{
    BaseRecurringEvent, EventInstance, InstanceTemplate, NewRecurrenceRule, RecurrenceDescription,
    RecurrenceRule,
};
use crate::recurrence::{InstanceDateGenerator, RuleStringCodec};
use crate::repository::{
    BaseEventRepository, DependentCleanup, InstanceMaterializer, InstanceRepository,
    RecurrenceRuleStore, SqliteDependentCleanup,
};
use chrono::NaiveDate;
use sqlx::{Sqlite, Transaction};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub struct RecurrenceEngine<C: DependentCleanup = SqliteDependentCleanup> {
    config: EngineConfig,
    generator: InstanceDateGenerator,
    cleanup: C,
}

impl RecurrenceEngine<SqliteDependentCleanup> {
    /// Engine wired to the SQLite dependent-entity tables.
    pub fn with_sqlite_cleanup(config: EngineConfig) -> Self {
        Self::new(config, SqliteDependentCleanup::new())
    }
}

impl<C: DependentCleanup> RecurrenceEngine<C> {
    pub fn new(config: EngineConfig, cleanup: C) -> Self {
        let generator = InstanceDateGenerator::new(config.horizon);
        Self {
            config,
            generator,
            cleanup,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Turns a base event into a recurring series.
    ///
    /// # Arguments
    ///
    /// * `base_event_id` - The template event. Its `start_date` anchors the pattern.
    /// * `description` - The recurrence pattern.
    ///
    /// # Returns
    ///
    /// The new rule, with its bookkeeping written, and the occurrences materialized
    /// up to the frequency horizon.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the base event does not exist
    /// - `InvalidInput` if the event already recurs, the description is invalid or
    ///   the pattern generates no dates
    #[instrument(skip(self, tx, description), fields(base_event_id = %base_event_id))]
    pub async fn define_recurrence<'a>(
        &self,
        tx: &mut Transaction<'a, Sqlite>,
        base_event_id: Uuid,
        description: &RecurrenceDescription,
    ) -> Result<(RecurrenceRule, Vec<EventInstance>), CoreError> {
        let base = BaseEventRepository::get(tx, base_event_id).await?;

        let existing = RecurrenceRuleStore::find_by_base_event(tx, base.id).await?;
        if !existing.is_empty() {
            return Err(CoreError::InvalidInput(format!(
                "Base event {} already has {} recurrence epoch(s)",
                base.id,
                existing.len()
            )));
        }

        let rule = self
            .create_epoch(tx, &base, description, base.start_date, None)
            .await?;
        BaseEventRepository::mark_recurring(tx, base.id, rule.end_date).await?;

        let dates = self
            .generator
            .generate_dates(&rule, rule.end_date, rule.start_date)?;
        if dates.is_empty() {
            return Err(CoreError::InvalidInput(format!(
                "Recurrence '{}' generates no occurrences",
                rule.rule_text
            )));
        }

        let template = InstanceTemplate::from(&base);
        let (rule, instances) = InstanceMaterializer::materialize(tx, &rule, &template, &dates).await?;

        info!(
            rule_id = %rule.id,
            occurrences = instances.len(),
            end_date = ?rule.end_date,
            "Defined recurrence"
        );
        Ok((rule, instances))
    }

    /// Materializes any occurrences of a rule that fall before the horizon of a new
    /// query bound. Dates that already have a row, live or deleted, are skipped, so
    /// repeated calls are no-ops.
    ///
    /// # Returns
    ///
    /// Only the newly created occurrences.
    #[instrument(skip(self, tx), fields(rule_id = %rule_id, query_upper_bound = %query_upper_bound))]
    pub async fn extend_materialization<'a>(
        &self,
        tx: &mut Transaction<'a, Sqlite>,
        rule_id: Uuid,
        query_upper_bound: NaiveDate,
    ) -> Result<Vec<EventInstance>, CoreError> {
        let rule = RecurrenceRuleStore::get(tx, rule_id).await?;
        let base = BaseEventRepository::get(tx, rule.base_recurring_event_id).await?;
        self.verify_bookkeeping(tx, &rule).await?;

        let dates = self
            .generator
            .generate_dates(&rule, rule.end_date, query_upper_bound)?;
        let authoritative = self.is_authoritative(tx, &rule, &base).await?;
        let template = self.template_for(tx, &rule, &base, authoritative).await?;

        let (_, created) = InstanceMaterializer::materialize(tx, &rule, &template, &dates).await?;
        debug!(created = created.len(), "Extended materialization");
        Ok(created)
    }

    /// Encodes and stores a new epoch anchored at `start_date`. An `end_cap` bounds
    /// the epoch's end date below what its own pattern would give.
    pub(crate) async fn create_epoch<'a>(
        &self,
        tx: &mut Transaction<'a, Sqlite>,
        base: &BaseRecurringEvent,
        description: &RecurrenceDescription,
        start_date: NaiveDate,
        end_cap: Option<NaiveDate>,
    ) -> Result<RecurrenceRule, CoreError> {
        let rule_text = RuleStringCodec::encode_for_date(description, start_date)?;
        let end_date = match (InstanceDateGenerator::series_end_date(&rule_text)?, end_cap) {
            (Some(own), Some(cap)) => Some(own.min(cap)),
            (own, None) => own,
            (None, cap) => cap,
        };

        let rule = RecurrenceRuleStore::create(
            tx,
            NewRecurrenceRule {
                organization_id: base.organization_id,
                base_recurring_event_id: base.id,
                rule_text,
                frequency: description.frequency,
                week_days: description.week_days.clone(),
                count: description.end.count(),
                start_date,
                end_date,
            },
        )
        .await?;

        info!(rule_id = %rule.id, start_date = %start_date, "Created recurrence epoch");
        Ok(rule)
    }

    /// The epoch whose end date the base event currently mirrors. When several
    /// epochs share that end date the most recent one wins.
    pub(crate) async fn authoritative_rule_id<'a>(
        &self,
        tx: &mut Transaction<'a, Sqlite>,
        base: &BaseRecurringEvent,
    ) -> Result<Option<Uuid>, CoreError> {
        let epochs =
            RecurrenceRuleStore::list_epochs_for_base_event_ordered_by_end_date_desc(tx, base.id)
                .await?;
        Ok(epochs
            .into_iter()
            .find(|epoch| epoch.end_date == base.end_date)
            .map(|epoch| epoch.id))
    }

    pub(crate) async fn is_authoritative<'a>(
        &self,
        tx: &mut Transaction<'a, Sqlite>,
        rule: &RecurrenceRule,
        base: &BaseRecurringEvent,
    ) -> Result<bool, CoreError> {
        Ok(self.authoritative_rule_id(tx, base).await? == Some(rule.id))
    }

    /// Checks `latest_instance_date == max(live start_date)` for the rule.
    pub(crate) async fn verify_bookkeeping<'a>(
        &self,
        tx: &mut Transaction<'a, Sqlite>,
        rule: &RecurrenceRule,
    ) -> Result<(), CoreError> {
        if !self.config.verify_bookkeeping {
            return Ok(());
        }

        let max_live = InstanceRepository::max_live_date(tx, rule.id).await?;
        if max_live != Some(rule.latest_instance_date) {
            warn!(
                rule_id = %rule.id,
                latest_instance_date = %rule.latest_instance_date,
                max_live = ?max_live,
                "Recurrence bookkeeping does not match live occurrences"
            );
            return Err(CoreError::InconsistentState(format!(
                "Rule {} records latest occurrence {} but the latest live occurrence is {:?}",
                rule.id, rule.latest_instance_date, max_live
            )));
        }
        Ok(())
    }

    /// Field source for new occurrences of `rule`. The authoritative epoch follows the
    /// base event; an older epoch keeps the look of its own latest regular occurrence.
    pub(crate) async fn template_for<'a>(
        &self,
        tx: &mut Transaction<'a, Sqlite>,
        rule: &RecurrenceRule,
        base: &BaseRecurringEvent,
        authoritative: bool,
    ) -> Result<InstanceTemplate, CoreError> {
        if authoritative {
            return Ok(InstanceTemplate::from(base));
        }
        let template = InstanceRepository::latest_live_non_exception(tx, rule.id)
            .await?
            .map(|instance| InstanceTemplate::from_instance(&instance))
            .unwrap_or_else(|| InstanceTemplate::from(base));
        Ok(template)
    }

    /// Runs the dependent-entity collaborator for deleted occurrences.
    pub(crate) async fn cascade_cleanup<'a>(
        &self,
        tx: &mut Transaction<'a, Sqlite>,
        event_ids: &[Uuid],
    ) -> Result<(), CoreError> {
        if event_ids.is_empty() {
            return Ok(());
        }
        self.cleanup
            .delete_by_event_ids(tx, event_ids)
            .await
            .map_err(into_cleanup_error)?;
        self.cleanup
            .detach_event_references(tx, event_ids)
            .await
            .map_err(into_cleanup_error)?;
        debug!(count = event_ids.len(), "Cleaned up dependents");
        Ok(())
    }

    /// Removes an epoch that has no live occurrences left and re-points the base
    /// event at whatever epoch now governs it.
    ///
    /// # Behavior
    ///
    /// - No epoch remains: the base event stops recurring, its end date is kept
    /// - The removed epoch was authoritative: the most recent remaining epoch has its
    ///   bookkeeping re-derived and its end date mirrored onto the base event
    /// - Otherwise the base event is left as it is
    pub(crate) async fn rollback_epoch<'a>(
        &self,
        tx: &mut Transaction<'a, Sqlite>,
        rule: &RecurrenceRule,
        base: &BaseRecurringEvent,
    ) -> Result<(), CoreError> {
        let was_authoritative = self.is_authoritative(tx, rule, base).await?;
        RecurrenceRuleStore::delete(tx, rule.id).await?;

        let epochs =
            RecurrenceRuleStore::list_epochs_for_base_event_ordered_by_end_date_desc(tx, base.id)
                .await?;

        let Some(newest) = epochs.into_iter().next() else {
            BaseEventRepository::mark_non_recurring(tx, base.id).await?;
            info!(rule_id = %rule.id, base_event_id = %base.id, "Removed last epoch, series no longer recurs");
            return Ok(());
        };

        if was_authoritative {
            let latest = InstanceRepository::max_live_date(tx, newest.id)
                .await?
                .ok_or_else(|| {
                    CoreError::InconsistentState(format!(
                        "Epoch {} has no live occurrences to take over base event {}",
                        newest.id, base.id
                    ))
                })?;
            let newest = RecurrenceRuleStore::update_end_date_and_latest_instance(
                tx,
                &newest,
                newest.end_date,
                latest,
            )
            .await?;
            BaseEventRepository::update_end_date(tx, base.id, newest.end_date).await?;
            info!(
                rule_id = %rule.id,
                authoritative_rule_id = %newest.id,
                end_date = ?newest.end_date,
                "Rolled back to previous epoch"
            );
        } else {
            info!(rule_id = %rule.id, "Removed non-authoritative epoch");
        }

        Ok(())
    }

    /// Re-derives `latest_instance_date` after occurrences were removed. Returns
    /// `None` when no live occurrence remains.
    pub(crate) async fn refresh_latest<'a>(
        &self,
        tx: &mut Transaction<'a, Sqlite>,
        rule: &RecurrenceRule,
        end_date: Option<NaiveDate>,
    ) -> Result<Option<RecurrenceRule>, CoreError> {
        match InstanceRepository::max_live_date(tx, rule.id).await? {
            Some(latest) => {
                let rule = RecurrenceRuleStore::update_end_date_and_latest_instance(
                    tx, rule, end_date, latest,
                )
                .await?;
                debug!(rule_id = %rule.id, latest_instance_date = %latest, "Refreshed bookkeeping");
                Ok(Some(rule))
            }
            None => Ok(None),
        }
    }

    /// Loads an occurrence that must still be live.
    pub(crate) async fn live_instance<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        instance_id: Uuid,
    ) -> Result<EventInstance, CoreError> {
        let instance = InstanceRepository::get(tx, instance_id).await?;
        if !instance.is_live() {
            return Err(CoreError::NotFound(format!(
                "Event instance with id {} has been deleted",
                instance_id
            )));
        }
        Ok(instance)
    }
}

fn into_cleanup_error(err: CoreError) -> CoreError {
    match err {
        CoreError::DependencyCleanup(_) => err,
        other => CoreError::DependencyCleanup(other.to_string()),
    }
}
