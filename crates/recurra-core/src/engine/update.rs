use super::RecurrenceEngine;
use crate::config::PatternChangeStrategy;
use crate::error::CoreError;
use crate::models::{
    BaseRecurringEvent, EditScope, EventInstance, FieldChanges, RecurrenceDescription,
    RecurrenceRule,
};
use crate::recurrence::RuleStringCodec;
use crate::repository::{
    BaseEventRepository, DependentCleanup, InstanceMaterializer, InstanceRepository,
    RecurrenceRuleStore,
};
use sqlx::{Sqlite, Transaction};
use tracing::{debug, info, instrument};
use uuid::Uuid;

impl<C: DependentCleanup> RecurrenceEngine<C> {
    /// Applies field changes, and optionally a new pattern, to an occurrence and the
    /// occurrences its scope reaches.
    ///
    /// # Arguments
    ///
    /// * `instance_id` - The occurrence the caller edited.
    /// * `scope` - Which occurrences of the same rule are affected.
    /// * `changes` - Template fields to change. Dates never move.
    /// * `new_description` - A replacement pattern. Only meaningful for
    ///   [`EditScope::ThisAndFollowing`]; other scopes reject a pattern that differs
    ///   from the current one.
    ///
    /// # Returns
    ///
    /// Ids of the occurrences that were changed. When a "this and following" edit
    /// splits the series, these are the superseded occurrences followed by the ones
    /// created under the new epoch.
    ///
    /// # Behavior
    ///
    /// - `ThisInstance`: only the target changes and it becomes an exception
    /// - `AllInstances`: every live occurrence of the rule changes, exceptions
    ///   included; the base event changes only if the rule is authoritative
    /// - `ThisAndFollowing` with the same pattern: occurrences on or after the target
    ///   date change, and the base event if the rule is authoritative
    /// - `ThisAndFollowing` with a new pattern: handled by the configured
    ///   [`PatternChangeStrategy`]
    #[instrument(skip(self, tx, changes, new_description), fields(instance_id = %instance_id, scope = %scope))]
    pub async fn update_instance<'a>(
        &self,
        tx: &mut Transaction<'a, Sqlite>,
        instance_id: Uuid,
        scope: EditScope,
        changes: &FieldChanges,
        new_description: Option<&RecurrenceDescription>,
    ) -> Result<Vec<Uuid>, CoreError> {
        let target = Self::live_instance(tx, instance_id).await?;
        let rule = RecurrenceRuleStore::get(tx, target.recurrence_rule_id).await?;
        let base = BaseEventRepository::get(tx, target.base_recurring_event_id).await?;
        self.verify_bookkeeping(tx, &rule).await?;

        let pattern_changed = match new_description {
            Some(description) => {
                RuleStringCodec::encode_for_date(description, rule.start_date)? != rule.rule_text
            }
            None => false,
        };

        if pattern_changed && scope != EditScope::ThisAndFollowing {
            return Err(CoreError::InvalidInput(format!(
                "A new recurrence pattern can only be applied with scope {}, not {}",
                EditScope::ThisAndFollowing,
                scope
            )));
        }

        let affected = match scope {
            EditScope::ThisInstance => {
                InstanceRepository::apply_changes(tx, &[target], changes, true).await?
            }
            EditScope::AllInstances => {
                let live = InstanceRepository::find_live_for_rule(tx, rule.id).await?;
                self.apply_to_series(tx, &rule, &base, &live, changes).await?
            }
            EditScope::ThisAndFollowing => match (new_description, pattern_changed) {
                (Some(description), true)
                    if self.config.pattern_change == PatternChangeStrategy::SplitSeries =>
                {
                    self.split_series(tx, &target, &rule, &base, changes, description)
                        .await?
                }
                _ => {
                    let following =
                        InstanceRepository::find_live_for_rule_from(tx, rule.id, target.start_date)
                            .await?;
                    self.apply_to_series(tx, &rule, &base, &following, changes)
                        .await?
                }
            },
        };

        debug!(affected = affected.len(), "Updated occurrences");
        Ok(affected)
    }

    /// Applies changes to a set of occurrences of `rule`, and to the base event when
    /// the rule governs it. Exception flags are left as they were.
    async fn apply_to_series<'a>(
        &self,
        tx: &mut Transaction<'a, Sqlite>,
        rule: &RecurrenceRule,
        base: &BaseRecurringEvent,
        instances: &[EventInstance],
        changes: &FieldChanges,
    ) -> Result<Vec<Uuid>, CoreError> {
        let affected = InstanceRepository::apply_changes(tx, instances, changes, false).await?;
        if !changes.is_empty() && self.is_authoritative(tx, rule, base).await? {
            BaseEventRepository::apply_changes(tx, base, changes).await?;
            debug!(base_event_id = %base.id, "Applied changes to base event");
        }
        Ok(affected)
    }

    /// Ends the current epoch just before the target and starts a new epoch on the
    /// target date with the new pattern.
    async fn split_series<'a>(
        &self,
        tx: &mut Transaction<'a, Sqlite>,
        target: &EventInstance,
        rule: &RecurrenceRule,
        base: &BaseRecurringEvent,
        changes: &FieldChanges,
        description: &RecurrenceDescription,
    ) -> Result<Vec<Uuid>, CoreError> {
        let split_date = target.start_date;
        let was_authoritative = self.is_authoritative(tx, rule, base).await?;

        let mut template = self.template_for(tx, rule, base, was_authoritative).await?;
        changes.apply_to_template(&mut template);

        let superseded: Vec<Uuid> =
            InstanceRepository::find_live_for_rule_from(tx, rule.id, split_date)
                .await?
                .into_iter()
                .map(|instance| instance.id)
                .collect();
        InstanceRepository::soft_delete(tx, &superseded).await?;
        self.cascade_cleanup(tx, &superseded).await?;

        match InstanceRepository::max_live_date(tx, rule.id).await? {
            Some(remaining) => {
                RecurrenceRuleStore::update_end_date_and_latest_instance(
                    tx,
                    rule,
                    Some(remaining),
                    remaining,
                )
                .await?;
                debug!(rule_id = %rule.id, end_date = %remaining, "Truncated epoch");
            }
            None => {
                RecurrenceRuleStore::delete(tx, rule.id).await?;
                debug!(rule_id = %rule.id, "Removed epoch with no occurrences before the split");
            }
        }

        // An older epoch may not grow past its own end into a newer epoch's range.
        let end_cap = if was_authoritative { None } else { rule.end_date };
        let new_rule = self
            .create_epoch(tx, base, description, split_date, end_cap)
            .await?;
        let query_upper_bound = split_date.max(rule.latest_instance_date);
        let dates = self
            .generator
            .generate_dates(&new_rule, new_rule.end_date, query_upper_bound)?;
        if dates.is_empty() {
            return Err(CoreError::InvalidInput(format!(
                "Recurrence '{}' generates no occurrences",
                new_rule.rule_text
            )));
        }

        let (new_rule, created) =
            InstanceMaterializer::materialize(tx, &new_rule, &template, &dates).await?;

        if was_authoritative {
            if !changes.is_empty() {
                BaseEventRepository::apply_changes(tx, base, changes).await?;
            }
            BaseEventRepository::update_end_date(tx, base.id, new_rule.end_date).await?;
        }

        info!(
            old_rule_id = %rule.id,
            new_rule_id = %new_rule.id,
            split_date = %split_date,
            superseded = superseded.len(),
            created = created.len(),
            "Split series at new pattern"
        );

        let mut affected = superseded;
        affected.extend(created.iter().map(|instance| instance.id));
        Ok(affected)
    }
}
