use super::RecurrenceEngine;
use crate::error::CoreError;
use crate::models::{EditScope, EventInstance};
use crate::repository::{
    BaseEventRepository, DependentCleanup, InstanceRepository, RecurrenceRuleStore,
};
use sqlx::{Sqlite, Transaction};
use tracing::{debug, info, instrument};
use uuid::Uuid;

impl<C: DependentCleanup> RecurrenceEngine<C> {
    /// Soft-deletes an occurrence and the occurrences its scope reaches, cleans up
    /// their dependents and keeps rule and base event bookkeeping consistent.
    ///
    /// # Returns
    ///
    /// Ids of the occurrences that were deleted.
    ///
    /// # Behavior
    ///
    /// - `ThisInstance`, or any scope when the target is an exception: only the
    ///   target is deleted; the rule's latest date is re-derived if the target held it
    /// - `AllInstances`: every live occurrence of the rule is deleted, exceptions
    ///   included, then the epoch is rolled back
    /// - `ThisAndFollowing`: occurrences on or after the target date are deleted and
    ///   the epoch is truncated to the last remaining one
    ///
    /// Whenever no live occurrence of the rule remains the epoch is rolled back.
    #[instrument(skip(self, tx), fields(instance_id = %instance_id, scope = %scope))]
    pub async fn delete_instance<'a>(
        &self,
        tx: &mut Transaction<'a, Sqlite>,
        instance_id: Uuid,
        scope: EditScope,
    ) -> Result<Vec<Uuid>, CoreError> {
        let target = Self::live_instance(tx, instance_id).await?;
        let rule = RecurrenceRuleStore::get(tx, target.recurrence_rule_id).await?;
        let base = BaseEventRepository::get(tx, target.base_recurring_event_id).await?;
        self.verify_bookkeeping(tx, &rule).await?;

        let scope = if target.is_recurring_event_exception {
            EditScope::ThisInstance
        } else {
            scope
        };

        let deleted: Vec<Uuid> = match scope {
            EditScope::ThisInstance => vec![target.id],
            EditScope::AllInstances => ids(InstanceRepository::find_live_for_rule(tx, rule.id).await?),
            EditScope::ThisAndFollowing => ids(
                InstanceRepository::find_live_for_rule_from(tx, rule.id, target.start_date).await?,
            ),
        };

        // Authority has to be decided before the rule's end date moves.
        let was_authoritative = self.is_authoritative(tx, &rule, &base).await?;

        InstanceRepository::soft_delete(tx, &deleted).await?;
        self.cascade_cleanup(tx, &deleted).await?;

        let refreshed = match scope {
            EditScope::ThisInstance if target.start_date != rule.latest_instance_date => {
                debug!("Deleted occurrence was not the latest, bookkeeping unchanged");
                Some(rule.clone())
            }
            EditScope::ThisInstance => self.refresh_latest(tx, &rule, rule.end_date).await?,
            EditScope::AllInstances => None,
            EditScope::ThisAndFollowing => {
                let remaining = InstanceRepository::max_live_date(tx, rule.id).await?;
                match remaining {
                    Some(_) => self.refresh_latest(tx, &rule, remaining).await?,
                    None => None,
                }
            }
        };

        match refreshed {
            Some(updated) => {
                if scope == EditScope::ThisAndFollowing && was_authoritative {
                    BaseEventRepository::update_end_date(tx, base.id, updated.end_date).await?;
                    debug!(base_event_id = %base.id, end_date = ?updated.end_date, "Truncated series end");
                }
            }
            None => {
                // No live occurrence is left under this epoch.
                self.rollback_epoch(tx, &rule, &base).await?;
            }
        }

        info!(deleted = deleted.len(), "Deleted occurrences");
        Ok(deleted)
    }
}

fn ids(instances: Vec<EventInstance>) -> Vec<Uuid> {
    instances.into_iter().map(|instance| instance.id).collect()
}
