//! Data access layer. Every function here runs on a caller-supplied
//! `sqlx::Transaction`; none of them begin or commit on their own.

pub mod cleanup;
pub mod events;
pub mod instances;
pub mod rules;

pub use cleanup::{DependentCleanup, DependentCounts, SqliteDependentCleanup};
pub use events::BaseEventRepository;
pub use instances::{InstanceMaterializer, InstanceRepository};
pub use rules::RecurrenceRuleStore;
