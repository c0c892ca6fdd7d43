//! # Recurra Core Library
//!
//! A recurring-event scheduling engine. A series is a template event plus one or
//! more recurrence epochs; occurrences are materialized eagerly up to a
//! frequency-dependent horizon and edited or deleted with instance, following or
//! whole-series scope.
//!
//! ## Features
//!
//! - **RFC 5545 Rules**: Canonical rule text with a UTC-midnight anchor, expanded
//!   through the `rrule` crate
//! - **Epochs**: A "this and following" pattern change ends the current epoch and
//!   starts a new one; deleting an epoch rolls the series back to the previous one
//! - **Idempotent Materialization**: Catch-up extension never duplicates or
//!   resurrects occurrences
//! - **Transactional**: Every operation runs on one caller-supplied `sqlx`
//!   transaction, or through [`store::SqliteEventStore`] which commits per call
//!
//! ## Core Modules
//!
//! - [`db`]: Database connection and migration management
//! - [`config`]: Engine configuration loaded with figment
//! - [`models`]: Records, recurrence descriptions and edit scopes
//! - [`recurrence`]: Rule text codec and occurrence-date generation
//! - [`repository`]: Data access for rules, base events, occurrences and dependents
//! - [`engine`]: Define, extend, update and delete operations
//! - [`store`]: Transactional facade over the engine
//! - [`error`]: Error types
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use chrono::NaiveDate;
//! use recurra_core::{
//!     config::EngineConfig,
//!     db,
//!     models::{EditScope, Frequency, NewBaseEventData, RecurrenceDescription, WeekDay},
//!     store::{EventStore, SqliteEventStore},
//! };
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), recurra_core::error::CoreError> {
//!     let pool = db::establish_connection("events.db").await?;
//!     let store = SqliteEventStore::new(pool, EngineConfig::new()?);
//!
//!     let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
//!     let base = store
//!         .create_base_event(NewBaseEventData::all_day(Uuid::now_v7(), "Standup", start))
//!         .await?;
//!
//!     let weekly = RecurrenceDescription::new(Frequency::Weekly)
//!         .on([WeekDay::Monday, WeekDay::Wednesday])
//!         .count(4);
//!     let (_rule, instances) = store.define_recurrence(base.id, &weekly).await?;
//!
//!     store
//!         .delete_instance(instances[1].id, EditScope::ThisAndFollowing)
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod recurrence;
pub mod repository;
pub mod store;
