use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeSet;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Recurrence pattern value types
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    /// The RFC 5545 `FREQ` token.
    pub fn as_token(&self) -> &'static str {
        match self {
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Yearly => "YEARLY",
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_token())
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid frequency: {0}")]
pub struct ParseFrequencyError(String);

impl FromStr for Frequency {
    type Err = ParseFrequencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DAILY" => Ok(Frequency::Daily),
            "WEEKLY" => Ok(Frequency::Weekly),
            "MONTHLY" => Ok(Frequency::Monthly),
            "YEARLY" => Ok(Frequency::Yearly),
            _ => Err(ParseFrequencyError(s.to_string())),
        }
    }
}

/// Weekday tokens in RFC 5545 order. `Ord` follows Monday-first order so sets
/// always encode the same way.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WeekDay {
    #[serde(rename = "MO")]
    Monday,
    #[serde(rename = "TU")]
    Tuesday,
    #[serde(rename = "WE")]
    Wednesday,
    #[serde(rename = "TH")]
    Thursday,
    #[serde(rename = "FR")]
    Friday,
    #[serde(rename = "SA")]
    Saturday,
    #[serde(rename = "SU")]
    Sunday,
}

impl WeekDay {
    pub fn as_token(&self) -> &'static str {
        match self {
            WeekDay::Monday => "MO",
            WeekDay::Tuesday => "TU",
            WeekDay::Wednesday => "WE",
            WeekDay::Thursday => "TH",
            WeekDay::Friday => "FR",
            WeekDay::Saturday => "SA",
            WeekDay::Sunday => "SU",
        }
    }
}

impl From<chrono::Weekday> for WeekDay {
    fn from(day: chrono::Weekday) -> Self {
        match day {
            chrono::Weekday::Mon => WeekDay::Monday,
            chrono::Weekday::Tue => WeekDay::Tuesday,
            chrono::Weekday::Wed => WeekDay::Wednesday,
            chrono::Weekday::Thu => WeekDay::Thursday,
            chrono::Weekday::Fri => WeekDay::Friday,
            chrono::Weekday::Sat => WeekDay::Saturday,
            chrono::Weekday::Sun => WeekDay::Sunday,
        }
    }
}

impl std::fmt::Display for WeekDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_token())
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid weekday token: {0}")]
pub struct ParseWeekDayError(String);

impl FromStr for WeekDay {
    type Err = ParseWeekDayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "MO" => Ok(WeekDay::Monday),
            "TU" => Ok(WeekDay::Tuesday),
            "WE" => Ok(WeekDay::Wednesday),
            "TH" => Ok(WeekDay::Thursday),
            "FR" => Ok(WeekDay::Friday),
            "SA" => Ok(WeekDay::Saturday),
            "SU" => Ok(WeekDay::Sunday),
            _ => Err(ParseWeekDayError(s.to_string())),
        }
    }
}

/// Ordered, de-duplicated weekday set. Stored as a comma-separated token list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekDays(BTreeSet<WeekDay>);

impl WeekDays {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, day: WeekDay) -> bool {
        self.0.contains(&day)
    }

    pub fn iter(&self) -> impl Iterator<Item = WeekDay> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<WeekDay> for WeekDays {
    fn from_iter<I: IntoIterator<Item = WeekDay>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl std::fmt::Display for WeekDays {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tokens: Vec<&str> = self.0.iter().map(WeekDay::as_token).collect();
        f.write_str(&tokens.join(","))
    }
}

impl FromStr for WeekDays {
    type Err = ParseWeekDayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(WeekDay::from_str)
            .collect()
    }
}

impl TryFrom<String> for WeekDays {
    type Error = ParseWeekDayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// How a recurrence terminates. A rule carries at most one of COUNT or UNTIL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecurrenceEnd {
    Never,
    Count(u32),
    Until(NaiveDate),
}

impl RecurrenceEnd {
    pub fn count(&self) -> Option<u32> {
        match self {
            RecurrenceEnd::Count(count) => Some(*count),
            _ => None,
        }
    }

    pub fn until(&self) -> Option<NaiveDate> {
        match self {
            RecurrenceEnd::Until(until) => Some(*until),
            _ => None,
        }
    }
}

/// Structured recurrence description supplied by callers and recovered by decoding
/// a persisted rule text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceDescription {
    pub frequency: Frequency,
    pub interval: u16,
    pub week_days: WeekDays,
    pub end: RecurrenceEnd,
}

impl RecurrenceDescription {
    pub fn new(frequency: Frequency) -> Self {
        Self {
            frequency,
            interval: 1,
            week_days: WeekDays::new(),
            end: RecurrenceEnd::Never,
        }
    }

    pub fn every(mut self, interval: u16) -> Self {
        self.interval = interval;
        self
    }

    pub fn on(mut self, days: impl IntoIterator<Item = WeekDay>) -> Self {
        self.week_days = days.into_iter().collect();
        self
    }

    pub fn count(mut self, count: u32) -> Self {
        self.end = RecurrenceEnd::Count(count);
        self
    }

    pub fn until(mut self, until: NaiveDate) -> Self {
        self.end = RecurrenceEnd::Until(until);
        self
    }
}

// ============================================================================
// Persisted records
// ============================================================================

/// One recurrence epoch of a base event.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RecurrenceRule {
    /// Primary key, UUIDv7 for time-ordered performance
    pub id: Uuid,
    pub organization_id: Uuid,
    /// Non-owning reference to the series template
    pub base_recurring_event_id: Uuid,
    /// Canonical RFC 5545 text with a UTC-midnight DTSTART line
    pub rule_text: String,
    pub frequency: Frequency,
    #[sqlx(try_from = "String")]
    pub week_days: WeekDays,
    pub count: Option<u32>,
    /// Pattern anchor
    pub start_date: NaiveDate,
    /// Effective end of this epoch; `None` means open-ended
    pub end_date: Option<NaiveDate>,
    /// Always `max(start_date)` over the live instances of this rule
    pub latest_instance_date: NaiveDate,
    /// Optimistic concurrency token, bumped on every bookkeeping write
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The series template shared by every occurrence.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BaseRecurringEvent {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub all_day: bool,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    /// Number of days an occurrence spans past its start date (0 = same day)
    pub span_days: i64,
    pub start_date: NaiveDate,
    /// Mirror of the authoritative rule's end date
    pub end_date: Option<NaiveDate>,
    /// Cleared once the last epoch of the series is gone
    pub recurring: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum InstanceStatus {
    Active,
    Deleted,
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid instance status: {0}")]
pub struct ParseInstanceStatusError(String);

impl FromStr for InstanceStatus {
    type Err = ParseInstanceStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(InstanceStatus::Active),
            "deleted" => Ok(InstanceStatus::Deleted),
            _ => Err(ParseInstanceStatusError(s.to_string())),
        }
    }
}

/// One concrete occurrence of a series.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EventInstance {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub base_recurring_event_id: Uuid,
    pub recurrence_rule_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub all_day: bool,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: InstanceStatus,
    /// Set when this occurrence was edited on its own
    pub is_recurring_event_exception: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EventInstance {
    #[inline]
    pub fn is_live(&self) -> bool {
        self.status == InstanceStatus::Active
    }
}

// ============================================================================
// Data Transfer Objects
// ============================================================================

/// Data required to create a base event before it becomes recurring.
#[derive(Debug, Clone)]
pub struct NewBaseEventData {
    pub organization_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub all_day: bool,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub span_days: i64,
    pub start_date: NaiveDate,
}

impl NewBaseEventData {
    pub fn all_day(organization_id: Uuid, title: impl Into<String>, start_date: NaiveDate) -> Self {
        Self {
            organization_id,
            title: title.into(),
            description: None,
            location: None,
            all_day: true,
            start_time: None,
            end_time: None,
            span_days: 0,
            start_date,
        }
    }
}

/// Data required to persist a new recurrence epoch.
#[derive(Debug, Clone)]
pub struct NewRecurrenceRule {
    pub organization_id: Uuid,
    pub base_recurring_event_id: Uuid,
    pub rule_text: String,
    pub frequency: Frequency,
    pub week_days: WeekDays,
    pub count: Option<u32>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

/// Template fields that an update may change. `None` leaves a field untouched;
/// `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldChanges {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub location: Option<Option<String>>,
    pub all_day: Option<bool>,
    pub start_time: Option<Option<NaiveTime>>,
    pub end_time: Option<Option<NaiveTime>>,
}

impl FieldChanges {
    pub fn is_empty(&self) -> bool {
        self == &FieldChanges::default()
    }

    pub(crate) fn apply_to_instance(&self, instance: &mut EventInstance) {
        if let Some(title) = &self.title {
            instance.title = title.clone();
        }
        if let Some(description) = &self.description {
            instance.description = description.clone();
        }
        if let Some(location) = &self.location {
            instance.location = location.clone();
        }
        if let Some(all_day) = self.all_day {
            instance.all_day = all_day;
        }
        if let Some(start_time) = self.start_time {
            instance.start_time = start_time;
        }
        if let Some(end_time) = self.end_time {
            instance.end_time = end_time;
        }
    }

    pub(crate) fn apply_to_template(&self, template: &mut InstanceTemplate) {
        if let Some(title) = &self.title {
            template.title = title.clone();
        }
        if let Some(description) = &self.description {
            template.description = description.clone();
        }
        if let Some(location) = &self.location {
            template.location = location.clone();
        }
        if let Some(all_day) = self.all_day {
            template.all_day = all_day;
        }
        if let Some(start_time) = self.start_time {
            template.start_time = start_time;
        }
        if let Some(end_time) = self.end_time {
            template.end_time = end_time;
        }
    }
}

/// The fields copied onto every newly materialized occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceTemplate {
    pub organization_id: Uuid,
    pub base_recurring_event_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub all_day: bool,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub span_days: i64,
}

impl From<&BaseRecurringEvent> for InstanceTemplate {
    fn from(base: &BaseRecurringEvent) -> Self {
        Self {
            organization_id: base.organization_id,
            base_recurring_event_id: base.id,
            title: base.title.clone(),
            description: base.description.clone(),
            location: base.location.clone(),
            all_day: base.all_day,
            start_time: base.start_time,
            end_time: base.end_time,
            span_days: base.span_days,
        }
    }
}

impl InstanceTemplate {
    /// Template recovered from an existing occurrence, keeping the series span.
    pub fn from_instance(instance: &EventInstance) -> Self {
        Self {
            organization_id: instance.organization_id,
            base_recurring_event_id: instance.base_recurring_event_id,
            title: instance.title.clone(),
            description: instance.description.clone(),
            location: instance.location.clone(),
            all_day: instance.all_day,
            start_time: instance.start_time,
            end_time: instance.end_time,
            span_days: (instance.end_date - instance.start_date).num_days(),
        }
    }
}

/// Per-user denormalized list an event id can appear in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum ReferenceKind {
    Registered,
    Admin,
    Created,
}

/// Scope for update and delete operations on a recurring occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditScope {
    /// Affect only the selected occurrence
    ThisInstance,
    /// Affect the selected occurrence and every later one under the same rule
    ThisAndFollowing,
    /// Affect every occurrence under the same rule
    AllInstances,
}

impl std::fmt::Display for EditScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditScope::ThisInstance => write!(f, "thisInstance"),
            EditScope::ThisAndFollowing => write!(f, "thisAndFollowingInstances"),
            EditScope::AllInstances => write!(f, "allInstances"),
        }
    }
}

impl FromStr for EditScope {
    type Err = ParseEditScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "thisinstance" | "this" => Ok(EditScope::ThisInstance),
            "thisandfollowinginstances" | "following" => Ok(EditScope::ThisAndFollowing),
            "allinstances" | "all" => Ok(EditScope::AllInstances),
            _ => Err(ParseEditScopeError(s.to_string())),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid edit scope: {0}")]
pub struct ParseEditScopeError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_week_days_are_ordered_and_deduplicated() {
        let days: WeekDays = "WE,MO,we,FR".parse().unwrap();
        assert_eq!(days.to_string(), "MO,WE,FR");
        assert_eq!(days.len(), 3);
        assert!(days.contains(WeekDay::Friday));
    }

    #[test]
    fn test_week_days_empty_string() {
        let days = WeekDays::try_from(String::new()).unwrap();
        assert!(days.is_empty());
        assert_eq!(days.to_string(), "");
    }

    #[test]
    fn test_week_days_rejects_unknown_token() {
        assert!("MO,XX".parse::<WeekDays>().is_err());
    }

    #[test]
    fn test_edit_scope_parsing() {
        assert_eq!("thisInstance".parse::<EditScope>().unwrap(), EditScope::ThisInstance);
        assert_eq!(
            "thisAndFollowingInstances".parse::<EditScope>().unwrap(),
            EditScope::ThisAndFollowing
        );
        assert_eq!("all".parse::<EditScope>().unwrap(), EditScope::AllInstances);
        assert!("everything".parse::<EditScope>().is_err());
    }

    #[test]
    fn test_edit_scope_display_round_trips() {
        for scope in [EditScope::ThisInstance, EditScope::ThisAndFollowing, EditScope::AllInstances] {
            assert_eq!(scope.to_string().parse::<EditScope>().unwrap(), scope);
        }
    }

    #[test]
    fn test_frequency_parsing() {
        assert_eq!("weekly".parse::<Frequency>().unwrap(), Frequency::Weekly);
        assert_eq!(Frequency::Yearly.to_string(), "YEARLY");
        assert!("HOURLY".parse::<Frequency>().is_err());
    }

    #[test]
    fn test_field_changes_apply_to_template() {
        let mut template = InstanceTemplate {
            organization_id: Uuid::now_v7(),
            base_recurring_event_id: Uuid::now_v7(),
            title: "Standup".to_string(),
            description: Some("daily sync".to_string()),
            location: None,
            all_day: true,
            start_time: None,
            end_time: None,
            span_days: 0,
        };
        let changes = FieldChanges {
            title: Some("Retro".to_string()),
            description: Some(None),
            ..Default::default()
        };

        changes.apply_to_template(&mut template);
        assert_eq!(template.title, "Retro");
        assert_eq!(template.description, None);
        assert!(template.all_day);
        assert!(!changes.is_empty());
        assert!(FieldChanges::default().is_empty());
    }
}
