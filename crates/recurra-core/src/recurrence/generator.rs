use chrono::{Days, Months, NaiveDate, NaiveTime};
use rrule::{RRuleSet, Tz as RRuleTz};

use crate::config::HorizonConfig;
use crate::error::CoreError;
use crate::models::{RecurrenceEnd, RecurrenceRule};

use super::codec::RuleStringCodec;

/// Expands persisted rules into occurrence dates, bounded by a
/// frequency-dependent horizon.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstanceDateGenerator {
    horizon: HorizonConfig,
}

impl InstanceDateGenerator {
    pub fn new(horizon: HorizonConfig) -> Self {
        Self { horizon }
    }

    /// The last date eager materialization may reach for a query bound.
    pub fn horizon_for(&self, rule: &RecurrenceRule, query_upper_bound: NaiveDate) -> NaiveDate {
        let years = self.horizon.years_for(rule.frequency);
        query_upper_bound
            .checked_add_months(Months::new(years.saturating_mul(12)))
            .unwrap_or(NaiveDate::MAX)
    }

    /// Generates occurrence dates for a rule.
    ///
    /// # Arguments
    ///
    /// * `rule` - The rule to expand. Its text is decoded first, so a corrupt rule
    ///   fails here with `MalformedRule`.
    /// * `event_end_date` - The series' own end date, if any.
    /// * `query_upper_bound` - The date the caller needs materialized up to.
    ///
    /// # Returns
    ///
    /// Ascending, de-duplicated dates from `rule.start_date` through
    /// `min(event_end_date, horizon)` inclusive.
    pub fn generate_dates(
        &self,
        rule: &RecurrenceRule,
        event_end_date: Option<NaiveDate>,
        query_upper_bound: NaiveDate,
    ) -> Result<Vec<NaiveDate>, CoreError> {
        let decoded = RuleStringCodec::decode(&rule.rule_text)?;
        if decoded.description.frequency != rule.frequency {
            return Err(CoreError::InconsistentState(format!(
                "Rule {} stores frequency {} but its text encodes {}",
                rule.id, rule.frequency, decoded.description.frequency
            )));
        }

        let horizon = self.horizon_for(rule, query_upper_bound);
        let bound = event_end_date.map_or(horizon, |end| end.min(horizon));

        expand(&rule.rule_text, rule.start_date, bound)
    }

    /// Computes the end date a new rule should carry: the final occurrence for a
    /// COUNT rule, the until date for an UNTIL rule, nothing when open-ended.
    pub fn series_end_date(rule_text: &str) -> Result<Option<NaiveDate>, CoreError> {
        let decoded = RuleStringCodec::decode(rule_text)?;
        match decoded.description.end {
            RecurrenceEnd::Never => Ok(None),
            RecurrenceEnd::Until(until) => Ok(Some(until)),
            RecurrenceEnd::Count(count) => {
                let (occurrences, limited) = parse(rule_text)?.all(OCCURRENCE_LIMIT);
                if limited && occurrences.len() < count as usize {
                    return Err(CoreError::InvalidInput(format!(
                        "COUNT={} exceeds the maximum of {} occurrences",
                        count, OCCURRENCE_LIMIT
                    )));
                }
                Ok(occurrences.last().map(|dt| dt.date_naive()))
            }
        }
    }
}

/// Upper bound on occurrences produced by a single expansion.
pub(crate) const OCCURRENCE_LIMIT: u16 = u16::MAX;

fn parse(rule_text: &str) -> Result<RRuleSet, CoreError> {
    rule_text.parse::<RRuleSet>().map_err(|e| {
        CoreError::MalformedRule(format!("Failed to parse RRULE '{}': {}", rule_text, e))
    })
}

fn expand(rule_text: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<NaiveDate>, CoreError> {
    let mut dates: Vec<NaiveDate> = Vec::new();
    if to < from {
        return Ok(dates);
    }

    // Bounded one day past `to` so the window is inclusive of `to` itself.
    let before = to
        .checked_add_days(Days::new(1))
        .unwrap_or(to)
        .and_time(NaiveTime::default())
        .and_utc()
        .with_timezone(&RRuleTz::UTC);
    let (occurrences, limited) = parse(rule_text)?.before(before).all(OCCURRENCE_LIMIT);
    if limited && occurrences.last().map_or(false, |last| last.date_naive() < to) {
        return Err(CoreError::InvalidInput(format!(
            "Expanding '{}' through {} needs more than {} occurrences",
            rule_text, to, OCCURRENCE_LIMIT
        )));
    }

    for occurrence in occurrences {
        let date = occurrence.date_naive();
        if date > to {
            break;
        }
        if date < from || dates.last() == Some(&date) {
            continue;
        }
        dates.push(date);
    }

    Ok(dates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Frequency, RecurrenceDescription, WeekDay, WeekDays};
    use chrono::Utc;
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn rule_for(desc: &RecurrenceDescription, start: NaiveDate) -> RecurrenceRule {
        let rule_text = RuleStringCodec::encode_for_date(desc, start).unwrap();
        RecurrenceRule {
            id: Uuid::now_v7(),
            organization_id: Uuid::now_v7(),
            base_recurring_event_id: Uuid::now_v7(),
            end_date: InstanceDateGenerator::series_end_date(&rule_text).unwrap(),
            rule_text,
            frequency: desc.frequency,
            week_days: desc.week_days.clone(),
            count: desc.end.count(),
            start_date: start,
            latest_instance_date: start,
            version: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_weekly_count_on_two_weekdays() {
        let desc = RecurrenceDescription::new(Frequency::Weekly)
            .on([WeekDay::Monday, WeekDay::Wednesday])
            .count(4);
        let rule = rule_for(&desc, date(2024, 1, 1));
        let generator = InstanceDateGenerator::default();

        let dates = generator.generate_dates(&rule, rule.end_date, rule.start_date).unwrap();
        assert_eq!(
            dates,
            vec![date(2024, 1, 1), date(2024, 1, 3), date(2024, 1, 8), date(2024, 1, 10)]
        );
        assert_eq!(rule.end_date, Some(date(2024, 1, 10)));
    }

    #[test]
    fn test_open_ended_daily_is_bounded_by_horizon() {
        let desc = RecurrenceDescription::new(Frequency::Daily);
        let rule = rule_for(&desc, date(2024, 1, 1));
        let generator = InstanceDateGenerator::default();

        let dates = generator.generate_dates(&rule, None, rule.start_date).unwrap();
        assert_eq!(dates.first(), Some(&date(2024, 1, 1)));
        assert_eq!(dates.last(), Some(&date(2025, 1, 1)));
        assert_eq!(dates.len(), 367);
        assert!(dates.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_horizon_grows_with_frequency() {
        let generator = InstanceDateGenerator::default();
        let start = date(2024, 1, 1);
        let daily = rule_for(&RecurrenceDescription::new(Frequency::Daily), start);
        let yearly = rule_for(&RecurrenceDescription::new(Frequency::Yearly), start);

        assert_eq!(generator.horizon_for(&daily, start), date(2025, 1, 1));
        assert_eq!(generator.horizon_for(&yearly, start), date(2034, 1, 1));

        let yearly_dates = generator.generate_dates(&yearly, None, start).unwrap();
        assert_eq!(yearly_dates.len(), 11);
    }

    #[test]
    fn test_event_end_date_caps_generation() {
        let desc = RecurrenceDescription::new(Frequency::Daily);
        let rule = rule_for(&desc, date(2024, 1, 1));
        let generator = InstanceDateGenerator::default();

        let dates = generator
            .generate_dates(&rule, Some(date(2024, 1, 5)), rule.start_date)
            .unwrap();
        assert_eq!(dates.len(), 5);
        assert_eq!(dates.last(), Some(&date(2024, 1, 5)));
    }

    #[test]
    fn test_larger_query_bound_extends_window() {
        let desc = RecurrenceDescription::new(Frequency::Weekly);
        let rule = rule_for(&desc, date(2024, 1, 1));
        let generator = InstanceDateGenerator::default();

        let initial = generator.generate_dates(&rule, None, rule.start_date).unwrap();
        let extended = generator.generate_dates(&rule, None, date(2025, 1, 1)).unwrap();
        assert!(extended.len() > initial.len());
        assert_eq!(&extended[..initial.len()], &initial[..]);
    }

    #[test]
    fn test_until_rule_end_date() {
        let desc = RecurrenceDescription::new(Frequency::Monthly).until(date(2024, 6, 15));
        let rule = rule_for(&desc, date(2024, 1, 15));
        assert_eq!(rule.end_date, Some(date(2024, 6, 15)));

        let dates = InstanceDateGenerator::default()
            .generate_dates(&rule, rule.end_date, rule.start_date)
            .unwrap();
        assert_eq!(dates.len(), 6);
    }

    #[test]
    fn test_expansion_past_occurrence_limit_is_rejected() {
        let rule = rule_for(&RecurrenceDescription::new(Frequency::Daily), date(2024, 1, 1));
        let generator = InstanceDateGenerator::default();

        let result = generator.generate_dates(&rule, None, date(2300, 1, 1));
        assert!(matches!(result, Err(CoreError::InvalidInput(_))));
    }

    #[test]
    fn test_count_end_date_at_occurrence_limit() {
        let at_limit = "DTSTART:20240101T000000Z\nRRULE:FREQ=DAILY;INTERVAL=1;COUNT=65535";
        let end = InstanceDateGenerator::series_end_date(at_limit).unwrap();
        assert_eq!(end, date(2024, 1, 1).checked_add_days(Days::new(65_534)));

        let over_limit = "DTSTART:20240101T000000Z\nRRULE:FREQ=DAILY;INTERVAL=1;COUNT=70000";
        assert!(matches!(
            InstanceDateGenerator::series_end_date(over_limit),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_malformed_rule_text_is_fatal() {
        let mut rule = rule_for(&RecurrenceDescription::new(Frequency::Daily), date(2024, 1, 1));
        rule.rule_text = "INVALID_RRULE".to_string();
        rule.week_days = WeekDays::new();

        let result = InstanceDateGenerator::default().generate_dates(&rule, None, rule.start_date);
        assert!(matches!(result, Err(CoreError::MalformedRule(_))));
    }
}
