//! Canonical text form of a recurrence rule.
//!
//! Every rule is stored as two RFC 5545 content lines:
//!
//! ```text
//! DTSTART:20240101T000000Z
//! RRULE:FREQ=WEEKLY;INTERVAL=1;BYDAY=MO,WE;COUNT=4
//! ```
//!
//! `DTSTART` is always pinned to UTC midnight because occurrence boundaries are
//! date-granular. Clause order is fixed so that encoding is deterministic and two
//! descriptions can be compared by their text.

use chrono::{DateTime, NaiveDate, Utc};
use rrule::RRuleSet;

use crate::error::CoreError;
use crate::models::{Frequency, RecurrenceDescription, RecurrenceEnd, WeekDays};

use super::generator::OCCURRENCE_LIMIT;

const DATE_FORMAT: &str = "%Y%m%d";

/// A decoded rule: the structured description plus its DTSTART anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRule {
    pub description: RecurrenceDescription,
    pub anchor: NaiveDate,
}

pub struct RuleStringCodec;

impl RuleStringCodec {
    /// Encodes a description anchored at `anchor_start`, normalized to UTC midnight.
    pub fn encode(
        description: &RecurrenceDescription,
        anchor_start: DateTime<Utc>,
    ) -> Result<String, CoreError> {
        Self::encode_for_date(description, anchor_start.date_naive())
    }

    /// Encodes a description anchored at midnight UTC of `anchor`.
    pub fn encode_for_date(
        description: &RecurrenceDescription,
        anchor: NaiveDate,
    ) -> Result<String, CoreError> {
        Self::validate(description, anchor)?;

        let mut rule = format!(
            "FREQ={};INTERVAL={}",
            description.frequency.as_token(),
            description.interval
        );
        if !description.week_days.is_empty() {
            rule.push_str(";BYDAY=");
            rule.push_str(&description.week_days.to_string());
        }
        match description.end {
            RecurrenceEnd::Never => {}
            RecurrenceEnd::Count(count) => rule.push_str(&format!(";COUNT={}", count)),
            RecurrenceEnd::Until(until) => {
                rule.push_str(&format!(";UNTIL={}T000000Z", until.format(DATE_FORMAT)))
            }
        }

        let text = format!("DTSTART:{}T000000Z\nRRULE:{}", anchor.format(DATE_FORMAT), rule);

        // The grammar check is delegated to the rrule crate so that anything we
        // write can also be expanded later.
        text.parse::<RRuleSet>().map_err(|e| {
            CoreError::InvalidInput(format!("Recurrence '{}' is not expandable: {}", text, e))
        })?;

        Ok(text)
    }

    /// Decodes persisted rule text. Any text this codec cannot represent exactly is
    /// rejected with [`CoreError::MalformedRule`].
    pub fn decode(rule_text: &str) -> Result<DecodedRule, CoreError> {
        rule_text.parse::<RRuleSet>().map_err(|e| {
            CoreError::MalformedRule(format!("Failed to parse RRULE '{}': {}", rule_text, e))
        })?;

        let mut anchor = None;
        let mut rrule_line = None;
        for line in rule_text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(value) = line.strip_prefix("DTSTART:") {
                anchor = Some(parse_rule_date(value, rule_text)?);
            } else if let Some(value) = line.strip_prefix("RRULE:") {
                if rrule_line.replace(value).is_some() {
                    return Err(malformed(rule_text, "more than one RRULE line"));
                }
            } else {
                return Err(malformed(rule_text, &format!("unsupported line '{}'", line)));
            }
        }

        let anchor = anchor.ok_or_else(|| malformed(rule_text, "missing DTSTART"))?;
        let rrule_line = rrule_line.ok_or_else(|| malformed(rule_text, "missing RRULE"))?;

        let mut frequency = None;
        let mut interval: u16 = 1;
        let mut week_days = WeekDays::new();
        let mut count = None;
        let mut until = None;

        for part in rrule_line.split(';').filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| malformed(rule_text, &format!("clause '{}' has no value", part)))?;
            match key.to_uppercase().as_str() {
                "FREQ" => {
                    frequency = Some(
                        value
                            .parse::<Frequency>()
                            .map_err(|e| malformed(rule_text, &e.to_string()))?,
                    );
                }
                "INTERVAL" => {
                    interval = value
                        .parse()
                        .map_err(|_| malformed(rule_text, &format!("bad INTERVAL '{}'", value)))?;
                }
                "BYDAY" => {
                    week_days = value
                        .parse::<WeekDays>()
                        .map_err(|e| malformed(rule_text, &e.to_string()))?;
                }
                "COUNT" => {
                    count = Some(
                        value
                            .parse::<u32>()
                            .map_err(|_| malformed(rule_text, &format!("bad COUNT '{}'", value)))?,
                    );
                }
                "UNTIL" => until = Some(parse_rule_date(value, rule_text)?),
                other => {
                    return Err(malformed(rule_text, &format!("unsupported clause '{}'", other)));
                }
            }
        }

        let frequency = frequency.ok_or_else(|| malformed(rule_text, "missing FREQ"))?;
        if !week_days.is_empty() && frequency != Frequency::Weekly {
            return Err(malformed(rule_text, "BYDAY is only supported with FREQ=WEEKLY"));
        }
        let end = match (count, until) {
            (None, None) => RecurrenceEnd::Never,
            (Some(count), None) => RecurrenceEnd::Count(count),
            (None, Some(until)) => RecurrenceEnd::Until(until),
            (Some(_), Some(_)) => return Err(malformed(rule_text, "both COUNT and UNTIL present")),
        };

        Ok(DecodedRule {
            description: RecurrenceDescription {
                frequency,
                interval,
                week_days,
                end,
            },
            anchor,
        })
    }

    fn validate(description: &RecurrenceDescription, anchor: NaiveDate) -> Result<(), CoreError> {
        if description.interval == 0 {
            return Err(CoreError::InvalidInput("interval must be at least 1".to_string()));
        }
        if !description.week_days.is_empty() && description.frequency != Frequency::Weekly {
            return Err(CoreError::InvalidInput(format!(
                "week days {} require a weekly frequency, not {}",
                description.week_days, description.frequency
            )));
        }
        match description.end {
            RecurrenceEnd::Count(0) => {
                Err(CoreError::InvalidInput("count must be at least 1".to_string()))
            }
            RecurrenceEnd::Count(count) if count > u32::from(OCCURRENCE_LIMIT) => {
                Err(CoreError::InvalidInput(format!(
                    "count {} exceeds the maximum of {} occurrences",
                    count, OCCURRENCE_LIMIT
                )))
            }
            RecurrenceEnd::Until(until) if until < anchor => Err(CoreError::InvalidInput(format!(
                "until date {} precedes the recurrence start {}",
                until, anchor
            ))),
            _ => Ok(()),
        }
    }
}

fn parse_rule_date(value: &str, rule_text: &str) -> Result<NaiveDate, CoreError> {
    let date_part = value.get(..8).unwrap_or(value);
    let time_part = &value[date_part.len()..];
    if !(time_part.is_empty() || time_part == "T000000Z") {
        return Err(malformed(rule_text, &format!("date '{}' is not anchored at UTC midnight", value)));
    }
    NaiveDate::parse_from_str(date_part, DATE_FORMAT)
        .map_err(|_| malformed(rule_text, &format!("bad date '{}'", value)))
}

fn malformed(rule_text: &str, reason: &str) -> CoreError {
    CoreError::MalformedRule(format!("{} in '{}'", reason, rule_text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WeekDay;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_encode_weekly_with_count() {
        let desc = RecurrenceDescription::new(Frequency::Weekly)
            .on([WeekDay::Wednesday, WeekDay::Monday])
            .count(4);
        let text = RuleStringCodec::encode_for_date(&desc, date(2024, 1, 1)).unwrap();
        assert_eq!(text, "DTSTART:20240101T000000Z\nRRULE:FREQ=WEEKLY;INTERVAL=1;BYDAY=MO,WE;COUNT=4");
    }

    #[test]
    fn test_encode_normalizes_anchor_to_midnight() {
        let desc = RecurrenceDescription::new(Frequency::Daily).every(2);
        let anchor = Utc.with_ymd_and_hms(2024, 3, 5, 17, 45, 12).unwrap();
        let text = RuleStringCodec::encode(&desc, anchor).unwrap();
        assert_eq!(text, "DTSTART:20240305T000000Z\nRRULE:FREQ=DAILY;INTERVAL=2");
    }

    #[test]
    fn test_encode_until_clause() {
        let desc = RecurrenceDescription::new(Frequency::Monthly).until(date(2024, 12, 31));
        let text = RuleStringCodec::encode_for_date(&desc, date(2024, 1, 15)).unwrap();
        assert!(text.ends_with("RRULE:FREQ=MONTHLY;INTERVAL=1;UNTIL=20241231T000000Z"));
        assert!(!text.contains("COUNT"));
        assert!(!text.contains("BYDAY"));
    }

    #[test]
    fn test_encode_is_deterministic() {
        let a = RecurrenceDescription::new(Frequency::Weekly).on([WeekDay::Friday, WeekDay::Tuesday]);
        let b = RecurrenceDescription::new(Frequency::Weekly).on([WeekDay::Tuesday, WeekDay::Friday]);
        assert_eq!(
            RuleStringCodec::encode_for_date(&a, date(2024, 1, 2)).unwrap(),
            RuleStringCodec::encode_for_date(&b, date(2024, 1, 2)).unwrap()
        );
    }

    #[test]
    fn test_encode_rejects_invalid_descriptions() {
        let zero_interval = RecurrenceDescription::new(Frequency::Daily).every(0);
        assert!(matches!(
            RuleStringCodec::encode_for_date(&zero_interval, date(2024, 1, 1)),
            Err(CoreError::InvalidInput(_))
        ));

        let zero_count = RecurrenceDescription::new(Frequency::Daily).count(0);
        assert!(matches!(
            RuleStringCodec::encode_for_date(&zero_count, date(2024, 1, 1)),
            Err(CoreError::InvalidInput(_))
        ));

        let until_before_start = RecurrenceDescription::new(Frequency::Daily).until(date(2023, 12, 1));
        assert!(matches!(
            RuleStringCodec::encode_for_date(&until_before_start, date(2024, 1, 1)),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_week_days_require_weekly_frequency() {
        for frequency in [Frequency::Daily, Frequency::Monthly, Frequency::Yearly] {
            let desc = RecurrenceDescription::new(frequency).on([WeekDay::Monday]);
            assert!(
                matches!(
                    RuleStringCodec::encode_for_date(&desc, date(2024, 1, 1)),
                    Err(CoreError::InvalidInput(_))
                ),
                "expected InvalidInput for {}",
                frequency
            );
        }
    }

    #[test]
    fn test_count_is_limited_to_expandable_occurrences() {
        let at_limit = RecurrenceDescription::new(Frequency::Daily).count(u32::from(u16::MAX));
        assert!(RuleStringCodec::encode_for_date(&at_limit, date(2024, 1, 1)).is_ok());

        let over_limit = RecurrenceDescription::new(Frequency::Daily).count(70_000);
        assert!(matches!(
            RuleStringCodec::encode_for_date(&over_limit, date(2024, 1, 1)),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_decode_recovers_description_and_anchor() {
        let decoded = RuleStringCodec::decode(
            "DTSTART:20240101T000000Z\nRRULE:FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,WE;UNTIL=20240630T000000Z",
        )
        .unwrap();
        assert_eq!(decoded.anchor, date(2024, 1, 1));
        assert_eq!(decoded.description.frequency, Frequency::Weekly);
        assert_eq!(decoded.description.interval, 2);
        assert_eq!(decoded.description.week_days.to_string(), "MO,WE");
        assert_eq!(decoded.description.end, RecurrenceEnd::Until(date(2024, 6, 30)));
    }

    #[test]
    fn test_decode_defaults_interval() {
        let decoded = RuleStringCodec::decode("DTSTART:20240101T000000Z\nRRULE:FREQ=YEARLY").unwrap();
        assert_eq!(decoded.description.interval, 1);
        assert_eq!(decoded.description.end, RecurrenceEnd::Never);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        for text in [
            "INVALID_RRULE",
            "DTSTART:20240101T000000Z\nRRULE:FREQ=SOMETIMES",
            "RRULE:FREQ=DAILY",
            "DTSTART:20240101T000000Z\nRRULE:FREQ=MONTHLY;BYMONTHDAY=1",
            "DTSTART:20240101T000000Z\nRRULE:FREQ=DAILY;BYDAY=MO",
        ] {
            assert!(
                matches!(RuleStringCodec::decode(text), Err(CoreError::MalformedRule(_))),
                "expected MalformedRule for {:?}",
                text
            );
        }
    }
}
