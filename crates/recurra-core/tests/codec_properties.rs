use chrono::{Days, NaiveDate};
use proptest::prelude::*;
use recurra_core::models::{Frequency, RecurrenceDescription, RecurrenceEnd, WeekDay, WeekDays};
use recurra_core::recurrence::RuleStringCodec;

const ALL_DAYS: [WeekDay; 7] = [
    WeekDay::Monday,
    WeekDay::Tuesday,
    WeekDay::Wednesday,
    WeekDay::Thursday,
    WeekDay::Friday,
    WeekDay::Saturday,
    WeekDay::Sunday,
];

fn frequency() -> impl Strategy<Value = Frequency> {
    prop_oneof![
        Just(Frequency::Daily),
        Just(Frequency::Weekly),
        Just(Frequency::Monthly),
        Just(Frequency::Yearly),
    ]
}

fn week_days() -> impl Strategy<Value = WeekDays> {
    (0u8..128).prop_map(|mask| {
        ALL_DAYS
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, day)| *day)
            .collect()
    })
}

fn anchor() -> impl Strategy<Value = NaiveDate> {
    (0u64..3650).prop_map(|offset| {
        NaiveDate::from_ymd_opt(2020, 1, 1)
            .and_then(|d| d.checked_add_days(Days::new(offset)))
            .unwrap()
    })
}

fn end(anchor: NaiveDate) -> impl Strategy<Value = RecurrenceEnd> {
    prop_oneof![
        Just(RecurrenceEnd::Never),
        (1u32..500).prop_map(RecurrenceEnd::Count),
        (0u64..3650).prop_map(move |days| {
            RecurrenceEnd::Until(anchor.checked_add_days(Days::new(days)).unwrap())
        }),
    ]
}

fn description_and_anchor() -> impl Strategy<Value = (RecurrenceDescription, NaiveDate)> {
    anchor().prop_flat_map(|anchor| {
        (frequency(), 1u16..52, week_days(), end(anchor)).prop_map(
            move |(frequency, interval, week_days, end)| {
                (
                    RecurrenceDescription {
                        frequency,
                        interval,
                        week_days: if frequency == Frequency::Weekly {
                            week_days
                        } else {
                            WeekDays::new()
                        },
                        end,
                    },
                    anchor,
                )
            },
        )
    })
}

proptest! {
    #[test]
    fn encode_then_decode_preserves_description((description, anchor) in description_and_anchor()) {
        let text = RuleStringCodec::encode_for_date(&description, anchor).unwrap();
        let decoded = RuleStringCodec::decode(&text).unwrap();

        prop_assert_eq!(decoded.anchor, anchor);
        prop_assert_eq!(&decoded.description, &description);
        prop_assert_eq!(RuleStringCodec::encode_for_date(&decoded.description, anchor).unwrap(), text);
    }
}
