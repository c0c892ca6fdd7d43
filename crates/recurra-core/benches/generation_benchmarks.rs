use chrono::{NaiveDate, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use recurra_core::config::HorizonConfig;
use recurra_core::models::{Frequency, RecurrenceDescription, RecurrenceRule, WeekDay};
use recurra_core::recurrence::{InstanceDateGenerator, RuleStringCodec};
use uuid::Uuid;

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

fn create_test_rule(description: &RecurrenceDescription) -> RecurrenceRule {
    let rule_text = RuleStringCodec::encode_for_date(description, start()).unwrap();
    RecurrenceRule {
        id: Uuid::now_v7(),
        organization_id: Uuid::now_v7(),
        base_recurring_event_id: Uuid::now_v7(),
        end_date: InstanceDateGenerator::series_end_date(&rule_text).unwrap(),
        rule_text,
        frequency: description.frequency,
        week_days: description.week_days.clone(),
        count: description.end.count(),
        start_date: start(),
        latest_instance_date: start(),
        version: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn bench_rule_encoding(c: &mut Criterion) {
    let description = RecurrenceDescription::new(Frequency::Weekly)
        .on([WeekDay::Monday, WeekDay::Wednesday, WeekDay::Friday])
        .count(52);

    c.bench_function("rule_encode", |b| {
        b.iter(|| RuleStringCodec::encode_for_date(black_box(&description), black_box(start())).unwrap())
    });

    let text = RuleStringCodec::encode_for_date(&description, start()).unwrap();
    c.bench_function("rule_decode", |b| {
        b.iter(|| RuleStringCodec::decode(black_box(&text)).unwrap())
    });
}

fn bench_open_ended_generation(c: &mut Criterion) {
    let generator = InstanceDateGenerator::new(HorizonConfig::default());
    let mut group = c.benchmark_group("open_ended_generation");

    for frequency in [Frequency::Daily, Frequency::Weekly, Frequency::Monthly, Frequency::Yearly] {
        let rule = create_test_rule(&RecurrenceDescription::new(frequency));
        group.bench_function(frequency.to_string(), |b| {
            b.iter(|| {
                generator
                    .generate_dates(black_box(&rule), None, black_box(rule.start_date))
                    .unwrap()
            })
        });
    }

    group.finish();
}

fn bench_catch_up_generation(c: &mut Criterion) {
    let generator = InstanceDateGenerator::new(HorizonConfig::default());
    let rule = create_test_rule(
        &RecurrenceDescription::new(Frequency::Weekly).on([WeekDay::Tuesday, WeekDay::Thursday]),
    );
    let far_bound = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();

    c.bench_function("catch_up_generation_weekly", |b| {
        b.iter(|| {
            generator
                .generate_dates(black_box(&rule), None, black_box(far_bound))
                .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_rule_encoding,
    bench_open_ended_generation,
    bench_catch_up_generation
);
criterion_main!(benches);
