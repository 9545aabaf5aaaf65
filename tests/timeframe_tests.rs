use casescope::pattern::Timeframe;
use casescope::timeframe::{age_days, cutoff, resolve};
use chrono::{DateTime, Duration, TimeZone, Utc};

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

// 2026-10-19 is a Monday.
fn now() -> DateTime<Utc> {
    at(2026, 10, 19, 12)
}

#[test]
fn open_ended_buckets_have_no_end() {
    for tf in [Timeframe::LastHour, Timeframe::Today, Timeframe::ThisWeek, Timeframe::ThisMonth, Timeframe::ThisYear] {
        assert_eq!(resolve(tf, now()).end, None, "{tf:?}");
    }
}

#[test]
fn bucket_starts() {
    assert_eq!(resolve(Timeframe::LastHour, now()).start, now() - Duration::hours(1));
    assert_eq!(resolve(Timeframe::Today, now()).start, at(2026, 10, 19, 0));
    assert_eq!(resolve(Timeframe::ThisWeek, now()).start, at(2026, 10, 18, 0));
    assert_eq!(resolve(Timeframe::ThisMonth, now()).start, at(2026, 10, 1, 0));
    assert_eq!(resolve(Timeframe::ThisYear, now()).start, at(2026, 1, 1, 0));
}

#[test]
fn bounded_buckets() {
    let y = resolve(Timeframe::Yesterday, now());
    assert_eq!((y.start, y.end), (at(2026, 10, 18, 0), Some(at(2026, 10, 19, 0))));
    let w = resolve(Timeframe::LastWeek, now());
    assert_eq!((w.start, w.end), (at(2026, 10, 11, 0), Some(at(2026, 10, 18, 0))));
    let m = resolve(Timeframe::LastMonth, now());
    assert_eq!((m.start, m.end), (at(2026, 9, 1, 0), Some(at(2026, 10, 1, 0))));
}

#[test]
fn last_month_in_january_wraps_the_year() {
    let m = resolve(Timeframe::LastMonth, at(2027, 1, 15, 9));
    assert_eq!((m.start, m.end), (at(2026, 12, 1, 0), Some(at(2027, 1, 1, 0))));
}

#[test]
fn sunday_starts_its_own_week() {
    let w = resolve(Timeframe::ThisWeek, at(2026, 10, 18, 8));
    assert_eq!(w.start, at(2026, 10, 18, 0));
}

#[test]
fn ranges_are_half_open() {
    let y = resolve(Timeframe::Yesterday, now());
    assert!(y.contains(at(2026, 10, 18, 0)));
    assert!(!y.contains(at(2026, 10, 19, 0)));
}

#[test]
fn cutoff_and_age() {
    assert_eq!(cutoff(3, now()), at(2026, 10, 16, 12));
    assert_eq!(age_days(at(2026, 10, 14, 13), now()), 4);
    assert_eq!(age_days(now() + Duration::hours(5), now()), 0);
}

#[test]
fn cutoff_clamps_out_of_range_day_counts() {
    assert_eq!(cutoff(100_000_000, now()), DateTime::<Utc>::MIN_UTC);
    assert_eq!(cutoff(u32::MAX, now()), DateTime::<Utc>::MIN_UTC);
}
