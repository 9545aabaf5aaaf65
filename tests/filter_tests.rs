use casescope::filter::{compile, CompileError, Filter, Predicate};
use casescope::matcher::PatternMatcher;
use casescope::pattern::{Department, Dimension, Pattern, QueryType, Status};
use casescope::record::Record;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
}

fn rec(v: serde_json::Value) -> Record {
    serde_json::from_value(v).unwrap()
}

fn compiled(q: &str) -> Filter {
    let p = PatternMatcher::default().match_query(q);
    compile(&p, now()).unwrap()
}

#[test]
fn browse_all_is_legal_for_show() {
    let f = compiled("show everything");
    assert!(f.is_unconstrained());
    assert!(f.matches(&rec(json!({"department": "Water", "createdAt": "2026-01-01T00:00:00Z"}))));
}

#[test]
fn non_show_without_filters_is_a_user_error() {
    let p = PatternMatcher::default().match_query("How many complaints are there?");
    assert_eq!(compile(&p, now()), Err(CompileError::FilterRequired(QueryType::Count)));
}

#[test]
fn unfiltered_values_never_constrain() {
    // A stray value without its filter entry must not reach the predicate.
    let p = Pattern { department: Some(Department::Water), ..Pattern::default() };
    let f = compile(&p, now()).unwrap();
    assert_eq!(f.predicate, Predicate::True);
    assert!(f.matches(&rec(json!({"department": "RTO", "createdAt": "2026-10-01T00:00:00Z"}))));
}

#[test]
fn escalation_is_any_of_three_signals_scoped_by_department() {
    let f = compiled("Show escalated cases in the water department");
    let by_status = rec(json!({"department": "Water", "status": "Escalated", "createdAt": "2026-10-01T00:00:00Z"}));
    let by_flag = rec(json!({"department": "Water", "status": "Pending", "isEscalated": true, "createdAt": "2026-10-01T00:00:00Z"}));
    let by_level = rec(json!({"department": "Water", "status": "Pending", "escalationLevel": 2, "createdAt": "2026-10-01T00:00:00Z"}));
    let plain = rec(json!({"department": "Water", "status": "Pending", "createdAt": "2026-10-01T00:00:00Z"}));
    let other_dept = rec(json!({"department": "RTO", "status": "Escalated", "createdAt": "2026-10-01T00:00:00Z"}));
    assert!(f.matches(&by_status));
    assert!(f.matches(&by_flag));
    assert!(f.matches(&by_level));
    assert!(!f.matches(&plain));
    assert!(!f.matches(&other_dept));
    match &f.predicate {
        Predicate::And(parts) => {
            assert_eq!(parts.len(), 2);
            assert!(matches!(parts[1], Predicate::Or(ref alts) if alts.len() == 3));
        }
        other => panic!("expected conjunction, got {other:?}"),
    }
}

#[test]
fn location_accepts_both_textual_variants() {
    let f = compiled("show cases in Chennai North");
    let dash = rec(json!({"location": "Chennai - North", "createdAt": "2026-10-01T00:00:00Z"}));
    let suffix = rec(json!({"location": "Chennai, North Division", "createdAt": "2026-10-01T00:00:00Z"}));
    let other = rec(json!({"location": "Chennai - South", "createdAt": "2026-10-01T00:00:00Z"}));
    assert!(f.matches(&dash));
    assert!(f.matches(&suffix));
    assert!(!f.matches(&other));
}

#[test]
fn pending_duration_adds_age_and_status() {
    let f = compiled("show water cases pending for more than 7 days");
    let old_pending = rec(json!({"department": "Water", "status": "Pending", "createdAt": "2026-10-01T00:00:00Z"}));
    let new_pending = rec(json!({"department": "Water", "status": "Pending", "createdAt": "2026-10-18T00:00:00Z"}));
    let old_resolved = rec(json!({"department": "Water", "status": "Resolved", "createdAt": "2026-10-01T00:00:00Z"}));
    assert!(f.matches(&old_pending));
    assert!(!f.matches(&new_pending));
    assert!(!f.matches(&old_resolved));
}

#[test]
fn timeframe_becomes_a_half_open_range() {
    let f = compiled("show water complaints from yesterday");
    let range = f.range.unwrap();
    assert_eq!(range.start, Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap());
    assert_eq!(range.end, Some(Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap()));
    assert!(f.matches(&rec(json!({"department": "Water", "createdAt": "2026-10-18T23:59:59Z"}))));
    assert!(!f.matches(&rec(json!({"department": "Water", "createdAt": "2026-10-19T00:00:00Z"}))));
}

#[test]
fn compile_is_deterministic() {
    let p = PatternMatcher::default().match_query("count high priority water cases this week");
    assert_eq!(compile(&p, now()), compile(&p, now()));
}

#[test]
fn mongo_document_shape() {
    let f = compiled("show pending water cases this month");
    let doc = f.to_document();
    assert_eq!(
        doc,
        json!({"$and": [
            {"$and": [{"department": "Water"}, {"status": "Pending"}]},
            {"createdAt": {"$gte": "2026-10-01T00:00:00Z"}}
        ]})
    );
}

#[test]
fn status_filter_uses_stored_labels() {
    let mut p = Pattern { status: Some(Status::InProgress), ..Pattern::default() };
    p.filters.insert(Dimension::Status);
    let f = compile(&p, now()).unwrap();
    assert!(f.matches(&rec(json!({"status": "In Progress", "createdAt": "2026-10-01T00:00:00Z"}))));
    assert!(f.matches(&rec(json!({"status": "in_progress", "createdAt": "2026-10-01T00:00:00Z"}))));
    assert!(!f.matches(&rec(json!({"status": "Pending", "createdAt": "2026-10-01T00:00:00Z"}))));
}

#[test]
fn huge_day_counts_compile_to_an_empty_slice() {
    let p = PatternMatcher::default().match_query("show water complaints older than 100000000 days");
    assert_eq!(p.custom_duration, Some(100_000_000));
    let f = compile(&p, now()).unwrap();
    assert!(!f.matches(&rec(json!({"department": "Water", "createdAt": "1970-01-01T00:00:00Z"}))));

    let p = PatternMatcher::default().match_query("show water cases pending for more than 4000000000 days");
    assert_eq!(p.pending_duration, Some(4_000_000_000));
    assert!(compile(&p, now()).is_ok());
}
