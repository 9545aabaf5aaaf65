use casescope::mapreduce::{self, map_record, reduce, run_local, Family, KeyValueRecord, MapContext, MetricValue, UrgentCase};
use casescope::record::Record;
use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::io::Cursor;

fn ctx() -> MapContext {
    MapContext { now: Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap(), urgent_after_days: 3 }
}

fn rec(v: serde_json::Value) -> Record {
    serde_json::from_value(v).unwrap()
}

fn sample() -> Vec<Record> {
    vec![
        rec(json!({"petitionId": "W1", "department": "Water", "status": "Resolved", "priority": "High",
                   "location": "Chennai, North Division", "createdAt": "2026-10-01T00:00:00Z", "resolvedAt": "2026-10-02T00:00:00Z",
                   "resourceManagement": {"fundsRequired": 1500.0, "manpowerNeeded": 4}})),
        rec(json!({"petitionId": "W2", "department": "Water", "status": "Pending", "priority": "High",
                   "createdAt": "2026-10-10T12:00:00Z", "resourceManagement": {"fundsRequired": 500.0, "manpowerNeeded": 2}})),
        rec(json!({"petitionId": "W3", "department": "Water", "status": "Pending", "priority": "Low", "createdAt": "2026-10-18T00:00:00Z"})),
        rec(json!({"petitionId": "R1", "department": "RTO", "status": "Pending", "priority": "High", "createdAt": "2026-10-05T00:00:00Z"})),
        rec(json!({"petitionId": "E1", "department": "Electricity", "status": "In Progress", "priority": "Medium",
                   "escalationLevel": 2, "createdAt": "2026-09-20T00:00:00Z"})),
    ]
}

fn value_of<'a>(out: &'a [KeyValueRecord], key: &str) -> Option<&'a MetricValue> {
    out.iter().find(|kv| kv.key == key).map(|kv| &kv.value)
}

#[test]
fn mapper_emits_every_family_for_a_resolved_high_priority_record() {
    let keys: Vec<String> = map_record(&sample()[0], &ctx()).into_iter().map(|kv| kv.key).collect();
    assert_eq!(
        keys,
        vec![
            "department_Water",
            "status_Resolved_Water",
            "priority_High_Water",
            "location_Chennai - North_Water",
            "month_2026-10_Water",
            "resolution_time_Water",
            "resource_needs_Water",
        ]
    );
}

#[test]
fn mapper_flags_old_high_priority_pending_cases() {
    let out = map_record(&sample()[1], &ctx());
    assert_eq!(
        value_of(&out, "urgent_pending_3days"),
        Some(&MetricValue::UrgentList(vec![UrgentCase { id: "W2".into(), department: "Water".into(), age_days: 9 }]))
    );
    // low priority and recent: neither resource needs nor urgent
    let out = map_record(&sample()[2], &ctx());
    assert!(out.iter().all(|kv| kv.family() != Some(Family::UrgentPending) && kv.family() != Some(Family::ResourceNeeds)));
}

#[test]
fn escalated_records_need_resources_regardless_of_priority() {
    let out = map_record(&sample()[4], &ctx());
    assert!(value_of(&out, "resource_needs_Electricity").is_some());
    assert!(value_of(&out, "status_InProgress_Electricity").is_some());
}

#[test]
fn reducer_folds_by_prefix() {
    let out = run_local(&sample(), &ctx());
    assert_eq!(value_of(&out, "department_Water"), Some(&MetricValue::Count(3)));
    assert_eq!(value_of(&out, "status_Pending_Water"), Some(&MetricValue::Count(2)));
    assert_eq!(
        value_of(&out, "month_2026-10_Water"),
        Some(&MetricValue::Average { count: 3, total: 24.0, average: 8.0 })
    );
    match value_of(&out, "resource_needs_Water") {
        Some(MetricValue::ResourceNeeds(r)) => {
            assert_eq!(r.total, 2);
            assert_eq!(r.priorities.get("High"), Some(&2));
            assert_eq!(r.funds_required, 2000.0);
            assert_eq!(r.manpower_needed, 6);
        }
        other => panic!("unexpected resource value {other:?}"),
    }
    match value_of(&out, "urgent_pending_3days") {
        Some(MetricValue::UrgentList(cases)) => {
            let ids: Vec<&str> = cases.iter().map(|c| c.id.as_str()).collect();
            assert_eq!(ids, vec!["R1", "W2"]);
        }
        other => panic!("unexpected urgent value {other:?}"),
    }
    // output is sorted by key
    let keys: Vec<&str> = out.iter().map(|kv| kv.key.as_str()).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
}

#[test]
fn reducing_the_same_export_twice_is_identical() {
    let records = sample();
    assert_eq!(run_local(&records, &ctx()), run_local(&records, &ctx()));

    let emitted: Vec<MetricValue> = records
        .iter()
        .flat_map(|r| map_record(r, &ctx()))
        .filter(|kv| kv.key == "department_Water")
        .map(|kv| kv.value)
        .collect();
    assert_eq!(reduce("department_Water", emitted.clone()), reduce("department_Water", emitted));
}

#[test]
fn reducing_reduced_values_is_stable() {
    let once = reduce("resolution_time_Water", vec![
        MetricValue::Average { count: 1, total: 10.0, average: 10.0 },
        MetricValue::Average { count: 1, total: 20.0, average: 20.0 },
    ])
    .unwrap();
    assert_eq!(once, MetricValue::Average { count: 2, total: 30.0, average: 15.0 });
    assert_eq!(reduce("resolution_time_Water", vec![once.clone()]), Some(once));
}

#[test]
fn unknown_keys_are_dropped() {
    assert_eq!(reduce("mystery_Water", vec![MetricValue::Count(1)]), None);
    assert_eq!(reduce("department_Water", Vec::new()), None);
}

#[test]
fn streaming_stages_match_the_in_process_run() {
    let ndjson: String = sample().iter().map(|r| serde_json::to_string(r).unwrap() + "\n").collect();
    let mut mapped = Vec::new();
    let stats = mapreduce::map_stream(Cursor::new(ndjson + "{broken\n"), &mut mapped, &ctx()).unwrap();
    assert_eq!(stats.lines_in, 6);
    assert_eq!(stats.skipped, 1);

    let sorted = casescope::batch::sort_by_key(&mapped);
    let mut reduced = Vec::new();
    mapreduce::reduce_stream(Cursor::new(sorted), &mut reduced).unwrap();
    let (streamed, import) = casescope::batch::parse_output(&String::from_utf8(reduced).unwrap());
    assert_eq!(import.skipped, 0);

    let local = run_local(&sample(), &ctx());
    let counts = |v: &[KeyValueRecord]| v.iter().map(|kv| (kv.key.clone(), kv.value.count())).collect::<Vec<_>>();
    assert_eq!(counts(&streamed), counts(&local));
}

#[test]
fn mapper_accepts_a_json_array() {
    let body = serde_json::to_string(&sample()).unwrap();
    let mut mapped = Vec::new();
    let stats = mapreduce::map_stream(Cursor::new(body), &mut mapped, &ctx()).unwrap();
    assert_eq!(stats.skipped, 0);
    assert!(String::from_utf8(mapped).unwrap().lines().any(|l| l.starts_with("department_RTO\t")));
}

#[test]
fn bad_array_elements_are_skipped_one_by_one() {
    let mut items: Vec<serde_json::Value> = sample().iter().map(|r| serde_json::to_value(r).unwrap()).collect();
    items.insert(1, json!({"petitionId": "X", "createdAt": "sometime"}));
    let mut mapped = Vec::new();
    let stats = mapreduce::map_stream(Cursor::new(serde_json::to_string(&items).unwrap()), &mut mapped, &ctx()).unwrap();
    assert_eq!(stats.lines_in, 6);
    assert_eq!(stats.skipped, 1);
    let text = String::from_utf8(mapped).unwrap();
    assert_eq!(text.lines().filter(|l| l.starts_with("department_")).count(), 5);
}
