use crate::mapreduce::{parse_key, Family, KeyValueRecord, MetricValue};
use crate::pattern::{AnalysisType, Dimension, Pattern, QueryType, Status};
use crate::prose;
use crate::record::Record;
use chrono::Datelike;
use itertools::Itertools;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// What a route hands to the aggregator.
#[derive(Debug, Clone)]
pub enum RawResults {
    Records(Vec<Record>),
    Entries(Vec<KeyValueRecord>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupedResult {
    pub dimensions: BTreeMap<String, String>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceRow {
    pub department: String,
    pub average_response_hours: f64,
    pub resolved_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Results {
    Records(Vec<Record>),
    Entries(Vec<KeyValueRecord>),
    Groups(Vec<GroupedResult>),
    Performance(Vec<PerformanceRow>),
}

impl Results {
    pub fn len(&self) -> usize {
        match self {
            Results::Records(v) => v.len(),
            Results::Entries(v) => v.len(),
            Results::Groups(v) => v.len(),
            Results::Performance(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Formatted {
    pub results: Results,
    pub response: String,
}

pub struct ResultAggregator;

impl ResultAggregator {
    pub fn format(raw: RawResults, pattern: &Pattern) -> Formatted {
        let results = match raw {
            RawResults::Records(records) => Self::shape_records(records, pattern),
            RawResults::Entries(entries) => Self::shape_entries(entries, pattern),
        };
        let response = prose::render(&results, pattern);
        Formatted { results, response }
    }

    fn shape_records(records: Vec<Record>, pattern: &Pattern) -> Results {
        let mut records = records;
        if pattern.is_escalation() {
            sort_escalations(&mut records, pattern);
        }
        records.retain(|r| record_matches(r, pattern));

        if pattern.query_type == QueryType::Performance {
            return Results::Performance(performance_rows(&records));
        }
        if !pattern.group_by.is_empty() {
            return Results::Groups(group_records(&records, &pattern.group_by));
        }
        Results::Records(records)
    }

    fn shape_entries(entries: Vec<KeyValueRecord>, pattern: &Pattern) -> Results {
        let entries: Vec<KeyValueRecord> = entries
            .into_iter()
            .filter_map(|kv| entry_matches(kv, pattern))
            .filter(|kv| kv.family().map(|f| family_selected(f, pattern)).unwrap_or(false))
            .sorted_by(|a, b| a.key.cmp(&b.key))
            .collect();
        if !pattern.group_by.is_empty() {
            return Results::Groups(group_entries(&entries, &pattern.group_by, pattern.analysis_type));
        }
        Results::Entries(entries)
    }
}

/// Escalations only, department match first, then level, then most recent.
fn sort_escalations(records: &mut Vec<Record>, pattern: &Pattern) {
    records.retain(|r| r.is_escalation());
    let wanted = pattern.department;
    records.sort_by(|a, b| {
        let a_match = wanted.is_some() && a.department_kind() == wanted;
        let b_match = wanted.is_some() && b.department_kind() == wanted;
        b_match
            .cmp(&a_match)
            .then_with(|| b.escalation_level.cmp(&a.escalation_level))
            .then_with(|| b.escalated_at.unwrap_or(b.created_at).cmp(&a.escalated_at.unwrap_or(a.created_at)))
    });
}

fn record_matches(r: &Record, pattern: &Pattern) -> bool {
    if pattern.is_filtered(Dimension::Department) && r.department_kind() != pattern.department {
        return false;
    }
    if pattern.is_filtered(Dimension::Status) {
        let ok = if pattern.is_escalation() { r.is_escalation() } else { r.status_kind() == pattern.status };
        if !ok {
            return false;
        }
    }
    if pattern.is_filtered(Dimension::Priority) && r.priority_kind() != pattern.priority {
        return false;
    }
    if let (true, Some(loc)) = (pattern.is_filtered(Dimension::Location), &pattern.location) {
        let key = loc.key();
        if !r.location_label().map(|l| l.eq_ignore_ascii_case(&key)).unwrap_or(false) {
            return false;
        }
    }
    true
}

/// Drop entries that carry a filtered dimension with a different value.
fn entry_matches(mut kv: KeyValueRecord, pattern: &Pattern) -> Option<KeyValueRecord> {
    let parts = parse_key(&kv.key)?;
    if let (true, Some(dept)) = (pattern.is_filtered(Dimension::Department), pattern.department) {
        if let Some(d) = &parts.department {
            if !d.eq_ignore_ascii_case(dept.label()) {
                return None;
            }
        }
        if let MetricValue::UrgentList(cases) = &mut kv.value {
            cases.retain(|c| c.department.eq_ignore_ascii_case(dept.label()));
        }
    }
    let value = parts.value.as_deref();
    match parts.family {
        Family::Status if pattern.is_filtered(Dimension::Status) && !pattern.is_escalation() => {
            let want = pattern.status.map(|s| s.key_label());
            if value != want {
                return None;
            }
        }
        Family::Priority if pattern.is_filtered(Dimension::Priority) => {
            let want = pattern.priority.map(|p| p.label());
            if value != want {
                return None;
            }
        }
        Family::Location if pattern.is_filtered(Dimension::Location) => {
            let want = pattern.location.as_ref().map(|l| l.key());
            if !matches!((value, want.as_deref()), (Some(v), Some(w)) if v.eq_ignore_ascii_case(w)) {
                return None;
            }
        }
        _ => {}
    }
    Some(kv)
}

fn family_selected(family: Family, pattern: &Pattern) -> bool {
    if !pattern.group_by.is_empty() {
        return family == grouping_family(&pattern.group_by, pattern.analysis_type);
    }
    match pattern.analysis_type {
        AnalysisType::Performance => family == Family::ResolutionTime,
        AnalysisType::Distribution => {
            matches!(family, Family::Department | Family::Status | Family::Priority | Family::Location)
        }
        AnalysisType::Trends => family == Family::Month,
        AnalysisType::Resource => matches!(family, Family::ResourceNeeds | Family::UrgentPending),
        AnalysisType::BasicCount => family == Family::Department,
    }
}

fn record_dimension(r: &Record, dim: Dimension) -> String {
    match dim {
        Dimension::Department => r.department_label(),
        Dimension::Status => r.status_label(),
        Dimension::Priority => r.priority_label(),
        Dimension::Location => r.location_label().unwrap_or_else(|| "Unknown".to_string()),
        Dimension::Month => format!("{}-{}", r.created_at.year(), r.created_at.month()),
        Dimension::Timeframe | Dimension::CustomDuration | Dimension::PendingDuration => "All".to_string(),
    }
}

fn finish_groups(counts: HashMap<Vec<String>, u64>, group_by: &[Dimension]) -> Vec<GroupedResult> {
    counts
        .into_iter()
        .sorted_by(|(ka, ca), (kb, cb)| cb.cmp(ca).then_with(|| ka.cmp(kb)))
        .map(|(values, count)| GroupedResult {
            dimensions: group_by.iter().map(|d| d.name().to_string()).zip(values).collect(),
            count,
        })
        .collect()
}

/// Count records per combination of `group_by` values.
pub fn group_records(records: &[Record], group_by: &[Dimension]) -> Vec<GroupedResult> {
    let mut counts: HashMap<Vec<String>, u64> = HashMap::new();
    for r in records {
        let values = group_by.iter().map(|d| record_dimension(r, *d)).collect();
        *counts.entry(values).or_insert(0) += 1;
    }
    finish_groups(counts, group_by)
}

fn family_for(dim: Dimension) -> Option<Family> {
    match dim {
        Dimension::Status => Some(Family::Status),
        Dimension::Priority => Some(Family::Priority),
        Dimension::Location => Some(Family::Location),
        Dimension::Month => Some(Family::Month),
        _ => None,
    }
}

/// Key family that answers a grouping. Keys carry at most one dimension besides
/// department, so the first non-department dimension picks the family. Grouping
/// by department alone keeps the family the analysis asked for.
pub fn grouping_family(group_by: &[Dimension], analysis: AnalysisType) -> Family {
    let primary = group_by.iter().find(|d| **d != Dimension::Department).copied();
    match primary.and_then(family_for) {
        Some(family) => family,
        None => match analysis {
            AnalysisType::Resource => Family::ResourceNeeds,
            AnalysisType::Performance => Family::ResolutionTime,
            _ => Family::Department,
        },
    }
}

/// Group reduced entries by `group_by`; secondary non-department dimensions are reported as "All".
pub fn group_entries(entries: &[KeyValueRecord], group_by: &[Dimension], analysis: AnalysisType) -> Vec<GroupedResult> {
    let primary = group_by.iter().find(|d| **d != Dimension::Department).copied();
    let family = grouping_family(group_by, analysis);

    let mut counts: HashMap<Vec<String>, u64> = HashMap::new();
    for kv in entries {
        let Some(parts) = parse_key(&kv.key) else { continue };
        if parts.family != family {
            continue;
        }
        let values = group_by
            .iter()
            .map(|d| match d {
                Dimension::Department => parts.department.clone().unwrap_or_else(|| "Unknown".to_string()),
                d if Some(*d) == primary && family_for(*d) == Some(family) => parts.value.clone().unwrap_or_else(|| "Unknown".to_string()),
                _ => "All".to_string(),
            })
            .collect();
        *counts.entry(values).or_insert(0) += kv.value.count();
    }
    finish_groups(counts, group_by)
}

/// Average response time per department over resolved records, slowest first.
pub fn performance_rows(records: &[Record]) -> Vec<PerformanceRow> {
    let mut per_dept: BTreeMap<String, (f64, u64)> = BTreeMap::new();
    for r in records {
        if r.status_kind() != Some(Status::Resolved) {
            continue;
        }
        if let Some(hours) = r.resolution_hours() {
            let slot = per_dept.entry(r.department_label()).or_insert((0.0, 0));
            slot.0 += hours;
            slot.1 += 1;
        }
    }
    per_dept
        .into_iter()
        .map(|(department, (total, n))| PerformanceRow { department, average_response_hours: total / n as f64, resolved_count: n })
        .sorted_by(|a, b| {
            b.average_response_hours
                .partial_cmp(&a.average_response_hours)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.department.cmp(&b.department))
        })
        .collect()
}
