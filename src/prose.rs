//! Template rendering of shaped results into a one-paragraph answer.

use crate::aggregate::{GroupedResult, PerformanceRow, Results};
use crate::mapreduce::{parse_key, Family, KeyValueRecord, MetricValue};
use crate::pattern::{AnalysisType, Dimension, Pattern, PerformanceMetric, Priority};
use crate::record::Record;
use std::fmt::Write as _;

pub const EMPTY: &str = "No matching cases found.";

const LIST_LIMIT: usize = 10;

pub fn render(results: &Results, pattern: &Pattern) -> String {
    if results.is_empty() {
        return EMPTY.to_string();
    }
    let text = match results {
        Results::Records(records) if pattern.is_escalation() => escalation_list(records, pattern),
        Results::Records(records) if pattern.show_all_priorities => priority_list(records, pattern),
        Results::Records(records) => record_list(records, pattern),
        Results::Groups(groups) => group_summary(groups, pattern),
        Results::Performance(rows) => performance_summary(rows, pattern),
        Results::Entries(entries) => match pattern.analysis_type {
            AnalysisType::Resource => resource_summary(entries),
            AnalysisType::Trends => trend_summary(entries),
            AnalysisType::Performance => resolution_summary(entries),
            AnalysisType::BasicCount => count_summary(entries, pattern),
            AnalysisType::Distribution => distribution_summary(entries),
        },
    };
    if text.is_empty() { EMPTY.to_string() } else { text }
}

/// Noun phrase with a leading space, e.g. " high priority pending Water cases in Chennai - North this week".
pub fn describe(pattern: &Pattern) -> String {
    let mut words = Vec::new();
    if let Some(p) = pattern.priority {
        words.push(format!("{} priority", p.label().to_lowercase()));
    }
    if let Some(s) = pattern.status {
        words.push(s.label().to_lowercase());
    }
    if let Some(d) = pattern.department {
        words.push(d.label().to_string());
    }
    let mut out = String::new();
    if !words.is_empty() {
        out.push(' ');
        out.push_str(&words.join(" "));
    }
    out.push_str(" cases");
    if let Some(loc) = &pattern.location {
        let _ = write!(out, " in {}", loc.key());
    }
    if let Some(days) = pattern.pending_duration {
        let _ = write!(out, " pending for more than {days} days");
    } else if let Some(days) = pattern.custom_duration {
        let _ = write!(out, " older than {days} days");
    }
    if let Some(tf) = pattern.timeframe {
        let _ = write!(out, " {}", tf.describe());
    }
    out
}

fn phrase(pattern: &Pattern, n: usize) -> String {
    let d = describe(pattern);
    if n == 1 { d.replacen(" cases", " case", 1) } else { d }
}

fn plural(n: usize, one: &str, many: &str) -> String {
    if n == 1 { format!("{n} {one}") } else { format!("{n} {many}") }
}

fn record_line(r: &Record) -> String {
    let id = if r.petition_id.is_empty() { "(no id)" } else { r.petition_id.as_str() };
    let mut line = format!("{id}: {} [{}, {}, {}]", r.title, r.department, r.status, r.priority);
    if let Some(loc) = r.location_label() {
        let _ = write!(line, " at {loc}");
    }
    line
}

fn push_listing(out: &mut String, records: &[Record]) {
    for r in records.iter().take(LIST_LIMIT) {
        let _ = write!(out, "\n- {}", record_line(r));
    }
    if records.len() > LIST_LIMIT {
        let _ = write!(out, "\n... and {} more", records.len() - LIST_LIMIT);
    }
}

fn record_list(records: &[Record], pattern: &Pattern) -> String {
    let mut out = format!("Found {}{}:", records.len(), phrase(pattern, records.len()));
    push_listing(&mut out, records);
    out
}

fn escalation_list(records: &[Record], pattern: &Pattern) -> String {
    let scope = pattern.department.map(|d| format!(" in the {} department", d.label())).unwrap_or_default();
    let mut out = format!("Found {}{scope}, most severe first:", plural(records.len(), "escalated case", "escalated cases"));
    for r in records.iter().take(LIST_LIMIT) {
        let _ = write!(out, "\n- {} (level {})", record_line(r), r.escalation_level);
    }
    if records.len() > LIST_LIMIT {
        let _ = write!(out, "\n... and {} more", records.len() - LIST_LIMIT);
    }
    out
}

fn priority_list(records: &[Record], pattern: &Pattern) -> String {
    let count = |p: Priority| records.iter().filter(|r| r.priority_kind() == Some(p)).count();
    let mut out = format!(
        "Found {}{} by priority: High {}, Medium {}, Low {}.",
        records.len(),
        phrase(pattern, records.len()),
        count(Priority::High),
        count(Priority::Medium),
        count(Priority::Low)
    );
    let mut ordered: Vec<&Record> = records.iter().collect();
    ordered.sort_by_key(|r| match r.priority_kind() {
        Some(Priority::High) => 0,
        Some(Priority::Medium) => 1,
        Some(Priority::Low) => 2,
        None => 3,
    });
    for r in ordered.iter().take(LIST_LIMIT) {
        let _ = write!(out, "\n- {}", record_line(r));
    }
    out
}

fn group_summary(groups: &[GroupedResult], pattern: &Pattern) -> String {
    let dims: Vec<&str> = pattern.group_by.iter().map(|d| d.name()).collect();
    let total: u64 = groups.iter().map(|g| g.count).sum();
    let parts: Vec<String> = groups
        .iter()
        .map(|g| {
            let label = pattern
                .group_by
                .iter()
                .filter_map(|d| g.dimensions.get(d.name()))
                .filter(|v| v.as_str() != "All")
                .cloned()
                .collect::<Vec<_>>()
                .join(" / ");
            format!("{label}: {}", g.count)
        })
        .collect();
    let lead = if pattern.group_by.first() == Some(&Dimension::Status) {
        "Status distribution"
    } else {
        "Breakdown"
    };
    format!("{lead} of {total}{} by {}: {}.", describe(pattern), dims.join(" and "), parts.join("; "))
}

fn performance_summary(rows: &[PerformanceRow], pattern: &Pattern) -> String {
    let listing: Vec<String> = rows
        .iter()
        .map(|r| format!("{} {:.1}h over {}", r.department, r.average_response_hours, plural(r.resolved_count as usize, "case", "cases")))
        .collect();
    let extreme = match pattern.performance_metric {
        Some(PerformanceMetric::Fastest) => rows.last().map(|r| ("fastest", r)),
        Some(PerformanceMetric::Slowest) => rows.first().map(|r| ("slowest", r)),
        _ => None,
    };
    match extreme {
        Some((word, row)) => format!(
            "The {word} department is {} with an average response time of {:.1} hours. All departments: {}.",
            row.department,
            row.average_response_hours,
            listing.join("; ")
        ),
        None => format!("Average response time by department: {}.", listing.join("; ")),
    }
}

fn count_summary(entries: &[KeyValueRecord], pattern: &Pattern) -> String {
    let counts: Vec<(String, u64)> = entries
        .iter()
        .filter_map(|kv| {
            let parts = parse_key(&kv.key)?;
            (parts.family == Family::Department).then(|| (parts.department.unwrap_or_default(), kv.value.count()))
        })
        .collect();
    let total: u64 = counts.iter().map(|(_, n)| n).sum();
    if total == 0 {
        return String::new();
    }
    let mut out = format!("There {} {}{}.", if total == 1 { "is" } else { "are" }, total, phrase(pattern, total as usize));
    if counts.len() > 1 {
        let split: Vec<String> = counts.iter().map(|(d, n)| format!("{d} {n}")).collect();
        let _ = write!(out, " By department: {}.", split.join(", "));
    }
    out
}

fn distribution_summary(entries: &[KeyValueRecord]) -> String {
    let mut sections: Vec<String> = Vec::new();
    for (family, title) in [
        (Family::Status, "Status"),
        (Family::Priority, "Priority"),
        (Family::Department, "Department"),
        (Family::Location, "Location"),
    ] {
        let mut totals: Vec<(String, u64)> = Vec::new();
        for kv in entries {
            let Some(parts) = parse_key(&kv.key) else { continue };
            if parts.family != family {
                continue;
            }
            let label = parts.value.or(parts.department).unwrap_or_default();
            match totals.iter_mut().find(|(l, _)| *l == label) {
                Some(slot) => slot.1 += kv.value.count(),
                None => totals.push((label, kv.value.count())),
            }
        }
        if !totals.is_empty() {
            let body: Vec<String> = totals.iter().map(|(l, n)| format!("{l} {n}")).collect();
            sections.push(format!("{title}: {}", body.join(", ")));
        }
    }
    if sections.is_empty() { String::new() } else { format!("{}.", sections.join(". ")) }
}

fn trend_summary(entries: &[KeyValueRecord]) -> String {
    let lines: Vec<String> = entries
        .iter()
        .filter_map(|kv| {
            let parts = parse_key(&kv.key)?;
            match (&parts.family, &kv.value) {
                (Family::Month, MetricValue::Average { count, average, .. }) => Some(format!(
                    "{} {}: {} (avg resolution {:.1}h)",
                    parts.value.unwrap_or_default(),
                    parts.department.unwrap_or_default(),
                    plural(*count as usize, "case", "cases"),
                    average
                )),
                _ => None,
            }
        })
        .collect();
    if lines.is_empty() { String::new() } else { format!("Monthly trend: {}.", lines.join("; ")) }
}

fn resolution_summary(entries: &[KeyValueRecord]) -> String {
    let lines: Vec<String> = entries
        .iter()
        .filter_map(|kv| match (parse_key(&kv.key)?, &kv.value) {
            (parts, MetricValue::Average { count, average, .. }) if parts.family == Family::ResolutionTime => Some(format!(
                "{} {:.1}h over {}",
                parts.department.unwrap_or_default(),
                average,
                plural(*count as usize, "case", "cases")
            )),
            _ => None,
        })
        .collect();
    if lines.is_empty() { String::new() } else { format!("Average resolution time: {}.", lines.join("; ")) }
}

fn resource_summary(entries: &[KeyValueRecord]) -> String {
    let mut lines = Vec::new();
    let (mut cases, mut funds, mut manpower) = (0u64, 0.0f64, 0u64);
    for kv in entries {
        let Some(parts) = parse_key(&kv.key) else { continue };
        match &kv.value {
            MetricValue::ResourceNeeds(needs) => {
                cases += needs.total;
                funds += needs.funds_required;
                manpower += needs.manpower_needed;
                let split: Vec<String> = needs.priorities.iter().map(|(p, n)| format!("{p} {n}")).collect();
                lines.push(format!(
                    "{}: {} ({}), funds {:.2}, manpower {}",
                    parts.department.unwrap_or_default(),
                    plural(needs.total as usize, "case", "cases"),
                    split.join(", "),
                    needs.funds_required,
                    needs.manpower_needed
                ));
            }
            MetricValue::UrgentList(urgent) if !urgent.is_empty() => {
                let days = parts.value.unwrap_or_default();
                let ids: Vec<String> = urgent.iter().take(LIST_LIMIT).map(|c| format!("{} ({}, {}d)", c.id, c.department, c.age_days)).collect();
                lines.push(format!(
                    "{} pending longer than {}: {}",
                    plural(urgent.len(), "urgent case", "urgent cases"),
                    days.replace("days", " days"),
                    ids.join(", ")
                ));
            }
            _ => {}
        }
    }
    if lines.is_empty() {
        return String::new();
    }
    format!(
        "Resource needs: {}. Total: {}, funds {:.2}, manpower {}.",
        lines.join("; "),
        plural(cases as usize, "case", "cases"),
        funds,
        manpower
    )
}
