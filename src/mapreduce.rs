//! Metric families shared by the mapper and reducer.
//!
//! The key prefix selects the fold rule, so both stages must dispatch through
//! [`Family::of_key`]. Streaming stages speak `key<TAB>json` lines.

use crate::record::Record;
use crate::timeframe;
use ahash::AHashMap;
use chrono::{DateTime, Datelike, Duration, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use thiserror::Error;
use tracing::warn;

pub const MAPPER_ID: &str = "grievance-mapper";
pub const REDUCER_ID: &str = "grievance-reducer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Family {
    Department,
    Status,
    Priority,
    Location,
    Month,
    ResolutionTime,
    ResourceNeeds,
    UrgentPending,
}

impl Family {
    pub const ALL: [Family; 8] = [
        Family::Department,
        Family::Status,
        Family::Priority,
        Family::Location,
        Family::Month,
        Family::ResolutionTime,
        Family::ResourceNeeds,
        Family::UrgentPending,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            Family::Department => "department_",
            Family::Status => "status_",
            Family::Priority => "priority_",
            Family::Location => "location_",
            Family::Month => "month_",
            Family::ResolutionTime => "resolution_time_",
            Family::ResourceNeeds => "resource_needs_",
            Family::UrgentPending => "urgent_pending_",
        }
    }

    pub fn of_key(key: &str) -> Option<Family> {
        Self::ALL.into_iter().find(|f| key.starts_with(f.prefix()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceNeeds {
    pub total: u64,
    pub priorities: BTreeMap<String, u64>,
    #[serde(default)]
    pub funds_required: f64,
    #[serde(default)]
    pub manpower_needed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrgentCase {
    pub id: String,
    pub department: String,
    pub age_days: i64,
}

/// Value carried under a metric key. The variant is implied by the key prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Count(u64),
    Average { count: u64, total: f64, average: f64 },
    ResourceNeeds(ResourceNeeds),
    UrgentList(Vec<UrgentCase>),
}

impl MetricValue {
    fn average(total: f64) -> Self {
        MetricValue::Average { count: 1, total, average: total }
    }

    /// Number of records folded into this value.
    pub fn count(&self) -> u64 {
        match self {
            MetricValue::Count(n) => *n,
            MetricValue::Average { count, .. } => *count,
            MetricValue::ResourceNeeds(r) => r.total,
            MetricValue::UrgentList(cases) => cases.len() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValueRecord {
    pub key: String,
    pub value: MetricValue,
}

impl KeyValueRecord {
    pub fn new(key: impl Into<String>, value: MetricValue) -> Self {
        Self { key: key.into(), value }
    }

    pub fn family(&self) -> Option<Family> {
        Family::of_key(&self.key)
    }
}

/// Inputs the mapper needs besides the record itself.
#[derive(Debug, Clone, Copy)]
pub struct MapContext {
    pub now: DateTime<Utc>,
    pub urgent_after_days: u32,
}

impl MapContext {
    pub fn urgent_key(&self) -> String {
        format!("{}{}days", Family::UrgentPending.prefix(), self.urgent_after_days)
    }
}

/// Per-record emissions. Every family is emitted independently.
pub fn map_record(rec: &Record, ctx: &MapContext) -> Vec<KeyValueRecord> {
    let dept = rec.department_label();
    let status = rec.status_label();
    let priority = rec.priority_label();
    let mut out = Vec::with_capacity(8);

    out.push(KeyValueRecord::new(format!("department_{dept}"), MetricValue::Count(1)));
    out.push(KeyValueRecord::new(format!("status_{status}_{dept}"), MetricValue::Count(1)));
    out.push(KeyValueRecord::new(format!("priority_{priority}_{dept}"), MetricValue::Count(1)));
    if let Some(loc) = rec.location_label() {
        out.push(KeyValueRecord::new(format!("location_{loc}_{dept}"), MetricValue::Count(1)));
    }

    let resolution = rec.resolution_hours();
    let month = format!("{}-{}", rec.created_at.year(), rec.created_at.month());
    out.push(KeyValueRecord::new(format!("month_{month}_{dept}"), MetricValue::average(resolution.unwrap_or(0.0))));
    if let Some(hours) = resolution {
        out.push(KeyValueRecord::new(format!("resolution_time_{dept}"), MetricValue::average(hours)));
    }

    let is_high = rec.priority_kind() == Some(crate::pattern::Priority::High);
    if is_high || rec.is_escalation() {
        let mut priorities = BTreeMap::new();
        priorities.insert(priority.clone(), 1);
        let rm = rec.resource_management.clone().unwrap_or_default();
        out.push(KeyValueRecord::new(
            format!("resource_needs_{dept}"),
            MetricValue::ResourceNeeds(ResourceNeeds {
                total: 1,
                priorities,
                funds_required: rm.funds_required,
                manpower_needed: rm.manpower_needed as u64,
            }),
        ));
    }

    let pending = rec.status_kind() == Some(crate::pattern::Status::Pending);
    if is_high && pending && ctx.now - rec.created_at > Duration::days(ctx.urgent_after_days as i64) {
        out.push(KeyValueRecord::new(
            ctx.urgent_key(),
            MetricValue::UrgentList(vec![UrgentCase {
                id: rec.petition_id.clone(),
                department: dept,
                age_days: timeframe::age_days(rec.created_at, ctx.now),
            }]),
        ));
    }
    out
}

/// Fold every value emitted under `key`. Values whose shape does not fit the key's family are skipped.
pub fn reduce(key: &str, values: impl IntoIterator<Item = MetricValue>) -> Option<MetricValue> {
    let Some(family) = Family::of_key(key) else {
        warn!(key, "no metric family for key; dropping");
        return None;
    };
    let mut values = values.into_iter().peekable();
    values.peek()?;
    let mismatch = |v: &MetricValue| warn!(key, value = ?v, "value shape does not match key family; skipping");

    match family {
        Family::Department | Family::Status | Family::Priority | Family::Location => {
            let mut sum = 0u64;
            for v in values {
                match v {
                    MetricValue::Count(n) => sum += n,
                    other => mismatch(&other),
                }
            }
            Some(MetricValue::Count(sum))
        }
        Family::Month | Family::ResolutionTime => {
            let (mut count, mut total) = (0u64, 0.0f64);
            for v in values {
                match v {
                    MetricValue::Average { count: c, total: t, .. } => {
                        count += c;
                        total += t;
                    }
                    other => mismatch(&other),
                }
            }
            let average = if count > 0 { total / count as f64 } else { 0.0 };
            Some(MetricValue::Average { count, total, average })
        }
        Family::ResourceNeeds => {
            let mut acc = ResourceNeeds { total: 0, priorities: BTreeMap::new(), funds_required: 0.0, manpower_needed: 0 };
            for v in values {
                match v {
                    MetricValue::ResourceNeeds(r) => {
                        acc.total += r.total;
                        for (p, n) in r.priorities {
                            *acc.priorities.entry(p).or_insert(0) += n;
                        }
                        acc.funds_required += r.funds_required;
                        acc.manpower_needed += r.manpower_needed;
                    }
                    other => mismatch(&other),
                }
            }
            Some(MetricValue::ResourceNeeds(acc))
        }
        Family::UrgentPending => {
            let mut cases: Vec<UrgentCase> = Vec::new();
            for v in values {
                match v {
                    MetricValue::UrgentList(list) => cases.extend(list),
                    other => mismatch(&other),
                }
            }
            cases.sort_by(|a, b| b.age_days.cmp(&a.age_days).then_with(|| a.id.cmp(&b.id)));
            cases.dedup_by(|a, b| a.id == b.id && !a.id.is_empty());
            Some(MetricValue::UrgentList(cases))
        }
    }
}

/// Map over records and reduce over keys in parallel. Output is sorted by key.
pub fn run_local(records: &[Record], ctx: &MapContext) -> Vec<KeyValueRecord> {
    let emitted: Vec<KeyValueRecord> = records.par_iter().flat_map_iter(|r| map_record(r, ctx)).collect();
    let mut groups: AHashMap<String, Vec<MetricValue>> = AHashMap::new();
    for kv in emitted {
        groups.entry(kv.key).or_default().push(kv.value);
    }
    let grouped: Vec<(String, Vec<MetricValue>)> = groups.into_iter().collect();
    let mut out: Vec<KeyValueRecord> = grouped
        .into_par_iter()
        .filter_map(|(key, vals)| reduce(&key, vals).map(|value| KeyValueRecord { key, value }))
        .collect();
    out.sort_by(|a, b| a.key.cmp(&b.key));
    out
}

/// Dimension values embedded in a metric key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyParts {
    pub family: Family,
    /// Status, priority, location or month, for families that carry one.
    pub value: Option<String>,
    pub department: Option<String>,
}

pub fn parse_key(key: &str) -> Option<KeyParts> {
    let family = Family::of_key(key)?;
    let rest = &key[family.prefix().len()..];
    let (value, department) = match family {
        Family::Department | Family::ResolutionTime | Family::ResourceNeeds => (None, Some(rest.to_string())),
        Family::Status | Family::Priority | Family::Location | Family::Month => {
            let (v, d) = rest.rsplit_once('_')?;
            (Some(v.to_string()), Some(d.to_string()))
        }
        Family::UrgentPending => (Some(rest.to_string()), None),
    };
    Some(KeyParts { family, value, department })
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("line has no tab between key and value")]
    MissingSeparator,
    #[error("value is not valid JSON: {0}")]
    Value(#[from] serde_json::Error),
}

pub fn encode_line(kv: &KeyValueRecord) -> Result<String, serde_json::Error> {
    Ok(format!("{}\t{}", kv.key, serde_json::to_string(&kv.value)?))
}

pub fn decode_line(line: &str) -> Result<KeyValueRecord, CodecError> {
    let (key, value) = line.split_once('\t').ok_or(CodecError::MissingSeparator)?;
    let value: MetricValue = serde_json::from_str(value.trim_end())?;
    Ok(KeyValueRecord { key: key.to_string(), value })
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("stream i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not encode emission: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageStats {
    pub lines_in: usize,
    pub lines_out: usize,
    pub skipped: usize,
}

/// Streaming mapper: one JSON record per input line (or a single JSON array), `key<TAB>value` out.
pub fn map_stream<R: BufRead, W: Write>(input: R, mut out: W, ctx: &MapContext) -> Result<StageStats, StageError> {
    let mut stats = StageStats::default();
    let emit = |rec: &Record, stats: &mut StageStats, out: &mut W| -> Result<(), StageError> {
        for kv in map_record(rec, ctx) {
            writeln!(out, "{}", encode_line(&kv)?)?;
            stats.lines_out += 1;
        }
        Ok(())
    };
    let mut lines = input.lines().peekable();
    let starts_with_array = matches!(lines.peek(), Some(Ok(l)) if l.trim_start().starts_with('['));
    if starts_with_array {
        let mut body = String::new();
        for line in lines {
            body.push_str(&line?);
            body.push('\n');
        }
        match serde_json::from_str::<Vec<serde_json::Value>>(&body) {
            Ok(items) => {
                stats.lines_in = items.len();
                for (i, item) in items.into_iter().enumerate() {
                    match serde_json::from_value::<Record>(item) {
                        Ok(rec) => emit(&rec, &mut stats, &mut out)?,
                        Err(e) => {
                            warn!(index = i, error = %e, "skipping malformed record");
                            stats.skipped += 1;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "mapper input array is not valid JSON; nothing emitted");
                stats.lines_in = 1;
                stats.skipped += 1;
            }
        }
    } else {
        for line in lines {
            let line = line?;
            if line.trim().is_empty() { continue; }
            stats.lines_in += 1;
            match serde_json::from_str::<Record>(&line) {
                Ok(rec) => emit(&rec, &mut stats, &mut out)?,
                Err(e) => {
                    warn!(line = stats.lines_in, error = %e, "skipping malformed record");
                    stats.skipped += 1;
                }
            }
        }
    }
    out.flush()?;
    Ok(stats)
}

/// Streaming reducer over key-sorted `key<TAB>value` lines.
pub fn reduce_stream<R: BufRead, W: Write>(input: R, mut out: W) -> Result<StageStats, StageError> {
    let mut stats = StageStats::default();
    let mut current: Option<(String, Vec<MetricValue>)> = None;

    let flush = |group: Option<(String, Vec<MetricValue>)>, stats: &mut StageStats, out: &mut W| -> Result<(), StageError> {
        if let Some((key, vals)) = group {
            if let Some(value) = reduce(&key, vals) {
                writeln!(out, "{}", encode_line(&KeyValueRecord { key, value })?)?;
                stats.lines_out += 1;
            }
        }
        Ok(())
    };

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() { continue; }
        stats.lines_in += 1;
        let kv = match decode_line(&line) {
            Ok(kv) => kv,
            Err(e) => {
                warn!(line = stats.lines_in, error = %e, "skipping malformed key/value line");
                stats.skipped += 1;
                continue;
            }
        };
        match current.as_mut() {
            Some((key, vals)) if *key == kv.key => vals.push(kv.value),
            _ => {
                let done = current.replace((kv.key, vec![kv.value]));
                flush(done, &mut stats, &mut out)?;
            }
        }
    }
    flush(current.take(), &mut stats, &mut out)?;
    out.flush()?;
    Ok(stats)
}
