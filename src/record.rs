use crate::location;
use crate::pattern::{Department, Priority, Status};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A grievance document as read from the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    #[serde(default)]
    pub petition_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(deserialize_with = "de_ts")]
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "de_opt_ts", skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_opt_ts", skip_serializing_if = "Option::is_none")]
    pub escalated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_escalated: bool,
    #[serde(default)]
    pub escalation_level: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_management: Option<ResourceManagement>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceManagement {
    #[serde(default, deserialize_with = "de_opt_ts", skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_opt_ts", skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub funds_required: f64,
    #[serde(default)]
    pub manpower_needed: u32,
}

impl Record {
    pub fn department_kind(&self) -> Option<Department> {
        Department::parse(&self.department)
    }

    pub fn status_kind(&self) -> Option<Status> {
        Status::parse(&self.status)
    }

    pub fn priority_kind(&self) -> Option<Priority> {
        Priority::parse(&self.priority)
    }

    /// Any of the three equivalent escalation signals.
    pub fn is_escalation(&self) -> bool {
        self.status_kind() == Some(Status::Escalated) || self.is_escalated || self.escalation_level > 0
    }

    pub fn department_label(&self) -> String {
        self.department_kind().map(|d| d.label().to_string()).unwrap_or_else(|| key_part(&self.department))
    }

    pub fn status_label(&self) -> String {
        self.status_kind().map(|s| s.key_label().to_string()).unwrap_or_else(|| key_part(&self.status))
    }

    pub fn priority_label(&self) -> String {
        self.priority_kind().map(|p| p.label().to_string()).unwrap_or_else(|| key_part(&self.priority))
    }

    pub fn location_label(&self) -> Option<String> {
        self.location.as_deref().filter(|l| !l.trim().is_empty()).map(|l| key_part(&location::normalize(l)))
    }

    /// Hours between filing and resolution, for resolved records.
    pub fn resolution_hours(&self) -> Option<f64> {
        let resolved = self.resolved_at?;
        let mins = (resolved - self.created_at).num_minutes().max(0);
        Some(mins as f64 / 60.0)
    }
}

// Metric keys use `_` as separator and streaming output uses tabs and newlines.
fn key_part(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if c == '_' || c == '\t' || c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    if cleaned.is_empty() { "Unknown".to_string() } else { cleaned }
}

fn de_ts<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let v = Value::deserialize(d)?;
    parse_ts_value(&v).ok_or_else(|| serde::de::Error::custom(format!("unrecognized timestamp: {v}")))
}

fn de_opt_ts<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    let v = Option::<Value>::deserialize(d)?;
    match v {
        None | Some(Value::Null) => Ok(None),
        Some(v) => parse_ts_value(&v)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("unrecognized timestamp: {v}"))),
    }
}

/// Accepts RFC3339 strings, common naive formats, epoch millis, and `{"$date": ...}` exports.
pub fn parse_ts_value(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => parse_ts_string(s),
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::Object(map) => map.get("$date").and_then(parse_ts_value),
        _ => None,
    }
}

fn parse_ts_string(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let fmts = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
    ];
    for f in fmts.iter() {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, f) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }
    if let Ok(d) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d.and_time(chrono::NaiveTime::MIN).and_utc());
    }
    None
}
