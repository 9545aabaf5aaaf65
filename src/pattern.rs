use crate::location::Location;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// Lowercase alphanumerics only, so "In Progress", "in_progress" and "INPROGRESS" compare equal.
pub(crate) fn fold(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_alphanumeric()).map(|c| c.to_ascii_lowercase()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Department {
    Water,
    #[serde(rename = "RTO")]
    Rto,
    Electricity,
}

impl Department {
    pub const ALL: [Department; 3] = [Department::Water, Department::Rto, Department::Electricity];

    pub fn label(&self) -> &'static str {
        match self {
            Department::Water => "Water",
            Department::Rto => "RTO",
            Department::Electricity => "Electricity",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let f = fold(s);
        Self::ALL.into_iter().find(|d| fold(d.label()) == f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Pending,
    InProgress,
    Resolved,
    Rejected,
    /// Pseudo-status: matches any of the escalation signals on a record.
    Escalated,
}

impl Status {
    pub const ALL: [Status; 5] = [
        Status::Pending,
        Status::InProgress,
        Status::Resolved,
        Status::Rejected,
        Status::Escalated,
    ];

    /// Value as stored on grievance records.
    pub fn label(&self) -> &'static str {
        match self {
            Status::Pending => "Pending",
            Status::InProgress => "In Progress",
            Status::Resolved => "Resolved",
            Status::Rejected => "Rejected",
            Status::Escalated => "Escalated",
        }
    }

    /// Value embedded in metric keys; never contains `_` or whitespace.
    pub fn key_label(&self) -> &'static str {
        match self {
            Status::InProgress => "InProgress",
            other => other.label(),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let f = fold(s);
        Self::ALL.into_iter().find(|st| fold(st.label()) == f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn label(&self) -> &'static str {
        match self {
            Priority::High => "High",
            Priority::Medium => "Medium",
            Priority::Low => "Low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let f = fold(s);
        Self::ALL.into_iter().find(|p| fold(p.label()) == f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Timeframe {
    LastHour,
    Today,
    Yesterday,
    ThisWeek,
    LastWeek,
    ThisMonth,
    LastMonth,
    ThisYear,
}

impl Timeframe {
    pub fn describe(&self) -> &'static str {
        match self {
            Timeframe::LastHour => "in the last hour",
            Timeframe::Today => "today",
            Timeframe::Yesterday => "yesterday",
            Timeframe::ThisWeek => "this week",
            Timeframe::LastWeek => "last week",
            Timeframe::ThisMonth => "this month",
            Timeframe::LastMonth => "last month",
            Timeframe::ThisYear => "this year",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryType {
    #[default]
    Show,
    Count,
    StatusCheck,
    Performance,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisType {
    #[default]
    BasicCount,
    Distribution,
    Trends,
    Performance,
    Resource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PerformanceMetric {
    ResponseTime,
    Slowest,
    Fastest,
}

/// Names of the dimensions a query can constrain or group by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Dimension {
    Department,
    Status,
    Priority,
    Location,
    Timeframe,
    Month,
    CustomDuration,
    PendingDuration,
}

impl Dimension {
    pub fn name(&self) -> &'static str {
        match self {
            Dimension::Department => "department",
            Dimension::Status => "status",
            Dimension::Priority => "priority",
            Dimension::Location => "location",
            Dimension::Timeframe => "timeframe",
            Dimension::Month => "month",
            Dimension::CustomDuration => "customDuration",
            Dimension::PendingDuration => "pendingDuration",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a compiled pattern is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    /// Filter the store and return records.
    Direct,
    /// Export, map/reduce, import.
    Batch,
}

/// Compiled intent of a single free-text query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pattern {
    pub timeframe: Option<Timeframe>,
    pub department: Option<Department>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub location: Option<Location>,
    pub query_type: QueryType,
    pub group_by: Vec<Dimension>,
    pub analysis_type: AnalysisType,
    /// Dimensions explicitly present in the query text. Only these constrain results.
    pub filters: BTreeSet<Dimension>,
    pub custom_duration: Option<u32>,
    pub pending_duration: Option<u32>,
    pub show_all_priorities: bool,
    pub performance_metric: Option<PerformanceMetric>,
    pub requires_historical_analysis: bool,
}

impl Pattern {
    pub fn is_filtered(&self, dim: Dimension) -> bool {
        self.filters.contains(&dim)
    }

    pub fn group(&mut self, dim: Dimension) {
        if !self.group_by.contains(&dim) {
            self.group_by.push(dim);
        }
    }

    pub fn is_escalation(&self) -> bool {
        self.is_filtered(Dimension::Status) && self.status == Some(Status::Escalated)
    }

    /// Null out every dimension whose name never made it into `filters`.
    pub fn normalize(&mut self) {
        if !self.is_filtered(Dimension::Department) { self.department = None; }
        if !self.is_filtered(Dimension::Status) { self.status = None; }
        if !self.is_filtered(Dimension::Priority) { self.priority = None; }
        if !self.is_filtered(Dimension::Location) { self.location = None; }
        if !self.is_filtered(Dimension::Timeframe) { self.timeframe = None; }
        if !self.is_filtered(Dimension::CustomDuration) { self.custom_duration = None; }
        if !self.is_filtered(Dimension::PendingDuration) { self.pending_duration = None; }
    }

    pub fn route(&self) -> Route {
        if self.is_escalation() {
            return Route::Direct;
        }
        match (self.query_type, self.analysis_type) {
            (QueryType::Performance, _) => Route::Direct,
            (QueryType::Show, AnalysisType::BasicCount) => Route::Direct,
            _ => Route::Batch,
        }
    }
}
