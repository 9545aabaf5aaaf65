use crate::pattern::{fold, Dimension, Pattern, QueryType, Status};
use crate::record::Record;
use crate::timeframe::{self, TimeRange};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CompileError {
    #[error("a {0:?} query needs at least one filter (department, status, priority, location, or time)")]
    FilterRequired(QueryType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Department,
    Status,
    Priority,
    Location,
    CreatedAt,
    IsEscalated,
    EscalationLevel,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Field::Department => "department",
            Field::Status => "status",
            Field::Priority => "priority",
            Field::Location => "location",
            Field::CreatedAt => "createdAt",
            Field::IsEscalated => "isEscalated",
            Field::EscalationLevel => "escalationLevel",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Text(String),
    Flag(bool),
    Number(i64),
    Instant(DateTime<Utc>),
}

impl Operand {
    fn to_json(&self) -> Value {
        match self {
            Operand::Text(s) => Value::String(s.clone()),
            Operand::Flag(b) => Value::Bool(*b),
            Operand::Number(n) => json!(n),
            Operand::Instant(t) => Value::String(t.to_rfc3339_opts(SecondsFormat::Secs, true)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    True,
    Eq(Field, Operand),
    Gt(Field, Operand),
    Lt(Field, Operand),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn eval(&self, r: &Record) -> bool {
        match self {
            Predicate::True => true,
            Predicate::And(ps) => ps.iter().all(|p| p.eval(r)),
            Predicate::Or(ps) => ps.iter().any(|p| p.eval(r)),
            Predicate::Eq(field, op) => match (field, op) {
                (Field::Department, Operand::Text(v)) => fold(&r.department) == fold(v),
                (Field::Status, Operand::Text(v)) => fold(&r.status) == fold(v),
                (Field::Priority, Operand::Text(v)) => fold(&r.priority) == fold(v),
                (Field::Location, Operand::Text(v)) => {
                    r.location.as_deref().map(|l| l.trim().eq_ignore_ascii_case(v)).unwrap_or(false)
                }
                (Field::IsEscalated, Operand::Flag(b)) => r.is_escalated == *b,
                (Field::EscalationLevel, Operand::Number(n)) => r.escalation_level as i64 == *n,
                (Field::CreatedAt, Operand::Instant(t)) => r.created_at == *t,
                _ => false,
            },
            Predicate::Gt(field, op) => match (field, op) {
                (Field::EscalationLevel, Operand::Number(n)) => r.escalation_level as i64 > *n,
                (Field::CreatedAt, Operand::Instant(t)) => r.created_at > *t,
                _ => false,
            },
            Predicate::Lt(field, op) => match (field, op) {
                (Field::EscalationLevel, Operand::Number(n)) => (r.escalation_level as i64) < *n,
                (Field::CreatedAt, Operand::Instant(t)) => r.created_at < *t,
                _ => false,
            },
        }
    }

    fn to_document(&self) -> Value {
        let field_op = |f: &Field, op: &str, v: &Operand| {
            let mut inner = Map::new();
            inner.insert(op.to_string(), v.to_json());
            let mut m = Map::new();
            m.insert(f.name().to_string(), Value::Object(inner));
            Value::Object(m)
        };
        match self {
            Predicate::True => json!({}),
            Predicate::Eq(f, v) => {
                let mut m = Map::new();
                m.insert(f.name().to_string(), v.to_json());
                Value::Object(m)
            }
            Predicate::Gt(f, v) => field_op(f, "$gt", v),
            Predicate::Lt(f, v) => field_op(f, "$lt", v),
            Predicate::And(ps) => json!({ "$and": ps.iter().map(|p| p.to_document()).collect::<Vec<_>>() }),
            Predicate::Or(ps) => json!({ "$or": ps.iter().map(|p| p.to_document()).collect::<Vec<_>>() }),
        }
    }
}

/// Store-native filter: a predicate plus an optional creation-time window.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub predicate: Predicate,
    pub range: Option<TimeRange>,
}

impl Filter {
    pub fn all() -> Self {
        Self { predicate: Predicate::True, range: None }
    }

    pub fn is_unconstrained(&self) -> bool {
        self.predicate == Predicate::True && self.range.is_none()
    }

    pub fn matches(&self, r: &Record) -> bool {
        self.predicate.eval(r) && self.range.map(|rg| rg.contains(r.created_at)).unwrap_or(true)
    }

    /// Mongo-style rendering for diagnostics.
    pub fn to_document(&self) -> Value {
        let range_doc = self.range.map(|rg| {
            let mut bounds = Map::new();
            bounds.insert("$gte".into(), Operand::Instant(rg.start).to_json());
            if let Some(end) = rg.end {
                bounds.insert("$lt".into(), Operand::Instant(end).to_json());
            }
            json!({ "createdAt": Value::Object(bounds) })
        });
        match (&self.predicate, range_doc) {
            (p, None) => p.to_document(),
            (Predicate::True, Some(rd)) => rd,
            (p, Some(rd)) => json!({ "$and": [p.to_document(), rd] }),
        }
    }
}

fn escalation_signals() -> Predicate {
    Predicate::Or(vec![
        Predicate::Eq(Field::Status, Operand::Text(Status::Escalated.label().to_string())),
        Predicate::Eq(Field::IsEscalated, Operand::Flag(true)),
        Predicate::Gt(Field::EscalationLevel, Operand::Number(0)),
    ])
}

/// Build a conjunctive filter from the dimensions named in `pattern.filters`.
pub fn compile(pattern: &Pattern, now: DateTime<Utc>) -> Result<Filter, CompileError> {
    if pattern.filters.is_empty() && pattern.query_type != QueryType::Show {
        return Err(CompileError::FilterRequired(pattern.query_type));
    }
    let mut clauses = Vec::new();
    let mut range = None;

    if pattern.is_filtered(Dimension::Department) {
        if let Some(d) = pattern.department {
            clauses.push(Predicate::Eq(Field::Department, Operand::Text(d.label().to_string())));
        }
    }
    if pattern.is_filtered(Dimension::Status) {
        match pattern.status {
            Some(Status::Escalated) => clauses.push(escalation_signals()),
            Some(s) => clauses.push(Predicate::Eq(Field::Status, Operand::Text(s.label().to_string()))),
            None => {}
        }
    }
    if pattern.is_filtered(Dimension::Priority) {
        if let Some(p) = pattern.priority {
            clauses.push(Predicate::Eq(Field::Priority, Operand::Text(p.label().to_string())));
        }
    }
    if pattern.is_filtered(Dimension::Location) {
        if let Some(loc) = &pattern.location {
            let alts = loc.variants().into_iter().map(|v| Predicate::Eq(Field::Location, Operand::Text(v))).collect();
            clauses.push(Predicate::Or(alts));
        }
    }
    if pattern.is_filtered(Dimension::CustomDuration) {
        if let Some(days) = pattern.custom_duration {
            clauses.push(Predicate::Lt(Field::CreatedAt, Operand::Instant(timeframe::cutoff(days, now))));
        }
    }
    if pattern.is_filtered(Dimension::PendingDuration) {
        if let Some(days) = pattern.pending_duration {
            clauses.push(Predicate::Lt(Field::CreatedAt, Operand::Instant(timeframe::cutoff(days, now))));
            let pending = Predicate::Eq(Field::Status, Operand::Text(Status::Pending.label().to_string()));
            if !pattern.is_escalation() && !clauses.contains(&pending) {
                clauses.push(pending);
            }
        }
    }
    if pattern.is_filtered(Dimension::Timeframe) {
        if let Some(tf) = pattern.timeframe {
            range = Some(timeframe::resolve(tf, now));
        }
    }

    let predicate = match clauses.len() {
        0 => Predicate::True,
        1 => clauses.remove(0),
        _ => Predicate::And(clauses),
    };
    Ok(Filter { predicate, range })
}
