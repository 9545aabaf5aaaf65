//! Versioned lexicon tables consumed by the pattern matcher.
//!
//! Every rule belongs to one family; within a family rules are tried in
//! descending priority and the first bounded, context-compatible hit wins.

use crate::pattern::{AnalysisType, Department, Dimension, PerformanceMetric, Priority, QueryType, Status, Timeframe};
use crate::location::DIVISIONS;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

pub const STANDARD_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid lexicon for {family:?} rule: {source}")]
    Lexicon {
        family: Family,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Family {
    CountIntent,
    ShowIntent,
    GroupBy,
    Department,
    StatusCheck,
    Performance,
    Analysis,
    Priority,
    PriorityConcept,
    Escalation,
    Status,
    Location,
    Timeframe,
    PendingDuration,
    CustomDuration,
}

/// State carried by the contextual scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    Neutral,
    Location,
    Status,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Intent(QueryType),
    Group(Dimension),
    Department(Department),
    StatusCheck,
    Performance(PerformanceMetric),
    Analysis(AnalysisType),
    Priority(Priority),
    PriorityConcept,
    /// Escalation phrasing, optionally qualified by a department.
    Escalation(Option<Department>),
    Status(Status),
    /// Division comes from the lexicon's first capture group.
    Location { district: String },
    Timeframe(Timeframe),
    /// Day count comes from the lexicon's first capture group.
    PendingDuration,
    CustomDuration,
}

impl Target {
    pub fn family(&self) -> Family {
        match self {
            Target::Intent(QueryType::Count) => Family::CountIntent,
            Target::Intent(_) => Family::ShowIntent,
            Target::Group(_) => Family::GroupBy,
            Target::Department(_) => Family::Department,
            Target::StatusCheck => Family::StatusCheck,
            Target::Performance(_) => Family::Performance,
            Target::Analysis(_) => Family::Analysis,
            Target::Priority(_) => Family::Priority,
            Target::PriorityConcept => Family::PriorityConcept,
            Target::Escalation(_) => Family::Escalation,
            Target::Status(_) => Family::Status,
            Target::Location { .. } => Family::Location,
            Target::Timeframe(_) => Family::Timeframe,
            Target::PendingDuration => Family::PendingDuration,
            Target::CustomDuration => Family::CustomDuration,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub target: Target,
    pub lexicon: Regex,
    pub priority: u8,
    /// When set, a hit only counts if the contextual scan is in this state at the hit.
    pub context: Option<Context>,
}

impl Rule {
    pub fn new(target: Target, lexicon: &str, priority: u8) -> Result<Self, RuleError> {
        let family = target.family();
        let lexicon = Regex::new(&format!("(?i){lexicon}")).map_err(|source| RuleError::Lexicon { family, source })?;
        Ok(Self { target, lexicon, priority, context: None })
    }

    pub fn in_context(mut self, ctx: Context) -> Self {
        self.context = Some(ctx);
        self
    }

    pub fn family(&self) -> Family {
        self.target.family()
    }
}

/// A rule hit inside the query text.
#[derive(Debug, Clone)]
pub struct Hit<'r> {
    pub rule: &'r Rule,
    pub start: usize,
    pub end: usize,
    pub capture: Option<String>,
}

/// Offsets at which the contextual scan changed state, in ascending order.
#[derive(Debug, Clone, Default)]
pub struct ContextTrail {
    marks: Vec<(usize, Context)>,
}

static RE_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9']+").unwrap());

impl ContextTrail {
    /// Tokenize lowercase text and record where LOCATION/STATUS contexts begin.
    pub fn scan(text: &str) -> Self {
        let mut marks = Vec::new();
        let mut prev: Option<&str> = None;
        for m in RE_WORD.find_iter(text) {
            let tok = m.as_str();
            let next = match tok {
                "in" | "from" | "at" | "within" | "during" | "for" => Some(Context::Location),
                "with" | "having" => Some(Context::Status),
                "are" if matches!(prev, Some("that") | Some("which")) => Some(Context::Status),
                _ => None,
            };
            if let Some(ctx) = next {
                marks.push((m.end(), ctx));
            }
            prev = Some(tok);
        }
        Self { marks }
    }

    pub fn at(&self, offset: usize) -> Context {
        self.marks
            .iter()
            .take_while(|(pos, _)| *pos <= offset)
            .last()
            .map(|(_, c)| *c)
            .unwrap_or(Context::Neutral)
    }
}

/// True when the match is not glued to a neighbouring letter or digit.
pub fn is_bounded(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    let ok = |c: Option<char>| c.map(|c| !c.is_alphanumeric()).unwrap_or(true);
    ok(before) && ok(after)
}

#[derive(Debug, Clone)]
pub struct RuleTable {
    pub version: u32,
    rules: Vec<Rule>,
}

static STANDARD: Lazy<RuleTable> = Lazy::new(|| build_standard().expect("standard rule table compiles"));

impl Default for RuleTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl RuleTable {
    pub fn empty(version: u32) -> Self {
        Self { version, rules: Vec::new() }
    }

    pub fn standard() -> Self {
        STANDARD.clone()
    }

    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
        self.rules.sort_by(|a, b| a.family().cmp(&b.family()).then_with(|| b.priority.cmp(&a.priority)));
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn family(&self, family: Family) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(move |r| r.family() == family)
    }

    /// First hit in priority order that is word-bounded and allowed by context.
    pub fn first_match<'r>(&'r self, family: Family, text: &str, trail: &ContextTrail) -> Option<Hit<'r>> {
        for rule in self.family(family) {
            for caps in rule.lexicon.captures_iter(text) {
                let Some(m) = caps.get(0) else { continue };
                if m.start() == m.end() || !is_bounded(text, m.start(), m.end()) {
                    continue;
                }
                if let Some(required) = rule.context {
                    if trail.at(m.start()) != required {
                        continue;
                    }
                }
                return Some(Hit {
                    rule,
                    start: m.start(),
                    end: m.end(),
                    capture: caps.get(1).map(|c| c.as_str().to_string()),
                });
            }
        }
        None
    }

    /// All distinct targets of a family that hit, in order of first appearance in the text.
    pub fn all_matches<'r>(&'r self, family: Family, text: &str, trail: &ContextTrail) -> Vec<Hit<'r>> {
        let mut hits: Vec<Hit<'r>> = Vec::new();
        for rule in self.family(family) {
            for m in rule.lexicon.find_iter(text) {
                if !is_bounded(text, m.start(), m.end()) {
                    continue;
                }
                if rule.context.map(|c| trail.at(m.start()) != c).unwrap_or(false) {
                    continue;
                }
                if hits.iter().all(|h| h.rule.target != rule.target) {
                    hits.push(Hit { rule, start: m.start(), end: m.end(), capture: None });
                }
                break;
            }
        }
        hits.sort_by_key(|h| h.start);
        hits
    }
}

const WATER: &str = r"drinking\s+water|water|sewerage|sewage|drainage";
const RTO: &str = r"regional\s+transport(?:\s+office)?|transport\s+department|rto|driving\s+licen[cs]e|vehicle\s+registration";
const ELECTRICITY: &str = r"electricity|electrical|electric|power\s+(?:supply|cuts?|outages?)|power|eb|transformer";

const DISTRICTS: [&str; 8] = [
    "Chennai", "Coimbatore", "Madurai", "Salem", "Tiruchirappalli", "Tirunelveli", "Vellore", "Erode",
];

fn build_standard() -> Result<RuleTable, RuleError> {
    fn add(t: &mut RuleTable, target: Target, lexicon: &str, priority: u8) -> Result<(), RuleError> {
        t.push(Rule::new(target, lexicon, priority)?);
        Ok(())
    }

    let mut t = RuleTable::empty(STANDARD_VERSION);

    add(&mut t, Target::Intent(QueryType::Count), r"how\s+many|number\s+of|counts?|categori[sz]e|group(?:ed)?|summari[sz]e|breakdown", 10)?;
    add(&mut t, Target::Intent(QueryType::Show), r"show|display|list|get|find|fetch|give\s+me|view", 10)?;

    let groups: [(Dimension, &str); 5] = [
        (Dimension::Department, r"(?:departments?|depts?)"),
        (Dimension::Status, r"(?:status(?:es)?)"),
        (Dimension::Priority, r"(?:priorit(?:y|ies))"),
        (Dimension::Location, r"(?:locations?|districts?|divisions?|areas?)"),
        (Dimension::Month, r"(?:months?)"),
    ];
    for (dim, noun) in groups {
        add(&mut t, Target::Group(dim), &format!(r"(?:per|by|for\s+each|each|across)\s+(?:the\s+)?{noun}"), 10)?;
    }

    for (dept, lex) in [(Department::Water, WATER), (Department::Rto, RTO), (Department::Electricity, ELECTRICITY)] {
        add(&mut t, Target::Department(dept), lex, 10)?;
        // Department-qualified escalation wording outranks the general escalation lexicon.
        add(
            &mut t,
            Target::Escalation(Some(dept)),
            &format!(r"escalat\w*(?:\s+\w+){{0,3}}?\s+(?:in|from|of|for|under)\s+(?:the\s+)?(?:{lex})"),
            30,
        )?;
        add(&mut t, Target::Escalation(Some(dept)), &format!(r"(?:{lex})(?:\s+(?:department|dept))?\s+escalat\w*"), 30)?;
    }
    add(&mut t, Target::Escalation(None), r"escalat\w*|elevated\s+to\s+higher\s+authorit(?:y|ies)", 10)?;

    add(
        &mut t,
        Target::StatusCheck,
        r"what(?:'s|\s+is)\s+the\s+status|show\s+(?:me\s+)?(?:the\s+)?status|status\s+of|how\s+are|current\s+status|status\s+update",
        10,
    )?;

    add(&mut t, Target::Performance(PerformanceMetric::Slowest), r"slowest|slower|least\s+responsive", 20)?;
    add(&mut t, Target::Performance(PerformanceMetric::Fastest), r"fastest|quickest|faster|most\s+responsive", 20)?;
    add(
        &mut t,
        Target::Performance(PerformanceMetric::ResponseTime),
        r"performance|performing|response\s+times?|how\s+(?:fast|slow|quickly)|turnaround",
        10,
    )?;

    add(&mut t, Target::Analysis(AnalysisType::Resource), r"resource\s+needs|resources?|funds?|funding|budget|manpower|staffing|workforce", 30)?;
    add(&mut t, Target::Analysis(AnalysisType::Trends), r"trends?|trending|over\s+time|monthly|month[\s-]+wise|month\s+by\s+month", 20)?;
    add(&mut t, Target::Analysis(AnalysisType::Distribution), r"distribution|breakdown|split|categori[sz]e|categories", 10)?;

    add(&mut t, Target::Priority(Priority::High), r"high(?:est)?(?:[\s-]+priority)?|critical|top[\s-]+priority", 10)?;
    add(&mut t, Target::Priority(Priority::Medium), r"medium(?:[\s-]+priority)?|moderate|normal[\s-]+priority", 10)?;
    add(&mut t, Target::Priority(Priority::Low), r"low(?:est)?(?:[\s-]+priority)?|minor", 10)?;
    add(&mut t, Target::PriorityConcept, r"priority\s+(?:cases|complaints|grievances|issues)|priorities|priority|urgent|urgency", 10)?;

    add(&mut t, Target::Status(Status::Pending), r"not\s+(?:yet\s+)?resolved|yet\s+to\s+be\s+resolved|unresolved|pending|awaiting", 30)?;
    add(
        &mut t,
        Target::Status(Status::InProgress),
        r"in[\s-]+progress|ongoing|being\s+(?:handled|processed|worked\s+on)|under\s+(?:process|review|investigation)",
        25,
    )?;
    add(&mut t, Target::Status(Status::Resolved), r"resolved|completed|fixed|solved", 20)?;
    add(&mut t, Target::Status(Status::Rejected), r"rejected|declined|dismissed|denied", 20)?;
    t.push(Rule::new(Target::Status(Status::Pending), r"open", 5)?.in_context(Context::Status));
    t.push(Rule::new(Target::Status(Status::Resolved), r"done|finished|closed", 5)?.in_context(Context::Status));

    let divisions = DIVISIONS.map(|d| d.to_lowercase()).join("|");
    for district in DISTRICTS {
        let rule = Rule::new(
            Target::Location { district: district.to_string() },
            &format!(r"{}[\s,-]*({divisions})(?:\s+division)?", district.to_lowercase()),
            10,
        )?
        .in_context(Context::Location);
        t.push(rule);
    }

    add(&mut t, Target::Timeframe(Timeframe::LastHour), r"(?:last|past|previous)\s+(?:one\s+|1\s+)?hour|(?:last|past)\s+60\s+minutes", 10)?;
    add(&mut t, Target::Timeframe(Timeframe::Today), r"today", 10)?;
    add(&mut t, Target::Timeframe(Timeframe::Yesterday), r"yesterday", 10)?;
    add(&mut t, Target::Timeframe(Timeframe::ThisWeek), r"(?:this|current)\s+week", 10)?;
    add(&mut t, Target::Timeframe(Timeframe::LastWeek), r"(?:last|past|previous)\s+week", 10)?;
    add(&mut t, Target::Timeframe(Timeframe::ThisMonth), r"(?:this|current)\s+month", 10)?;
    add(&mut t, Target::Timeframe(Timeframe::LastMonth), r"(?:last|past|previous)\s+month", 10)?;
    add(&mut t, Target::Timeframe(Timeframe::ThisYear), r"(?:this|current)\s+year", 10)?;

    add(
        &mut t,
        Target::PendingDuration,
        r"(?:pending|unresolved|open)\s+(?:for\s+)?(?:more\s+than|over|longer\s+than|at\s+least)\s+(\d+)\s+days?",
        10,
    )?;
    add(&mut t, Target::CustomDuration, r"(?:more\s+than|over|older\s+than|longer\s+than)\s+(\d+)\s+days?", 10)?;
    add(&mut t, Target::CustomDuration, r"(\d+)\+?\s+days?\s+old", 5)?;

    Ok(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table_is_versioned_and_populated() {
        let t = RuleTable::standard();
        assert_eq!(t.version, STANDARD_VERSION);
        assert!(t.family(Family::Department).count() >= 3);
    }

    #[test]
    fn bounded_rejects_embedded_words() {
        let text = "waterproof water";
        assert!(!is_bounded(text, 0, 5));
        assert!(is_bounded(text, 11, 16));
    }

    #[test]
    fn context_trail_tracks_prepositions() {
        let text = "cases in chennai north with open status";
        let trail = ContextTrail::scan(text);
        assert_eq!(trail.at(0), Context::Neutral);
        assert_eq!(trail.at(text.find("chennai").unwrap()), Context::Location);
        assert_eq!(trail.at(text.find("open").unwrap()), Context::Status);
    }

    #[test]
    fn contextual_status_needs_status_context() {
        let t = RuleTable::standard();
        let text = "open the list of water cases";
        assert!(t.first_match(Family::Status, text, &ContextTrail::scan(text)).is_none());
        let text = "water cases that are open";
        let hit = t.first_match(Family::Status, text, &ContextTrail::scan(text)).unwrap();
        assert_eq!(hit.rule.target, Target::Status(Status::Pending));
    }

    #[test]
    fn custom_rule_extends_departments() {
        let mut t = RuleTable::standard();
        t.push(Rule::new(Target::Department(Department::Water), r"jal\s+board", 50).unwrap());
        let text = "cases for the jal board";
        let hit = t.first_match(Family::Department, text, &ContextTrail::scan(text)).unwrap();
        assert_eq!(hit.rule.priority, 50);
    }

    #[test]
    fn bad_lexicon_is_reported() {
        let err = Rule::new(Target::StatusCheck, r"(unclosed", 1).unwrap_err();
        assert!(matches!(err, RuleError::Lexicon { family: Family::StatusCheck, .. }));
    }
}
