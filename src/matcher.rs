use crate::location::Location;
use crate::pattern::{AnalysisType, Dimension, Pattern, QueryType, Status};
use crate::rules::{ContextTrail, Family, RuleTable, Target};
use tracing::debug;

/// Turns free text into a [`Pattern`]. Never fails: unmatched dimensions stay null.
#[derive(Debug, Clone, Default)]
pub struct PatternMatcher {
    rules: RuleTable,
}

impl PatternMatcher {
    pub fn new(rules: RuleTable) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn match_query(&self, query: &str) -> Pattern {
        let text = query.to_lowercase();
        let rules = &self.rules;
        let mut p = Pattern::default();

        // 1. query type: COUNT beats SHOW, SHOW when neither is worded
        let trail = ContextTrail::scan(&text);
        let intent = rules
            .first_match(Family::CountIntent, &text, &trail)
            .or_else(|| rules.first_match(Family::ShowIntent, &text, &trail));
        p.query_type = match intent.map(|hit| &hit.rule.target) {
            Some(Target::Intent(kind)) => *kind,
            _ => {
                debug!(query, "no intent wording; defaulting to SHOW");
                QueryType::Show
            }
        };

        // 2. grouping phrases, first-seen order
        if p.query_type == QueryType::Count {
            for hit in rules.all_matches(Family::GroupBy, &text, &trail) {
                if let Target::Group(dim) = hit.rule.target {
                    p.group(dim);
                }
            }
        }

        // 3. the contextual scan already ran; location and contextual status rules consult `trail`

        // 4. department
        if let Some(hit) = rules.first_match(Family::Department, &text, &trail) {
            if let Target::Department(d) = hit.rule.target {
                p.department = Some(d);
                p.filters.insert(Dimension::Department);
            }
        }

        // 5. status check
        if rules.first_match(Family::StatusCheck, &text, &trail).is_some() {
            p.query_type = QueryType::StatusCheck;
            p.group_by = vec![Dimension::Status];
            if p.is_filtered(Dimension::Department) {
                p.group(Dimension::Department);
            }
        }

        // 6. performance
        if let Some(hit) = rules.first_match(Family::Performance, &text, &trail) {
            if let Target::Performance(metric) = hit.rule.target {
                p.query_type = QueryType::Performance;
                p.group_by = vec![Dimension::Department];
                p.performance_metric = Some(metric);
                p.requires_historical_analysis = true;
            }
        }

        p.analysis_type = detect_analysis(rules, &text, &trail, &p);

        // 7. priority level, or a bare priority concept
        if let Some(hit) = rules.first_match(Family::Priority, &text, &trail) {
            if let Target::Priority(level) = hit.rule.target {
                p.priority = Some(level);
                p.filters.insert(Dimension::Priority);
            }
        } else if rules.first_match(Family::PriorityConcept, &text, &trail).is_some() {
            p.show_all_priorities = true;
        }

        // 8. escalation outranks the general status lexicon
        if let Some(hit) = rules.first_match(Family::Escalation, &text, &trail) {
            if let Target::Escalation(dept) = hit.rule.target {
                p.status = Some(Status::Escalated);
                p.filters.insert(Dimension::Status);
                if let Some(d) = dept {
                    p.department = Some(d);
                    p.filters.insert(Dimension::Department);
                }
                p.query_type = QueryType::Show;
                p.group_by.clear();
                p.analysis_type = AnalysisType::BasicCount;
            }
        } else if let Some(hit) = rules.first_match(Family::Status, &text, &trail) {
            if let Target::Status(s) = hit.rule.target {
                p.status = Some(s);
                p.filters.insert(Dimension::Status);
            }
        }

        // 9. location, time, durations
        if let Some(hit) = rules.first_match(Family::Location, &text, &trail) {
            if let (Target::Location { district }, Some(division)) = (&hit.rule.target, hit.capture.as_deref()) {
                p.location = Some(Location::new(district, division));
                p.filters.insert(Dimension::Location);
            }
        }
        if let Some(hit) = rules.first_match(Family::Timeframe, &text, &trail) {
            if let Target::Timeframe(tf) = hit.rule.target {
                p.timeframe = Some(tf);
                p.filters.insert(Dimension::Timeframe);
            }
        }
        let pending_days = rules
            .first_match(Family::PendingDuration, &text, &trail)
            .and_then(|h| h.capture.and_then(|c| c.parse::<u32>().ok()));
        if let Some(days) = pending_days {
            p.pending_duration = Some(days);
            p.filters.insert(Dimension::PendingDuration);
            if !p.is_escalation() {
                p.status = Some(Status::Pending);
                p.filters.insert(Dimension::Status);
            }
        } else if let Some(days) = rules
            .first_match(Family::CustomDuration, &text, &trail)
            .and_then(|h| h.capture.and_then(|c| c.parse::<u32>().ok()))
        {
            p.custom_duration = Some(days);
            p.filters.insert(Dimension::CustomDuration);
        }

        // 10. only constrain what was explicitly asked
        p.normalize();
        debug!(query, query_type = ?p.query_type, filters = ?p.filters, group_by = ?p.group_by, "matched query");
        p
    }
}

fn detect_analysis(rules: &RuleTable, text: &str, trail: &ContextTrail, p: &Pattern) -> AnalysisType {
    if p.query_type == QueryType::Performance {
        return AnalysisType::Performance;
    }
    let worded = rules.first_match(Family::Analysis, text, trail).and_then(|hit| match hit.rule.target {
        Target::Analysis(kind) => Some(kind),
        _ => None,
    });
    if let Some(kind @ (AnalysisType::Resource | AnalysisType::Trends)) = worded {
        return kind;
    }
    // grouping by month outranks generic breakdown wording
    if p.group_by.contains(&Dimension::Month) {
        return AnalysisType::Trends;
    }
    if let Some(kind) = worded {
        return kind;
    }
    if !p.group_by.is_empty() || p.query_type == QueryType::StatusCheck {
        return AnalysisType::Distribution;
    }
    AnalysisType::BasicCount
}
