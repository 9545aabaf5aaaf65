use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DIVISIONS: [&str; 5] = ["North", "South", "East", "West", "Central"];

// "Chennai - North", "Chennai-North", "Chennai, North Division", "chennai north division"
static RE_LOCATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*([a-z][a-z .]*?)\s*(?:-|,|\s)\s*(north|south|east|west|central)(?:\s+division)?\s*$").unwrap()
});

/// District-division composite key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Location {
    pub district: String,
    pub division: String,
}

impl Location {
    pub fn new(district: &str, division: &str) -> Self {
        Self { district: title_case(district), division: title_case(division) }
    }

    /// Canonical form, also used inside `location_` metric keys.
    pub fn key(&self) -> String {
        format!("{} - {}", self.district, self.division)
    }

    /// Textual conventions found in the `location` field of stored records.
    pub fn variants(&self) -> [String; 2] {
        [
            format!("{} - {}", self.district, self.division),
            format!("{}, {} Division", self.district, self.division),
        ]
    }

    /// Lenient parse of a free-text record location.
    pub fn parse(raw: &str) -> Option<Self> {
        let caps = RE_LOCATION.captures(raw)?;
        let district = caps.get(1)?.as_str().trim();
        let division = caps.get(2)?.as_str();
        if district.is_empty() { return None; }
        Some(Self::new(district, division))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl From<Location> for String {
    fn from(l: Location) -> Self { l.key() }
}

impl TryFrom<String> for Location {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Location::parse(&s).ok_or_else(|| format!("not a district-division location: {s}"))
    }
}

/// Canonical key for a raw record location, falling back to the trimmed text.
pub fn normalize(raw: &str) -> String {
    Location::parse(raw).map(|l| l.key()).unwrap_or_else(|| raw.trim().to_string())
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|w| {
            let mut cs = w.chars();
            match cs.next() {
                Some(first) => first.to_uppercase().chain(cs.flat_map(|c| c.to_lowercase())).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_record_conventions() {
        let a = Location::parse("Chennai - North").unwrap();
        let b = Location::parse("chennai, north division").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.key(), "Chennai - North");
        assert_eq!(a.variants()[1], "Chennai, North Division");
    }

    #[test]
    fn multiword_district() {
        let l = Location::parse("Tiruppur Rural - East").unwrap();
        assert_eq!(l.district, "Tiruppur Rural");
        assert_eq!(l.division, "East");
    }
}
