// Candidate filter predicates understood by every CandidateStore
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::representation::{code_key, DealRepresentation, Outcome};

pub trait Filter {
    fn matches(&self, deal: &DealRepresentation) -> bool;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FilterCondition {
    SectorIn { sectors: BTreeSet<String> },
    GeographyIn { geographies: BTreeSet<String> },
    YearBetween { from: i32, to: i32 },
    OutcomeIn { outcomes: Vec<Outcome> },
    ExcludeIds { ids: BTreeSet<String> },
    And { conditions: Vec<FilterCondition> },
    Or { conditions: Vec<FilterCondition> },
    Not { condition: Box<FilterCondition> },
}

impl FilterCondition {
    fn matches(&self, deal: &DealRepresentation) -> bool {
        match self {
            FilterCondition::SectorIn { sectors } => {
                let sector = code_key(&deal.metadata.sector);
                sectors.iter().any(|s| code_key(s) == sector)
            }
            FilterCondition::GeographyIn { geographies } => {
                let geography = code_key(&deal.metadata.geography);
                geographies.iter().any(|g| code_key(g) == geography)
            }
            FilterCondition::YearBetween { from, to } => {
                (*from..=*to).contains(&deal.metadata.year)
            }
            FilterCondition::OutcomeIn { outcomes } => outcomes.contains(&deal.metadata.outcome),
            FilterCondition::ExcludeIds { ids } => !ids.contains(&deal.id),
            FilterCondition::And { conditions } => conditions.iter().all(|c| c.matches(deal)),
            FilterCondition::Or { conditions } => conditions.iter().any(|c| c.matches(deal)),
            FilterCondition::Not { condition } => !condition.matches(deal),
        }
    }
}

/// Conjunction of conditions; an empty filter admits every deal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateFilter {
    #[serde(default)]
    conditions: Vec<FilterCondition>,
}

impl CandidateFilter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, condition: FilterCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn sectors<I, S>(self, sectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with(FilterCondition::SectorIn {
            sectors: sectors.into_iter().map(Into::into).collect(),
        })
    }

    #[must_use]
    pub fn years(self, from: i32, to: i32) -> Self {
        self.with(FilterCondition::YearBetween { from, to })
    }

    #[must_use]
    pub fn outcomes(self, outcomes: Vec<Outcome>) -> Self {
        self.with(FilterCondition::OutcomeIn { outcomes })
    }

    #[must_use]
    pub fn exclude<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with(FilterCondition::ExcludeIds {
            ids: ids.into_iter().map(Into::into).collect(),
        })
    }

    /// Sector set this filter restricts to, if any.
    pub fn sector_scope(&self) -> Option<&BTreeSet<String>> {
        self.conditions.iter().find_map(|c| match c {
            FilterCondition::SectorIn { sectors } => Some(sectors),
            _ => None,
        })
    }

    /// Replace the top-level sector restriction, keeping every other condition.
    #[must_use]
    pub fn with_sector_scope(mut self, sectors: BTreeSet<String>) -> Self {
        self.conditions
            .retain(|c| !matches!(c, FilterCondition::SectorIn { .. }));
        self.with(FilterCondition::SectorIn { sectors })
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

impl Filter for CandidateFilter {
    fn matches(&self, deal: &DealRepresentation) -> bool {
        self.conditions.iter().all(|c| c.matches(deal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::representation::DealMetadata;
    use std::collections::BTreeMap;

    fn deal(id: &str, sector: &str, year: i32, outcome: Outcome) -> DealRepresentation {
        DealRepresentation {
            id: id.to_string(),
            structured: None,
            imputed_fields: Vec::new(),
            text: BTreeMap::new(),
            absent_sections: BTreeSet::new(),
            metadata: DealMetadata::new(sector, "US", "Buyout", year).with_outcome(outcome),
            version: "v1".to_string(),
        }
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let f = CandidateFilter::new();
        assert!(f.matches(&deal("a", "SaaS", 2020, Outcome::Unknown)));
    }

    #[test]
    fn test_sector_year_outcome() {
        let f = CandidateFilter::new()
            .sectors(["SaaS", "Fintech"])
            .years(2018, 2022)
            .outcomes(vec![Outcome::Invested, Outcome::Exited]);

        assert!(f.matches(&deal("a", "SaaS", 2020, Outcome::Invested)));
        assert!(!f.matches(&deal("b", "Retail", 2020, Outcome::Invested)));
        assert!(!f.matches(&deal("c", "SaaS", 2015, Outcome::Invested)));
        assert!(!f.matches(&deal("d", "Fintech", 2021, Outcome::Passed)));
        assert!(f.matches(&deal("e", "saas", 2020, Outcome::Exited)));
    }

    #[test]
    fn test_replace_sector_scope() {
        let f = CandidateFilter::new().sectors(["SaaS"]).exclude(["x"]);
        let relaxed = f.with_sector_scope(["SaaS", "Fintech"].iter().map(|s| s.to_string()).collect());
        assert_eq!(relaxed.sector_scope().unwrap().len(), 2);
        assert!(relaxed.matches(&deal("a", "Fintech", 2020, Outcome::Unknown)));
        assert!(!relaxed.matches(&deal("x", "Fintech", 2020, Outcome::Unknown)));
    }

    #[test]
    fn test_nested_conditions() {
        let cond = FilterCondition::Or {
            conditions: vec![
                FilterCondition::YearBetween { from: 2020, to: 2020 },
                FilterCondition::Not {
                    condition: Box::new(FilterCondition::OutcomeIn {
                        outcomes: vec![Outcome::WrittenOff],
                    }),
                },
            ],
        };
        let f = CandidateFilter::new().with(cond);
        assert!(f.matches(&deal("a", "SaaS", 2020, Outcome::WrittenOff)));
        assert!(!f.matches(&deal("b", "SaaS", 2019, Outcome::WrittenOff)));
        assert!(f.matches(&deal("c", "SaaS", 2019, Outcome::Passed)));
    }
}
