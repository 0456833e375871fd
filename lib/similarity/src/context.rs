//! Similarity contexts
//!
//! The caller-declared purpose of a query. A context plus an optional caller
//! identity forms a [`ProfileKey`], the unit weight profiles are published under.

use dealsim_core::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityContext {
    Screening,
    RiskAssessment,
    ExitPotential,
    StrategicFit,
    #[default]
    Default,
}

const SCREENING_KEYWORDS: &[&str] = &[
    "screening",
    "initial review",
    "first pass",
    "financial profile",
    "growth profile",
    "similar metrics",
];
const RISK_KEYWORDS: &[&str] = &[
    "risk",
    "risks",
    "risk assessment",
    "concerns",
    "risk factors",
    "churn risk",
    "regulatory risk",
];
const EXIT_KEYWORDS: &[&str] = &[
    "exit",
    "exit potential",
    "exit multiple",
    "exit valuation",
    "similar exits",
    "comparable exits",
];
const STRATEGIC_KEYWORDS: &[&str] = &[
    "strategic",
    "strategic fit",
    "strategic alignment",
    "platform",
    "roll-up",
    "synergy",
];

impl SimilarityContext {
    pub const ALL: [SimilarityContext; 5] = [
        SimilarityContext::Screening,
        SimilarityContext::RiskAssessment,
        SimilarityContext::ExitPotential,
        SimilarityContext::StrategicFit,
        SimilarityContext::Default,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SimilarityContext::Screening => "screening",
            SimilarityContext::RiskAssessment => "risk_assessment",
            SimilarityContext::ExitPotential => "exit_potential",
            SimilarityContext::StrategicFit => "strategic_fit",
            SimilarityContext::Default => "default",
        }
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            SimilarityContext::Screening => SCREENING_KEYWORDS,
            SimilarityContext::RiskAssessment => RISK_KEYWORDS,
            SimilarityContext::ExitPotential => EXIT_KEYWORDS,
            SimilarityContext::StrategicFit => STRATEGIC_KEYWORDS,
            SimilarityContext::Default => &[],
        }
    }

    /// Whole-word keyword hits in `words`. The longest keyword starting at a
    /// position wins and consumes its words, so "risk assessment" is one hit.
    fn keyword_hits(&self, words: &[&str]) -> usize {
        let mut keywords: Vec<Vec<&str>> = self
            .keywords()
            .iter()
            .map(|kw| kw.split_whitespace().collect())
            .collect();
        keywords.sort_by_key(|kw| std::cmp::Reverse(kw.len()));

        let mut hits = 0;
        let mut at = 0;
        while at < words.len() {
            match keywords.iter().find(|kw| words[at..].starts_with(kw)) {
                Some(kw) => {
                    hits += 1;
                    at += kw.len();
                }
                None => at += 1,
            }
        }
        hits
    }

    /// Detect a context from free query text by keyword hits.
    ///
    /// The context with the most hits wins; no hits or a tie yields `Default`.
    pub fn detect(text: &str) -> Self {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !(c.is_alphanumeric() || c == '-'))
            .filter(|w| !w.is_empty())
            .collect();
        let mut best = SimilarityContext::Default;
        let mut best_hits = 0usize;
        let mut tied = false;

        for context in Self::ALL {
            let hits = context.keyword_hits(&words);
            if hits > best_hits {
                best = context;
                best_hits = hits;
                tied = false;
            } else if hits > 0 && hits == best_hits {
                tied = true;
            }
        }

        if tied {
            SimilarityContext::Default
        } else {
            best
        }
    }
}

impl fmt::Display for SimilarityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SimilarityContext {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| Error::InvalidConfig(format!("unknown similarity context '{s}'")))
    }
}

pub fn validate_caller_id(caller: &str) -> Result<(), Error> {
    if caller.trim().is_empty() {
        return Err(Error::InvalidConfig("caller id is empty".into()));
    }
    if caller.contains(['@', '#']) {
        return Err(Error::InvalidConfig(format!(
            "caller id '{caller}' contains a reserved character ('@' or '#')"
        )));
    }
    Ok(())
}

/// Identifies one published weight-profile lineage: a context preset, or a
/// caller's personalized profile for that context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProfileKey {
    pub context: SimilarityContext,
    #[serde(default)]
    pub caller: Option<String>,
}

impl ProfileKey {
    pub fn preset(context: SimilarityContext) -> Self {
        Self {
            context,
            caller: None,
        }
    }

    /// Caller ids become part of the storage key, so the key separators
    /// `@` and `#` are rejected.
    pub fn personalized(context: SimilarityContext, caller: &str) -> Result<Self, Error> {
        validate_caller_id(caller)?;
        Ok(Self {
            context,
            caller: Some(caller.to_string()),
        })
    }

    pub fn is_personalized(&self) -> bool {
        self.caller.is_some()
    }

    /// Stable string form, used as the storage key prefix.
    pub fn storage_key(&self) -> String {
        match &self.caller {
            Some(caller) => format!("{}@{}", self.context, caller),
            None => self.context.to_string(),
        }
    }
}

impl fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

impl FromStr for ProfileKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('@') {
            Some((context, caller)) if !caller.is_empty() => {
                Self::personalized(context.parse()?, caller)
            }
            _ => Ok(Self::preset(s.parse()?)),
        }
    }
}
