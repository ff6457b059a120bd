//! Rating scales and normalization.
//!
//! Fitch and S&P share a letter scale (`AAA` .. `D`); Moody's uses its own
//! (`Aaa` .. `C`). Both are mapped onto a common numeric score where 1 is the
//! best credit quality and 21 is default, which is what makes ratings from
//! different agencies comparable.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Letter scale a raw rating is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RatingScale {
    #[serde(rename = "S&P/Fitch")]
    FitchSp,
    #[serde(rename = "Moody's")]
    Moodys,
}

impl fmt::Display for RatingScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RatingScale::FitchSp => write!(f, "S&P/Fitch"),
            RatingScale::Moodys => write!(f, "Moody's"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingBucket {
    InvestmentGrade,
    Speculative,
    Default,
    NotRated,
}

impl fmt::Display for RatingBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RatingBucket::InvestmentGrade => write!(f, "Investment Grade"),
            RatingBucket::Speculative => write!(f, "Speculative"),
            RatingBucket::Default => write!(f, "Default"),
            RatingBucket::NotRated => write!(f, "Not Rated"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outlook {
    Positive,
    Stable,
    Negative,
    Developing,
    NotAvailable,
}

impl Outlook {
    /// Best-effort keyword match over free text such as "Rating Watch Negative".
    ///
    /// Negative is checked before positive so "Watch Negative" is not read
    /// as developing.
    pub fn parse(text: &str) -> Outlook {
        let lower = text.trim().to_lowercase();
        if lower.is_empty() {
            return Outlook::NotAvailable;
        }
        let has = |words: &[&str]| {
            lower
                .split(|c: char| !c.is_alphanumeric())
                .any(|token| words.contains(&token))
        };
        if has(&["negative", "neg"]) {
            Outlook::Negative
        } else if has(&["positive", "pos"]) {
            Outlook::Positive
        } else if has(&["stable", "stb"]) {
            Outlook::Stable
        } else if has(&["developing", "dev", "watch", "evolving"]) {
            Outlook::Developing
        } else {
            Outlook::NotAvailable
        }
    }
}

impl fmt::Display for Outlook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outlook::Positive => write!(f, "Positive"),
            Outlook::Stable => write!(f, "Stable"),
            Outlook::Negative => write!(f, "Negative"),
            Outlook::Developing => write!(f, "Developing"),
            Outlook::NotAvailable => write!(f, "N/A"),
        }
    }
}

/// A rating placed on the common 1..=21 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRating {
    pub scale: RatingScale,
    pub score: u8,
    pub bucket: RatingBucket,
}

const FITCH_SP_SCALE: &[(&str, u8)] = &[
    ("AAA", 1),
    ("AA+", 2),
    ("AA", 3),
    ("AA-", 4),
    ("A+", 5),
    ("A", 6),
    ("A-", 7),
    ("BBB+", 8),
    ("BBB", 9),
    ("BBB-", 10),
    ("BB+", 11),
    ("BB", 12),
    ("BB-", 13),
    ("B+", 14),
    ("B", 15),
    ("B-", 16),
    ("CCC+", 17),
    ("CCC", 17),
    ("CCC-", 17),
    ("CC", 18),
    ("C", 19),
    ("D", 21),
    ("SD", 21),
    ("RD", 21),
];

const MOODYS_SCALE: &[(&str, u8)] = &[
    ("Aaa", 1),
    ("Aa1", 2),
    ("Aa2", 3),
    ("Aa3", 4),
    ("A1", 5),
    ("A2", 6),
    ("A3", 7),
    ("Baa1", 8),
    ("Baa2", 9),
    ("Baa3", 10),
    ("Ba1", 11),
    ("Ba2", 12),
    ("Ba3", 13),
    ("B1", 14),
    ("B2", 15),
    ("B3", 16),
    ("Caa1", 17),
    ("Caa2", 17),
    ("Caa3", 17),
    ("Ca", 18),
    ("C", 19),
];

const NOT_RATED: &[&str] = &["NR", "WR", "WD", "N/A", "NA", "WITHDRAWN", "NOT RATED"];

fn table(scale: RatingScale) -> &'static [(&'static str, u8)] {
    match scale {
        RatingScale::FitchSp => FITCH_SP_SCALE,
        RatingScale::Moodys => MOODYS_SCALE,
    }
}

pub fn bucket_for_score(score: u8) -> RatingBucket {
    match score {
        1..=10 => RatingBucket::InvestmentGrade,
        11..=19 => RatingBucket::Speculative,
        21 => RatingBucket::Default,
        _ => RatingBucket::NotRated,
    }
}

/// Normalize a raw agency rating. Returns `None` for unrated or unknown values.
///
/// Parenthesized qualifiers such as `"AA- (local)"` are ignored. Moody's
/// symbols are case-sensitive (`Baa2`), the Fitch/S&P scale is not.
pub fn normalize(raw: &str, scale: RatingScale) -> Option<NormalizedRating> {
    let trimmed = raw.split('(').next().unwrap_or_default().trim();
    if trimmed.is_empty() || NOT_RATED.contains(&trimmed.to_uppercase().as_str()) {
        return None;
    }

    let symbol = match scale {
        RatingScale::FitchSp => trimmed.to_uppercase(),
        RatingScale::Moodys => trimmed.to_string(),
    };

    table(scale)
        .iter()
        .find(|(s, _)| *s == symbol)
        .map(|&(_, score)| NormalizedRating {
            scale,
            score,
            bucket: bucket_for_score(score),
        })
}

/// Approximate equivalent of `raw` on another scale, via the numeric score.
///
/// Scores shared by several symbols (CCC+/CCC/CCC-) map to the first one.
pub fn equivalent(raw: &str, from: RatingScale, to: RatingScale) -> Option<&'static str> {
    let normalized = normalize(raw, from)?;
    table(to)
        .iter()
        .find(|(_, score)| *score == normalized.score)
        .map(|&(symbol, _)| symbol)
}

pub fn is_investment_grade(raw: &str, scale: RatingScale) -> bool {
    normalize(raw, scale).is_some_and(|n| n.bucket == RatingBucket::InvestmentGrade)
}
