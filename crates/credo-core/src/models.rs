use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::rating::{NormalizedRating, Outlook, RatingScale};

/// Credit rating agencies Credo knows how to query.
///
/// Declaration order is significant: it is the tie-break order when two
/// agencies resolve a query with equal confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Agency {
    Fitch,
    #[serde(rename = "sp")]
    SandP,
    Moodys,
}

impl Agency {
    pub const ALL: [Agency; 3] = [Agency::Fitch, Agency::SandP, Agency::Moodys];

    pub fn as_str(&self) -> &'static str {
        match self {
            Agency::Fitch => "fitch",
            Agency::SandP => "sp",
            Agency::Moodys => "moodys",
        }
    }

    /// Rate-limiting boundary for this agency's website.
    pub fn domain(&self) -> &'static str {
        match self {
            Agency::Fitch => "fitchratings.com",
            Agency::SandP => "spglobal.com",
            Agency::Moodys => "moodys.com",
        }
    }

    pub fn base_url(&self) -> &'static str {
        match self {
            Agency::Fitch => "https://www.fitchratings.com",
            Agency::SandP => "https://www.spglobal.com",
            Agency::Moodys => "https://www.moodys.com",
        }
    }

    /// Issuer search page for `query` on the agency's own site.
    pub fn search_url(&self, query: &str) -> Result<Url, url::ParseError> {
        let (path, params) = match self {
            Agency::Fitch => ("/search", vec![("query", query), ("content", "Issuer")]),
            Agency::SandP => ("/ratings/en/search/results", vec![("search", query)]),
            Agency::Moodys => ("/search", vec![("q", query), ("type", "issuer")]),
        };
        let mut url = Url::parse(self.base_url())?.join(path)?;
        url.query_pairs_mut().extend_pairs(params);
        Ok(url)
    }

    /// Whether `url` points at this agency's domain or one of its subdomains.
    pub fn owns(&self, url: &Url) -> bool {
        let domain = self.domain();
        url.host_str().is_some_and(|host| {
            host == domain
                || host
                    .strip_suffix(domain)
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    pub fn scale(&self) -> RatingScale {
        match self {
            Agency::Fitch | Agency::SandP => RatingScale::FitchSp,
            Agency::Moodys => RatingScale::Moodys,
        }
    }
}

impl fmt::Display for Agency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Agency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fitch" => Ok(Agency::Fitch),
            "sp" | "s&p" | "spglobal" => Ok(Agency::SandP),
            "moodys" | "moody's" => Ok(Agency::Moodys),
            _ => Err(format!("Unknown agency: {}", s)),
        }
    }
}

/// A single ratings lookup as issued by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingQuery {
    pub company_name: String,
    /// ISO 3166-1 alpha-2 country code, if known.
    pub country: Option<String>,
    pub prefer_exact_match: bool,
}

impl RatingQuery {
    pub fn new(company_name: impl Into<String>) -> Self {
        Self {
            company_name: company_name.into(),
            country: None,
            prefer_exact_match: true,
        }
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_prefer_exact_match(mut self, prefer: bool) -> Self {
        self.prefer_exact_match = prefer;
        self
    }
}

/// A lower-ranked match kept alongside a [`ResolvedCandidate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternate {
    pub display_name: String,
    pub locator: String,
    pub confidence: f64,
}

/// One source's best guess at the entity behind a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedCandidate {
    pub display_name: String,
    /// Opaque handle the fetcher understands (an entity page URL for web sources).
    pub locator: Option<String>,
    /// Match confidence in `[0, 1]`.
    pub confidence: f64,
    #[serde(default)]
    pub alternates: Vec<Alternate>,
}

impl ResolvedCandidate {
    pub fn new(display_name: impl Into<String>, locator: impl Into<String>, confidence: f64) -> Self {
        let locator: String = locator.into();
        Self {
            display_name: display_name.into(),
            locator: (!locator.trim().is_empty()).then_some(locator),
            confidence: clamp_confidence(confidence),
            alternates: Vec::new(),
        }
    }

    pub fn with_alternates(mut self, alternates: Vec<Alternate>) -> Self {
        self.alternates = alternates;
        self
    }
}

/// Clamp a confidence into `[0, 1]`; NaN counts as no confidence at all.
pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// A rating successfully read from one agency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgencyRating {
    /// Rating as printed by the agency (e.g. `AA-`, `Baa2`).
    pub raw: String,
    pub outlook: Option<Outlook>,
    pub normalized: Option<NormalizedRating>,
    pub last_updated: Option<NaiveDate>,
    pub source_url: Option<String>,
}

/// Outcome of querying one source. Never carries both a rating and a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceResult {
    Rated(AgencyRating),
    Blocked { reason: String },
    Failed { reason: String },
    NotFound,
}

impl SourceResult {
    pub fn blocked(reason: impl Into<String>) -> Self {
        SourceResult::Blocked {
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        SourceResult::Failed {
            reason: reason.into(),
        }
    }

    pub fn rating(&self) -> Option<&AgencyRating> {
        match self {
            SourceResult::Rated(rating) => Some(rating),
            _ => None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, SourceResult::Blocked { .. })
    }

    /// Neither a rating nor a block: the source simply had nothing for us.
    pub fn is_miss(&self) -> bool {
        matches!(self, SourceResult::Failed { .. } | SourceResult::NotFound)
    }
}

/// Combined answer across all configured sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub query: String,
    pub country: Option<String>,
    pub resolved: Option<ResolvedCandidate>,
    /// One entry per configured source, always fully populated.
    pub by_source: BTreeMap<Agency, SourceResult>,
    pub notes: Vec<String>,
    #[serde(default)]
    pub served_from_cache: bool,
    pub timestamp: DateTime<Utc>,
}

impl AggregateResult {
    pub fn rated_count(&self) -> usize {
        self.by_source.values().filter(|r| r.rating().is_some()).count()
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
