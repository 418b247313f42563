use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::RequestRecord;

/// Fields of a request record that a search phrase is matched against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    #[default]
    Any,
    Body,
    Headers,
    Query,
}

impl SearchScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchScope::Any => "any",
            SearchScope::Body => "body",
            SearchScope::Headers => "headers",
            SearchScope::Query => "query",
        }
    }

    /// Case-sensitive substring match of `phrase` within this scope of `record`.
    pub fn matches(&self, record: &RequestRecord, phrase: &str) -> bool {
        match self {
            SearchScope::Any => {
                body_matches(record, phrase)
                    || headers_match(record, phrase)
                    || query_matches(record, phrase)
            }
            SearchScope::Body => body_matches(record, phrase),
            SearchScope::Headers => headers_match(record, phrase),
            SearchScope::Query => query_matches(record, phrase),
        }
    }
}

impl fmt::Display for SearchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SearchScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "any" => Ok(SearchScope::Any),
            "body" => Ok(SearchScope::Body),
            "headers" => Ok(SearchScope::Headers),
            "query" => Ok(SearchScope::Query),
            _ => Err(format!("Unknown search scope: {}", s)),
        }
    }
}

fn body_matches(record: &RequestRecord, phrase: &str) -> bool {
    record.body.contains(phrase)
}

fn headers_match(record: &RequestRecord, phrase: &str) -> bool {
    record
        .headers
        .iter()
        .any(|(name, values)| name.contains(phrase) || values.iter().any(|v| v.contains(phrase)))
}

fn query_matches(record: &RequestRecord, phrase: &str) -> bool {
    record.query.contains(phrase)
}
