use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AppError;

/// Largest capacity a single basket may be configured with.
pub const MAX_BASKET_CAPACITY: u32 = 2000;

/// Longest accepted basket name (matches the `baskets.name` column).
pub const MAX_BASKET_NAME_LEN: usize = 250;

/// HTTP headers grouped by name, values kept in arrival order.
pub type Headers = BTreeMap<String, Vec<String>>;

/// Per-basket configuration.
///
/// `Default` yields the zero-value configuration returned by handles whose
/// basket has been deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasketConfig {
    /// Maximum number of request records retained at once.
    pub capacity: u32,
    /// Upstream URL the network layer forwards captured requests to.
    pub forward_url: Option<String>,
    /// Return the upstream response instead of the configured template.
    pub proxy_response: bool,
    /// Skip TLS verification when forwarding.
    pub insecure_tls: bool,
    /// Append the captured sub-path to `forward_url` when forwarding.
    pub expand_path: bool,
}

impl BasketConfig {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn with_forward_url(mut self, url: impl Into<String>) -> Self {
        self.forward_url = Some(url.into());
        self
    }

    /// Check capacity bounds and the forward URL, normalising an empty URL to `None`.
    pub fn validated(mut self) -> Result<Self, AppError> {
        if self.capacity == 0 || self.capacity > MAX_BASKET_CAPACITY {
            return Err(AppError::InvalidConfig(format!(
                "capacity {} is out of range 1..={MAX_BASKET_CAPACITY}",
                self.capacity
            )));
        }

        if self.forward_url.as_deref().is_some_and(str::is_empty) {
            self.forward_url = None;
        }

        if let Some(raw) = &self.forward_url {
            let parsed = Url::parse(raw)
                .map_err(|e| AppError::InvalidConfig(format!("forward URL '{raw}': {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(AppError::InvalidConfig(format!(
                    "forward URL '{raw}' must use http or https"
                )));
            }
        }

        Ok(self)
    }
}

/// Validate a basket name against the registry's naming rules.
pub fn validate_basket_name(name: &str) -> Result<(), AppError> {
    if name.is_empty() {
        return Err(AppError::InvalidName("name may not be empty".into()));
    }
    if name.chars().count() > MAX_BASKET_NAME_LEN {
        return Err(AppError::InvalidName(format!(
            "name exceeds {MAX_BASKET_NAME_LEN} characters"
        )));
    }
    Ok(())
}

/// Ownership credential issued when a basket is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    pub token: String,
}

/// Decode a captured body as text. Invalid UTF-8 and NUL bytes both become
/// U+FFFD, since NUL cannot be stored in a Postgres `TEXT` column.
fn body_text(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.contains('\0') {
        text.replace('\0', "\u{FFFD}")
    } else {
        text.into_owned()
    }
}

/// Immutable snapshot of a captured HTTP request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub method: String,
    pub path: String,
    /// Raw query string without the leading `?`, empty when absent.
    pub query: String,
    /// Header names as normalised (lowercase) by the `http` crate.
    pub headers: Headers,
    pub body: String,
    pub content_length: u64,
    pub received_at: DateTime<Utc>,
}

impl RequestRecord {
    /// Take a snapshot of an incoming request.
    pub fn from_request(request: &http::Request<Bytes>) -> Self {
        let mut headers = Headers::new();
        for (name, value) in request.headers() {
            headers
                .entry(name.as_str().to_string())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }

        let body = request.body();
        let content_length = request
            .headers()
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(body.len() as u64);

        Self {
            method: request.method().as_str().to_string(),
            path: request.uri().path().to_string(),
            query: request.uri().query().unwrap_or_default().to_string(),
            headers,
            body: body_text(body),
            content_length,
            received_at: Utc::now(),
        }
    }
}

/// Mock response served for one HTTP method of a basket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseConfig {
    pub status: u16,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub body: String,
    /// Whether `body` is a template rendered by the network layer.
    #[serde(default)]
    pub is_template: bool,
}

impl ResponseConfig {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: body.into(),
            is_template: false,
        }
    }

    pub fn as_template(mut self) -> Self {
        self.is_template = true;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.entry(name.into()).or_default().push(value.into());
        self
    }
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self::new(200, "")
    }
}

/// One page of the retained request window, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestsPage {
    pub requests: Vec<RequestRecord>,
    /// Number of records currently retained.
    pub count: usize,
    /// Number of records added since creation or the last clear.
    pub total_count: usize,
    pub has_more: bool,
}

/// One page of search results, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestsQueryPage {
    pub requests: Vec<RequestRecord>,
    pub has_more: bool,
}

/// One page of basket names in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasketNamesPage {
    pub names: Vec<String>,
    /// Number of names in the queried scope (whole registry or match set).
    pub count: usize,
    pub has_more: bool,
}
