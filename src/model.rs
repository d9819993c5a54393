use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const DEFAULT_SOURCE_LABEL: &str = "aggregated";
pub const MAX_TAGS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    ThemeForest,
    Webflow,
    Framer,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::ThemeForest, Platform::Webflow, Platform::Framer];

    pub fn name(self) -> &'static str {
        match self {
            Platform::ThemeForest => "ThemeForest",
            Platform::Webflow => "Webflow",
            Platform::Framer => "Framer",
        }
    }

    /// Id prefix, without the trailing dash.
    pub fn prefix(self) -> &'static str {
        match self {
            Platform::ThemeForest => "envato",
            Platform::Webflow => "webflow",
            Platform::Framer => "framer",
        }
    }

    pub fn id_for(self, native: &str) -> String {
        format!("{}-{}", self.prefix(), native)
    }

    pub fn owns(self, id: &str) -> bool {
        id.strip_prefix(self.prefix())
            .is_some_and(|rest| rest.starts_with('-'))
    }

    pub fn from_id(id: &str) -> Option<Platform> {
        Platform::ALL.into_iter().find(|p| p.owns(id))
    }

    /// Only the API source reports sales, so only its slice is reordered by them.
    pub fn sorts_by_sales(self) -> bool {
        matches!(self, Platform::ThemeForest)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One listing in the unified catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub rating_count: u64,
    #[serde(default)]
    pub sales: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub preview_url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub features: String,
    #[serde(default)]
    pub compatibility: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub scraped_at: String,
    /// Keys this schema doesn't model (e.g. `screenshots`), kept so old records round-trip.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Template {
    pub fn new(platform: Platform, native_id: &str, title: impl Into<String>, scraped_at: &str) -> Self {
        Template {
            id: platform.id_for(native_id),
            title: title.into(),
            author: "Unknown".to_string(),
            platform: platform.name().to_string(),
            category: String::new(),
            price: "Free".to_string(),
            rating: 0.0,
            rating_count: 0,
            sales: 0,
            tags: Vec::new(),
            thumbnail: String::new(),
            url: String::new(),
            preview_url: String::new(),
            description: String::new(),
            features: String::new(),
            compatibility: String::new(),
            updated_at: String::new(),
            scraped_at: scraped_at.to_string(),
            extra: Map::new(),
        }
    }

    /// Schema checks. Records are never dropped for failing these; callers report them.
    pub fn validate(&self) -> Vec<SchemaIssue> {
        let mut issues = Vec::new();

        match Platform::from_id(&self.id) {
            None => issues.push(SchemaIssue::UnknownPrefix(self.id.clone())),
            Some(p) => {
                if self.id.len() == p.prefix().len() + 1 {
                    issues.push(SchemaIssue::DegenerateId(self.id.clone()));
                }
                if !self.platform.is_empty() && self.platform != p.name() {
                    issues.push(SchemaIssue::PlatformMismatch {
                        id: self.id.clone(),
                        platform: self.platform.clone(),
                    });
                }
            }
        }

        if self.title.trim().is_empty() {
            issues.push(SchemaIssue::EmptyTitle(self.id.clone()));
        }
        if !(0.0..=5.0).contains(&self.rating) {
            issues.push(SchemaIssue::RatingOutOfRange(self.id.clone(), self.rating));
        }
        if self.tags.len() > MAX_TAGS {
            issues.push(SchemaIssue::TooManyTags(self.id.clone(), self.tags.len()));
        }
        for (field, value) in [
            ("thumbnail", &self.thumbnail),
            ("url", &self.url),
            ("previewUrl", &self.preview_url),
        ] {
            if !value.is_empty() && !value.starts_with("http://") && !value.starts_with("https://") {
                issues.push(SchemaIssue::RelativeUrl {
                    id: self.id.clone(),
                    field,
                });
            }
        }

        issues
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaIssue {
    #[error("{0}: id has no known platform prefix")]
    UnknownPrefix(String),
    #[error("{0}: id has no native part")]
    DegenerateId(String),
    #[error("{id}: platform {platform:?} does not match id prefix")]
    PlatformMismatch { id: String, platform: String },
    #[error("{0}: empty title")]
    EmptyTitle(String),
    #[error("{0}: rating {1} outside 0-5")]
    RatingOutOfRange(String, f64),
    #[error("{0}: {1} tags (max 8)")]
    TooManyTags(String, usize),
    #[error("{id}: {field} is not an absolute URL")]
    RelativeUrl { id: String, field: &'static str },
    #[error("{id}: unreadable record ({reason})")]
    Unreadable { id: String, reason: String },
}

/// The persisted aggregate. Records stay raw JSON: `Template` is the shape this crate
/// writes, but entries already on disk are carried through exactly as found.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    pub last_updated: String,
    pub source: String,
    pub templates: Vec<Value>,
    /// Top-level keys other than the three above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_source() -> String {
    DEFAULT_SOURCE_LABEL.to_string()
}

impl Default for Catalog {
    fn default() -> Self {
        Catalog {
            last_updated: String::new(),
            source: default_source(),
            templates: Vec::new(),
            extra: Map::new(),
        }
    }
}

impl Catalog {
    /// Lenient read of a persisted document. Missing or mistyped header fields fall back to
    /// defaults; `None` when it isn't an object or `templates` isn't a list.
    pub fn from_value(value: Value) -> Option<Catalog> {
        let Value::Object(mut obj) = value else {
            return None;
        };
        let templates = match obj.remove("templates") {
            Some(Value::Array(list)) => list,
            None | Some(Value::Null) => Vec::new(),
            Some(_) => return None,
        };
        let last_updated = match obj.remove("lastUpdated") {
            Some(Value::String(s)) => s,
            _ => String::new(),
        };
        let source = match obj.remove("source") {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            _ => default_source(),
        };
        Some(Catalog {
            last_updated,
            source,
            templates,
            extra: obj,
        })
    }
}

/// The string `id` of a persisted record.
pub fn record_id(record: &Value) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

/// Schema issues of a persisted record. A record that doesn't fit `Template` at all is one issue.
pub fn validate_record(record: &Value) -> Vec<SchemaIssue> {
    match Template::deserialize(record) {
        Ok(t) => t.validate(),
        Err(e) => vec![SchemaIssue::Unreadable {
            id: record_id(record).unwrap_or("?").to_string(),
            reason: e.to_string(),
        }],
    }
}

/// Current UTC time in RFC 3339 / ISO-8601.
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ── Tests ──
