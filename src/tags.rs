use std::collections::BTreeMap;

use crate::{MetricResult, MetricsError};

/// An ordered set of declared tag key/value pairs.
///
/// Metrics receive their tags at construction time through a `TagSet`;
/// there is no runtime field discovery. The [`tags!`](crate::tags) macro
/// is the ergonomic way to build one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    pairs: Vec<(String, String)>,
}

impl TagSet {
    /// An empty tag set.
    #[must_use]
    pub const fn new() -> Self {
        Self { pairs: Vec::new() }
    }

    /// Adds a tag, builder style.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Adds a tag in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    /// The declared pairs, in declaration order.
    #[must_use]
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Whether no tags are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Number of declared tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }
}

/// Maps declared tag identifiers to canonical wire keys.
///
/// Every variant is deterministic and idempotent: applying the transform
/// to its own output returns the output unchanged.
#[derive(Clone, Copy)]
pub enum TagNameTransform {
    /// Keys pass through untouched.
    Identity,
    /// `CamelCase` identifiers become `lower_snake_case`.
    LowerSnakeCase,
    /// A user-supplied pure function.
    Custom(fn(&str) -> String),
}

impl std::fmt::Debug for TagNameTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Identity => write!(f, "Identity"),
            Self::LowerSnakeCase => write!(f, "LowerSnakeCase"),
            Self::Custom(_) => write!(f, "Custom(...)"),
        }
    }
}

impl TagNameTransform {
    /// Applies the transform to one key.
    #[must_use]
    pub fn apply(&self, key: &str) -> String {
        match self {
            Self::Identity => key.to_owned(),
            Self::LowerSnakeCase => to_lower_snake(key),
            Self::Custom(f) => f(key),
        }
    }
}

fn to_lower_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower_or_digit = false;
    for c in key.chars() {
        if c.is_uppercase() {
            if prev_lower_or_digit {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            prev_lower_or_digit = false;
        } else {
            out.push(c);
            prev_lower_or_digit = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

/// The canonicalized, attachment-time view of a metric's tags: default
/// tags merged in, keys transformed, pairs sorted by key.
///
/// Carries the two wire renderings every endpoint needs: the canonical
/// JSON object and the statsd `k:v,k:v` joined form.
#[derive(Debug, PartialEq, Eq)]
pub struct ResolvedTags {
    pairs: Vec<(String, String)>,
    json: String,
    statsd: String,
}

impl ResolvedTags {
    /// The merged pairs, sorted by key.
    #[must_use]
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// The canonical JSON object, e.g. `{"host":"web1","route":"/a"}`.
    #[must_use]
    pub fn json(&self) -> &str {
        &self.json
    }

    /// The statsd joined form, e.g. `host:web1,route:/a`.
    #[must_use]
    pub fn statsd(&self) -> &str {
        &self.statsd
    }
}

fn valid_tag_text(text: &str) -> bool {
    text.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
}

fn check_pair(key: &str, value: &str) -> MetricResult<()> {
    if key.is_empty() || !valid_tag_text(key) {
        return Err(MetricsError::InvalidTag {
            key: key.to_owned(),
            reason: "keys must be non-empty and contain only letters, digits, '-', '_', '.' or '/'"
                .to_owned(),
        });
    }
    if value.is_empty() {
        return Err(MetricsError::InvalidTag {
            key: key.to_owned(),
            reason: "value is empty".to_owned(),
        });
    }
    if !valid_tag_text(value) {
        return Err(MetricsError::InvalidTagValue {
            key: key.to_owned(),
            value: value.to_owned(),
        });
    }
    Ok(())
}

/// Merges a metric's declared tags with the collector's default tags and
/// canonicalizes the result.
pub(crate) fn resolve_tags(
    declared: &TagSet,
    defaults: &TagSet,
    transform: &TagNameTransform,
) -> MetricResult<ResolvedTags> {
    let mut merged = BTreeMap::new();
    for (key, value) in defaults.pairs() {
        let key = transform.apply(key);
        check_pair(&key, value)?;
        merged.insert(key, value.clone());
    }
    for (key, value) in declared.pairs() {
        let key = transform.apply(key);
        check_pair(&key, value)?;
        if merged.insert(key.clone(), value.clone()).is_some() {
            return Err(MetricsError::TagConflict { key });
        }
    }

    let json = serde_json::to_string(&merged)?;
    let pairs: Vec<(String, String)> = merged.into_iter().collect();

    let mut statsd = String::new();
    for (key, value) in &pairs {
        if !statsd.is_empty() {
            statsd.push(',');
        }
        statsd.push_str(key);
        statsd.push(':');
        statsd.push_str(value);
    }

    Ok(ResolvedTags { pairs, json, statsd })
}
