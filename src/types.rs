use crate::error::{ExportError, Result};
use chrono::{DateTime, Duration, Months, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// One stored form submission, exactly as the record source hands it over.
///
/// Identifiers and client metadata are kept as text so values can be copied
/// verbatim into the export. `form_data` is the still-encoded JSON payload of
/// `field_key -> {value, ...}` entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(deserialize_with = "de::scalar_string")]
    pub id: String,
    #[serde(deserialize_with = "de::scalar_string")]
    pub form_id: String,
    #[serde(default, deserialize_with = "de::scalar_string")]
    pub post_id: String,
    #[serde(default, deserialize_with = "de::scalar_string")]
    pub created_at: String,
    #[serde(default, deserialize_with = "de::opt_scalar_string")]
    pub browser: Option<String>,
    #[serde(default, deserialize_with = "de::opt_scalar_string")]
    pub ip: Option<String>,
    #[serde(default, deserialize_with = "de::opt_scalar_string")]
    pub os: Option<String>,
    #[serde(default, deserialize_with = "de::opt_scalar_string")]
    pub referrer: Option<String>,
    #[serde(default, deserialize_with = "de::opt_scalar_string")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "de::encoded_payload")]
    pub form_data: String,
}

/// A single configured field of a form
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    #[serde(default, deserialize_with = "de::opt_scalar_string")]
    pub id: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

/// Field configuration of one form as placed on one post
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormSettings {
    #[serde(default)]
    pub fields: Vec<FormField>,
}

/// Field key -> display label for one `(post_id, form_id)` pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldLabelMap {
    labels: HashMap<String, String>,
}

impl FieldLabelMap {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the map from a form's settings. Fields without an id are
    /// skipped, fields without a label are labelled with their id.
    pub fn from_settings(settings: &FormSettings) -> Self {
        let mut labels = HashMap::new();
        for field in &settings.fields {
            let Some(id) = field.id.as_deref().filter(|id| !id.is_empty()) else {
                continue;
            };
            let label = field.label.clone().unwrap_or_else(|| id.to_string());
            labels.insert(id.to_string(), label);
        }
        Self { labels }
    }

    /// Display label for a raw field key, or the key itself when unlabelled
    pub fn label_for<'a>(&'a self, key: &'a str) -> &'a str {
        self.labels.get(key).map(String::as_str).unwrap_or(key)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FieldLabelMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            labels: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Flat, ordered column -> value view of one submission.
///
/// Column names are unique. Inserting an existing column replaces its value
/// in place, so the column keeps its original position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct NormalizedRow {
    columns: IndexMap<String, String>,
}

impl NormalizedRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.columns.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns.get(column).map(String::as_str)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Values of this row in `header` order, empty where the row lacks a column
    pub fn project(&self, header: &[String]) -> Vec<String> {
        header
            .iter()
            .map(|column| self.get(column).unwrap_or_default().to_string())
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for NormalizedRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = NormalizedRow::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

/// Reporting cadence. Controls both the schedule and the selection window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    #[default]
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        }
    }

    /// Capitalized label used in subjects and table headings
    pub fn title(&self) -> &'static str {
        match self {
            Frequency::Daily => "Daily",
            Frequency::Weekly => "Weekly",
            Frequency::Monthly => "Monthly",
        }
    }

    /// Oldest submission time included in a run starting at `now`.
    /// A month back from the 31st lands on the last day of the shorter month.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Frequency::Daily => now - Duration::days(1),
            Frequency::Weekly => now - Duration::weeks(1),
            Frequency::Monthly => now
                .checked_sub_months(Months::new(1))
                .unwrap_or(now - Duration::days(30)),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            other => Err(ExportError::Config(format!("unknown frequency '{other}'"))),
        }
    }
}

/// How forms are bucketed into groups (and therefore into CSV files)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    #[default]
    Id,
    Name,
}

impl FromStr for GroupBy {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "id" => Ok(GroupBy::Id),
            "name" => Ok(GroupBy::Name),
            other => Err(ExportError::Config(format!("unknown group_by '{other}'"))),
        }
    }
}

/// How the CSV header of a group is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderMode {
    /// Ordered union of the columns of every row, first-seen order
    #[default]
    Union,
    /// Columns of the first row only. Columns that appear only in later
    /// rows are dropped from the export.
    FirstRow,
}

impl FromStr for HeaderMode {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "union" => Ok(HeaderMode::Union),
            "first_row" => Ok(HeaderMode::FirstRow),
            other => Err(ExportError::Config(format!("unknown header_mode '{other}'"))),
        }
    }
}

/// Which form configuration labels the fields of a fetched entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelScope {
    /// Each entry is labelled with the configuration of its own `post_id`
    #[default]
    PerSubmission,
    /// Every entry of a form is labelled with the configuration of the
    /// newest entry's `post_id`
    NewestEntry,
}

impl FromStr for LabelScope {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per_submission" => Ok(LabelScope::PerSubmission),
            "newest_entry" => Ok(LabelScope::NewestEntry),
            other => Err(ExportError::Config(format!("unknown label_scope '{other}'"))),
        }
    }
}

pub(crate) mod de {
    use serde::{de::Error, Deserialize, Deserializer};
    use serde_json::Value;

    fn scalar_text(value: Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(true) => Some("1".to_string()),
            Value::Bool(false) => Some(String::new()),
            other => Some(other.to_string()),
        }
    }

    /// Accepts strings and numbers (stores hand out ids either way)
    pub fn scalar_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Array(_) | Value::Object(_) => {
                Err(D::Error::custom("expected a string or number"))
            }
            other => Ok(scalar_text(other).unwrap_or_default()),
        }
    }

    pub fn opt_scalar_string<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<String>, D::Error> {
        Ok(scalar_text(Value::deserialize(deserializer)?))
    }

    /// `form_data` either arrives encoded or as an inline JSON document
    pub fn encoded_payload<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::Null => String::new(),
            Value::String(s) => s,
            other => other.to_string(),
        })
    }
}
