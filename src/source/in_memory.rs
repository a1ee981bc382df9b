use super::RecordSource;
use crate::error::Result;
use crate::types::{de, FormField, FormSettings, RawRecord};
use async_trait::async_trait;
use serde::Deserialize;
use std::cmp::Reverse;
use std::path::Path;
use tracing::debug;

/// Configuration of one form, optionally pinned to the post it is placed on.
/// A config without `post_id` applies to every post.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FormConfig {
    #[serde(deserialize_with = "de::scalar_string")]
    pub form_id: String,
    #[serde(default, deserialize_with = "de::opt_scalar_string")]
    pub post_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub fields: Vec<FormField>,
}

/// JSON snapshot of a submission store
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub forms: Vec<FormConfig>,
    #[serde(default)]
    pub submissions: Vec<RawRecord>,
}

/// In-memory record source for development/testing and snapshot exports
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    forms: Vec<FormConfig>,
    submissions: Vec<RawRecord>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            forms: snapshot.forms,
            submissions: snapshot.submissions,
        }
    }

    /// Load a JSON snapshot file (`{"forms": [...], "submissions": [...]}`)
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;
        debug!(
            path = %path.display(),
            forms = snapshot.forms.len(),
            submissions = snapshot.submissions.len(),
            "Loaded submission snapshot"
        );
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn with_form(mut self, form: FormConfig) -> Self {
        self.forms.push(form);
        self
    }

    pub fn with_submission(mut self, record: RawRecord) -> Self {
        self.submissions.push(record);
        self
    }
}

#[async_trait]
impl RecordSource for InMemorySource {
    async fn list_form_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = Vec::new();
        for record in &self.submissions {
            if !ids.contains(&record.form_id) {
                ids.push(record.form_id.clone());
            }
        }
        Ok(ids)
    }

    async fn fetch_entries(&self, form_id: &str, limit: Option<usize>) -> Result<Vec<RawRecord>> {
        let mut entries: Vec<(usize, &RawRecord)> = self
            .submissions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.form_id == form_id)
            .collect();

        // Newest first by numeric id; records with non-numeric ids sort last
        entries.sort_by_key(|(idx, r)| Reverse((r.id.trim().parse::<i64>().ok(), *idx)));

        let cap = limit.unwrap_or(usize::MAX);
        Ok(entries.into_iter().take(cap).map(|(_, r)| r.clone()).collect())
    }

    async fn form_title(&self, form_id: &str) -> Result<Option<String>> {
        Ok(self
            .forms
            .iter()
            .filter(|f| f.form_id == form_id)
            .find_map(|f| f.title.clone().filter(|t| !t.is_empty())))
    }

    async fn form_settings(&self, post_id: &str, form_id: &str) -> Result<Option<FormSettings>> {
        let pinned = self
            .forms
            .iter()
            .find(|f| f.form_id == form_id && f.post_id.as_deref() == Some(post_id));
        let unpinned = || {
            self.forms
                .iter()
                .find(|f| f.form_id == form_id && f.post_id.is_none())
        };

        Ok(pinned.or_else(unpinned).map(|f| FormSettings {
            fields: f.fields.clone(),
        }))
    }
}
