use crate::error::Result;
use crate::observability::metrics;
use crate::pipeline::labels::FieldLabelResolver;
use crate::pipeline::normalize::normalize;
use crate::source::RecordSource;
use crate::types::{LabelScope, NormalizedRow, RawRecord};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use tracing::{debug, info, instrument, warn};

/// Parse a stored `created_at` value: epoch seconds (whole or fractional),
/// RFC 3339, or a naive `YYYY-MM-DD[ HH:MM:SS]` read as UTC.
pub fn parse_created_at(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(epoch) = value.parse::<i64>() {
        return Utc.timestamp_opt(epoch, 0).single();
    }
    // Fractional epochs are truncated to whole seconds
    if let Ok(epoch) = value.parse::<f64>() {
        if epoch.is_finite() && epoch.abs() < i64::MAX as f64 {
            return Utc.timestamp_opt(epoch.trunc() as i64, 0).single();
        }
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Whether a record falls inside a window starting at `since`.
/// Records whose timestamp cannot be read are left out of any window.
pub fn within_window(record: &RawRecord, since: DateTime<Utc>) -> bool {
    match parse_created_at(&record.created_at) {
        Some(created) => created >= since,
        None => {
            warn!(
                entry_id = %record.id,
                created_at = %record.created_at,
                "Unreadable submission timestamp, excluding entry from the window"
            );
            metrics::extract::unparseable_timestamp();
            false
        }
    }
}

/// Fetches and normalizes the submissions of one form at a time.
///
/// Holds the per-run label cache, so one `Extractor` should serve one run.
pub struct Extractor<'a> {
    source: &'a dyn RecordSource,
    labels: FieldLabelResolver,
    scope: LabelScope,
}

impl<'a> Extractor<'a> {
    pub fn new(source: &'a dyn RecordSource, scope: LabelScope) -> Self {
        Self {
            source,
            labels: FieldLabelResolver::new(),
            scope,
        }
    }

    /// Normalized rows of one form, newest first.
    ///
    /// `limit` caps the fetch from the source; the `since` window is applied
    /// afterwards in memory, so a capped and windowed fetch can return fewer
    /// than `limit` rows even when older matching entries exist.
    #[instrument(skip(self), fields(scope = ?self.scope))]
    pub async fn fetch(
        &mut self,
        form_id: &str,
        limit: Option<usize>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<NormalizedRow>> {
        let mut entries = self.source.fetch_entries(form_id, limit).await?;
        let fetched = entries.len();
        metrics::extract::records_fetched(form_id, fetched);

        if let Some(since) = since {
            entries.retain(|entry| within_window(entry, since));
            let outside = fetched - entries.len();
            if outside > 0 {
                debug!(form_id, outside, %since, "Dropped entries outside the window");
                metrics::extract::records_outside_window(form_id, outside);
            }
        }

        if entries.is_empty() {
            info!(form_id, "No entries found");
            return Ok(Vec::new());
        }

        info!(form_id, entries = entries.len(), "Normalizing entries");

        let mut rows = Vec::with_capacity(entries.len());
        match self.scope {
            LabelScope::NewestEntry => {
                let newest_post = entries[0].post_id.clone();
                let labels = self.labels.resolve(self.source, &newest_post, form_id).await?;
                for entry in &entries {
                    rows.push(normalize(entry, &labels));
                }
            }
            LabelScope::PerSubmission => {
                for entry in &entries {
                    let labels = self.labels.resolve(self.source, &entry.post_id, form_id).await?;
                    rows.push(normalize(entry, &labels));
                }
            }
        }

        Ok(rows)
    }

    /// Display title of a form, falling back to its id when none is configured
    pub async fn title(&self, form_id: &str) -> Result<String> {
        match self.source.form_title(form_id).await? {
            Some(title) => Ok(title),
            None => {
                warn!(form_id, "Form has no title, using its id");
                metrics::labels::title_missing();
                Ok(form_id.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::in_memory::{FormConfig, InMemorySource};
    use crate::types::FormField;
    use chrono::TimeZone;
    use serde_json::json;

    fn submission(id: u32, post_id: &str, created_at: &str, payload: serde_json::Value) -> RawRecord {
        RawRecord {
            id: id.to_string(),
            form_id: "contact".to_string(),
            post_id: post_id.to_string(),
            created_at: created_at.to_string(),
            form_data: payload.to_string(),
            ..Default::default()
        }
    }

    fn form(post_id: &str, label: &str) -> FormConfig {
        FormConfig {
            form_id: "contact".to_string(),
            post_id: Some(post_id.to_string()),
            title: Some("Contact".to_string()),
            fields: vec![FormField {
                id: Some("f1".to_string()),
                label: Some(label.to_string()),
            }],
        }
    }

    /// Two placements of the same form with different labels for `f1`
    fn drifted_source() -> InMemorySource {
        InMemorySource::new()
            .with_form(form("10", "Name"))
            .with_form(form("11", "Full Name"))
            .with_submission(submission(1, "10", "2024-03-01 08:00:00", json!({"f1": {"value": "old"}})))
            .with_submission(submission(2, "10", "1709769600", json!({"f1": {"value": "mid"}})))
            .with_submission(submission(3, "11", "2024-03-10T12:00:00Z", json!({"f1": {"value": "new"}})))
            .with_submission(submission(4, "11", "yesterday-ish", json!({"f1": {"value": "??"}})))
    }

    #[test]
    fn test_parse_created_at_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 7, 0, 0, 0).unwrap();
        assert_eq!(parse_created_at("1709769600"), Some(expected));
        assert_eq!(parse_created_at("2024-03-07 00:00:00"), Some(expected));
        assert_eq!(parse_created_at("2024-03-07T00:00:00+00:00"), Some(expected));
        assert_eq!(parse_created_at("2024-03-07"), Some(expected));
        assert_eq!(parse_created_at("1709769600.75"), Some(expected));
        assert_eq!(parse_created_at("NaN"), None);
        assert_eq!(parse_created_at("not a date"), None);
        assert_eq!(parse_created_at(""), None);
    }

    #[tokio::test]
    async fn test_window_keeps_only_entries_at_or_after_since() {
        let source = drifted_source();
        let mut extractor = Extractor::new(&source, LabelScope::PerSubmission);

        let all = extractor.fetch("contact", None, None).await.unwrap();
        assert_eq!(all.len(), 4);

        // Boundary is inclusive: entry 2 sits exactly on it
        let since = Utc.with_ymd_and_hms(2024, 3, 7, 0, 0, 0).unwrap();
        let windowed = extractor.fetch("contact", None, Some(since)).await.unwrap();
        let ids: Vec<&str> = windowed.iter().filter_map(|r| r.get("Entry ID")).collect();
        assert_eq!(ids, vec!["3", "2"]);

        // Windowed result is a subset of the unwindowed one
        for row in &windowed {
            assert!(all.contains(row));
        }
    }

    #[tokio::test]
    async fn test_fractional_epoch_stays_in_window() {
        let source = InMemorySource::new()
            .with_form(form("10", "Name"))
            .with_submission(submission(1, "10", "1710072000.5", json!({"f1": {"value": "x"}})));
        let mut extractor = Extractor::new(&source, LabelScope::PerSubmission);

        let since = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        let rows = extractor.fetch("contact", None, Some(since)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("Submission Date"), Some("1710072000.5"));
    }

    #[tokio::test]
    async fn test_limit_applies_before_window() {
        let source = drifted_source();
        let mut extractor = Extractor::new(&source, LabelScope::PerSubmission);

        // Newest two are ids 4 (unreadable date) and 3; only 3 survives the window
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let rows = extractor.fetch("contact", Some(2), Some(since)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("Entry ID"), Some("3"));
    }

    #[tokio::test]
    async fn test_per_submission_labels_follow_each_entry() {
        let source = drifted_source();
        let mut extractor = Extractor::new(&source, LabelScope::PerSubmission);

        let rows = extractor.fetch("contact", None, None).await.unwrap();
        let by_id = |id: &str| rows.iter().find(|r| r.get("Entry ID") == Some(id)).unwrap();
        assert_eq!(by_id("3").get("Full Name"), Some("new"));
        assert_eq!(by_id("1").get("Name"), Some("old"));
        assert_eq!(by_id("1").get("Full Name"), None);
    }

    #[tokio::test]
    async fn test_newest_entry_labels_apply_to_all_entries() {
        let source = drifted_source();
        let mut extractor = Extractor::new(&source, LabelScope::NewestEntry);

        let rows = extractor.fetch("contact", None, None).await.unwrap();
        assert!(rows.iter().all(|r| r.get("Full Name").is_some()));
        assert!(rows.iter().all(|r| r.get("Name").is_none()));
    }

    #[tokio::test]
    async fn test_missing_form_is_empty_not_error() {
        let source = drifted_source();
        let mut extractor = Extractor::new(&source, LabelScope::PerSubmission);
        assert!(extractor.fetch("nope", None, None).await.unwrap().is_empty());
        assert_eq!(extractor.title("nope").await.unwrap(), "nope");
        assert_eq!(extractor.title("contact").await.unwrap(), "Contact");
    }
}
