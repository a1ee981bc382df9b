use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::app::ports::{DeliveryPort, DeliveryReceipt, ReportMessage};
use crate::config::ExportConfig;
use crate::observability::metrics;
use crate::pipeline::report::subject;
use crate::pipeline::{compose, group_forms, CsvSerializer, ExportArtifact, Extractor, ReportSummary};
use crate::source::RecordSource;
use crate::types::Frequency;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Periodic run addressed to the configured recipients
    Scheduled,
    /// On-demand run addressed to the contact address
    Test,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub mode: RunMode,
    pub frequency: Option<Frequency>,
    pub since: Option<DateTime<Utc>>,
}

impl RunRequest {
    pub fn scheduled() -> Self {
        Self {
            mode: RunMode::Scheduled,
            frequency: None,
            since: None,
        }
    }

    pub fn test(frequency: Frequency) -> Self {
        Self {
            mode: RunMode::Test,
            frequency: Some(frequency),
            since: None,
        }
    }

    /// Replace the frequency window with an explicit start
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }
}

/// Missing precondition that turns a run into a no-op
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoRecipients,
    NoTestAddress,
    NoForms,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NoRecipients => "no_recipients",
            SkipReason::NoTestAddress => "no_test_address",
            SkipReason::NoForms => "no_forms",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoRecipients => write!(f, "no recipients configured"),
            SkipReason::NoTestAddress => write!(f, "no test address configured"),
            SkipReason::NoForms => write!(f, "no forms found"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub frequency: Frequency,
    pub since: DateTime<Utc>,
    pub summary: ReportSummary,
    pub artifacts: Vec<ExportArtifact>,
    pub receipt: DeliveryReceipt,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Skipped(SkipReason),
    Completed(RunReport),
}

/// Use case for one export run: extract, group, serialize, report, deliver
pub struct ExportUseCase {
    source: Arc<dyn RecordSource>,
    delivery: Box<dyn DeliveryPort>,
    config: ExportConfig,
}

impl ExportUseCase {
    pub fn new(
        source: Arc<dyn RecordSource>,
        delivery: Box<dyn DeliveryPort>,
        config: ExportConfig,
    ) -> Self {
        Self {
            source,
            delivery,
            config,
        }
    }

    pub async fn run(&self, request: RunRequest) -> Result<RunOutcome> {
        self.run_at(request, Utc::now()).await
    }

    /// Run with an explicit clock, used to compute the frequency window
    pub async fn run_at(&self, request: RunRequest, now: DateTime<Utc>) -> Result<RunOutcome> {
        let frequency = request.frequency.unwrap_or(self.config.frequency);
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "export_run",
            run_id = %run_id,
            frequency = %frequency,
            mode = ?request.mode
        );
        self.execute(run_id, frequency, request, now)
            .instrument(span)
            .await
    }

    async fn execute(
        &self,
        run_id: String,
        frequency: Frequency,
        request: RunRequest,
        now: DateTime<Utc>,
    ) -> Result<RunOutcome> {
        let started = Instant::now();

        // A test run still needs the scheduled recipients to be configured
        if request.mode == RunMode::Test && self.config.contact_email.is_empty() {
            return Ok(skip(SkipReason::NoTestAddress));
        }
        if self.config.recipients.is_empty() {
            return Ok(skip(SkipReason::NoRecipients));
        }
        let recipients = match request.mode {
            RunMode::Scheduled => self.config.recipients.clone(),
            RunMode::Test => vec![self.config.contact_email.clone()],
        };

        let form_ids = self
            .source
            .list_form_ids()
            .await
            .context("Failed to list forms")?;
        if form_ids.is_empty() {
            return Ok(skip(SkipReason::NoForms));
        }

        let since = request.since.unwrap_or_else(|| frequency.window_start(now));
        info!(forms = form_ids.len(), %since, "Starting export");

        let mut extractor = Extractor::new(self.source.as_ref(), self.config.label_scope);
        let groups = group_forms(
            &mut extractor,
            &form_ids,
            self.config.group_by,
            self.config.fetch_limit,
            Some(since),
        )
        .await
        .context("Failed to extract submissions")?;

        let summary = compose(&groups);

        let mut serializer = CsvSerializer::new(&self.config.output_dir, self.config.header_mode);
        let mut artifacts = Vec::new();
        for group in groups.non_empty() {
            let artifact = serializer
                .serialize(group)
                .with_context(|| format!("Failed to write CSV for group '{}'", group.key))?;
            artifacts.extend(artifact);
        }

        // Scheduled runs without a contact address point readers at the first recipient
        let contact = if self.config.contact_email.is_empty() {
            recipients[0].as_str()
        } else {
            self.config.contact_email.as_str()
        };

        let html_body = summary.render_html(frequency, &self.config.site_name, contact);

        let message = ReportMessage {
            run_id: run_id.clone(),
            to: recipients,
            subject: subject(frequency, &self.config.site_name),
            html_body,
            attachments: artifacts.iter().map(|a| a.path.clone()).collect(),
        };
        let receipt = self
            .delivery
            .deliver(&message)
            .await
            .context("Failed to deliver report")?;

        metrics::run::completed(frequency.as_str(), started.elapsed().as_secs_f64());
        info!(
            groups = summary.rows.len(),
            total = summary.total_count,
            artifacts = artifacts.len(),
            location = %receipt.location,
            "Export complete"
        );

        Ok(RunOutcome::Completed(RunReport {
            run_id,
            frequency,
            since,
            summary,
            artifacts,
            receipt,
        }))
    }
}

fn skip(reason: SkipReason) -> RunOutcome {
    warn!(reason = reason.as_str(), "Skipping export: {}", reason);
    metrics::run::skipped(reason.as_str());
    RunOutcome::Skipped(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::in_memory::{FormConfig, InMemorySource};
    use crate::types::{GroupBy, RawRecord};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::tempdir;

    struct MockDelivery {
        pub messages: Arc<tokio::sync::Mutex<Vec<ReportMessage>>>,
    }

    impl MockDelivery {
        pub fn new() -> Self {
            Self {
                messages: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl DeliveryPort for MockDelivery {
        async fn deliver(&self, message: &ReportMessage) -> Result<DeliveryReceipt> {
            self.messages.lock().await.push(message.clone());
            Ok(DeliveryReceipt {
                location: "mock".to_string(),
                recipients: message.to.len(),
                attachments: message.attachments.len(),
            })
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    fn source() -> InMemorySource {
        let form = |id: &str, title: &str| FormConfig {
            form_id: id.to_string(),
            title: Some(title.to_string()),
            ..Default::default()
        };
        let entry = |id: u32, form_id: &str, created_at: &str| RawRecord {
            id: id.to_string(),
            form_id: form_id.to_string(),
            post_id: "7".to_string(),
            created_at: created_at.to_string(),
            form_data: json!({"email": {"value": format!("user{id}@example.com")}}).to_string(),
            ..Default::default()
        };
        InMemorySource::new()
            .with_form(form("1", "Contact"))
            .with_form(form("2", "Newsletter"))
            .with_submission(entry(1, "1", "2024-03-14 09:00:00"))
            .with_submission(entry(2, "1", "2024-03-01 09:00:00"))
            .with_submission(entry(3, "2", "2024-03-15 08:00:00"))
    }

    fn config(output_dir: &std::path::Path) -> ExportConfig {
        ExportConfig {
            recipients: vec!["team@example.com".to_string()],
            contact_email: "ops@example.com".to_string(),
            site_name: "Acme".to_string(),
            output_dir: output_dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_scheduled_run_delivers_to_recipients() {
        let dir = tempdir().unwrap();
        let delivery = MockDelivery::new();
        let messages = delivery.messages.clone();
        let use_case = ExportUseCase::new(Arc::new(source()), Box::new(delivery), config(dir.path()));

        let outcome = use_case.run_at(RunRequest::scheduled(), now()).await.unwrap();
        let RunOutcome::Completed(report) = outcome else {
            panic!("expected a completed run");
        };

        assert_eq!(report.frequency, Frequency::Monthly);
        assert_eq!(report.summary.total_count, 3);
        assert_eq!(report.artifacts.len(), 2);

        let messages = messages.lock().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].to, vec!["team@example.com"]);
        assert_eq!(messages[0].subject, "Monthly Form Submissions for Acme");
        assert_eq!(messages[0].attachments.len(), 2);
        assert!(messages[0].html_body.contains("reach out to ops@example.com."));
    }

    #[tokio::test]
    async fn test_test_run_uses_frequency_override_and_contact() {
        let dir = tempdir().unwrap();
        let delivery = MockDelivery::new();
        let messages = delivery.messages.clone();
        let use_case = ExportUseCase::new(Arc::new(source()), Box::new(delivery), config(dir.path()));

        let outcome = use_case
            .run_at(RunRequest::test(Frequency::Daily), now())
            .await
            .unwrap();
        let RunOutcome::Completed(report) = outcome else {
            panic!("expected a completed run");
        };

        // Only entry 3 falls in the last day
        assert_eq!(report.summary.total_count, 1);
        assert_eq!(report.since, Utc.with_ymd_and_hms(2024, 3, 14, 12, 0, 0).unwrap());
        assert_eq!(report.summary.rows[0].count, 0);
        assert_eq!(report.artifacts.len(), 1);
        assert_eq!(messages.lock().await[0].to, vec!["ops@example.com"]);
    }

    #[tokio::test]
    async fn test_since_override_replaces_window() {
        let dir = tempdir().unwrap();
        let use_case = ExportUseCase::new(
            Arc::new(source()),
            Box::new(MockDelivery::new()),
            ExportConfig {
                group_by: GroupBy::Name,
                ..config(dir.path())
            },
        );

        let since = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap();
        let outcome = use_case
            .run_at(RunRequest::scheduled().since(since), now())
            .await
            .unwrap();
        let RunOutcome::Completed(report) = outcome else {
            panic!("expected a completed run");
        };
        assert_eq!(report.summary.total_count, 1);
        assert_eq!(report.since, since);
    }

    #[tokio::test]
    async fn test_test_run_requires_recipients() {
        let dir = tempdir().unwrap();
        let delivery = MockDelivery::new();
        let messages = delivery.messages.clone();
        let use_case = ExportUseCase::new(
            Arc::new(source()),
            Box::new(delivery),
            ExportConfig {
                recipients: Vec::new(),
                ..config(dir.path())
            },
        );

        let outcome = use_case
            .run_at(RunRequest::test(Frequency::Daily), now())
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Skipped(SkipReason::NoRecipients)));
        assert!(messages.lock().await.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_preconditions_skip_the_run() {
        let dir = tempdir().unwrap();
        let bare = ExportConfig {
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let use_case = ExportUseCase::new(Arc::new(source()), Box::new(MockDelivery::new()), bare.clone());
        assert!(matches!(
            use_case.run_at(RunRequest::scheduled(), now()).await.unwrap(),
            RunOutcome::Skipped(SkipReason::NoRecipients)
        ));
        let outcome = use_case.run_at(RunRequest::test(Frequency::Weekly), now()).await.unwrap();
        let RunOutcome::Skipped(reason) = outcome else {
            panic!("expected a skipped run");
        };
        assert_eq!(reason.to_string(), "no test address configured");

        let use_case = ExportUseCase::new(
            Arc::new(InMemorySource::new()),
            Box::new(MockDelivery::new()),
            config(dir.path()),
        );
        assert!(matches!(
            use_case.run_at(RunRequest::scheduled(), now()).await.unwrap(),
            RunOutcome::Skipped(SkipReason::NoForms)
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
