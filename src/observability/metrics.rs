//! Metrics for the export pipeline
//!
//! Recording functions are grouped by pipeline phase. Without an installed
//! recorder every call is a no-op, so library code and tests can record
//! freely.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;
use tracing::info;

/// Enum representing all metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Extraction
    ExtractRecordsFetched,
    ExtractRecordsOutsideWindow,
    ExtractUnparseableTimestamps,

    // Field labels and titles
    LabelsResolved,
    LabelsMissing,
    TitlesMissing,

    // Normalize
    NormalizeRowsProduced,
    NormalizeDecodeFailures,
    NormalizeFieldsDegraded,

    // Serialize
    SerializeArtifactsWritten,
    SerializeRowsWritten,
    SerializeColumnsDropped,

    // Run
    RunCompleted,
    RunSkipped,
    RunDuration,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::ExtractRecordsFetched => "form_export_extract_records_fetched_total",
            MetricName::ExtractRecordsOutsideWindow => "form_export_extract_records_outside_window_total",
            MetricName::ExtractUnparseableTimestamps => "form_export_extract_unparseable_timestamps_total",
            MetricName::LabelsResolved => "form_export_labels_resolved_total",
            MetricName::LabelsMissing => "form_export_labels_missing_total",
            MetricName::TitlesMissing => "form_export_titles_missing_total",
            MetricName::NormalizeRowsProduced => "form_export_normalize_rows_produced_total",
            MetricName::NormalizeDecodeFailures => "form_export_normalize_decode_failures_total",
            MetricName::NormalizeFieldsDegraded => "form_export_normalize_fields_degraded_total",
            MetricName::SerializeArtifactsWritten => "form_export_serialize_artifacts_written_total",
            MetricName::SerializeRowsWritten => "form_export_serialize_rows_written_total",
            MetricName::SerializeColumnsDropped => "form_export_serialize_columns_dropped_total",
            MetricName::RunCompleted => "form_export_run_completed_total",
            MetricName::RunSkipped => "form_export_run_skipped_total",
            MetricName::RunDuration => "form_export_run_duration_seconds",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Calling it twice is harmless.
pub fn init() -> anyhow::Result<()> {
    if HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;
    let _ = HANDLE.set(handle);
    info!("Metrics recorder installed");
    Ok(())
}

/// Current exposition text, if a recorder was installed
pub fn render() -> Option<String> {
    HANDLE.get().map(PrometheusHandle::render)
}

/// Write the exposition text for a node-exporter style textfile scrape
pub fn write_textfile(path: &Path) -> std::io::Result<bool> {
    match render() {
        Some(text) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, text)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

pub mod extract {
    use super::MetricName;

    pub fn records_fetched(form_id: &str, count: usize) {
        ::metrics::counter!(MetricName::ExtractRecordsFetched.as_str(), "form_id" => form_id.to_string())
            .increment(count as u64);
    }

    pub fn records_outside_window(form_id: &str, count: usize) {
        ::metrics::counter!(MetricName::ExtractRecordsOutsideWindow.as_str(), "form_id" => form_id.to_string())
            .increment(count as u64);
    }

    pub fn unparseable_timestamp() {
        ::metrics::counter!(MetricName::ExtractUnparseableTimestamps.as_str()).increment(1);
    }
}

pub mod labels {
    use super::MetricName;

    pub fn resolved() {
        ::metrics::counter!(MetricName::LabelsResolved.as_str()).increment(1);
    }

    pub fn missing() {
        ::metrics::counter!(MetricName::LabelsMissing.as_str()).increment(1);
    }

    pub fn title_missing() {
        ::metrics::counter!(MetricName::TitlesMissing.as_str()).increment(1);
    }
}

pub mod normalize {
    use super::MetricName;

    pub fn row_produced() {
        ::metrics::counter!(MetricName::NormalizeRowsProduced.as_str()).increment(1);
    }

    pub fn decode_failure() {
        ::metrics::counter!(MetricName::NormalizeDecodeFailures.as_str()).increment(1);
    }

    pub fn field_degraded() {
        ::metrics::counter!(MetricName::NormalizeFieldsDegraded.as_str()).increment(1);
    }
}

pub mod serialize {
    use super::MetricName;

    pub fn artifact_written(rows: usize) {
        ::metrics::counter!(MetricName::SerializeArtifactsWritten.as_str()).increment(1);
        ::metrics::counter!(MetricName::SerializeRowsWritten.as_str()).increment(rows as u64);
    }

    pub fn columns_dropped(count: usize) {
        ::metrics::counter!(MetricName::SerializeColumnsDropped.as_str()).increment(count as u64);
    }
}

pub mod run {
    use super::MetricName;

    pub fn completed(frequency: &str, secs: f64) {
        ::metrics::counter!(MetricName::RunCompleted.as_str(), "frequency" => frequency.to_string())
            .increment(1);
        ::metrics::histogram!(MetricName::RunDuration.as_str()).record(secs);
    }

    pub fn skipped(reason: &'static str) {
        ::metrics::counter!(MetricName::RunSkipped.as_str(), "reason" => reason).increment(1);
    }
}
