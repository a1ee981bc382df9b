use crate::constants::ARTIFACT_PREFIX;
use crate::error::Result;
use crate::observability::metrics;
use crate::pipeline::grouping::Group;
use crate::types::{HeaderMode, NormalizedRow};
use indexmap::IndexSet;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};

static UNSAFE_FILE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("valid file name regex"));

/// One CSV file written for one group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportArtifact {
    pub group_key: String,
    pub title: String,
    pub path: PathBuf,
    pub header: Vec<String>,
    /// Data rows exactly as written, in header order
    pub rows: Vec<Vec<String>>,
}

/// Column header for a group's entries
pub fn header_for(entries: &[NormalizedRow], mode: HeaderMode) -> Vec<String> {
    match mode {
        HeaderMode::FirstRow => entries
            .first()
            .map(|row| row.columns().map(str::to_string).collect())
            .unwrap_or_default(),
        HeaderMode::Union => {
            let mut columns: IndexSet<&str> = IndexSet::new();
            for row in entries {
                columns.extend(row.columns());
            }
            columns.into_iter().map(str::to_string).collect()
        }
    }
}

/// Write a header and data rows as comma-separated text with standard quoting
pub fn write_csv<W: Write>(writer: W, header: &[String], rows: &[Vec<String>]) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(header)?;
    for row in rows {
        csv_writer.write_record(row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// File-system safe rendition of a form title
pub fn sanitize_file_name(title: &str) -> String {
    let cleaned = UNSAFE_FILE_CHARS.replace_all(title.trim(), "-");
    let cleaned = cleaned.trim_matches(|c| c == '-' || c == '.');
    if cleaned.is_empty() {
        "form".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Writes one CSV per non-empty group into an output directory.
///
/// File names carry a sequence number that starts at 1 for each serializer
/// and advances only when a file is written, so two groups with the same
/// sanitized title never collide within a run.
pub struct CsvSerializer {
    output_dir: PathBuf,
    header_mode: HeaderMode,
    next_sequence: usize,
}

impl CsvSerializer {
    pub fn new(output_dir: impl Into<PathBuf>, header_mode: HeaderMode) -> Self {
        Self {
            output_dir: output_dir.into(),
            header_mode,
            next_sequence: 1,
        }
    }

    /// Serialize a group. Empty groups produce no artifact.
    pub fn serialize(&mut self, group: &Group) -> Result<Option<ExportArtifact>> {
        if group.is_empty() {
            return Ok(None);
        }

        let header = header_for(&group.entries, self.header_mode);
        self.report_dropped_columns(group, &header);

        let rows: Vec<Vec<String>> = group.entries.iter().map(|row| row.project(&header)).collect();

        std::fs::create_dir_all(&self.output_dir)?;
        let file_name = format!(
            "{}_{}_{}.csv",
            ARTIFACT_PREFIX,
            sanitize_file_name(&group.title),
            self.next_sequence
        );
        let path = self.output_dir.join(file_name);

        // The file handle is closed when the writer drops, on every path
        let file = std::fs::File::create(&path)?;
        write_csv(file, &header, &rows)?;
        self.next_sequence += 1;

        info!(
            group = %group.key,
            path = %path.display(),
            rows = rows.len(),
            columns = header.len(),
            "CSV file created"
        );
        metrics::serialize::artifact_written(rows.len());

        Ok(Some(ExportArtifact {
            group_key: group.key.clone(),
            title: group.title.clone(),
            path,
            header,
            rows,
        }))
    }

    fn report_dropped_columns(&self, group: &Group, header: &[String]) {
        if self.header_mode != HeaderMode::FirstRow {
            return;
        }
        let mut dropped: IndexSet<&str> = IndexSet::new();
        for row in &group.entries {
            dropped.extend(row.columns().filter(|c| !header.iter().any(|h| h == c)));
        }
        if !dropped.is_empty() {
            warn!(
                group = %group.key,
                columns = ?dropped,
                "Columns missing from the first entry are not exported"
            );
            metrics::serialize::columns_dropped(dropped.len());
        }
    }
}
