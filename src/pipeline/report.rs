use crate::pipeline::grouping::Groups;
use crate::types::Frequency;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub title: String,
    pub count: usize,
}

/// Per-group submission counts plus the grand total for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub rows: Vec<ReportRow>,
    pub total_count: usize,
}

/// Count entries per group. Empty groups are listed with a zero count.
pub fn compose(groups: &Groups) -> ReportSummary {
    let rows: Vec<ReportRow> = groups
        .iter()
        .map(|g| ReportRow {
            title: g.title.clone(),
            count: g.len(),
        })
        .collect();
    let total_count = rows.iter().map(|r| r.count).sum();
    ReportSummary { rows, total_count }
}

pub fn subject(frequency: Frequency, site_name: &str) -> String {
    format!("{} Form Submissions for {}", frequency.title(), site_name)
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

impl ReportSummary {
    /// HTML fragment for the report message body
    pub fn render_html(&self, frequency: Frequency, site_name: &str, contact: &str) -> String {
        let cell = "style='text-align: left;'";
        let label = frequency.title();

        let mut html = format!(
            "Here's a {} update on the form submissions for {}:<br><br>",
            frequency.as_str(),
            escape_html(site_name)
        );
        html.push_str(&format!(
            "<table border='1' cellpadding='5' cellspacing='0' {cell}>\
             <tr><th {cell}>Form Name</th><th {cell}>Number of {label} Submissions</th></tr>"
        ));
        for row in &self.rows {
            html.push_str(&format!(
                "<tr><td {cell}>{}</td><td {cell}>{}</td></tr>",
                escape_html(&row.title),
                row.count
            ));
        }
        html.push_str(&format!(
            "<tr><th {cell}>Total {label} Submissions (All Forms)</th><th {cell}>{}</th></tr>\
             </table><br><br>",
            self.total_count
        ));
        html.push_str(&format!(
            "For further information about the export, please reach out to {}.",
            escape_html(contact)
        ));
        html
    }

    /// Plain-text table for terminals and logs
    pub fn render_text(&self, frequency: Frequency) -> String {
        let heading = format!("{} submissions", frequency.title());
        let width = self
            .rows
            .iter()
            .map(|r| r.title.chars().count())
            .chain(["Form Name".len(), "Total".len()])
            .max()
            .unwrap_or(0);

        let mut lines = vec![format!("{:<width$}  {:>6}", "Form Name", heading)];
        lines.extend(
            self.rows
                .iter()
                .map(|row| format!("{:<width$}  {:>6}", row.title, row.count)),
        );
        lines.push(format!("{:<width$}  {:>6}", "Total", self.total_count));
        lines.join("\n") + "\n"
    }
}
