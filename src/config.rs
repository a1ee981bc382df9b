use crate::constants::{
    DEFAULT_OUTBOX_DIR, DEFAULT_OUTPUT_DIR, ENV_CONTACT_EMAIL, ENV_FREQUENCY, ENV_GROUP_BY,
    ENV_RECIPIENTS,
};
use crate::error::{ExportError, Result};
use crate::types::{Frequency, GroupBy, HeaderMode, LabelScope};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

/// Immutable settings snapshot for one export run
#[derive(Debug, Clone, PartialEq)]
pub struct ExportConfig {
    pub recipients: Vec<String>,
    pub contact_email: String,
    pub frequency: Frequency,
    pub group_by: GroupBy,
    pub header_mode: HeaderMode,
    pub label_scope: LabelScope,
    pub site_name: String,
    pub output_dir: PathBuf,
    /// Cap on entries fetched per form, applied before the time window
    pub fetch_limit: Option<usize>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            recipients: Vec::new(),
            contact_email: String::new(),
            frequency: Frequency::default(),
            group_by: GroupBy::default(),
            header_mode: HeaderMode::default(),
            label_scope: LabelScope::default(),
            site_name: "Website".to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            fetch_limit: None,
        }
    }
}

/// Where submissions are read from
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Sqlite { path: PathBuf },
    Snapshot { path: PathBuf },
}

/// Everything the binary needs: the run settings plus adapter wiring
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub export: ExportConfig,
    pub source: Option<SourceConfig>,
    pub outbox_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Recipients {
    List(Vec<String>),
    Joined(String),
}

#[derive(Debug, Default, Deserialize)]
struct ExportSection {
    recipients: Option<Recipients>,
    contact_email: Option<String>,
    frequency: Option<String>,
    group_by: Option<String>,
    header_mode: Option<String>,
    label_scope: Option<String>,
    site_name: Option<String>,
    output_dir: Option<PathBuf>,
    fetch_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct DeliverySection {
    outbox_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    export: ExportSection,
    source: Option<SourceConfig>,
    #[serde(default)]
    delivery: DeliverySection,
}

/// Split a comma separated address list, dropping blanks
pub fn parse_recipients(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a setting, falling back to its default when the value is unknown
fn lenient<T: FromStr<Err = ExportError> + Default>(setting: &str, value: Option<&str>) -> T {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => T::default(),
        Some(v) => v.parse().unwrap_or_else(|e| {
            warn!(setting, value = v, error = %e, "Invalid setting, using the default");
            T::default()
        }),
    }
}

impl AppConfig {
    /// Load from a TOML file, then apply `FORM_EXPORT_*` environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ExportError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_with_env(&content, |key| std::env::var(key).ok())
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Self::from_toml_with_env(content, |_| None)
    }

    fn from_toml_with_env(content: &str, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut file: ConfigFile = toml::from_str(content)?;

        if let Some(v) = env(ENV_RECIPIENTS) {
            file.export.recipients = Some(Recipients::Joined(v));
        }
        if let Some(v) = env(ENV_CONTACT_EMAIL) {
            file.export.contact_email = Some(v);
        }
        if let Some(v) = env(ENV_FREQUENCY) {
            file.export.frequency = Some(v);
        }
        if let Some(v) = env(ENV_GROUP_BY) {
            file.export.group_by = Some(v);
        }

        Ok(Self::sanitize(file))
    }

    fn sanitize(file: ConfigFile) -> Self {
        let section = file.export;
        let defaults = ExportConfig::default();

        let recipients = match section.recipients {
            Some(Recipients::List(list)) => list
                .iter()
                .flat_map(|entry| parse_recipients(entry))
                .collect(),
            Some(Recipients::Joined(joined)) => parse_recipients(&joined),
            None => Vec::new(),
        };

        let export = ExportConfig {
            recipients,
            contact_email: section.contact_email.map(|s| s.trim().to_string()).unwrap_or_default(),
            frequency: lenient("frequency", section.frequency.as_deref()),
            group_by: lenient("group_by", section.group_by.as_deref()),
            header_mode: lenient("header_mode", section.header_mode.as_deref()),
            label_scope: lenient("label_scope", section.label_scope.as_deref()),
            site_name: section
                .site_name
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.site_name),
            output_dir: section.output_dir.unwrap_or(defaults.output_dir),
            fetch_limit: section.fetch_limit.filter(|l| *l > 0),
        };

        AppConfig {
            export,
            source: file.source,
            outbox_dir: file
                .delivery
                .outbox_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTBOX_DIR)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_full_config() {
        let config = AppConfig::from_toml_str(
            r#"
            [export]
            recipients = "a@example.com, b@example.com ,"
            contact_email = "ops@example.com"
            frequency = "weekly"
            group_by = "name"
            header_mode = "first_row"
            label_scope = "newest_entry"
            site_name = "Acme"
            output_dir = "/tmp/exports"
            fetch_limit = 500

            [source]
            kind = "sqlite"
            path = "submissions.db"

            [delivery]
            outbox_dir = "/tmp/outbox"
            "#,
        )
        .unwrap();

        let export = &config.export;
        assert_eq!(export.recipients, vec!["a@example.com", "b@example.com"]);
        assert_eq!(export.contact_email, "ops@example.com");
        assert_eq!(export.frequency, Frequency::Weekly);
        assert_eq!(export.group_by, GroupBy::Name);
        assert_eq!(export.header_mode, HeaderMode::FirstRow);
        assert_eq!(export.label_scope, LabelScope::NewestEntry);
        assert_eq!(export.fetch_limit, Some(500));
        assert_eq!(
            config.source,
            Some(SourceConfig::Sqlite { path: PathBuf::from("submissions.db") })
        );
        assert_eq!(config.outbox_dir, PathBuf::from("/tmp/outbox"));
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [export]
            recipients = ["a@example.com", "b@example.com, c@example.com"]
            frequency = "hourly"
            group_by = "colour"
            fetch_limit = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.export.recipients.len(), 3);
        assert_eq!(config.export.frequency, Frequency::Monthly);
        assert_eq!(config.export.group_by, GroupBy::Id);
        assert_eq!(config.export.fetch_limit, None);
        assert_eq!(config.source, None);
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.export, ExportConfig::default());
        assert_eq!(config.outbox_dir, PathBuf::from(DEFAULT_OUTBOX_DIR));
    }

    #[test]
    fn test_environment_overrides_file() {
        let env: HashMap<&str, &str> = [
            (ENV_RECIPIENTS, "env@example.com"),
            (ENV_FREQUENCY, "daily"),
        ]
        .into_iter()
        .collect();

        let config = AppConfig::from_toml_with_env(
            "[export]\nrecipients = \"file@example.com\"\nfrequency = \"weekly\"\n",
            |key| env.get(key).map(|v| v.to_string()),
        )
        .unwrap();

        assert_eq!(config.export.recipients, vec!["env@example.com"]);
        assert_eq!(config.export.frequency, Frequency::Daily);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = AppConfig::load(Path::new("/nonexistent/form_export.toml")).unwrap_err();
        assert!(matches!(err, ExportError::Config(_)));
    }
}
