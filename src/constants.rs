/// Column names of the fixed metadata columns, in emission order.
pub const COL_ENTRY_ID: &str = "Entry ID";
pub const COL_SUBMISSION_DATE: &str = "Submission Date";
pub const COL_BROWSER: &str = "Browser";
pub const COL_IP_ADDRESS: &str = "IP Address";
pub const COL_OS: &str = "OS";
pub const COL_REFERRER: &str = "Referrer";
pub const COL_USER_ID: &str = "User ID";

pub const FIXED_COLUMNS: [&str; 7] = [
    COL_ENTRY_ID,
    COL_SUBMISSION_DATE,
    COL_BROWSER,
    COL_IP_ADDRESS,
    COL_OS,
    COL_REFERRER,
    COL_USER_ID,
];

/// Separator used when a field value is a list (checkboxes, multi-selects)
pub const MULTI_VALUE_SEPARATOR: &str = ", ";

/// Prefix of every CSV artifact file name
pub const ARTIFACT_PREFIX: &str = "form_submissions";

// Default locations, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "form_export.toml";
pub const DEFAULT_OUTPUT_DIR: &str = "output";
pub const DEFAULT_OUTBOX_DIR: &str = "outbox";
pub const METRICS_TEXTFILE: &str = "metrics.prom";

// Environment overrides
pub const ENV_CONFIG_PATH: &str = "FORM_EXPORT_CONFIG";
pub const ENV_RECIPIENTS: &str = "FORM_EXPORT_RECIPIENTS";
pub const ENV_CONTACT_EMAIL: &str = "FORM_EXPORT_CONTACT_EMAIL";
pub const ENV_FREQUENCY: &str = "FORM_EXPORT_FREQUENCY";
pub const ENV_GROUP_BY: &str = "FORM_EXPORT_GROUP_BY";
