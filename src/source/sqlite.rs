use super::RecordSource;
use crate::error::{ExportError, Result};
use crate::types::{FormField, FormSettings, RawRecord};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Tables read by [`SqliteSource`]. `fields` holds a JSON array of
/// `{"id": ..., "label": ...}` objects.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS form_submissions (
    id          INTEGER PRIMARY KEY,
    form_id     TEXT NOT NULL,
    post_id     TEXT,
    created_at  TEXT,
    form_data   TEXT,
    browser     TEXT,
    ip          TEXT,
    os          TEXT,
    referrer    TEXT,
    user_id     TEXT
);
CREATE INDEX IF NOT EXISTS idx_form_submissions_form ON form_submissions (form_id, id);
CREATE TABLE IF NOT EXISTS form_settings (
    post_id  TEXT,
    form_id  TEXT NOT NULL,
    title    TEXT,
    fields   TEXT
);
"#;

/// Record source backed by a local SQLite copy of the submissions table
pub struct SqliteSource {
    conn: Mutex<Connection>,
}

impl SqliteSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ExportError::Source {
                message: format!("submission database not found: {}", path.display()),
            });
        }
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "Opened submission database");
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Create the tables if they do not exist yet
    pub fn ensure_schema(&self) -> Result<()> {
        self.with_conn(|conn| Ok(conn.execute_batch(SCHEMA)?))
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().map_err(|_| ExportError::Source {
            message: "submission database connection poisoned".to_string(),
        })?;
        f(&conn)
    }
}

/// Column value as text regardless of its SQLite storage class
fn text_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<String>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        id: text_at(row, 0)?.unwrap_or_default(),
        form_id: text_at(row, 1)?.unwrap_or_default(),
        post_id: text_at(row, 2)?.unwrap_or_default(),
        created_at: text_at(row, 3)?.unwrap_or_default(),
        form_data: text_at(row, 4)?.unwrap_or_default(),
        browser: text_at(row, 5)?,
        ip: text_at(row, 6)?,
        os: text_at(row, 7)?,
        referrer: text_at(row, 8)?,
        user_id: text_at(row, 9)?,
    })
}

#[async_trait]
impl RecordSource for SqliteSource {
    async fn list_form_ids(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            // Forms in order of their first submission
            let mut stmt = conn.prepare(
                "SELECT form_id FROM form_submissions GROUP BY form_id ORDER BY MIN(id)",
            )?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
    }

    async fn fetch_entries(&self, form_id: &str, limit: Option<usize>) -> Result<Vec<RawRecord>> {
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, form_id, post_id, created_at, form_data, browser, ip, os, referrer, user_id
                 FROM form_submissions WHERE form_id = ?1 ORDER BY id DESC LIMIT ?2",
            )?;
            let records = stmt
                .query_map(params![form_id, limit], record_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
    }

    async fn form_title(&self, form_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let title = conn
                .query_row(
                    "SELECT title FROM form_settings
                     WHERE form_id = ?1 AND title IS NOT NULL AND title <> '' LIMIT 1",
                    params![form_id],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            Ok(title)
        })
    }

    async fn form_settings(&self, post_id: &str, form_id: &str) -> Result<Option<FormSettings>> {
        let fields_json = self.with_conn(|conn| {
            let fields = conn
                .query_row(
                    "SELECT fields FROM form_settings WHERE post_id = ?1 AND form_id = ?2 LIMIT 1",
                    params![post_id, form_id],
                    |row| text_at(row, 0),
                )
                .optional()?;
            Ok(fields.flatten())
        })?;

        let Some(fields_json) = fields_json else {
            return Ok(None);
        };
        match serde_json::from_str::<Vec<FormField>>(&fields_json) {
            Ok(fields) => Ok(Some(FormSettings { fields })),
            Err(e) => {
                warn!(post_id, form_id, error = %e, "Malformed field configuration, ignoring it");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> SqliteSource {
        let source = SqliteSource::from_connection(Connection::open_in_memory().unwrap());
        source.ensure_schema().unwrap();
        source
            .with_conn(|conn| {
                conn.execute_batch(
                    r#"
                    INSERT INTO form_submissions (id, form_id, post_id, created_at, form_data, browser, user_id)
                    VALUES (1, 'news', '5', '2024-01-01 09:00:00', '{}', 'Firefox', 0),
                           (2, 'contact', '7', '2024-01-02 09:00:00', '{}', 'Chrome', 3),
                           (3, 'news', '5', '2024-01-03 09:00:00', '{}', NULL, NULL);
                    INSERT INTO form_settings (post_id, form_id, title, fields)
                    VALUES ('7', 'contact', 'Contact', '[{"id":"f1","label":"Name"}]'),
                           ('5', 'news', NULL, 'not json');
                    "#,
                )?;
                Ok(())
            })
            .unwrap();
        source
    }

    #[tokio::test]
    async fn test_lists_forms_by_first_submission() {
        let source = seeded();
        assert_eq!(source.list_form_ids().await.unwrap(), vec!["news", "contact"]);
    }

    #[tokio::test]
    async fn test_fetch_reads_integers_as_text() {
        let source = seeded();
        let entries = source.fetch_entries("news", None).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "3");
        assert_eq!(entries[0].browser, None);
        assert_eq!(entries[1].user_id.as_deref(), Some("0"));

        let capped = source.fetch_entries("news", Some(1)).await.unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].id, "3");
    }

    #[tokio::test]
    async fn test_settings_and_titles() {
        let source = seeded();
        let settings = source.form_settings("7", "contact").await.unwrap().unwrap();
        assert_eq!(settings.fields[0].label.as_deref(), Some("Name"));
        assert_eq!(source.form_title("contact").await.unwrap().as_deref(), Some("Contact"));

        // Malformed configuration and missing title both degrade to None
        assert!(source.form_settings("5", "news").await.unwrap().is_none());
        assert!(source.form_title("news").await.unwrap().is_none());
    }

    #[test]
    fn test_open_missing_file_is_source_error() {
        let err = SqliteSource::open("/nonexistent/submissions.db").err().unwrap();
        assert!(matches!(err, ExportError::Source { .. }));
    }
}
