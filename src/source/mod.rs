use crate::error::Result;
use crate::types::{FormSettings, RawRecord};
use async_trait::async_trait;

pub mod in_memory;
pub mod sqlite;

pub use in_memory::InMemorySource;
pub use sqlite::SqliteSource;

/// Upstream store of form submissions and form configuration.
///
/// Lookups that find nothing return `Ok(None)`; an `Err` means the store
/// itself could not be read and is fatal for the run.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Every distinct form id with at least one stored submission, in a
    /// stable order
    async fn list_form_ids(&self) -> Result<Vec<String>>;

    /// Submissions of one form, newest first, optionally capped
    async fn fetch_entries(&self, form_id: &str, limit: Option<usize>) -> Result<Vec<RawRecord>>;

    /// Display title of a form
    async fn form_title(&self, form_id: &str) -> Result<Option<String>>;

    /// Field configuration of a form as placed on a post
    async fn form_settings(&self, post_id: &str, form_id: &str) -> Result<Option<FormSettings>>;
}
