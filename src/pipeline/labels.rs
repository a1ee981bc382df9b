use crate::error::Result;
use crate::observability::metrics;
use crate::source::RecordSource;
use crate::types::FieldLabelMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Resolves field labels per `(post_id, form_id)` and remembers them for the
/// rest of the run. A fresh resolver is created for every run.
#[derive(Default)]
pub struct FieldLabelResolver {
    cache: HashMap<(String, String), Arc<FieldLabelMap>>,
}

impl FieldLabelResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Label map for one form placement. A form configuration that cannot be
    /// found yields an empty map, so every field falls back to its raw key.
    pub async fn resolve(
        &mut self,
        source: &dyn RecordSource,
        post_id: &str,
        form_id: &str,
    ) -> Result<Arc<FieldLabelMap>> {
        let key = (post_id.to_string(), form_id.to_string());
        if let Some(labels) = self.cache.get(&key) {
            return Ok(labels.clone());
        }

        let labels = match source.form_settings(post_id, form_id).await? {
            Some(settings) => {
                let labels = FieldLabelMap::from_settings(&settings);
                debug!(post_id, form_id, labels = labels.len(), "Resolved field labels");
                metrics::labels::resolved();
                labels
            }
            None => {
                warn!(post_id, form_id, "No form configuration found, using raw field keys");
                metrics::labels::missing();
                FieldLabelMap::empty()
            }
        };

        let labels = Arc::new(labels);
        self.cache.insert(key, labels.clone());
        Ok(labels)
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}
