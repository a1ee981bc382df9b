use crate::error::Result;
use crate::pipeline::extract::Extractor;
use crate::types::{GroupBy, NormalizedRow};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

/// A bucket of normalized entries that ends up in one CSV file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
    pub key: String,
    pub title: String,
    /// Form ids whose entries were merged into this group, in processing order
    pub form_ids: Vec<String>,
    pub entries: Vec<NormalizedRow>,
}

impl Group {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Groups keyed by form id or form title, in first-seen order
#[derive(Debug, Clone)]
pub struct Groups {
    group_by: GroupBy,
    groups: IndexMap<String, Group>,
}

impl Groups {
    pub fn new(group_by: GroupBy) -> Self {
        Self {
            group_by,
            groups: IndexMap::new(),
        }
    }

    /// Add the rows fetched for one form.
    ///
    /// By name, forms sharing a title are concatenated in processing order and
    /// the first title seen is kept. By id, a repeated form id replaces the
    /// earlier rows instead of appending to them.
    pub fn absorb(&mut self, form_id: &str, title: &str, rows: Vec<NormalizedRow>) {
        let key = match self.group_by {
            GroupBy::Name => title.to_string(),
            GroupBy::Id => form_id.to_string(),
        };

        let group = self.groups.entry(key.clone()).or_insert_with(|| Group {
            key,
            title: title.to_string(),
            form_ids: Vec::new(),
            entries: Vec::new(),
        });

        match self.group_by {
            GroupBy::Name => {
                if !group.form_ids.iter().any(|id| id == form_id) {
                    group.form_ids.push(form_id.to_string());
                }
                group.entries.extend(rows);
            }
            GroupBy::Id => {
                group.form_ids = vec![form_id.to_string()];
                group.entries = rows;
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Group> {
        self.groups.get(key)
    }

    /// Every group, empty ones included
    pub fn iter(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Groups with at least one entry
    pub fn non_empty(&self) -> impl Iterator<Item = &Group> {
        self.groups.values().filter(|g| !g.is_empty())
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn total_entries(&self) -> usize {
        self.groups.values().map(Group::len).sum()
    }
}

/// Fetch every form in `form_ids` order and bucket the rows
pub async fn group_forms(
    extractor: &mut Extractor<'_>,
    form_ids: &[String],
    group_by: GroupBy,
    limit: Option<usize>,
    since: Option<DateTime<Utc>>,
) -> Result<Groups> {
    let mut groups = Groups::new(group_by);
    for form_id in form_ids {
        let rows = extractor.fetch(form_id, limit, since).await?;
        let title = extractor.title(form_id).await?;
        debug!(form_id = %form_id, title = %title, rows = rows.len(), "Grouping form");
        groups.absorb(form_id, &title, rows);
    }
    Ok(groups)
}
