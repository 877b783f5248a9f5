//! Grouping policy for fallback results. Pure: no store access.

use memory_vault_schemas::ContainerRef;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::engine::SearchHit;

/// Heading for results filed outside any container
pub const GLOBAL_LABEL: &str = "Global";

#[derive(Debug, Clone, Serialize)]
pub struct FallbackGroup {
    /// `None` for the global group
    pub container: Option<ContainerRef>,
    pub hits: Vec<SearchHit>,
}

impl FallbackGroup {
    pub fn label(&self) -> &str {
        self.container
            .as_ref()
            .map(|c| c.name.as_str())
            .unwrap_or(GLOBAL_LABEL)
    }

    pub fn is_global(&self) -> bool {
        self.container.is_none()
    }
}

/// Group hits by owning container. Named groups come first in name order,
/// the global group last; each group is most recently updated first.
pub fn group_fallback(hits: Vec<SearchHit>) -> Vec<FallbackGroup> {
    let mut named: BTreeMap<(String, String), FallbackGroup> = BTreeMap::new();
    let mut global: Vec<SearchHit> = Vec::new();

    for hit in hits {
        match &hit.container {
            Some(container) => {
                let key = (container.name.clone(), container.id.0.clone());
                named
                    .entry(key)
                    .or_insert_with(|| FallbackGroup {
                        container: Some(container.clone()),
                        hits: Vec::new(),
                    })
                    .hits
                    .push(hit);
            }
            None => global.push(hit),
        }
    }

    let mut groups: Vec<FallbackGroup> = named.into_values().collect();
    if !global.is_empty() {
        groups.push(FallbackGroup {
            container: None,
            hits: global,
        });
    }

    // Stable, so hits updated in the same instant keep scan order
    for group in &mut groups {
        group
            .hits
            .sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    }

    groups
}
