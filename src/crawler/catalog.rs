//! Catalog parsing helpers: snapshot selection, entity id extraction, URL templates

use std::sync::OnceLock;

use regex::Regex;

use crate::config::AcceptanceBand;
use crate::error::{CatalogError, Result};
use crate::types::SnapshotDescriptor;

const ENTITY_ID_PATTERN: &str = r#""entityId":"(.*?)""#;

fn entity_id_regex() -> Option<&'static Regex> {
    static ENTITY_ID: OnceLock<Option<Regex>> = OnceLock::new();
    ENTITY_ID
        .get_or_init(|| match Regex::new(ENTITY_ID_PATTERN) {
            Ok(regex) => Some(regex),
            Err(e) => {
                tracing::error!(error = %e, "Entity id pattern failed to compile");
                None
            }
        })
        .as_ref()
}

/// Pick the snapshot to crawl.
///
/// The first descriptor whose entity count falls inside `band` wins. If none does, the
/// largest snapshot is used (first one on ties).
pub fn select_snapshot(
    snapshots: &[SnapshotDescriptor],
    band: AcceptanceBand,
) -> Result<&SnapshotDescriptor> {
    if let Some(inside) = snapshots
        .iter()
        .find(|s| band.contains(s.number_of_entities))
    {
        return Ok(inside);
    }

    let mut largest: Option<&SnapshotDescriptor> = None;
    for snapshot in snapshots {
        match largest {
            Some(best) if best.number_of_entities >= snapshot.number_of_entities => {}
            _ => largest = Some(snapshot),
        }
    }
    largest.ok_or_else(|| CatalogError::EmptySnapshotIndex.into())
}

/// Every `"entityId":"<id>"` occurrence in `content`, in document order
pub fn extract_entity_ids(content: &str) -> Vec<String> {
    let Some(regex) = entity_id_regex() else {
        return Vec::new();
    };
    regex
        .captures_iter(content)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Replace each `{name}` placeholder in `template`
pub fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    values
        .iter()
        .fold(template.to_string(), |acc, (name, value)| {
            acc.replace(&format!("{{{name}}}"), value)
        })
}
