// Recognition data: category dictionaries, detector info, detection-derived fields

pub mod categories;
pub mod counts;
pub mod info;

use std::collections::BTreeMap;

use rusqlite::Connection;

use crate::db::schema;
use categories::{merge_categories, merge_descriptions, CategoryMerge};

/// Lookups produced when one store's recognition dictionaries are folded into another's.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecognitionMerge {
    pub detection: CategoryMerge,
    pub classification: CategoryMerge,
}

/// Merge the dictionaries and detector info of attached schema `src` into `main`.
/// Writes the merged dictionaries; callers rewrite detection rows through the lookups.
pub fn merge_dictionaries(conn: &Connection, src: &str) -> crate::error::Result<RecognitionMerge> {
    let dest_detection = schema::load_detection_categories(conn, "main")?;
    let source_detection = schema::load_detection_categories(conn, src)?;
    let detection = merge_categories(&dest_detection, &source_detection);
    if detection.merged != dest_detection {
        schema::replace_detection_categories(conn, &detection.merged)?;
    }

    let (dest_labels, dest_desc) = schema::load_classification_categories(conn, "main")?;
    let (source_labels, source_desc) = schema::load_classification_categories(conn, src)?;
    let classification = merge_categories(&dest_labels, &source_labels);
    let descriptions = merge_descriptions(&dest_desc, &source_desc, &classification);
    if classification.merged != dest_labels || descriptions != dest_desc {
        schema::replace_classification_categories(conn, &classification.merged, &descriptions)?;
    }

    let dest_info = schema::get_info(conn, "main")?;
    let source_info = schema::get_info(conn, src)?;
    if let Some(merged) = info::merge_info(dest_info.as_ref(), source_info.as_ref()) {
        if Some(&merged) != dest_info.as_ref() {
            schema::replace_info(conn, &merged)?;
        }
    }

    log_remaps("detection", &detection.lookup);
    log_remaps("classification", &classification.lookup);
    Ok(RecognitionMerge { detection, classification })
}

fn log_remaps(kind: &str, lookup: &BTreeMap<u32, u32>) {
    if !lookup.is_empty() {
        log::info!("Remapped {} {} categories: {:?}", lookup.len(), kind, lookup);
    }
}
