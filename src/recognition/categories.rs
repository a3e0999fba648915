// Category dictionary merge
//
// Destination numbers are authoritative. A source number keeps its meaning by
// being mapped onto the destination number carrying the same label, or onto a
// fresh number when the label is new and its own number is already taken.

use std::collections::BTreeMap;

use crate::constants::RESERVED_CATEGORY;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryMerge {
    /// Destination dictionary after the merge.
    pub merged: BTreeMap<u32, String>,
    /// Source number -> destination number, only where they differ.
    pub lookup: BTreeMap<u32, u32>,
}

impl CategoryMerge {
    pub fn resolve(&self, source: u32) -> u32 {
        self.lookup.get(&source).copied().unwrap_or(source)
    }
}

pub fn merge_categories(dest: &BTreeMap<u32, String>, source: &BTreeMap<u32, String>) -> CategoryMerge {
    let mut merged = dest.clone();
    let mut lookup = BTreeMap::new();

    // First number wins when a dictionary repeats a label
    let mut by_label: BTreeMap<String, u32> = BTreeMap::new();
    for (n, label) in dest {
        if !label.is_empty() {
            by_label.entry(label.clone()).or_insert(*n);
        }
    }

    let mut pending = Vec::new();
    for (n, label) in source {
        if *n == RESERVED_CATEGORY {
            merged.entry(*n).or_insert_with(|| label.clone());
            continue;
        }
        if label.is_empty() || dest.get(n) == Some(label) {
            continue;
        }
        if let Some(m) = by_label.get(label) {
            lookup.insert(*n, *m);
            continue;
        }
        pending.push((*n, label.clone()));
    }

    // New labels whose number is free keep it
    let mut unresolved = Vec::new();
    for (n, label) in pending {
        if let Some(m) = by_label.get(&label) {
            lookup.insert(n, *m);
        } else if !merged.contains_key(&n) {
            merged.insert(n, label.clone());
            by_label.insert(label, n);
        } else {
            unresolved.push((n, label));
        }
    }

    // The rest get numbers past everything in use
    let mut next = merged.keys().next_back().map(|k| k + 1).unwrap_or(1);
    for (n, label) in unresolved {
        if let Some(m) = by_label.get(&label) {
            lookup.insert(n, *m);
            continue;
        }
        merged.insert(next, label.clone());
        by_label.insert(label, next);
        lookup.insert(n, next);
        next += 1;
    }

    CategoryMerge { merged, lookup }
}

/// Merge description texts. Destination text wins; source text is re-keyed through `lookup`.
pub fn merge_descriptions(
    dest: &BTreeMap<u32, String>,
    source: &BTreeMap<u32, String>,
    categories: &CategoryMerge,
) -> BTreeMap<u32, String> {
    let mut merged: BTreeMap<u32, String> = dest
        .iter()
        .filter(|(_, d)| !d.is_empty())
        .map(|(k, d)| (*k, d.clone()))
        .collect();
    for (n, description) in source {
        if description.is_empty() {
            continue;
        }
        let target = categories.resolve(*n);
        if categories.merged.contains_key(&target) {
            merged.entry(target).or_insert_with(|| description.clone());
        }
    }
    merged
}
