// Template difference engine
//
// Compares a proposed template (A) with the template of a data-bearing store (B).
// Pure: takes two in-memory templates, touches no database.
//
// Hierarchy pass:
//   1. every B level is matched to an A level by identity, else by non-empty alias
//   2. every A level without an identity match is added or renamed
//   3. added/deleted pairs sharing a non-empty alias collapse into renames
//   4. the aligned prefix is recorded as the last common level
//   5. append-only safety / incompatibility is decided
// Field pass: per matched level pair, per shared data label.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::compat::{explain_incompatibility, is_compatible};
use super::{ControlType, FieldControl, LevelRow, Template};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RenameKind {
    /// Same identity, alias edited.
    AliasChanged,
    /// Same alias, new identity.
    IdentityChanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelRename {
    pub proposed: LevelRow,
    pub existing: LevelRow,
    pub kind: RenameKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelRenumber {
    pub existing: LevelRow,
    pub from: u32,
    pub to: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommonLevel {
    pub proposed: LevelRow,
    pub existing: LevelRow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeIncompatibility {
    /// Level in the proposed template (0 = image level).
    pub level: u32,
    pub data_label: String,
    pub from: ControlType,
    pub to: ControlType,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeChange {
    pub level: u32,
    pub data_label: String,
    pub from: ControlType,
    pub to: ControlType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeChange {
    pub level: u32,
    pub data_label: String,
    pub attributes: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovedChoices {
    pub level: u32,
    pub data_label: String,
    pub removed: Vec<String>,
}

impl RemovedChoices {
    /// Advisory text; the empty selection is shown as <Empty>.
    pub fn message(&self) -> String {
        let shown: Vec<String> = self
            .removed
            .iter()
            .map(|v| if v.is_empty() { "<Empty>".to_string() } else { v.clone() })
            .collect();
        format!(
            "Your template's '{}' menu no longer contains {}; existing data may still hold these values.",
            self.data_label,
            shown.join(", ")
        )
    }
}

/// Taxonomy of what a diff found. Only the blocking kinds stop a merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SyncIssue {
    StructuralIncompatible,
    TypeIncompatible(String),
    SoftSyncRequired,
    ChoiceValuesRemoved(String),
}

impl SyncIssue {
    pub fn is_blocking(&self) -> bool {
        matches!(self, SyncIssue::StructuralIncompatible | SyncIssue::TypeIncompatible(_))
    }
}

/// What a caller may do with a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncDecision {
    UpToDate,
    /// Append-only levels and/or presentation changes; safe to apply.
    AutoApply,
    /// Levels would be deleted or renumbered; the user must accept data loss.
    ConfirmRequired,
    /// A type change would reinterpret existing data.
    Blocked,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiffResult {
    pub common: Vec<CommonLevel>,
    pub added: Vec<LevelRow>,
    pub deleted: Vec<LevelRow>,
    pub renamed: Vec<LevelRename>,
    pub renumbered: Vec<LevelRenumber>,
    /// Last level index L such that levels 1..=L line up in both templates.
    pub last_common_level: u32,
    pub structural_sync_required: bool,
    /// Same hierarchy by position and alias, different identities.
    pub guid_resync_required: bool,
    pub append_only_safe: bool,
    pub incompatible: bool,

    pub type_incompatible: Vec<TypeIncompatibility>,
    pub type_changes: Vec<TypeChange>,
    pub attribute_changes: Vec<AttributeChange>,
    pub choices_added: Vec<(u32, String)>,
    pub choices_removed: Vec<RemovedChoices>,
    /// level -> fields only the proposed template defines
    pub fields_only_in_proposed: BTreeMap<u32, Vec<(String, ControlType)>>,
    /// level -> fields only the existing template defines
    pub fields_only_in_existing: BTreeMap<u32, Vec<(String, ControlType)>>,
    pub soft_sync_required: bool,
    pub warnings: Vec<String>,
}

impl DiffResult {
    pub fn has_type_incompatibilities(&self) -> bool {
        !self.type_incompatible.is_empty()
    }

    pub fn data_labels_differ(&self) -> bool {
        !self.fields_only_in_proposed.is_empty() || !self.fields_only_in_existing.is_empty()
    }

    pub fn issues(&self) -> Vec<SyncIssue> {
        let mut issues = Vec::new();
        if self.incompatible {
            issues.push(SyncIssue::StructuralIncompatible);
        }
        for t in &self.type_incompatible {
            issues.push(SyncIssue::TypeIncompatible(t.message.clone()));
        }
        if self.soft_sync_required {
            issues.push(SyncIssue::SoftSyncRequired);
        }
        for c in &self.choices_removed {
            issues.push(SyncIssue::ChoiceValuesRemoved(c.message()));
        }
        issues
    }

    pub fn decision(&self) -> SyncDecision {
        if self.has_type_incompatibilities() {
            SyncDecision::Blocked
        } else if self.incompatible {
            SyncDecision::ConfirmRequired
        } else if self.structural_sync_required
            || self.guid_resync_required
            || self.soft_sync_required
            || self.data_labels_differ()
        {
            SyncDecision::AutoApply
        } else {
            SyncDecision::UpToDate
        }
    }
}

/// Diff a proposed template (A) against an existing data-bearing template (B).
pub fn diff_templates(proposed: &Template, existing: &Template) -> DiffResult {
    let mut result = DiffResult::default();
    diff_levels(&proposed.levels, &existing.levels, &mut result);

    diff_fields(0, proposed.controls_at(0), existing.controls_at(0), &mut result);
    let pairs: Vec<(u32, u32)> = result
        .common
        .iter()
        .map(|c| (c.proposed.level, c.existing.level))
        .collect();
    for (a_level, b_level) in pairs {
        diff_fields(a_level, proposed.controls_at(a_level), existing.controls_at(b_level), &mut result);
    }

    if result.has_type_incompatibilities() && result.data_labels_differ() {
        for (level, fields) in &result.fields_only_in_proposed {
            result.warnings.push(format!(
                "{} new control(s) were found at level {}; they are added only once the incompatibilities are fixed.",
                fields.len(),
                level
            ));
        }
        for (level, fields) in &result.fields_only_in_existing {
            result.warnings.push(format!(
                "{} control(s) at level {} are missing from your template.",
                fields.len(),
                level
            ));
        }
    }
    for removed in &result.choices_removed {
        result.warnings.push(removed.message());
    }

    result
}

/// Hierarchy pass over level rows. Fills the level sets and flags of `result`.
pub fn diff_levels(proposed: &[LevelRow], existing: &[LevelRow], result: &mut DiffResult) {
    let mut proposed_sorted: Vec<&LevelRow> = proposed.iter().collect();
    proposed_sorted.sort_by_key(|l| l.level);
    let mut existing_sorted: Vec<&LevelRow> = existing.iter().collect();
    existing_sorted.sort_by_key(|l| l.level);

    // 1. Match each existing level by identity, else by non-empty alias
    for b in &existing_sorted {
        let matched = proposed_sorted
            .iter()
            .find(|a| a.guid == b.guid)
            .or_else(|| {
                if b.alias.is_empty() {
                    None
                } else {
                    proposed_sorted.iter().find(|a| a.alias == b.alias)
                }
            });

        match matched {
            Some(a) => {
                result.common.push(CommonLevel {
                    proposed: (*a).clone(),
                    existing: (*b).clone(),
                });
                if a.level != b.level {
                    result.renumbered.push(LevelRenumber {
                        existing: (*b).clone(),
                        from: b.level,
                        to: a.level,
                    });
                }
                if a.guid == b.guid && a.alias != b.alias {
                    result.renamed.push(LevelRename {
                        proposed: (*a).clone(),
                        existing: (*b).clone(),
                        kind: RenameKind::AliasChanged,
                    });
                }
            }
            None => result.deleted.push((*b).clone()),
        }
    }

    if !existing_sorted.is_empty() && existing_sorted.len() == proposed_sorted.len() {
        let aliases_align = proposed_sorted
            .iter()
            .zip(&existing_sorted)
            .all(|(a, b)| a.alias == b.alias);
        let guid_differs = proposed_sorted
            .iter()
            .zip(&existing_sorted)
            .any(|(a, b)| a.guid != b.guid);
        result.guid_resync_required = aliases_align && guid_differs;
    }

    // 2. Proposed levels without an identity match
    for a in &proposed_sorted {
        if existing_sorted.iter().any(|b| b.guid == a.guid) {
            continue;
        }
        let alias_match = if a.alias.trim().is_empty() {
            None
        } else {
            existing_sorted.iter().find(|b| b.alias == a.alias)
        };
        match alias_match {
            Some(b) => result.renamed.push(LevelRename {
                proposed: (*a).clone(),
                existing: (*b).clone(),
                kind: RenameKind::IdentityChanged,
            }),
            None => result.added.push((*a).clone()),
        }
    }

    // 3. Reconcile: an add and a delete sharing an alias are one rename
    let mut i = result.added.len();
    while i > 0 {
        i -= 1;
        let alias = result.added[i].alias.clone();
        if alias.is_empty() {
            continue;
        }
        if let Some(j) = result.deleted.iter().position(|d| d.alias == alias) {
            let existing = result.deleted.remove(j);
            let proposed = result.added.remove(i);
            result.renamed.push(LevelRename {
                proposed,
                existing,
                kind: RenameKind::IdentityChanged,
            });
        }
    }

    // 4. Longest aligned prefix
    let max_level = proposed_sorted
        .last()
        .map(|l| l.level)
        .unwrap_or(0)
        .max(existing_sorted.last().map(|l| l.level).unwrap_or(0));
    result.last_common_level = 0;
    for level in 1..=max_level {
        let aligned = result
            .common
            .iter()
            .any(|c| c.proposed.level == level && c.existing.level == level);
        if !aligned {
            break;
        }
        result.last_common_level = level;
    }

    // 5. Classification
    result.structural_sync_required = !result.added.is_empty()
        || !result.deleted.is_empty()
        || !result.renumbered.is_empty()
        || !result.renamed.is_empty();

    let existing_max = existing_sorted.last().map(|l| l.level).unwrap_or(0);
    let appended_after_existing = result.added.iter().all(|a| a.level > existing_max);
    if !result.renumbered.is_empty() || !result.deleted.is_empty() {
        result.incompatible = true;
    } else if !result.added.is_empty() {
        if appended_after_existing {
            result.append_only_safe = true;
        } else {
            result.incompatible = true;
        }
    }
}

fn diff_fields(level: u32, proposed: &[FieldControl], existing: &[FieldControl], result: &mut DiffResult) {
    for b in existing {
        let Some(a) = proposed.iter().find(|a| a.data_label == b.data_label) else {
            result
                .fields_only_in_existing
                .entry(level)
                .or_default()
                .push((b.data_label.clone(), b.control_type));
            continue;
        };

        if a.control_type != b.control_type {
            if is_compatible(b.control_type, a.control_type) {
                result.type_changes.push(TypeChange {
                    level,
                    data_label: a.data_label.clone(),
                    from: b.control_type,
                    to: a.control_type,
                });
                result.soft_sync_required = true;
            } else {
                let message = explain_incompatibility(&a.data_label, b.control_type, a.control_type)
                    .unwrap_or_default();
                result.type_incompatible.push(TypeIncompatibility {
                    level,
                    data_label: a.data_label.clone(),
                    from: b.control_type,
                    to: a.control_type,
                    message,
                });
                continue;
            }
        }

        if a.control_type.is_choice() || b.control_type.is_choice() {
            let proposed_values = a.choices.all_values();
            let existing_values = b.choices.all_values();

            let removed: Vec<String> = existing_values
                .iter()
                .filter(|v| !proposed_values.contains(v))
                .cloned()
                .collect();
            if !removed.is_empty() && a.control_type.is_choice() {
                result.choices_removed.push(RemovedChoices {
                    level,
                    data_label: a.data_label.clone(),
                    removed,
                });
            }
            if proposed_values.iter().any(|v| !existing_values.contains(v)) {
                result.choices_added.push((level, a.data_label.clone()));
                result.soft_sync_required = true;
            }
        }

        let attributes = a.attribute_differences(b);
        if !attributes.is_empty() {
            result.attribute_changes.push(AttributeChange {
                level,
                data_label: a.data_label.clone(),
                attributes,
            });
            result.soft_sync_required = true;
        }
    }

    let existing_labels: BTreeSet<&str> = existing.iter().map(|b| b.data_label.as_str()).collect();
    for a in proposed {
        if !existing_labels.contains(a.data_label.as_str()) {
            result
                .fields_only_in_proposed
                .entry(level)
                .or_default()
                .push((a.data_label.clone(), a.control_type));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::ChoiceList;

    fn level(n: u32, guid: &str, alias: &str) -> LevelRow {
        LevelRow::with_guid(n, guid, alias)
    }

    fn template(levels: Vec<LevelRow>) -> Template {
        Template {
            controls: vec![FieldControl::new("Note1", ControlType::Note)],
            levels,
            level_controls: BTreeMap::new(),
        }
    }

    #[test]
    fn test_identical_hierarchies_have_no_changes() {
        let levels = vec![level(1, "g1", "Site"), level(2, "g2", "Camera")];
        let diff = diff_templates(&template(levels.clone()), &template(levels));

        assert!(diff.added.is_empty());
        assert!(diff.deleted.is_empty());
        assert!(diff.renamed.is_empty());
        assert!(diff.renumbered.is_empty());
        assert!(!diff.structural_sync_required);
        assert!(!diff.incompatible);
        assert!(!diff.guid_resync_required);
        assert_eq!(diff.last_common_level, 2);
        assert_eq!(diff.decision(), SyncDecision::UpToDate);
        assert!(diff.issues().is_empty());
    }

    #[test]
    fn test_appended_level_is_append_only_safe() {
        let existing = vec![level(1, "g1", "Site"), level(2, "g2", "Camera")];
        let mut proposed = existing.clone();
        proposed.push(level(3, "g3", "Visit"));

        let diff = diff_templates(&template(proposed), &template(existing));
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].guid, "g3");
        assert!(diff.append_only_safe);
        assert!(!diff.incompatible);
        assert!(diff.structural_sync_required);
        assert_eq!(diff.decision(), SyncDecision::AutoApply);
    }

    #[test]
    fn test_deleting_middle_level_is_incompatible() {
        let existing = vec![level(1, "g1", "Site"), level(2, "g2", "Camera"), level(3, "g3", "Visit")];
        let proposed = vec![level(1, "g1", "Site"), level(2, "g3", "Visit")];

        let diff = diff_templates(&template(proposed), &template(existing));
        assert_eq!(diff.deleted.len(), 1);
        assert_eq!(diff.deleted[0].guid, "g2");
        assert_eq!(diff.renumbered.len(), 1);
        assert_eq!(diff.renumbered[0].from, 3);
        assert_eq!(diff.renumbered[0].to, 2);
        assert!(diff.incompatible);
        assert!(!diff.append_only_safe);
        assert_eq!(diff.last_common_level, 1);
        assert_eq!(diff.decision(), SyncDecision::ConfirmRequired);
        assert!(diff.issues().iter().any(SyncIssue::is_blocking));
    }

    #[test]
    fn test_alias_edit_is_a_rename() {
        let existing = vec![level(1, "g1", "Site")];
        let proposed = vec![level(1, "g1", "Location")];

        let diff = diff_templates(&template(proposed), &template(existing));
        assert_eq!(diff.renamed.len(), 1);
        assert_eq!(diff.renamed[0].kind, RenameKind::AliasChanged);
        assert!(!diff.incompatible);
        assert!(diff.structural_sync_required);
    }

    #[test]
    fn test_new_identity_same_alias_is_a_rename() {
        let existing = vec![level(1, "g1", "Site"), level(2, "g2", "Camera")];
        let proposed = vec![level(1, "g1", "Site"), level(2, "other", "Camera")];

        let diff = diff_templates(&template(proposed), &template(existing));
        assert!(diff.added.is_empty());
        assert!(diff.deleted.is_empty());
        assert_eq!(diff.renamed.len(), 1);
        assert_eq!(diff.renamed[0].kind, RenameKind::IdentityChanged);
        assert!(diff.guid_resync_required);
        assert!(!diff.incompatible);
    }

    #[test]
    fn test_unaliased_new_level_is_not_matched_by_alias() {
        let existing = vec![level(1, "g1", "")];
        let proposed = vec![level(1, "g9", "")];

        let diff = diff_templates(&template(proposed), &template(existing));
        assert_eq!(diff.deleted.len(), 1);
        assert_eq!(diff.added.len(), 1);
        assert!(diff.incompatible);
    }

    #[test]
    fn test_compatible_type_change_is_soft() {
        let mut existing = template(vec![]);
        existing.controls = vec![FieldControl::new("Seen", ControlType::Flag)];
        let mut proposed = existing.clone();
        proposed.controls[0].control_type = ControlType::Note;

        let diff = diff_templates(&proposed, &existing);
        assert!(diff.type_incompatible.is_empty());
        assert_eq!(diff.type_changes.len(), 1);
        assert!(diff.soft_sync_required);
        assert_eq!(diff.decision(), SyncDecision::AutoApply);
    }

    #[test]
    fn test_incompatible_type_change_blocks() {
        let mut existing = template(vec![]);
        existing.controls = vec![FieldControl::new("Species", ControlType::MultiChoice)];
        let mut proposed = existing.clone();
        proposed.controls[0].control_type = ControlType::FixedChoice;
        proposed.controls.push(FieldControl::new("Extra", ControlType::Note));

        let diff = diff_templates(&proposed, &existing);
        assert_eq!(diff.type_incompatible.len(), 1);
        assert!(diff.type_incompatible[0].message.contains("single selection"));
        assert_eq!(diff.decision(), SyncDecision::Blocked);
        assert!(diff.warnings.iter().any(|w| w.contains("1 new control(s)")));
    }

    #[test]
    fn test_removed_choices_are_advisory() {
        let mut existing = template(vec![]);
        existing.controls = vec![FieldControl::new("Species", ControlType::FixedChoice)
            .with_choices(ChoiceList::new(["deer", "fox"], true))];
        let mut proposed = existing.clone();
        proposed.controls[0].choices = ChoiceList::new(["deer", "bear"], false);

        let diff = diff_templates(&proposed, &existing);
        assert_eq!(diff.choices_removed.len(), 1);
        assert_eq!(diff.choices_removed[0].removed, vec!["fox".to_string(), String::new()]);
        assert!(diff.choices_removed[0].message().contains("fox, <Empty>"));
        assert_eq!(diff.choices_added.len(), 1);
        assert!(diff.soft_sync_required);
        assert!(diff.issues().iter().all(|i| !i.is_blocking()));
    }

    #[test]
    fn test_level_fields_compared_through_matched_pairs() {
        let mut existing = template(vec![level(1, "g1", "Site")]);
        existing.level_controls.insert(1, vec![FieldControl::new("Habitat", ControlType::Note)]);
        let mut proposed = template(vec![level(1, "g1", "Site")]);
        proposed.level_controls.insert(1, vec![FieldControl::new("Habitat", ControlType::Flag)]);

        let diff = diff_templates(&proposed, &existing);
        assert_eq!(diff.type_incompatible.len(), 1);
        assert_eq!(diff.type_incompatible[0].level, 1);
    }

    #[test]
    fn test_fields_only_on_one_side_recorded() {
        let existing = template(vec![]);
        let mut proposed = existing.clone();
        proposed.controls = vec![FieldControl::new("Other", ControlType::Note)];

        let diff = diff_templates(&proposed, &existing);
        assert_eq!(diff.fields_only_in_proposed[&0], vec![("Other".to_string(), ControlType::Note)]);
        assert_eq!(diff.fields_only_in_existing[&0], vec![("Note1".to_string(), ControlType::Note)]);
        assert!(diff.data_labels_differ());
    }
}
