// Template model: field controls, the folder-level hierarchy, and their validation

pub mod compat;
pub mod diff;
pub mod sync;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constants::{FIXED_DATA_COLUMNS, FIXED_FOLDER_COLUMNS};
use crate::error::{Result, SyncError};

/// Data labels become column names, so they are restricted to identifier characters.
static DATA_LABEL_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").ok());

/// The kind of data a field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ControlType {
    Flag,
    Note,
    MultiLine,
    AlphaNumeric,
    Counter,
    IntegerAny,
    IntegerPositive,
    DecimalAny,
    DecimalPositive,
    FixedChoice,
    MultiChoice,
    #[serde(rename = "DateTime_")]
    DateTime,
    DateTimeCustom,
    #[serde(rename = "Date_")]
    Date,
    #[serde(rename = "Time_")]
    Time,
}

impl ControlType {
    pub const ALL: [ControlType; 15] = [
        ControlType::Flag,
        ControlType::Note,
        ControlType::MultiLine,
        ControlType::AlphaNumeric,
        ControlType::Counter,
        ControlType::IntegerAny,
        ControlType::IntegerPositive,
        ControlType::DecimalAny,
        ControlType::DecimalPositive,
        ControlType::FixedChoice,
        ControlType::MultiChoice,
        ControlType::DateTime,
        ControlType::DateTimeCustom,
        ControlType::Date,
        ControlType::Time,
    ];

    /// Name as stored in the `Type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlType::Flag => "Flag",
            ControlType::Note => "Note",
            ControlType::MultiLine => "MultiLine",
            ControlType::AlphaNumeric => "AlphaNumeric",
            ControlType::Counter => "Counter",
            ControlType::IntegerAny => "IntegerAny",
            ControlType::IntegerPositive => "IntegerPositive",
            ControlType::DecimalAny => "DecimalAny",
            ControlType::DecimalPositive => "DecimalPositive",
            ControlType::FixedChoice => "FixedChoice",
            ControlType::MultiChoice => "MultiChoice",
            ControlType::DateTime => "DateTime_",
            ControlType::DateTimeCustom => "DateTimeCustom",
            ControlType::Date => "Date_",
            ControlType::Time => "Time_",
        }
    }

    pub fn is_free_text(&self) -> bool {
        matches!(self, ControlType::Note | ControlType::MultiLine)
    }

    /// Counters count, so they belong with the non-negative integers.
    pub fn is_number(&self) -> bool {
        matches!(
            self,
            ControlType::Counter
                | ControlType::IntegerAny
                | ControlType::IntegerPositive
                | ControlType::DecimalAny
                | ControlType::DecimalPositive
        )
    }

    pub fn is_positive_number(&self) -> bool {
        matches!(
            self,
            ControlType::Counter | ControlType::IntegerPositive | ControlType::DecimalPositive
        )
    }

    pub fn is_choice(&self) -> bool {
        matches!(self, ControlType::FixedChoice | ControlType::MultiChoice)
    }

    pub fn is_date_time(&self) -> bool {
        matches!(
            self,
            ControlType::DateTime | ControlType::DateTimeCustom | ControlType::Date | ControlType::Time
        )
    }
}

impl fmt::Display for ControlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        ControlType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SyncError::InvalidTemplate(format!("unknown control type '{}'", s)))
    }
}

/// Menu values of a choice control.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceList {
    pub values: Vec<String>,
    /// An empty selection is a legal value.
    #[serde(default)]
    pub include_empty: bool,
}

impl ChoiceList {
    pub fn new<S: Into<String>>(values: impl IntoIterator<Item = S>, include_empty: bool) -> Self {
        Self {
            values: values.into_iter().map(Into::into).collect(),
            include_empty,
        }
    }

    /// Every legal value, with the empty selection as "".
    pub fn all_values(&self) -> Vec<String> {
        let mut all = self.values.clone();
        if self.include_empty && !all.iter().any(|v| v.is_empty()) {
            all.push(String::new());
        }
        all
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the stored `List` column. Empty text means no menu.
    pub fn from_json(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(text)?)
    }
}

/// One field definition, either at image level (level 0) or at a folder level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldControl {
    pub data_label: String,
    pub control_type: ControlType,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub tooltip: String,
    #[serde(default)]
    pub default_value: String,
    #[serde(default)]
    pub control_order: i64,
    #[serde(default)]
    pub spreadsheet_order: i64,
    #[serde(default)]
    pub width: i64,
    #[serde(default = "default_true")]
    pub copyable: bool,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default = "default_true")]
    pub export_to_csv: bool,
    #[serde(default)]
    pub choices: ChoiceList,
}

fn default_true() -> bool {
    true
}

impl FieldControl {
    pub fn new(data_label: impl Into<String>, control_type: ControlType) -> Self {
        let data_label = data_label.into();
        let default_value = match control_type {
            ControlType::Flag => "false".to_string(),
            ControlType::Counter => "0".to_string(),
            _ => String::new(),
        };
        Self {
            label: data_label.clone(),
            data_label,
            control_type,
            tooltip: String::new(),
            default_value,
            control_order: 0,
            spreadsheet_order: 0,
            width: 0,
            copyable: true,
            visible: true,
            export_to_csv: true,
            choices: ChoiceList::default(),
        }
    }

    pub fn with_choices(mut self, choices: ChoiceList) -> Self {
        self.choices = choices;
        self
    }

    /// Names of the presentation attributes that differ from `other`.
    pub fn attribute_differences(&self, other: &FieldControl) -> Vec<&'static str> {
        let mut diffs = Vec::new();
        if self.control_order != other.control_order {
            diffs.push("ControlOrder");
        }
        if self.spreadsheet_order != other.spreadsheet_order {
            diffs.push("SpreadsheetOrder");
        }
        if self.default_value != other.default_value {
            diffs.push("DefaultValue");
        }
        if self.label != other.label {
            diffs.push("Label");
        }
        if self.tooltip != other.tooltip {
            diffs.push("Tooltip");
        }
        if self.width != other.width {
            diffs.push("Width");
        }
        if self.copyable != other.copyable {
            diffs.push("Copyable");
        }
        if self.visible != other.visible {
            diffs.push("Visible");
        }
        if self.export_to_csv != other.export_to_csv {
            diffs.push("ExportToCSV");
        }
        diffs
    }
}

/// One level of the folder hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelRow {
    pub level: u32,
    /// Stable identity; survives alias edits.
    pub guid: String,
    #[serde(default)]
    pub alias: String,
}

impl LevelRow {
    pub fn new(level: u32, alias: impl Into<String>) -> Self {
        Self {
            level,
            guid: uuid::Uuid::new_v4().to_string(),
            alias: alias.into(),
        }
    }

    pub fn with_guid(level: u32, guid: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            level,
            guid: guid.into(),
            alias: alias.into(),
        }
    }
}

/// A full template: image-level controls, the hierarchy, and each level's controls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    #[serde(default)]
    pub controls: Vec<FieldControl>,
    #[serde(default)]
    pub levels: Vec<LevelRow>,
    /// Keyed by level index (1-based).
    #[serde(default)]
    pub level_controls: BTreeMap<u32, Vec<FieldControl>>,
}

impl Template {
    /// Controls for a level; level 0 is the image level.
    pub fn controls_at(&self, level: u32) -> &[FieldControl] {
        if level == 0 {
            return &self.controls;
        }
        self.level_controls.get(&level).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn max_level(&self) -> u32 {
        self.levels.iter().map(|l| l.level).max().unwrap_or(0)
    }

    pub fn level(&self, level: u32) -> Option<&LevelRow> {
        self.levels.iter().find(|l| l.level == level)
    }

    /// Image-level Counter controls; each gets a column in MarkersTable.
    pub fn counter_labels(&self) -> Vec<&str> {
        self.controls
            .iter()
            .filter(|c| c.control_type == ControlType::Counter)
            .map(|c| c.data_label.as_str())
            .collect()
    }

    /// Reject templates the store cannot represent.
    pub fn validate(&self) -> Result<()> {
        let mut levels: Vec<u32> = self.levels.iter().map(|l| l.level).collect();
        levels.sort_unstable();
        for (i, level) in levels.iter().enumerate() {
            if *level != i as u32 + 1 {
                return Err(SyncError::InvalidTemplate(format!(
                    "level indices must run 1..={} without gaps, found {:?}",
                    levels.len(),
                    levels
                )));
            }
        }

        let mut guids = HashSet::new();
        for row in &self.levels {
            if row.guid.trim().is_empty() || !guids.insert(row.guid.as_str()) {
                return Err(SyncError::InvalidTemplate(format!(
                    "level {} has a missing or duplicate identity",
                    row.level
                )));
            }
        }

        for level in self.level_controls.keys() {
            if self.level(*level).is_none() {
                return Err(SyncError::InvalidTemplate(format!(
                    "controls defined for undeclared level {}",
                    level
                )));
            }
        }

        validate_controls(&self.controls, true)?;
        for controls in self.level_controls.values() {
            validate_controls(controls, false)?;
        }
        Ok(())
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let template: Template = serde_json::from_str(&text)?;
        template.validate()?;
        Ok(template)
    }

    pub fn to_json_file(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// The template seen from `depth` levels down: levels deeper than `depth`
    /// are renumbered from 1 and shallower ones dropped. Identities are kept.
    pub fn rebased(&self, depth: u32) -> Template {
        let levels = self
            .levels
            .iter()
            .filter(|l| l.level > depth)
            .map(|l| LevelRow::with_guid(l.level - depth, l.guid.clone(), l.alias.clone()))
            .collect();
        let level_controls = self
            .level_controls
            .iter()
            .filter(|(level, _)| **level > depth)
            .map(|(level, controls)| (level - depth, controls.clone()))
            .collect();
        Template {
            controls: self.controls.clone(),
            levels,
            level_controls,
        }
    }
}

pub fn validate_data_label(label: &str) -> Result<()> {
    match DATA_LABEL_RE.as_ref() {
        Some(re) if re.is_match(label) => Ok(()),
        _ => Err(SyncError::InvalidDataLabel(label.to_string())),
    }
}

fn validate_controls(controls: &[FieldControl], image_level: bool) -> Result<()> {
    let mut seen = HashSet::new();
    for control in controls {
        validate_data_label(&control.data_label)?;
        let reserved: &[&str] = if image_level { &FIXED_DATA_COLUMNS } else { &FIXED_FOLDER_COLUMNS };
        if reserved.iter().any(|c| c.eq_ignore_ascii_case(&control.data_label)) {
            return Err(SyncError::InvalidDataLabel(format!(
                "{} is a reserved column name",
                control.data_label
            )));
        }
        if !seen.insert(control.data_label.to_ascii_lowercase()) {
            return Err(SyncError::InvalidTemplate(format!(
                "duplicate data label '{}'",
                control.data_label
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Template {
        let mut level_controls = BTreeMap::new();
        level_controls.insert(1, vec![FieldControl::new("Habitat", ControlType::Note)]);
        Template {
            controls: vec![
                FieldControl::new("Species", ControlType::FixedChoice)
                    .with_choices(ChoiceList::new(["deer", "fox"], true)),
                FieldControl::new("Count", ControlType::Counter),
            ],
            levels: vec![LevelRow::new(1, "Site"), LevelRow::new(2, "Camera")],
            level_controls,
        }
    }

    #[test]
    fn test_control_type_names_round_trip() {
        for t in ControlType::ALL {
            assert_eq!(t.as_str().parse::<ControlType>().unwrap(), t);
        }
        assert!("Bogus".parse::<ControlType>().is_err());
        assert_eq!(ControlType::DateTime.as_str(), "DateTime_");
    }

    #[test]
    fn test_valid_template_passes() {
        sample().validate().unwrap();
    }

    #[test]
    fn test_level_gap_rejected() {
        let mut t = sample();
        t.levels[1].level = 3;
        assert!(matches!(t.validate(), Err(SyncError::InvalidTemplate(_))));
    }

    #[test]
    fn test_reserved_and_malformed_labels_rejected() {
        let mut t = sample();
        t.controls.push(FieldControl::new("File", ControlType::Note));
        assert!(matches!(t.validate(), Err(SyncError::InvalidDataLabel(_))));

        let mut t = sample();
        t.controls.push(FieldControl::new("bad label", ControlType::Note));
        assert!(matches!(t.validate(), Err(SyncError::InvalidDataLabel(_))));
    }

    #[test]
    fn test_level_controls_cannot_shadow_folder_columns() {
        for label in ["Id", "FolderDataPath", "folderdatapath"] {
            let mut t = sample();
            t.level_controls.get_mut(&1).unwrap().push(FieldControl::new(label, ControlType::Note));
            assert!(matches!(t.validate(), Err(SyncError::InvalidDataLabel(_))), "{}", label);
        }

        // File-level names are free at folder levels
        let mut t = sample();
        t.level_controls.get_mut(&1).unwrap().push(FieldControl::new("File", ControlType::Note));
        assert!(t.validate().is_ok());
    }

    #[test]
    fn test_choice_list_empty_value() {
        let list = ChoiceList::new(["a", "b"], true);
        assert_eq!(list.all_values(), vec!["a".to_string(), "b".to_string(), String::new()]);
        let parsed = ChoiceList::from_json(&list.to_json().unwrap()).unwrap();
        assert_eq!(parsed, list);
        assert_eq!(ChoiceList::from_json("").unwrap(), ChoiceList::default());
    }

    #[test]
    fn test_rebased_drops_and_renumbers_levels() {
        let t = sample();
        let rebased = t.rebased(1);
        assert_eq!(rebased.levels.len(), 1);
        assert_eq!(rebased.levels[0].level, 1);
        assert_eq!(rebased.levels[0].alias, "Camera");
        assert_eq!(rebased.levels[0].guid, t.levels[1].guid);
        assert!(rebased.level_controls.is_empty());
        assert_eq!(rebased.controls, t.controls);
    }

    #[test]
    fn test_attribute_differences() {
        let a = FieldControl::new("Note1", ControlType::Note);
        let mut b = a.clone();
        b.label = "Other".into();
        b.visible = false;
        assert_eq!(a.attribute_differences(&b), vec!["Label", "Visible"]);
    }
}
