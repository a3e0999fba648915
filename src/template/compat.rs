// Field type conversion rules
//
// A conversion is allowed only when every value the existing type can hold is
// also a legal value of the proposed type. The table is directional: flag->note
// is fine, note->flag is not.

use super::ControlType;
use ControlType::*;

/// Allowed proposed types for each existing type (identity is always allowed).
fn allowed_targets(from: ControlType) -> &'static [ControlType] {
    match from {
        Flag => &[Note, MultiLine, AlphaNumeric],
        AlphaNumeric => &[Note, MultiLine],
        Note => &[MultiLine],
        MultiLine => &[Note],
        FixedChoice => &[Note, MultiLine, MultiChoice],
        MultiChoice => &[Note, MultiLine],
        Counter => &[IntegerPositive, IntegerAny, DecimalPositive, DecimalAny, Note, MultiLine, AlphaNumeric],
        IntegerPositive => &[IntegerAny, DecimalPositive, DecimalAny, Counter, Note, MultiLine, AlphaNumeric],
        IntegerAny => &[DecimalAny, Note, MultiLine, AlphaNumeric],
        DecimalPositive => &[DecimalAny, Note, MultiLine, AlphaNumeric],
        DecimalAny => &[Note, MultiLine, AlphaNumeric],
        DateTime | DateTimeCustom | Date | Time => &[Note, MultiLine],
    }
}

/// Can data stored as `from` be reinterpreted as `to` without loss?
pub fn is_compatible(from: ControlType, to: ControlType) -> bool {
    from == to || allowed_targets(from).contains(&to)
}

/// Explain why `from`→`to` is refused. Returns None for allowed conversions.
///
/// The first matching reason wins; the order runs from the most specific
/// restriction to the generic fallback.
pub fn explain_incompatibility(data_label: &str, from: ControlType, to: ControlType) -> Option<String> {
    if is_compatible(from, to) {
        return None;
    }

    let header = format!(
        "Your template wants to redefine your '{}' data from {}\u{21D2}{}.",
        data_label, from, to
    );

    let reason = if to == AlphaNumeric && from != Flag && !from.is_number() {
        format!(
            "{} only allows <A:z, 0-9, -, _>, while your existing {} data can contain other characters.",
            to, from
        )
    } else if to.is_number() && !from.is_number() {
        format!(
            "{} only allows numbers, while your existing {} data can contain non-numbers.",
            to, from
        )
    } else if to.is_positive_number() && from.is_number() && !from.is_positive_number() {
        format!(
            "{} only allows positive numbers, while your existing {} data can contain negative numbers.",
            to, from
        )
    } else if to.is_choice() && !from.is_choice() {
        format!(
            "{} only allows text that matches menu selections, while your existing {} data can contain arbitrary text.",
            to, from
        )
    } else if from == MultiChoice && matches!(to, FixedChoice | IntegerPositive | Counter) {
        format!(
            "{} allows only a single selection, while your existing {} data can comprise multiple selections.",
            to, from
        )
    } else if to.is_date_time() && !from.is_date_time() {
        format!(
            "{} only allows date-related data, while your existing {} data can contain non-date text.",
            to, from
        )
    } else if to.is_date_time() && from.is_date_time() {
        format!(
            "{} formats date-related data differently than your existing {} data.",
            to, from
        )
    } else if to == Flag {
        format!(
            "{} only allows true/false values, while your existing {} data can contain other values.",
            to, from
        )
    } else {
        format!(
            "{} only allows values that match its type, which your existing {} data may not satisfy.",
            to, from
        )
    };

    Some(format!("{} {}", header, reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_always_allowed() {
        for t in ControlType::ALL {
            assert!(is_compatible(t, t), "{} -> {}", t, t);
            assert!(explain_incompatibility("X", t, t).is_none());
        }
    }

    #[test]
    fn test_matrix_is_directional() {
        assert!(is_compatible(Flag, Note));
        assert!(!is_compatible(Note, Flag));
        assert!(is_compatible(FixedChoice, MultiChoice));
        assert!(!is_compatible(MultiChoice, FixedChoice));
        assert!(is_compatible(IntegerPositive, IntegerAny));
        assert!(!is_compatible(IntegerAny, IntegerPositive));
    }

    #[test]
    fn test_everything_but_free_text_widens_to_note() {
        for t in ControlType::ALL {
            assert!(is_compatible(t, Note), "{} -> Note", t);
            assert!(is_compatible(t, MultiLine), "{} -> MultiLine", t);
        }
    }

    #[test]
    fn test_nothing_converts_into_dates_or_flags() {
        for t in ControlType::ALL {
            for target in [DateTime, DateTimeCustom, Date, Time, Flag] {
                if t != target {
                    assert!(!is_compatible(t, target), "{} -> {}", t, target);
                }
            }
        }
    }

    #[test]
    fn test_messages_follow_reason_order() {
        let msg = explain_incompatibility("Comment", Note, AlphaNumeric).unwrap();
        assert!(msg.starts_with("Your template wants to redefine your 'Comment' data from Note"));
        assert!(msg.contains("only allows <A:z, 0-9, -, _>"));

        let msg = explain_incompatibility("Count", Note, IntegerAny).unwrap();
        assert!(msg.contains("only allows numbers"));

        let msg = explain_incompatibility("Temp", DecimalAny, DecimalPositive).unwrap();
        assert!(msg.contains("only allows positive numbers"));

        let msg = explain_incompatibility("Species", Note, FixedChoice).unwrap();
        assert!(msg.contains("matches menu selections"));

        let msg = explain_incompatibility("Species", MultiChoice, FixedChoice).unwrap();
        assert!(msg.contains("allows only a single selection"));

        let msg = explain_incompatibility("When", Note, Date).unwrap();
        assert!(msg.contains("only allows date-related data"));

        let msg = explain_incompatibility("When", Date, Time).unwrap();
        assert!(msg.contains("formats date-related data differently"));

        let msg = explain_incompatibility("Seen", Note, Flag).unwrap();
        assert!(msg.contains("true/false"));

        let msg = explain_incompatibility("Temp", DecimalAny, IntegerAny).unwrap();
        assert!(msg.contains("only allows values that match its type"), "{}", msg);
    }

    #[test]
    fn test_numbers_widen_to_alphanumeric() {
        for t in [Counter, IntegerPositive, IntegerAny, DecimalPositive, DecimalAny] {
            assert!(is_compatible(t, AlphaNumeric), "{} -> AlphaNumeric", t);
            assert!(explain_incompatibility("Code", t, AlphaNumeric).is_none());
        }
        assert!(!is_compatible(AlphaNumeric, DecimalAny));
    }
}
