// Detector info merge

use std::cmp::Ordering;

use crate::constants::{
    DEFAULT_CONSERVATIVE_DETECTION_THRESHOLD, DEFAULT_TYPICAL_CLASSIFICATION_THRESHOLD,
    DEFAULT_TYPICAL_DETECTION_THRESHOLD, UNKNOWN_DETECTOR_VERSION,
};
use crate::db::schema::DetectorInfo;

/// Numeric parts of a detector version ("v5a.0.1" -> [5, 0, 1]). None when unknown.
fn version_parts(version: &str) -> Option<Vec<u64>> {
    let v = version.trim();
    if v.is_empty() || v.eq_ignore_ascii_case(UNKNOWN_DETECTOR_VERSION) {
        return None;
    }
    let parts: Vec<u64> = v
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts)
    }
}

/// Compare detector versions; unknown sorts below every known version.
pub fn compare_detector_versions(a: &str, b: &str) -> Ordering {
    match (version_parts(a), version_parts(b)) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.cmp(&b),
    }
}

fn pick(preferred: &str, fallback: &str) -> String {
    if preferred.trim().is_empty() || preferred == UNKNOWN_DETECTOR_VERSION {
        fallback.to_string()
    } else {
        preferred.to_string()
    }
}

fn with_defaults(mut info: DetectorInfo) -> DetectorInfo {
    info.typical_detection_threshold.get_or_insert(DEFAULT_TYPICAL_DETECTION_THRESHOLD);
    info.conservative_detection_threshold.get_or_insert(DEFAULT_CONSERVATIVE_DETECTION_THRESHOLD);
    info.typical_classification_threshold.get_or_insert(DEFAULT_TYPICAL_CLASSIFICATION_THRESHOLD);
    info
}

/// Merge two detector records. The newer detector wins (ties favour the source);
/// blanks on the winning side are filled from the other side.
pub fn merge_info(dest: Option<&DetectorInfo>, source: Option<&DetectorInfo>) -> Option<DetectorInfo> {
    let (newer, older) = match (dest, source) {
        (None, None) => return None,
        (Some(d), None) => return Some(with_defaults(d.clone())),
        (None, Some(s)) => return Some(with_defaults(s.clone())),
        (Some(d), Some(s)) => {
            if compare_detector_versions(&s.detector_version, &d.detector_version) != Ordering::Less {
                (s, d)
            } else {
                (d, s)
            }
        }
    };

    Some(with_defaults(DetectorInfo {
        detector: pick(&newer.detector, &older.detector),
        detector_version: pick(&newer.detector_version, &older.detector_version),
        detection_completion_time: pick(&newer.detection_completion_time, &older.detection_completion_time),
        classifier: pick(&newer.classifier, &older.classifier),
        classification_completion_time: pick(
            &newer.classification_completion_time,
            &older.classification_completion_time,
        ),
        typical_detection_threshold: newer.typical_detection_threshold.or(older.typical_detection_threshold),
        conservative_detection_threshold: newer
            .conservative_detection_threshold
            .or(older.conservative_detection_threshold),
        typical_classification_threshold: newer
            .typical_classification_threshold
            .or(older.typical_classification_threshold),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(detector: &str, version: &str) -> DetectorInfo {
        DetectorInfo {
            detector: detector.to_string(),
            detector_version: version.to_string(),
            detection_completion_time: String::new(),
            classifier: String::new(),
            classification_completion_time: String::new(),
            typical_detection_threshold: None,
            conservative_detection_threshold: None,
            typical_classification_threshold: None,
        }
    }

    #[test]
    fn test_version_ordering() {
        assert_eq!(compare_detector_versions("v5a.0.0", "v4.1.0"), Ordering::Greater);
        assert_eq!(compare_detector_versions("5.0", "5.0"), Ordering::Equal);
        assert_eq!(compare_detector_versions("vUnknown", "v1.0"), Ordering::Less);
        assert_eq!(compare_detector_versions("", "vUnknown"), Ordering::Equal);
    }

    #[test]
    fn test_newer_source_wins() {
        let dest = info("md4.json", "v4.1.0");
        let source = info("md5.json", "v5a.0.0");
        let merged = merge_info(Some(&dest), Some(&source)).unwrap();
        assert_eq!(merged.detector, "md5.json");
        assert_eq!(merged.detector_version, "v5a.0.0");
    }

    #[test]
    fn test_unknown_never_overrides_known() {
        let mut dest = info("md5.json", "v5a.0.0");
        dest.classifier = "species-v2".to_string();
        let source = info("other.json", UNKNOWN_DETECTOR_VERSION);
        let merged = merge_info(Some(&dest), Some(&source)).unwrap();
        assert_eq!(merged.detector, "md5.json");
        assert_eq!(merged.classifier, "species-v2");
    }

    #[test]
    fn test_thresholds_fall_back_to_defaults() {
        let merged = merge_info(None, Some(&info("md5.json", "v5"))).unwrap();
        assert_eq!(merged.typical_detection_threshold, Some(DEFAULT_TYPICAL_DETECTION_THRESHOLD));
        assert_eq!(merged.conservative_detection_threshold, Some(DEFAULT_CONSERVATIVE_DETECTION_THRESHOLD));
        assert_eq!(merged.typical_classification_threshold, Some(DEFAULT_TYPICAL_CLASSIFICATION_THRESHOLD));
        assert!(merge_info(None, None).is_none());
    }
}
