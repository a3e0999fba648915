// Camtrap Sync Constants
// Table and column names are part of the on-disk store format. Do not rename.

// Paths
pub const PATH_DB_SEPARATOR: char = '/';
pub const LOCK_FILE_SUFFIX: &str = "lock";
pub const CONFIG_FOLDER: &str = "camtrap";
pub const CONFIG_FILENAME: &str = "config.json";

// Tables
pub const IMAGE_SET_TABLE: &str = "ImageSetTable";
pub const TEMPLATE_TABLE: &str = "TemplateTable";
pub const FOLDER_DATA_INFO_TABLE: &str = "FolderDataInfo";
pub const FOLDER_DATA_TEMPLATE_TABLE: &str = "FolderDataTemplateTable";
pub const DATA_TABLE: &str = "DataTable";
pub const MARKERS_TABLE: &str = "MarkersTable";
pub const DETECTIONS_TABLE: &str = "Detections";
pub const DETECTIONS_VIDEO_TABLE: &str = "DetectionsVideo";
pub const DETECTION_CATEGORIES_TABLE: &str = "DetectionCategories";
pub const CLASSIFICATION_CATEGORIES_TABLE: &str = "ClassificationCategories";
pub const INFO_TABLE: &str = "Info";
pub const LEVEL_TABLE_PREFIX: &str = "Level";

// Fixed DataTable columns (every store has them regardless of template)
pub const ID: &str = "Id";
pub const FILE: &str = "File";
pub const RELATIVE_PATH: &str = "RelativePath";
pub const DATE_TIME: &str = "DateTime";
pub const DELETE_FLAG: &str = "DeleteFlag";
pub const FIXED_DATA_COLUMNS: [&str; 5] = [ID, FILE, RELATIVE_PATH, DATE_TIME, DELETE_FLAG];

// Level tables
pub const FOLDER_DATA_PATH: &str = "FolderDataPath";
pub const FIXED_FOLDER_COLUMNS: [&str; 2] = [ID, FOLDER_DATA_PATH];

// Detections
pub const DETECTION_ID: &str = "detectionID";
/// Category 0 is reserved and never renumbered during a merge.
pub const RESERVED_CATEGORY: u32 = 0;

// Date/time storage
/// Fractional seconds are written only when non-zero.
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
/// Adjustments smaller than this are not written back.
pub const MIN_TIME_ADJUSTMENT_MS: i64 = 1_000;

// Detector thresholds used when a store has none recorded
pub const DEFAULT_TYPICAL_DETECTION_THRESHOLD: f64 = 0.2;
pub const DEFAULT_CONSERVATIVE_DETECTION_THRESHOLD: f64 = 0.05;
pub const DEFAULT_TYPICAL_CLASSIFICATION_THRESHOLD: f64 = 0.5;
/// Undefined bounding-box display threshold; the viewer falls back to its own default.
pub const UNDEFINED_BOUNDING_BOX_THRESHOLD: f64 = -1.0;
pub const UNKNOWN_DETECTOR_VERSION: &str = "vUnknown";

// Versioning
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");
/// Oldest tool version whose stores this build will merge in.
pub const BACKWARDS_COMPATIBLE_VERSION: &str = "0.1.0";

// Indexes
pub const INDEX_FILE: &str = "IndexFile";
pub const INDEX_RELATIVE_PATH: &str = "IndexRelativePath";
pub const INDEX_RELATIVE_PATH_DATE_TIME_FILE: &str = "IndexRelativePathDateTimeFile";
pub const INDEX_RELATIVE_PATH_FILE: &str = "IndexRelativePathFile";
pub const INDEX_DETECTION_ID: &str = "IndexDetectionID";
pub const INDEX_DETECTIONS_CLASSIFICATION_CONFIDENCE: &str = "IndexDetectionsClassificationConfidence";
pub const INDEX_DETECTION_VIDEO_ID: &str = "IndexDetectionVideoID";
pub const INDEX_EPISODE_PREFIX: &str = "IndexEpisode";

// Long scans
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 250;
pub const DEFAULT_COMPACTION_KEY_THRESHOLD: i64 = 1_000_000_000_000;
