// Camtrap Sync - library entry point
//
// Template diffing, merge, checkout, compaction and bulk edits for
// camera-trap image stores (one SQLite file per image set).

pub mod compact;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod jobs;
pub mod lock;
pub mod merge;
pub mod query;
pub mod recognition;
pub mod remap;
pub mod template;
pub mod timeadjust;

pub use compact::{compact_and_reclaim, needs_compaction, CompactReport};
pub use config::SyncConfig;
pub use db::Store;
pub use error::{Result, SyncError};
pub use merge::checkout::{checkout, CheckoutReport};
pub use merge::remove::{remove_subtree, RemoveReport};
pub use merge::{check_in, check_merge_compatible, merge, CompatibilityCode, MergeOutcome, MergeReport};
pub use recognition::counts::{populate_detection_counts, CountOptions, CountReport};
pub use template::diff::{diff_templates, DiffResult, SyncDecision};
pub use template::sync::{apply_template_sync, SyncReport};
pub use template::Template;
pub use timeadjust::{adjust_file_times, swap_day_and_month, FileTime, SwapReport, TimeAdjustReport};
