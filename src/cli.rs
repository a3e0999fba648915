// Camtrap Sync CLI binary

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use camtrap_sync::db::schema;
use camtrap_sync::jobs::progress::LogSink;
use camtrap_sync::jobs::CancelRegistration;
use camtrap_sync::query::path_depth;
use camtrap_sync::{
    adjust_file_times, apply_template_sync, check_in, check_merge_compatible, checkout, compact_and_reclaim,
    diff_templates, merge, populate_detection_counts, remove_subtree, swap_day_and_month, CountOptions,
    MergeOutcome, Store, SyncConfig, Template,
};

#[derive(Parser)]
#[command(name = "camtrap")]
#[command(about = "Camtrap Sync - template sync, merge and checkout for camera-trap image stores", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty store from a template file
    Create {
        /// New store path
        store: PathBuf,
        /// Template JSON
        #[arg(short, long)]
        template: PathBuf,
    },

    /// Compare a template (JSON file or store) against a store's template
    Diff {
        /// Proposed template: a .json file or another store
        proposed: PathBuf,
        /// Store holding the data
        store: PathBuf,
    },

    /// Bring a store's template in line with a template file
    SyncTemplate {
        store: PathBuf,
        /// Template JSON
        template: PathBuf,
        /// Accept loss of folder-level data when levels are deleted or moved
        #[arg(long)]
        confirm: bool,
    },

    /// Check whether a source store can be merged into a destination
    Check {
        destination: PathBuf,
        source: PathBuf,
        /// Destination levels above the merge point (defaults to the prefix depth)
        #[arg(long)]
        levels_to_ignore: Option<u32>,
        /// Folder the source will be placed under
        #[arg(short, long, default_value = "")]
        prefix: String,
    },

    /// Merge a source store into a destination under a folder prefix
    Merge {
        destination: PathBuf,
        source: PathBuf,
        #[arg(short, long, default_value = "")]
        prefix: String,
        #[arg(long)]
        levels_to_ignore: Option<u32>,
    },

    /// Replace a checked-out folder in the destination with the source store
    CheckIn {
        destination: PathBuf,
        source: PathBuf,
        #[arg(short, long)]
        prefix: String,
        #[arg(long)]
        levels_to_ignore: Option<u32>,
    },

    /// Copy one folder subtree into a new store
    Checkout {
        source: PathBuf,
        /// New store path
        destination: PathBuf,
        /// Folder to check out, relative to the store root
        relative_path: String,
    },

    /// Delete every record under a folder
    Remove {
        store: PathBuf,
        relative_path: String,
    },

    /// Renumber keys densely and reclaim space
    Compact { store: PathBuf },

    /// Shift date/times by a fixed number of seconds
    AdjustTime {
        store: PathBuf,
        #[arg(long, allow_hyphen_values = true)]
        seconds: i64,
        /// Limit to a folder subtree
        #[arg(long, default_value = "")]
        path: String,
    },

    /// Swap day and month where the result is a valid date
    SwapDayMonth {
        store: PathBuf,
        #[arg(long, default_value = "")]
        path: String,
    },

    /// Write per-record detection counts into a Counter field
    PopulateCounts {
        store: PathBuf,
        /// Counter field to fill
        #[arg(short, long)]
        field: String,
        #[arg(long, default_value = "0.2")]
        min_confidence: f64,
        /// Only count this detection category
        #[arg(long)]
        category: Option<i64>,
        #[arg(long, default_value = "")]
        path: String,
    },

    /// Summarise a store
    Show { store: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SyncConfig::from_file(path)?,
        None => SyncConfig::load()?,
    };

    match cli.command {
        Commands::Create { store, template } => cmd_create(&store, &template),
        Commands::Diff { proposed, store } => cmd_diff(&proposed, &store),
        Commands::SyncTemplate { store, template, confirm } => cmd_sync_template(&store, &template, confirm),
        Commands::Check { destination, source, levels_to_ignore, prefix } => {
            cmd_check(&destination, &source, levels_to_ignore.unwrap_or_else(|| path_depth(&prefix)))
        }
        Commands::Merge { destination, source, prefix, levels_to_ignore } => {
            let ignore = levels_to_ignore.unwrap_or_else(|| path_depth(&prefix));
            cmd_merge(&destination, &source, &prefix, ignore, &config, false)
        }
        Commands::CheckIn { destination, source, prefix, levels_to_ignore } => {
            let ignore = levels_to_ignore.unwrap_or_else(|| path_depth(&prefix));
            cmd_merge(&destination, &source, &prefix, ignore, &config, true)
        }
        Commands::Checkout { source, destination, relative_path } => {
            cmd_checkout(&source, &destination, &relative_path, &config)
        }
        Commands::Remove { store, relative_path } => {
            let store = open(&store)?;
            print_json(&remove_subtree(&store, &relative_path)?)
        }
        Commands::Compact { store } => {
            let store = open(&store)?;
            print_json(&compact_and_reclaim(&store)?)
        }
        Commands::AdjustTime { store, seconds, path } => cmd_adjust_time(&store, seconds, &path, &config),
        Commands::SwapDayMonth { store, path } => {
            let store = open(&store)?;
            print_json(&swap_day_and_month(&store, &path)?)
        }
        Commands::PopulateCounts { store, field, min_confidence, category, path } => {
            let options = CountOptions {
                category,
                relative_path: path,
                ..CountOptions::new(field, min_confidence)
            };
            cmd_populate_counts(&store, &options, &config)
        }
        Commands::Show { store } => cmd_show(&store),
    }
}

fn open(path: &Path) -> Result<Store> {
    Store::open(path).with_context(|| format!("Failed to open store {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// A template from a JSON file, or the template of another store.
fn load_template(path: &Path) -> Result<Template> {
    let is_json = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        return Template::from_json_file(path)
            .with_context(|| format!("Failed to read template {}", path.display()));
    }
    Ok(open(path)?.template()?)
}

fn cmd_create(path: &Path, template: &Path) -> Result<()> {
    let template = load_template(template)?;
    Store::create(path, &template)?;
    println!("Created store {}", path.display());
    Ok(())
}

fn cmd_diff(proposed: &Path, store: &Path) -> Result<()> {
    let proposed = load_template(proposed)?;
    let existing = open(store)?.template()?;
    let diff = diff_templates(&proposed, &existing);

    println!("Decision: {:?}", diff.decision());
    for issue in diff.issues() {
        let marker = if issue.is_blocking() { "!" } else { "-" };
        println!("  {} {:?}", marker, issue);
    }
    for warning in &diff.warnings {
        println!("  warning: {}", warning);
    }
    print_json(&diff)
}

fn cmd_sync_template(store: &Path, template: &Path, confirm: bool) -> Result<()> {
    let store = open(store)?;
    let proposed = load_template(template)?;
    let report = apply_template_sync(&store, &proposed, confirm)?;
    print_json(&report)
}

fn cmd_check(destination: &Path, source: &Path, levels_to_ignore: u32) -> Result<()> {
    let dest = open(destination)?;
    let source = open(source)?;
    let code = check_merge_compatible(&source, &dest, levels_to_ignore)?;
    if code.is_ok() {
        println!("Compatible");
    } else {
        println!("Not compatible: {:?}", code);
    }
    Ok(())
}

fn cmd_merge(
    destination: &Path,
    source: &Path,
    prefix: &str,
    levels_to_ignore: u32,
    config: &SyncConfig,
    replace: bool,
) -> Result<()> {
    let dest = open(destination)?;
    let source = open(source)?;
    let outcome = if replace {
        check_in(&dest, &source, prefix, levels_to_ignore, config)?
    } else {
        merge(&dest, &source, prefix, levels_to_ignore, config)?
    };
    match outcome {
        MergeOutcome::Merged(report) => print_json(&report),
        MergeOutcome::Refused(code) => anyhow::bail!("Merge refused: {:?}", code),
    }
}

fn cmd_checkout(source: &Path, destination: &Path, relative_path: &str, config: &SyncConfig) -> Result<()> {
    let source = open(source)?;
    let (_, report) = checkout(&source, destination, relative_path, config)?;
    print_json(&report)
}

fn cmd_adjust_time(store: &Path, seconds: i64, path: &str, config: &SyncConfig) -> Result<()> {
    let store = open(store)?;
    let cancel = CancelRegistration::new("adjust-time");
    let delta = chrono::Duration::seconds(seconds);
    let report = adjust_file_times(&store, path, |_| delta, config, Some(&LogSink), Some(cancel.flag()))?;
    print_json(&report)
}

fn cmd_populate_counts(store: &Path, options: &CountOptions, config: &SyncConfig) -> Result<()> {
    let store = open(store)?;
    let cancel = CancelRegistration::new(format!("populate-{}", options.counter_label));
    let report = populate_detection_counts(&store, options, config, Some(&LogSink), Some(cancel.flag()))?;
    print_json(&report)
}

fn cmd_show(path: &Path) -> Result<()> {
    let store = open(path)?;
    let conn = store.conn();
    let image_set = schema::get_image_set(conn, "main")?;
    let template = store.template()?;

    println!("Store: {}", path.display());
    println!("  Root folder:     {}", image_set.root_folder);
    println!("  Written by:      {}", image_set.version_compatibility);
    println!("  Accepts from:    {}", image_set.backwards_compatibility);
    println!("  Records:         {}", schema::count_rows(conn, "main", "DataTable")?);
    println!("  Detections:      {}", schema::count_rows(conn, "main", "Detections")?);
    println!("  Largest key:     {}", schema::max_key(conn, "main", "DataTable", "Id")?);
    println!("  Fields:");
    for control in &template.controls {
        println!("    {:<20} {}", control.data_label, control.control_type);
    }
    if !template.levels.is_empty() {
        println!("  Folder levels:");
        for row in &template.levels {
            let fields: Vec<&str> = template
                .controls_at(row.level)
                .iter()
                .map(|c| c.data_label.as_str())
                .collect();
            println!("    {}. {:<16} [{}]", row.level, row.alias, fields.join(", "));
        }
    }
    Ok(())
}
