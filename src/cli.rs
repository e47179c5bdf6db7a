use std::path::PathBuf;

use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "Shearer data-download tool", long_about = None)]
pub struct Args {
    /// Settings file (JSON); created with defaults on first update
    #[arg(long, env = "DDT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Point catalog (JSON); the built-in FB20 catalog when omitted
    #[arg(long)]
    pub points: Option<PathBuf>,

    /// Timezone offset to use when the dataset carries none (e.g. +8, -05:30)
    #[arg(long, allow_hyphen_values = true)]
    pub tz_offset: Option<String>,

    /// Suppress progress output on stderr
    #[arg(short, long)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract and merge archives into a new run directory
    Ingest {
        /// Archives in merge order; later archives win overlapping samples
        #[arg(required = true)]
        archives: Vec<PathBuf>,

        /// Reuse this run directory instead of creating a fresh one
        #[arg(long)]
        run_dir: Option<PathBuf>,
    },
    /// Time series for individual points
    Points {
        #[arg(long)]
        run_dir: PathBuf,

        #[arg(required = true)]
        ids: Vec<String>,

        /// Local start time, `YYYY-MM-DD HH:MM:SS`
        #[arg(long, value_parser = parse_local_time)]
        from: Option<NaiveDateTime>,

        /// Local end time, `YYYY-MM-DD HH:MM:SS`
        #[arg(long, value_parser = parse_local_time)]
        to: Option<NaiveDateTime>,

        /// Fail the whole request if any point fails
        #[arg(long)]
        all_or_nothing: bool,

        /// Also write one CSV per series into a new output directory
        #[arg(long)]
        export: bool,
    },
    /// Time series for preset graphs
    Presets {
        #[arg(long)]
        run_dir: PathBuf,

        #[arg(required = true)]
        ids: Vec<String>,

        #[arg(long, value_parser = parse_local_time)]
        from: Option<NaiveDateTime>,

        #[arg(long, value_parser = parse_local_time)]
        to: Option<NaiveDateTime>,

        /// Reference limit as NAME=VALUE, repeatable
        #[arg(long = "limit", value_parser = parse_limit)]
        limits: Vec<(String, String)>,
    },
    /// The resolved alarm/event log
    Incidents {
        #[arg(long)]
        run_dir: PathBuf,

        /// Only entries whose text or code contains this
        #[arg(long)]
        filter: Option<String>,
    },
    /// Next incident matching a query at or after a position, wrapping around
    FindNext {
        #[arg(long)]
        run_dir: PathBuf,

        query: String,

        #[arg(long, default_value_t = 0)]
        cursor: usize,
    },
    /// Machine, time span and contributing archives of a run
    Summary {
        #[arg(long)]
        run_dir: PathBuf,
    },
    /// List the configured points and preset graphs
    Catalog,
    /// Delete the merged dataset and extracted files of a run
    Clear {
        #[arg(long)]
        run_dir: PathBuf,
    },
}

fn parse_local_time(value: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|err| format!("invalid local time '{value}': {err}"))
}

fn parse_limit(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((name, raw)) if !name.is_empty() && !raw.is_empty() => {
            Ok((name.trim().to_string(), raw.trim().to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got '{value}'")),
    }
}
