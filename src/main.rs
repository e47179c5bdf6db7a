mod cli;

use std::{
    collections::BTreeMap,
    io::{self, BufRead, IsTerminal, Write},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use serde_json::json;
use tokio::sync::mpsc;

use cli::{Args, Command};
use ddt_lib::{
    init_logging, BatchMode, ChannelProgress, NoProgress, Pipeline, PointCatalog, ProgressEvent, ProgressSink,
    ReferenceLimit, SessionContext, Settings, SettingsStore, TimeRange, TimezoneOffset, TimezonePrompt,
};

/// Asks on the terminal when no offset was given on the command line.
struct CliPrompt {
    fixed: Option<TimezoneOffset>,
}

impl TimezonePrompt for CliPrompt {
    fn request_offset(&self) -> Option<TimezoneOffset> {
        if self.fixed.is_some() || !io::stdin().is_terminal() {
            return self.fixed;
        }
        let stdin = io::stdin();
        for _ in 0..3 {
            eprint!("The dataset has no timezone offset. Enter one (e.g. +8, -05:30), empty to cancel: ");
            // An unflushed prompt still accepts input.
            io::stderr().flush().ok();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                return None;
            }
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            match line.parse() {
                Ok(offset) => return Some(offset),
                Err(err) => eprintln!("{err}"),
            }
        }
        None
    }
}

fn load_settings(args: &Args) -> Result<Arc<Settings>> {
    match &args.config {
        Some(path) => Ok(SettingsStore::new(path.clone())?.settings()),
        None => Ok(Arc::new(Settings::default())),
    }
}

fn load_points(args: &Args) -> Result<Arc<PointCatalog>> {
    match &args.points {
        Some(path) => Ok(Arc::new(PointCatalog::load(path)?)),
        None => Ok(Arc::new(PointCatalog::builtin())),
    }
}

fn progress_sink(quiet: bool) -> Arc<dyn ProgressSink> {
    if quiet {
        return Arc::new(NoProgress);
    }
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            eprintln!("[{}] {:>5.1}% {}", event.stage, event.percent, event.status);
        }
    });
    Arc::new(ChannelProgress::new(tx))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Opens an existing run and installs its merged dataset with a resolved timezone.
async fn open_run(
    run_dir: PathBuf,
    settings: Arc<Settings>,
    points: Arc<PointCatalog>,
    progress: Arc<dyn ProgressSink>,
    prompt: &CliPrompt,
) -> Result<Pipeline> {
    let session = SessionContext::open(&run_dir, settings, progress)
        .with_context(|| format!("Failed to open run directory {}", run_dir.display()))?;
    let pipeline = Pipeline::new(Arc::new(session), points);
    if pipeline.resume().await?.is_none() {
        bail!("no merged dataset in {}; run `ddt ingest` first", run_dir.display());
    }
    pipeline.ensure_timezone(prompt).await?;
    Ok(pipeline)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let settings = load_settings(&args)?;
    let points = load_points(&args)?;
    let progress = progress_sink(args.quiet);
    let prompt = CliPrompt {
        fixed: args
            .tz_offset
            .as_deref()
            .map(str::parse::<TimezoneOffset>)
            .transpose()
            .map_err(|err: String| anyhow!(err))?,
    };

    match args.command {
        Command::Ingest { archives, run_dir } => {
            let session = match run_dir {
                Some(dir) => SessionContext::open(dir, settings, progress)?,
                None => SessionContext::create(settings, progress)?,
            };
            let session = Arc::new(session);
            let pipeline = Pipeline::new(Arc::clone(&session), points);

            let ingest = pipeline.ingest(archives);
            tokio::pin!(ingest);
            let dataset = tokio::select! {
                result = &mut ingest => result?,
                _ = tokio::signal::ctrl_c() => {
                    session.cancel();
                    ingest.await?
                }
            };
            log::info!("Dataset ready at {}", dataset.path().display());

            pipeline.ensure_timezone(&prompt).await?;
            print_json(&pipeline.summary().await?)?;
        }
        Command::Points {
            run_dir,
            ids,
            from,
            to,
            all_or_nothing,
            export,
        } => {
            let pipeline = open_run(run_dir, settings, points, progress, &prompt).await?;
            let mode = if all_or_nothing {
                BatchMode::AllOrNothing
            } else {
                BatchMode::Partial
            };
            let outcome = pipeline
                .point_engine()?
                .query(&ids, TimeRange { start: from, end: to }, mode)
                .await?;
            let exported = if export {
                Some(pipeline.export_series(outcome.series.values())?)
            } else {
                None
            };
            print_json(&json!({
                "series": outcome.series,
                "inactive": outcome.inactive,
                "failures": outcome.failures.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
                "exportedTo": exported,
            }))?;
        }
        Command::Presets {
            run_dir,
            ids,
            from,
            to,
            limits,
        } => {
            let pipeline = open_run(run_dir, settings, points, progress, &prompt).await?;
            let limits: BTreeMap<_, _> = limits
                .into_iter()
                .map(|(name, raw)| (name, ReferenceLimit::new(raw)))
                .collect();
            let outcome = pipeline
                .point_engine()?
                .query_presets(&ids, TimeRange { start: from, end: to }, BatchMode::Partial, &limits)
                .await?;
            print_json(&json!({
                "presets": outcome.presets,
                "skipped": outcome.skipped,
                "failures": outcome.failures.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
            }))?;
        }
        Command::Incidents { run_dir, filter } => {
            let pipeline = open_run(run_dir, settings, points, progress, &prompt).await?;
            let log = pipeline.incident_log().await?;
            match filter {
                Some(query) => print_json(&log.filter(&query))?,
                None => print_json(&log)?,
            }
        }
        Command::FindNext {
            run_dir,
            query,
            cursor,
        } => {
            let pipeline = open_run(run_dir, settings, points, progress, &prompt).await?;
            let log = pipeline.incident_log().await?;
            match log.find_next(&query, cursor) {
                Some((position, incident)) => {
                    print_json(&json!({ "position": position, "incident": incident }))?
                }
                None => bail!("no incident matches '{query}'"),
            }
        }
        Command::Summary { run_dir } => {
            let pipeline = open_run(run_dir, settings, points, progress, &prompt).await?;
            print_json(&pipeline.summary().await?)?;
        }
        Command::Catalog => {
            print_json(&json!({
                "points": points.points().collect::<Vec<_>>(),
                "presets": points.presets().collect::<Vec<_>>(),
            }))?;
        }
        Command::Clear { run_dir } => {
            let session = SessionContext::open(&run_dir, settings, progress)?;
            session.clear_outputs()?;
            eprintln!("Cleared {}", run_dir.display());
        }
    }

    Ok(())
}
