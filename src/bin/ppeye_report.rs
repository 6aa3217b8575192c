//! ppeye_report - summarize the violation log
//!
//! Prints the count for each policy label, the label distribution, the daily
//! trend and optionally the most recent rows. Exits with status 2 when the
//! log has no data yet.

use anyhow::Result;
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use ppeye::analytics::{recent_events, summarize};
use ppeye::storage::open_store;
use ppeye::{MonitorConfig, MonitorError, StoreBackend};

#[path = "../ui.rs"]
mod ui;

const BAR_WIDTH: usize = 24;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file; supplies the store location and policy labels.
    #[arg(long, env = "PPEYE_CONFIG")]
    config: Option<PathBuf>,
    /// Violation log to read, overriding configuration.
    #[arg(long)]
    store: Option<PathBuf>,
    /// Store backend (csv|sqlite), overriding configuration.
    #[arg(long)]
    backend: Option<StoreBackend>,
    /// Also print the last N rows of the log.
    #[arg(long, value_name = "N")]
    tail: Option<usize>,
    /// Emit the summary as JSON on stdout.
    #[arg(long)]
    json: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let ui = ui::Ui::new(
        ui::UiMode::parse(&args.ui),
        std::io::stderr().is_terminal(),
        std::io::stdout().is_terminal(),
    );

    let mut cfg = MonitorConfig::load_from(args.config.as_deref())?;
    if let Some(path) = args.store {
        cfg.store.path = path;
    }
    if let Some(backend) = args.backend {
        cfg.store.backend = backend;
    }
    let mut store = open_store(&cfg.store);

    let summary = {
        let _step = ui.step("Read violation log");
        summarize(store.as_mut())
    };
    let summary = match summary {
        Ok(summary) => summary,
        Err(MonitorError::NoData { store }) => {
            println!("no data yet: {store} has no violations recorded");
            return Ok(ExitCode::from(2));
        }
        Err(err) => return Err(err.into()),
    };
    let recent = match args.tail {
        Some(limit) => recent_events(store.as_mut(), Some(limit))?,
        None => Vec::new(),
    };

    if args.json {
        let payload = serde_json::json!({
            "known_counts": summary.known_counts(&cfg.policy),
            "summary": summary,
            "recent": recent,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("Violations: {} ({} to {})", summary.total, summary.first_seen, summary.last_seen);
    for known in summary.known_counts(&cfg.policy) {
        println!("  {:<16} {}", known.label, known.count);
    }

    println!();
    println!("Distribution");
    for (label, count) in &summary.by_label {
        let share = summary.share(label);
        println!(
            "  {:<16} {} {:>5.1}% ({})",
            label,
            ui.bar(share, BAR_WIDTH),
            share * 100.0,
            count
        );
    }

    println!();
    println!("Daily trend");
    for day in &summary.daily {
        println!("  {}  {:<16} {}", day.date, day.label, day.count);
    }

    if !recent.is_empty() {
        println!();
        println!("Last {} rows", recent.len());
        for ev in &recent {
            println!("  {}  {}", ev.formatted_timestamp(), ev.label);
        }
    }

    if summary.skipped_rows > 0 {
        eprintln!("warning: {} malformed rows skipped", summary.skipped_rows);
    }
    Ok(ExitCode::SUCCESS)
}
