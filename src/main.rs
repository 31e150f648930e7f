//! Chantier Planning CLI
//!
//! Drives a planning stored in a SQLite file: synchronize it from a
//! work breakdown document, inspect it, repair it or export it for print.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chantier_planning::export::{ExportOptions, Orientation, PaperSize, RangeMode};
use chantier_planning::persistence::PersistenceAdapter;
use chantier_planning::repository::{init_db, SqliteStore};
use chantier_planning::{aggregate, sync, time, tree};
use chantier_planning::{DomainError, DomainResult, PlanningConfig, PlanningSession, SessionOptions};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "chantier-planning")]
#[command(version, about, long_about = None)]
struct Cli {
    /// SQLite database holding the plannings
    #[arg(long, default_value = "planning.db")]
    db: PathBuf,

    /// Planning configuration (JSON); defaults apply when missing
    #[arg(long, default_value = "planning.json")]
    config: PathBuf,

    /// Directory of the rolling log files
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Pin "today" (YYYY-MM-DD) for default spans
    #[arg(long)]
    today: Option<NaiveDate>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Rebuild a project's lots and tasks from a work breakdown document
    Sync {
        project: String,
        /// JSON document with the lots
        feed: PathBuf,
        /// Only build the planning when nothing is saved yet
        #[arg(long)]
        keep_saved: bool,
    },

    /// Print the visible rows of a project
    Show {
        project: String,
        /// Dump the raw state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Repair references, or rebuild the hierarchy with --structural
    Repair {
        project: String,
        #[arg(long)]
        structural: bool,
    },

    /// Print-ready document as JSON
    Export {
        project: String,
        #[arg(long, value_enum, default_value_t = PaperArg::A4)]
        paper: PaperArg,
        #[arg(long)]
        portrait: bool,
        /// First printed day (needs --to)
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,
        /// Last printed day (needs --from)
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,
    },

    /// List saved projects
    #[command(alias = "ls")]
    List,

    /// Delete a saved project
    Delete { project: String },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PaperArg {
    A4,
    A3,
    A2,
}

impl From<PaperArg> for PaperSize {
    fn from(arg: PaperArg) -> Self {
        match arg {
            PaperArg::A4 => PaperSize::A4,
            PaperArg::A3 => PaperSize::A3,
            PaperArg::A2 => PaperSize::A2,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = rolling_logger::init_logger(&cli.log_dir, "chantier-planning") {
        eprintln!("logging disabled: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> DomainResult<()> {
    let config = PlanningConfig::load(&cli.config)?;
    let db = init_db(&cli.db).await?;
    let store = Arc::new(SqliteStore::new(db.connection()));
    let adapter = Arc::new(PersistenceAdapter::new(store, config.max_payload_bytes));
    let options = SessionOptions {
        today: cli.today,
        ..Default::default()
    };

    match cli.command {
        Commands::Sync { project, feed, keep_saved } => {
            let raw = std::fs::read_to_string(&feed)?;
            let feed: serde_json::Value = serde_json::from_str(&raw)?;
            let snapshot = if keep_saved {
                let lots = sync::normalize_feed(&feed);
                let session = PlanningSession::open_or_sync(&project, config, adapter, options, &lots).await?;
                session.flush().await?;
                session.snapshot()
            } else {
                let mut session = PlanningSession::open(&project, config, adapter, options).await?;
                let snapshot = session.resync_from_json(&feed)?;
                session.flush().await?;
                snapshot
            };
            println!("{}: {} lots, {} items", project, snapshot.lots().count(), snapshot.items.len());
        }
        Commands::Show { project, json } => {
            let session = PlanningSession::open(&project, config, adapter, options).await?;
            let snapshot = session.snapshot();
            if json {
                println!("{}", serde_json::to_string_pretty(&*snapshot)?);
                return Ok(());
            }
            let progress = aggregate::progress_by_lot(&snapshot);
            for (group, depth) in tree::flatten_groups(&snapshot.groups, &snapshot.collapsed) {
                let item = if group.is_lot() {
                    snapshot.header_of(&group.id)
                } else {
                    group.task_id().and_then(|id| snapshot.task_item(id))
                };
                let Some(item) = item else {
                    println!("{}{}", "  ".repeat(depth), group.title);
                    continue;
                };
                let percent = progress.get(&group.id).copied().unwrap_or(item.progress);
                println!(
                    "{}{}  {} -> {}  {}%",
                    "  ".repeat(depth),
                    group.title,
                    time::ms_to_date(item.start_time),
                    time::ms_to_date(item.end_time),
                    percent
                );
            }
        }
        Commands::Repair { project, structural } => {
            let mut session = PlanningSession::open(&project, config, adapter, options).await?;
            if structural {
                let (report, _) = session.structural_repair()?;
                println!(
                    "{} lots, {} tasks, {} recovered, {} defaulted, {} dropped",
                    report.lots,
                    report.tasks,
                    report.recovered.len(),
                    report.defaulted.len(),
                    report.dropped.len()
                );
            } else {
                session.repair_references()?;
            }
            session.flush().await?;
        }
        Commands::Export { project, paper, portrait, from, to } => {
            let session = PlanningSession::open(&project, config, adapter, options).await?;
            let options = ExportOptions {
                paper: paper.into(),
                orientation: if portrait { Orientation::Portrait } else { Orientation::Landscape },
                range: if from.is_some() { RangeMode::Custom } else { RangeMode::Full },
                custom_start: from,
                custom_end: to,
                title: Some(project.clone()),
                ..Default::default()
            };
            let document = session.export(&options)?;
            println!("{}", serde_json::to_string_pretty(&document)?);
        }
        Commands::List => {
            for key in adapter.keys(&config.storage_key_prefix).await? {
                println!("{}", key.trim_start_matches(config.storage_key_prefix.as_str()));
            }
        }
        Commands::Delete { project } => {
            let key = config.storage_key(&project);
            if !adapter.delete(&key).await? {
                return Err(DomainError::NotFound(format!("Project {}", project)));
            }
        }
    }
    Ok(())
}
