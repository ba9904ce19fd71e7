use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use shepherd::config::{LogFormat, ShepherdConfig};
use shepherd::context::{ActorContext, Permission};
use shepherd::report::{FilterSet, ReportFormat, ReportRequest, ReportType};
use shepherd::scheduler::ScheduleInput;
use shepherd::Services;

#[derive(Parser)]
#[command(
    name = "shepherd",
    about = "Church-administration report generation and scheduled delivery",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (otherwise SHEPHERD_CONFIG or /etc/shepherd/shepherd.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + scheduler)
    Serve {
        /// Bind address, overrides [server].bind
        #[arg(long)]
        bind: Option<String>,
    },

    /// Generate one report now
    Report {
        /// Report type, e.g. birthdays or member_directory
        report_type: String,

        /// Output format: csv, tsv, spreadsheet or document
        #[arg(long, default_value = "csv")]
        format: String,

        /// Filter as key=value (repeatable), e.g. --filter month=3
        #[arg(long = "filter", value_name = "KEY=VALUE")]
        filters: Vec<String>,

        /// Write to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Manage report schedules
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Run one scheduler pass over due schedules and exit
    RunDue,

    /// List queued deliveries
    Outbox {
        #[arg(long, default_value = "50")]
        limit: usize,

        /// Mark the listed entries as dispatched
        #[arg(long)]
        mark_dispatched: bool,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// List all schedules
    List,

    /// Add a new schedule
    Add {
        #[arg(long)]
        name: String,

        /// Report type
        #[arg(long)]
        report: String,

        /// daily, weekly, monthly or quarterly
        #[arg(long)]
        frequency: String,

        /// Local time of day, HH:MM
        #[arg(long)]
        time: String,

        /// Recipient email (repeatable)
        #[arg(long = "recipient", required = true)]
        recipients: Vec<String>,

        #[arg(long)]
        format: Option<String>,

        /// Filter as key=value (repeatable)
        #[arg(long = "filter", value_name = "KEY=VALUE")]
        filters: Vec<String>,
    },

    /// Remove a schedule and its history
    Remove { id: i64 },

    /// Enable or disable a schedule
    Toggle { id: i64 },

    /// Run a schedule now
    Run { id: i64 },

    /// Show execution history
    History {
        id: i64,
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Preview what will run in the next N hours
    DryRun {
        /// Hours to preview
        #[arg(long, default_value = "24")]
        hours: u64,
    },
}

fn init_tracing(config: &ShepherdConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Operator running the CLI on the host; holds every permission.
fn cli_actor() -> ActorContext {
    let user = std::env::var("USER").unwrap_or_else(|_| "operator".to_string());
    ActorContext::new(
        format!("cli:{user}"),
        [
            Permission::ViewReports,
            Permission::ViewFinancial,
            Permission::ManageSchedules,
        ],
    )
}

fn split_pairs(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|kv| {
            kv.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .with_context(|| format!("filter must be KEY=VALUE, got '{kv}'"))
        })
        .collect()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ShepherdConfig::resolve(cli.config.as_deref())?;
    init_tracing(&config);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting shepherd daemon");
            shepherd::serve(&config).await?;
        }
        Commands::Report {
            report_type,
            format,
            filters,
            output,
        } => {
            let report_type: ReportType = report_type.parse()?;
            let format: ReportFormat = format.parse()?;
            let filters = FilterSet::from_pairs(split_pairs(&filters)?)?;
            let services = Services::open(&config)?;
            let request = ReportRequest {
                report_type,
                filters,
                format,
                date_range: None,
            };
            let reports = services.reports.clone();
            let artifact = tokio::task::spawn_blocking(move || reports.generate(&cli_actor(), &request, Utc::now()))
                .await
                .context("report task failed")??;
            match output {
                Some(path) => {
                    std::fs::write(&path, &artifact.bytes)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    eprintln!("{} rows written to {}", artifact.row_count, path.display());
                }
                None => std::io::stdout().write_all(&artifact.bytes)?,
            }
        }
        Commands::Schedule { action } => {
            let services = Services::open(&config)?;
            let actor = cli_actor();
            let scheduler = &services.scheduler;
            match action {
                ScheduleAction::List => {
                    let schedules = scheduler.list(&actor)?;
                    println!(
                        "{:<5} | {:<28} | {:<20} | {:<9} | {:<6} | Next run",
                        "ID", "Name", "Report", "Frequency", "Active"
                    );
                    println!("{:-<5}-|-{:-<28}-|-{:-<20}-|-{:-<9}-|-{:-<6}-|-{:-<20}", "", "", "", "", "", "");
                    for s in schedules {
                        println!(
                            "{:<5} | {:<28} | {:<20} | {:<9} | {:<6} | {}",
                            s.id,
                            s.name,
                            s.report_type,
                            s.frequency,
                            if s.is_active { "yes" } else { "no" },
                            s.next_run.to_rfc3339()
                        );
                    }
                }
                ScheduleAction::Add {
                    name,
                    report,
                    frequency,
                    time,
                    recipients,
                    format,
                    filters,
                } => {
                    let input = ScheduleInput {
                        name,
                        report_type: report,
                        frequency,
                        time_of_day: time,
                        recipients,
                        format,
                        filters: split_pairs(&filters)?
                            .into_iter()
                            .map(|(k, v)| (k, serde_json::Value::String(v)))
                            .collect(),
                        ..Default::default()
                    };
                    let schedule = scheduler.create(&actor, &input, Utc::now())?;
                    println!("Created schedule {} (next run {})", schedule.id, schedule.next_run.to_rfc3339());
                }
                ScheduleAction::Remove { id } => {
                    scheduler.delete(&actor, id)?;
                    println!("Removed schedule {id}");
                }
                ScheduleAction::Toggle { id } => {
                    let s = scheduler.toggle(&actor, id, Utc::now())?;
                    println!("Schedule {id} is now {}", if s.is_active { "active" } else { "inactive" });
                }
                ScheduleAction::Run { id } => {
                    let record = services.runner.run_one(&actor, id, Utc::now()).await?;
                    print_json(&record)?;
                }
                ScheduleAction::History { id, limit } => {
                    print_json(&scheduler.executions(&actor, id, limit)?)?;
                }
                ScheduleAction::DryRun { hours } => {
                    let upcoming = scheduler.preview(&actor, hours, Utc::now())?;
                    println!("Upcoming runs in the next {hours} hours:");
                    for (at, name, report_type) in upcoming {
                        println!("  {}  {:<28} {}", at.to_rfc3339(), name, report_type);
                    }
                }
            }
        }
        Commands::RunDue => {
            let services = Services::open(&config)?;
            let summary = services.runner.run_due(Utc::now()).await;
            print_json(&summary)?;
        }
        Commands::Outbox { limit, mark_dispatched } => {
            let services = Services::open(&config)?;
            let pending = services.outbox.pending(limit)?;
            print_json(&pending)?;
            if mark_dispatched {
                let ids: Vec<i64> = pending.iter().map(|e| e.id).collect();
                let n = services.outbox.mark_dispatched(&ids)?;
                eprintln!("{n} entries marked dispatched");
            }
        }
    }

    Ok(())
}
