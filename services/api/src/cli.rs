use crate::infra::build_runtime;
use crate::server;
use clap::{Args, Parser, Subcommand};
use repquest::config::AppConfig;
use repquest::error::AppError;
use repquest::fundraising::{write_pledge_csv, ExportTotals, FundraiserId, SweepReport};
use repquest::telemetry;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(
    name = "RepQuest Fundraising",
    about = "Serve the fundraising API or run settlement and export jobs",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Settle every fundraiser whose close date has passed, then send notifications
    Sweep(SweepArgs),
    /// Write a fundraiser's pledges as CSV
    Export(ExportArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct SweepArgs {
    /// Print the sweep report as JSON instead of a summary
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug)]
pub(crate) struct ExportArgs {
    /// Fundraiser to export
    #[arg(long)]
    pub(crate) fundraiser_id: String,
    /// Destination file (defaults to stdout)
    #[arg(long)]
    pub(crate) output: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Sweep(args) => run_sweep(args).await,
        Command::Export(args) => run_export(args).await,
    }
}

async fn run_sweep(args: SweepArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    let mut runtime = build_runtime(&config)?;

    let report = runtime.service.sweep().await?;
    let dispatch = runtime.dispatcher.flush(&mut runtime.queue).await;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if args.json {
        let body = serde_json::to_string_pretty(&report)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        writeln!(out, "{body}")?;
    } else {
        render_sweep(&mut out, &report)?;
        writeln!(
            out,
            "Notifications: {} delivered, {} failed",
            dispatch.delivered, dispatch.failed
        )?;
    }

    for failed in runtime.dispatcher.failed_deliveries() {
        warn!(
            kind = failed.kind,
            recipient = %failed.recipient,
            subject = %failed.subject,
            attempts = failed.attempts,
            error = %failed.error,
            "notification needs manual resend"
        );
    }
    Ok(())
}

pub(crate) fn render_sweep<W: Write>(out: &mut W, report: &SweepReport) -> io::Result<()> {
    writeln!(
        out,
        "Settlement sweep for {}: {} overdue fundraiser(s)",
        report.run_on, report.examined
    )?;
    for settled in &report.settled {
        writeln!(
            out,
            "- {} settled: {} levels, {} pledges, ${} owed ({} excluded)",
            settled.fundraiser_id,
            settled.total_levels,
            settled.pledges_settled,
            repquest::fundraising::to_cents(settled.total_owed),
            settled.excluded.len()
        )?;
    }
    for claimed in &report.already_claimed {
        writeln!(out, "- {claimed} skipped: claimed by another run")?;
    }
    for failure in &report.failed {
        writeln!(out, "- {} failed: {}", failure.fundraiser_id, failure.error)?;
    }
    Ok(())
}

async fn run_export(args: ExportArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    let runtime = build_runtime(&config)?;

    let rows = runtime
        .service
        .export(&FundraiserId(args.fundraiser_id))
        .await?;
    let totals = ExportTotals::from_rows(&rows);

    match args.output {
        Some(path) => {
            write_pledge_csv(&rows, File::create(&path)?)?;
            eprintln!(
                "Wrote {} pledges ({} settled, ${} owed) to {}",
                totals.pledge_count,
                totals.settled_count,
                repquest::fundraising::to_cents(totals.total_owed),
                path.display()
            );
        }
        None => write_pledge_csv(&rows, io::stdout().lock())?,
    }
    Ok(())
}
