//! Operator CLI for the payment reconciliation sweep.
//!
//! Connects to the ledger database named by `DATABASE_URL`, recomputes the
//! derived fields of every payment record and prints a summary.

use anyhow::Context;
use clap::Parser;
use fee_ledger_service::config::FeeLedgerConfig;
use fee_ledger_service::services::{Database, ReconcileOptions, ReconcileReport, Reconciler};
use service_core::observability::init_cli_tracing;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(
    name = "fee-reconcile",
    version,
    about = "Recompute total and remaining amounts for all payment records"
)]
struct Args {
    /// Report the changes without writing them
    #[arg(long)]
    dry_run: bool,

    /// Records per batch (defaults to RECONCILE_BATCH_SIZE)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(i64).range(1..))]
    batch_size: Option<i64>,

    /// Print the report as JSON instead of text
    #[arg(long)]
    json: bool,

    /// Only print the summary line, not every dry-run change
    #[arg(long, short)]
    quiet: bool,
}

fn print_report(report: &ReconcileReport, quiet: bool) {
    if !quiet {
        for change in &report.changes {
            println!(
                "{}  total {} -> {}  remaining {} -> {}",
                change.payment_id,
                change.old_total_amount,
                change.new_total_amount,
                change.old_remaining_amount,
                change.new_remaining_amount
            );
        }
    }
    println!("{}", report);
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = FeeLedgerConfig::from_env().context("Failed to load configuration")?;
    init_cli_tracing(&config.log_level);

    let db = Database::new(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await
    .context("Failed to connect to the ledger database")?;

    let options = ReconcileOptions::new(
        args.batch_size.unwrap_or(config.reconcile.batch_size),
        args.dry_run,
    );

    let report = Reconciler::new(Arc::new(db))
        .run(options)
        .await
        .context("Reconciliation failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, args.quiet);
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fee-reconcile: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
