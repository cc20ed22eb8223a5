use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use stellar_rent_sync::store::{EventQuery, LogQuery, LogStatus};
use stellar_rent_sync::sync::maintenance::DEFAULT_RETENTION_DAYS;
use stellar_rent_sync::{SyncConfig, SyncError, SyncService};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Blockchain sync service for the StellarRent booking contract
#[derive(Parser)]
#[command(name = "stellar-rent-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
	/// SQLite database file (overrides SYNC_DATABASE_PATH)
	#[arg(long, value_name = "FILE", global = true)]
	database: Option<PathBuf>,

	/// Enable verbose logging (debug level)
	#[arg(short, long, global = true)]
	verbose: bool,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Poll the contract until interrupted
	Run,
	/// Run a single poll cycle and exit
	SyncOnce,
	/// Show sync statistics
	Stats,
	/// Reprocess events that failed
	RetryFailed,
	/// Delete events and logs older than the given number of days
	ClearOld {
		#[arg(long, default_value_t = DEFAULT_RETENTION_DAYS)]
		days: u32,
	},
	/// List recorded events, newest first
	Events {
		/// Only events of this type (e.g. booking_created)
		#[arg(long = "type")]
		event_type: Option<String>,
		/// Only processed (true) or unprocessed (false) events
		#[arg(long, action = clap::ArgAction::Set)]
		processed: Option<bool>,
		#[arg(long, default_value_t = 50)]
		limit: u32,
		#[arg(long, default_value_t = 0)]
		offset: u32,
	},
	/// List sync log entries, newest first
	Logs {
		/// Only entries with this status (success or error)
		#[arg(long, value_parser = parse_log_status)]
		status: Option<LogStatus>,
		#[arg(long)]
		operation: Option<String>,
		#[arg(long, default_value_t = 50)]
		limit: u32,
		#[arg(long, default_value_t = 0)]
		offset: u32,
	},
}

fn parse_log_status(raw: &str) -> Result<LogStatus, String> {
	LogStatus::parse(raw).ok_or_else(|| format!("unknown log status: {raw}"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
	let cli = Cli::parse();

	let default_level = if cli.verbose { "debug" } else { "info" };
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.init();

	match run(cli).await {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			error!("{}", e);
			ExitCode::FAILURE
		}
	}
}

async fn run(cli: Cli) -> Result<(), SyncError> {
	let mut config = SyncConfig::from_env()?;
	if let Some(database) = cli.database {
		config.database_path = database;
	}
	let service = SyncService::from_config(&config)?;

	match cli.command {
		Commands::Run => run_until_interrupted(&service).await?,
		Commands::SyncOnce => {
			service.start().await?;
			let result = service.trigger_manual_sync().await;
			service.stop().await;
			print_json(&result?);
		}
		Commands::Stats => print_json(&service.sync_stats().await?),
		Commands::RetryFailed => print_json(&service.retry_failed_events().await?),
		Commands::ClearOld { days } => print_json(&service.clear_old_data(days).await?),
		Commands::Events {
			event_type,
			processed,
			limit,
			offset,
		} => {
			let events = service
				.list_events(EventQuery {
					event_type,
					processed,
					limit,
					offset,
				})
				.await?;
			print_json(&events);
		}
		Commands::Logs {
			status,
			operation,
			limit,
			offset,
		} => {
			let logs = service
				.list_logs(LogQuery {
					status,
					operation,
					limit,
					offset,
				})
				.await?;
			print_json(&logs);
		}
	}

	Ok(())
}

async fn run_until_interrupted(service: &SyncService) -> Result<(), SyncError> {
	let mut updates = service.subscribe();
	service.start().await?;

	loop {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => {
				info!("Shutdown signal received");
				break;
			}
			changed = updates.changed() => {
				if changed.is_err() {
					break;
				}
				let status = updates.borrow_and_update().clone();
				info!(
					last_processed_block = status.last_processed_block,
					current_block_height = status.current_block_height,
					total_events_processed = status.total_events_processed,
					failed_events = status.failed_events,
					"Sync status"
				);
			}
		}
	}

	service.stop().await;
	Ok(())
}

fn print_json<T: Serialize>(value: &T) {
	match serde_json::to_string_pretty(value) {
		Ok(json) => println!("{}", json),
		Err(e) => error!("Failed to render output: {}", e),
	}
}
