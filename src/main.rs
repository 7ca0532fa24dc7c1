use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use quire_sync::config;
use quire_sync::observability::init_observability;
use serde_json::json;

#[derive(Parser)]
#[command(name = "quire", about = "Quire - collaborative document sync store")]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Apply pending schema migrations to the configured database
	Migrate,
	/// Check that the database accepts queries
	Ping,
	/// Show the stored version and update log size of a document
	Inspect {
		/// Document (note) identifier
		document: String,
	},
	/// Print a document's update log as JSON lines, oldest clock first
	History {
		document: String,
		/// Only records created after this RFC 3339 timestamp
		#[arg(long, conflicts_with = "after_clock")]
		since: Option<DateTime<Utc>>,
		/// Only records with a clock greater than this
		#[arg(long)]
		after_clock: Option<i64>,
	},
	/// Delete a document together with its update log
	Delete {
		document: String,
		/// Confirm the deletion
		#[arg(long)]
		yes: bool,
	},
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();

	// A broken config must not quietly fall back to the default database.
	let settings = config::load().context("load configuration")?;
	let obs = init_observability(&settings)?;

	// Connecting also applies pending migrations
	let sync = quire_sync::connect(&settings, obs.metrics.clone())
		.await
		.context("connect to document store")?;

	match cli.command {
		Commands::Migrate => println!("Schema is up to date."),
		Commands::Ping => {
			sync.ping().await?;
			println!("OK");
		}
		Commands::Inspect { document } => match sync.get_document(&document).await? {
			Some(doc) => {
				let log_len = sync.count_updates(&document).await?;
				println!(
					"{}",
					json!({
						"id": doc.id,
						"version": doc.version,
						"state_bytes": doc.state.len(),
						"updated_at": doc.updated_at,
						"log_records": log_len,
					})
				);
			}
			None => bail!("document '{}' is not initialized", document),
		},
		Commands::History {
			document,
			since,
			after_clock,
		} => {
			let records = match since {
				Some(since) => sync.list_updates_since(&document, since).await?,
				None => {
					sync.list_updates_after(&document, after_clock.unwrap_or(0))
						.await?
				}
			};
			for r in records {
				println!(
					"{}",
					json!({
						"clock": r.clock,
						"created_at": r.created_at,
						"payload_bytes": r.payload.len(),
					})
				);
			}
		}
		Commands::Delete { document, yes } => {
			if !yes {
				bail!("refusing to delete '{}' without --yes", document);
			}
			if sync.delete_document(&document).await? {
				println!("Deleted '{}'.", document);
			} else {
				println!("Document '{}' did not exist.", document);
			}
		}
	}

	Ok(())
}
