// src/main.rs

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tributary::sync::clients;
use tributary::sync::log;

const DEFAULT_DB_PATH: &str = "/var/lib/tributary/replica.db";

#[derive(Parser)]
#[command(name = "tributary")]
#[command(author, version, about = "Embedded bi-directional SQL replication engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a replica store (metadata tables and origin identity)
    Init {
        /// Database path
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Show replication status (origin, watermarks, log size)
    Status {
        /// Database path
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Install change-capture triggers on a table
    Track {
        /// Table to replicate
        table: String,
        /// Database path
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Show pending change-log entries
    Log {
        /// Start after this version
        #[arg(long, default_value = "0")]
        from: i64,
        /// Maximum entries to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Database path
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// List known peers and their watermarks
    Clients {
        /// Database path
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Purge log entries every known peer has already seen
    Purge {
        /// Database path
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Compute a snapshot hash over one or more tables
    Hash {
        /// Tables to hash
        #[arg(required = true)]
        tables: Vec<String>,
        /// Database path
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_path } => {
            info!("Initializing replica store at: {}", db_path);
            let conn = tributary::db::init(&db_path)?;
            println!("Replica store initialized at: {}", db_path);
            println!("Origin: {}", log::origin_id(&conn)?);
        }
        Commands::Status { db_path } => {
            let conn = tributary::db::open(&db_path)?;
            println!("Origin:              {}", log::origin_id(&conn)?);
            println!("Last pulled version: {}", log::last_server_version(&conn)?);
            println!("Last pushed version: {}", log::last_push_version(&conn)?);
            println!("Log entries:         {}", log::log_count(&conn)?);
            println!("Oldest log version:  {}", log::oldest_version(&conn)?);
            println!("Latest log version:  {}", log::latest_version(&conn)?);
        }
        Commands::Track { table, db_path } => {
            let conn = tributary::db::open(&db_path)?;
            log::install_triggers(&conn, &table)?;
            println!("Change capture enabled on table: {}", table);
        }
        Commands::Log {
            from,
            limit,
            db_path,
        } => {
            let conn = tributary::db::open(&db_path)?;
            let entries = log::fetch_entries(&conn, from, limit)?;
            if entries.is_empty() {
                println!("No log entries after version {}", from);
            }
            for entry in entries {
                println!(
                    "{:>8}  {:<8}  {:<20}  {}  origin={}",
                    entry.version,
                    entry.operation.as_str(),
                    entry.table_name,
                    entry.pk_value,
                    entry.origin
                );
            }
        }
        Commands::Clients { db_path } => {
            let conn = tributary::db::open(&db_path)?;
            let known = clients::list_clients(&conn)?;
            if known.is_empty() {
                println!("No known peers");
            }
            for client in &known {
                println!(
                    "{}  version={}  last_seen={}",
                    client.origin_id, client.last_sync_version, client.last_sync_timestamp
                );
            }
            if !known.is_empty() {
                println!(
                    "Safe purge version: {}",
                    clients::safe_purge_version(&known)
                );
            }
        }
        Commands::Purge { db_path } => {
            let conn = tributary::db::open(&db_path)?;
            let purged = clients::purge_seen_entries(&conn)?;
            println!("Purged {} log entr(ies)", purged);
        }
        Commands::Hash { tables, db_path } => {
            let conn = tributary::db::open(&db_path)?;
            let hash = tributary::hash::compute_database_hash(&tables, |table| {
                tributary::hash::fetch_rows_sqlite(&conn, table)
            })?;
            println!("{}", hash);
        }
    }

    Ok(())
}
