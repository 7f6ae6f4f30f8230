//! seqguard CLI
//!
//! Allocates, parses and repairs document codes against the configured
//! PostgreSQL database.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use seqguard::{
    parse_code, CodeAllocator, CodeRepairService, DocumentType, PgRecordStore, RepairOptions,
    SeqguardConfig, TableKind,
};
use seqguard_cli::{
    load_config, render_allocation, render_bulk, render_counters, render_metrics, render_parsed, render_report,
    scope_ref,
};
use std::path::PathBuf;
use std::process;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "seqguard")]
#[command(about = "Document code sequencing tool")]
#[command(version = "0.1.0")]
struct Cli {
    /// Database connection URL
    #[arg(long)]
    database_url: Option<String>,

    /// Configuration file
    #[arg(long, default_value = "config/config.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    quiet: bool,

    /// Print collected metrics (Prometheus text format) to stderr on exit
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct ScopeArgs {
    /// Scope code (warehouse, product line, ...)
    #[arg(long)]
    scope: Option<String>,

    /// Cost center whose code is the scope
    #[arg(long)]
    cost_center: Option<Uuid>,

    /// Use the configured organization scope
    #[arg(long)]
    organization: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the counter table
    Init,

    /// Allocate the next code of a document type (SCO, ROM, RDV, ITEM or a document prefix)
    Allocate {
        doc_type: DocumentType,
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Allocate a batch of consecutive codes
    Bulk {
        doc_type: DocumentType,
        #[command(flatten)]
        scope: ScopeArgs,
        /// Number of codes
        #[arg(long)]
        count: u32,
    },

    /// Split a code into type, scope and sequence
    Parse { code: String },

    /// Renumber every record of a table in creation order
    Repair {
        /// requisitions, documents, manifests or materials
        table: TableKind,

        /// Show what would change without writing
        #[arg(long)]
        dry_run: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List lane counters
    Counters,
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let print_metrics = cli.metrics;
    let result = run(cli);
    if print_metrics {
        eprint!("{}", render_metrics());
    }

    match result {
        Ok(()) => process::exit(0),
        Err(e) => {
            eprintln!("{} {e:#}", "Error:".red().bold());
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let Cli { database_url, config, command, .. } = cli;
    let open = || -> Result<(SeqguardConfig, PgRecordStore)> {
        let config = load_config(&config, database_url.clone())?;
        let store = PgRecordStore::connect(&config.database, config.tables.clone())
            .context("connecting to the database")?;
        Ok((config, store))
    };

    match command {
        Commands::Parse { code } => handle_parse(&code),
        Commands::Init => {
            let (_, store) = open()?;
            handle_init(&store)
        }
        Commands::Allocate { doc_type, scope } => {
            let (config, store) = open()?;
            handle_allocate(&store, &config, &doc_type, scope)
        }
        Commands::Bulk { doc_type, scope, count } => {
            let (config, store) = open()?;
            handle_bulk(&store, &config, &doc_type, scope, count)
        }
        Commands::Repair { table, dry_run, json } => {
            let (config, store) = open()?;
            handle_repair(&store, &config, table, dry_run, json)
        }
        Commands::Counters => {
            let (_, store) = open()?;
            handle_counters(&store)
        }
    }
}

fn handle_parse(code: &str) -> Result<()> {
    match parse_code(code) {
        Some(parsed) => {
            println!("{}", render_parsed(&parsed));
            Ok(())
        }
        None => anyhow::bail!("'{code}' is not a valid code"),
    }
}

fn handle_init(store: &PgRecordStore) -> Result<()> {
    store.initialize().context("creating the counter table")?;
    println!("{} counter table {} is ready", "✓".green(), store.tables().counters);
    Ok(())
}

fn handle_allocate(
    store: &PgRecordStore,
    config: &SeqguardConfig,
    doc_type: &DocumentType,
    scope: ScopeArgs,
) -> Result<()> {
    let scope = scope_ref(scope.scope, scope.cost_center, scope.organization)?;
    let allocator = CodeAllocator::new(store, config.allocator.clone());
    let allocation = allocator.allocate(doc_type, &scope)?;
    println!("{}", render_allocation(&allocation));
    Ok(())
}

fn handle_bulk(
    store: &PgRecordStore,
    config: &SeqguardConfig,
    doc_type: &DocumentType,
    scope: ScopeArgs,
    count: u32,
) -> Result<()> {
    let scope = scope_ref(scope.scope, scope.cost_center, scope.organization)?;
    let allocator = CodeAllocator::new(store, config.allocator.clone());
    let batch = allocator.allocate_bulk(doc_type, &scope, count)?;
    println!("{}", render_bulk(&batch));
    Ok(())
}

fn handle_repair(
    store: &PgRecordStore,
    config: &SeqguardConfig,
    table: TableKind,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let service = CodeRepairService::new(store, config.repair.clone());
    let report = service.repair(table, RepairOptions { dry_run })?;

    if json {
        println!("{}", report.to_json()?);
    } else {
        println!("{}", render_report(&report));
    }
    if !report.errors.is_empty() {
        anyhow::bail!("{} record(s) could not be repaired", report.errors.len());
    }
    Ok(())
}

fn handle_counters(store: &PgRecordStore) -> Result<()> {
    let counters = store.list_counters()?;
    println!("{}", render_counters(&counters));
    Ok(())
}
